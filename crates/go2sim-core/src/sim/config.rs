//! Simulation configuration
//!
//! Supplied once at startup (usually from a TOML file) and consumed
//! read-only afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::math::all_finite;
use crate::robot::NUM_JOINTS;
use crate::{Error, Result};

/// Which physics substrate drives the simulation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Full rigid-body engine with contact resolution
    #[default]
    Engine,
    /// Dynamics library with a floor-only compliant contact model
    Dynamics,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine => write!(f, "engine"),
            Self::Dynamics => write!(f, "dynamics"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "engine" => Ok(Self::Engine),
            "dynamics" => Ok(Self::Dynamics),
            other => Err(Error::Config(format!("unknown backend `{}`", other))),
        }
    }
}

/// When physics steps and state is published
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// Fixed-period timer steps physics; commands only replace the last command
    #[default]
    Timer,
    /// Every accepted command steps physics, paced by command timestamps
    Command,
}

impl std::fmt::Display for TimingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timer => write!(f, "timer"),
            Self::Command => write!(f, "command"),
        }
    }
}

impl std::str::FromStr for TimingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "timer" => Ok(Self::Timer),
            "command" => Ok(Self::Command),
            other => Err(Error::Config(format!("unknown timing mode `{}`", other))),
        }
    }
}

/// Largest accepted physics timestep in seconds
pub const MAX_TIMESTEP: f64 = 1.0;

/// Largest accepted pacing cap in seconds
pub const MAX_PACING_DELAY: f64 = 60.0;

/// Contact material and compliance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Material name handed to the backend
    pub material: String,
    /// Contact compliance (m/N); 0 means rigid
    pub compliance: f64,
    /// Normal stiffness (N/m)
    pub stiffness: f64,
    /// Normal damping (N·s/m)
    pub damping: f64,
    /// Friction coefficient
    pub friction: f64,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            material: "metal".into(),
            compliance: 0.0,
            stiffness: 2.0e4,
            damping: 8.0e2,
            friction: 1.0,
        }
    }
}

/// Physics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Simulation timestep in seconds
    pub timestep: f64,
    /// Gravity vector [x, y, z] in m/s²
    pub gravity: [f64; 3],
    /// Contact parameters
    pub contact: ContactConfig,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            timestep: 0.002, // 500 Hz
            gravity: [0.0, 0.0, -9.81],
            contact: ContactConfig::default(),
        }
    }
}

/// Default standing-on-the-ground joint configuration, canonical order
pub const DEFAULT_INITIAL_JOINT_POSITIONS: [f64; NUM_JOINTS] = [
    0.0, 1.00, -2.51, // FR
    0.0, 1.09, -2.61, // FL
    0.2, 1.19, -2.59, // RR
    -0.2, 1.32, -2.79, // RL
];

/// Robot description and initial configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Robot description resource, opaque to this crate
    pub description: PathBuf,
    /// Initial joint positions (rad), canonical order
    pub initial_joint_positions: [f64; NUM_JOINTS],
    /// Initial base position [x, y, z] (m)
    pub base_position: [f64; 3],
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            description: PathBuf::from("go2_description/urdf/go2.urdf"),
            initial_joint_positions: DEFAULT_INITIAL_JOINT_POSITIONS,
            base_position: [0.0, 0.0, 0.3],
        }
    }
}

/// Bus topic names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicNames {
    /// Inbound command topic
    pub command: String,
    /// Outbound state topic
    pub state: String,
    /// Per-subscriber buffer size
    pub buffer_size: usize,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            command: "/lowcmd".into(),
            state: "/lowstate".into(),
            buffer_size: 10,
        }
    }
}

/// Command-driven pacing limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Upper bound on a single pacing delay in seconds
    pub max_delay: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self { max_delay: 0.1 }
    }
}

impl PacingConfig {
    /// Upper bound as a duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_delay)
    }
}

/// Overall simulation configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Physics backend variant
    pub backend: BackendKind,
    /// Step/publish timing model
    pub timing: TimingMode,
    /// Physics configuration
    pub physics: PhysicsConfig,
    /// Robot description and initial configuration
    pub robot: RobotConfig,
    /// Bus topics
    pub topics: TopicNames,
    /// Command-driven pacing
    pub pacing: PacingConfig,
}

impl SimConfig {
    /// Parse from a TOML string and validate
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        let dt = self.physics.timestep;
        if !dt.is_finite() || dt <= 0.0 || dt > MAX_TIMESTEP {
            return Err(Error::Config(format!(
                "timestep must be in (0, {}] s, got {}",
                MAX_TIMESTEP, dt
            )));
        }
        if !all_finite(&self.physics.gravity) {
            return Err(Error::Config("gravity must be finite".into()));
        }
        if !all_finite(&self.robot.initial_joint_positions) || !all_finite(&self.robot.base_position)
        {
            return Err(Error::Config("initial configuration must be finite".into()));
        }
        if self.topics.command.is_empty() || self.topics.state.is_empty() {
            return Err(Error::Config("topic names must not be empty".into()));
        }
        if self.topics.buffer_size == 0 {
            return Err(Error::Config("topic buffer size must be at least 1".into()));
        }
        let max_delay = self.pacing.max_delay;
        if !max_delay.is_finite() || !(0.0..=MAX_PACING_DELAY).contains(&max_delay) {
            return Err(Error::Config(format!(
                "pacing.max_delay must be in [0, {}] s, got {}",
                MAX_PACING_DELAY, max_delay
            )));
        }
        Ok(())
    }

    /// Timestep as a duration
    pub fn timestep(&self) -> Duration {
        Duration::from_secs_f64(self.physics.timestep)
    }

    /// Set the backend variant
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the timing model
    pub fn with_timing(mut self, timing: TimingMode) -> Self {
        self.timing = timing;
        self
    }

    /// Set the timestep
    pub fn with_timestep(mut self, dt: f64) -> Self {
        self.physics.timestep = dt;
        self
    }

    /// Set the pacing cap
    pub fn with_max_pacing_delay(mut self, seconds: f64) -> Self {
        self.pacing.max_delay = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.physics.timestep, 0.002);
        assert_eq!(config.physics.gravity[2], -9.81);
        assert_eq!(config.backend, BackendKind::Engine);
        assert_eq!(config.timing, TimingMode::Timer);
        assert_eq!(config.topics.command, "/lowcmd");
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let config = SimConfig::from_toml_str(
            r#"
            backend = "dynamics"
            timing = "command"

            [physics]
            timestep = 0.001

            [physics.contact]
            material = "rubber"
            compliance = 1e-5

            [topics]
            state = "/sim/lowstate"

            [pacing]
            max_delay = 0.05
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Dynamics);
        assert_eq!(config.timing, TimingMode::Command);
        assert_eq!(config.physics.timestep, 0.001);
        assert_eq!(config.physics.contact.material, "rubber");
        assert_eq!(config.physics.contact.friction, 1.0);
        assert_eq!(config.topics.command, "/lowcmd");
        assert_eq!(config.topics.state, "/sim/lowstate");
        assert_eq!(config.pacing.max_delay(), Duration::from_millis(50));
        assert_eq!(
            config.robot.initial_joint_positions,
            DEFAULT_INITIAL_JOINT_POSITIONS
        );
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped = include_str!("../../../go2sim-bridge/config/sim.toml");
        assert_eq!(SimConfig::from_toml_str(shipped).unwrap(), SimConfig::default());
    }

    #[test]
    fn test_invalid_timestep() {
        let err = SimConfig::default().with_timestep(0.0).validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(SimConfig::default().with_timestep(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_huge_timestep_rejected() {
        let err = SimConfig::default().with_timestep(1e30).validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(SimConfig::default().with_timestep(MAX_TIMESTEP).validate().is_ok());
    }

    #[test]
    fn test_huge_pacing_cap_rejected() {
        let err = SimConfig::default()
            .with_max_pacing_delay(1e30)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(SimConfig::from_toml_str("[pacing]\nmax_delay = 1e30").is_err());
        assert!(SimConfig::default()
            .with_max_pacing_delay(MAX_PACING_DELAY)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            SimConfig::from_toml_str("backend = \"bullet\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_negative_pacing() {
        assert!(SimConfig::default()
            .with_max_pacing_delay(-1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!("dynamics".parse::<BackendKind>().unwrap(), BackendKind::Dynamics);
        assert_eq!("command".parse::<TimingMode>().unwrap(), TimingMode::Command);
        assert!("bullet".parse::<BackendKind>().is_err());
    }
}
