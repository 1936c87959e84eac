//! Control loop: command ingestion, stepping and state publication
//!
//! Owns exactly one physics backend. Every `execute_step`/`get_state` pair
//! runs under the backend lock, so stepping is serialized no matter which
//! thread drives it, and publications leave in step order.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use crate::comm::MessageSink;
use crate::msg::{LowCmdMsg, LowState};
use crate::robot::{JointMap, LowCmd};
use crate::sim::{PhysicsBackend, SimConfig};
use crate::{Error, Result};

use super::{CommandPacer, LastCommand, StepPolicy};

/// Lifecycle of a [`ControlLoop`]
///
/// There is no uninitialized value: a loop exists only once
/// [`ControlLoop::new`] has resolved the joint map, and a failed
/// construction returns the error instead of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    /// Joint map resolved and backend constructed
    Ready,
    /// Backend initialized; steps and commands are accepted
    Running,
    /// Terminal; no further commands or steps
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Counters for commands, steps and publications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Physics steps taken
    pub steps: u64,
    /// State messages delivered
    pub published: u64,
    /// State messages the bus refused
    pub publish_failures: u64,
    /// Commands accepted into the last-command cell
    pub commands_received: u64,
    /// Commands rejected by validation
    pub commands_rejected: u64,
    /// Commands replaced before any step used them
    pub commands_superseded: u64,
}

/// Bridges command arrival and state publication against one backend
pub struct ControlLoop<B: PhysicsBackend> {
    config: SimConfig,
    policy: StepPolicy,
    joints: JointMap,
    backend: Mutex<B>,
    state: RwLock<LoopState>,
    last_command: LastCommand,
    pacer: Mutex<CommandPacer>,
    sink: Box<dyn MessageSink<LowState>>,
    epoch: Instant,
    steps: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    rejected: AtomicU64,
}

impl<B: PhysicsBackend> ControlLoop<B> {
    /// Validate the configuration and resolve the joint map against the
    /// backend, ending in [`LoopState::Ready`]
    pub fn new(
        backend: B,
        config: SimConfig,
        sink: impl MessageSink<LowState> + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let joints = JointMap::build(&backend).map_err(|e| {
            tracing::error!("{}: {}", backend.name(), e);
            e
        })?;
        let policy = StepPolicy::from_config(&config);
        tracing::info!(
            "control loop ready: backend={}, timing={}, dt={}s",
            backend.name(),
            config.timing,
            config.physics.timestep
        );

        Ok(Self {
            pacer: Mutex::new(CommandPacer::new(config.pacing.max_delay())),
            config,
            policy,
            joints,
            backend: Mutex::new(backend),
            state: RwLock::new(LoopState::Ready),
            last_command: LastCommand::new(),
            sink: Box::new(sink),
            epoch: Instant::now(),
            steps: AtomicU64::new(0),
            published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Initialize the backend and enter [`LoopState::Running`]
    ///
    /// On failure the loop ends in [`LoopState::Stopped`] and never runs.
    pub fn start(&self) -> Result<()> {
        let mut backend = self.backend.lock();
        let mut state = self.state.write();
        if *state != LoopState::Ready {
            return Err(Error::InvalidState(format!("cannot start from {}", *state)));
        }

        match backend.initialize(&self.config, &self.joints) {
            Ok(()) => {
                *state = LoopState::Running;
                tracing::info!("control loop running ({})", backend.name());
                Ok(())
            }
            Err(e) => {
                *state = LoopState::Stopped;
                backend.shutdown();
                tracing::error!("backend initialization failed: {}", e);
                Err(startup(e))
            }
        }
    }

    /// Handle one inbound command
    ///
    /// Rejected commands leave the last command untouched. Timer-driven:
    /// the command replaces the last command and `Ok(None)` is returned.
    /// Command-driven: the command steps physics, the state is published and
    /// returned, then the call waits out the pacing delay. Concurrent calls
    /// are processed one at a time.
    pub fn apply_cmd(&self, msg: &LowCmdMsg) -> Result<Option<LowState>> {
        self.ensure_running()?;
        let cmd = match msg.validate() {
            Ok(cmd) => cmd,
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("rejected command tick={}: {}", msg.tick, e);
                return Err(e);
            }
        };

        match self.policy {
            StepPolicy::TimerDriven { .. } => {
                self.last_command.write(cmd);
                Ok(None)
            }
            StepPolicy::CommandDriven { .. } => {
                let mut pacer = self.pacer.lock();
                self.last_command.write(cmd);
                let (cmd, _) = self.last_command.read();
                let published = self.step_and_publish(&cmd)?;

                let stamp = msg
                    .stamp
                    .unwrap_or_else(|| self.epoch.elapsed().as_secs_f64());
                let delay = pacer.delay_for(stamp);
                if !delay.is_zero() {
                    tracing::debug!("pacing {:?} after tick {}", delay, published.tick);
                    thread::sleep(delay);
                }
                pacer.commit(stamp);
                Ok(Some(published))
            }
        }
    }

    /// One timer tick: step with the last command and publish
    pub fn tick(&self) -> Result<LowState> {
        if !self.policy.steps_on_tick() {
            return Err(Error::InvalidState(
                "ticks are not used in command-driven timing".into(),
            ));
        }
        let (cmd, _) = self.last_command.read();
        self.step_and_publish(&cmd)
    }

    fn step_and_publish(&self, cmd: &LowCmd) -> Result<LowState> {
        let mut backend = self.backend.lock();
        self.ensure_running()?;

        let outcome = backend
            .execute_step(&cmd.targets())
            .and_then(|()| backend.get_state());
        let robot_state = match outcome {
            Ok(s) => s,
            Err(e) => {
                if e.is_fatal() {
                    tracing::error!("{}; stopping control loop", e);
                    *self.state.write() = LoopState::Stopped;
                    backend.shutdown();
                }
                return Err(e);
            }
        };

        let tick = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        let msg = LowState::from_robot_state(&robot_state, tick);
        match self.sink.deliver(msg) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("tick {}: {}", tick, e);
            }
        }
        Ok(msg)
    }

    /// Stop accepting commands, then tear the backend down after any
    /// in-flight step
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), LoopState::Stopped);
        if previous == LoopState::Stopped {
            return;
        }
        let mut backend = self.backend.lock();
        backend.shutdown();
        tracing::info!(
            "control loop stopped after {} steps",
            self.steps.load(Ordering::Relaxed)
        );
    }

    fn ensure_running(&self) -> Result<()> {
        match *self.state.read() {
            LoopState::Running => Ok(()),
            other => Err(Error::InvalidState(format!("control loop is {}", other))),
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.read()
    }

    pub fn policy(&self) -> StepPolicy {
        self.policy
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn joint_map(&self) -> &JointMap {
        &self.joints
    }

    pub fn step_count(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    /// The command the next step would use
    pub fn last_command(&self) -> LowCmd {
        self.last_command.peek()
    }

    /// Simulated time of the backend
    pub fn sim_time(&self) -> f64 {
        self.backend.lock().sim_time()
    }

    /// Run a closure against the backend under the step lock
    pub fn with_backend<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(&self.backend.lock())
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            steps: self.steps.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            commands_received: self.last_command.received(),
            commands_rejected: self.rejected.load(Ordering::Relaxed),
            commands_superseded: self.last_command.superseded(),
        }
    }
}

fn startup(e: Error) -> Error {
    if e.is_startup_failure() {
        e
    } else {
        Error::Init(e.to_string())
    }
}
