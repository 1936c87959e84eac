//! # go2sim-bridge
//!
//! Runs the Go2 joint-level simulator behind `/lowcmd` and `/lowstate`
//! topics until Ctrl-C, a time limit or a fatal simulation error.
//!
//! ```bash
//! go2sim-bridge --config sim.toml --backend dynamics --timing timer --hold-pose
//! RUST_LOG=go2sim_core=debug go2sim-bridge --duration 5
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use go2sim_core::comm::{Topic, TopicConfig};
use go2sim_core::sim::connect_mock_backend;
use go2sim_core::{
    BackendKind, BridgeNode, ControlLoop, LowCmd, LowCmdMsg, LowState, SimConfig, TimingMode,
};

/// Go2 joint-level simulation bridge
#[derive(Parser, Debug)]
#[command(name = "go2sim-bridge")]
#[command(about = "Joint-level Go2 simulation behind a LowCmd/LowState bus", long_about = None)]
#[command(version)]
struct Args {
    /// Simulation configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Physics backend: engine or dynamics
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Step timing: timer or command
    #[arg(long)]
    timing: Option<TimingMode>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<f64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Publish one command holding the initial pose
    #[arg(long)]
    hold_pose: bool,

    /// Position gain for --hold-pose
    #[arg(long, default_value_t = 20.0)]
    hold_kp: f64,

    /// Velocity gain for --hold-pose
    #[arg(long, default_value_t = 0.5)]
    hold_kd: f64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = load_config(&args)?;
    tracing::info!(
        "go2sim-bridge {}: backend={}, timing={}, dt={}s",
        go2sim_core::VERSION,
        config.backend,
        config.timing,
        config.physics.timestep
    );
    tracing::warn!(
        "no external {} substrate linked; using the built-in reference model",
        config.backend
    );

    let backend = connect_mock_backend(&config).context("failed to construct backend")?;
    let lowcmd = Topic::<LowCmdMsg>::with_config(
        TopicConfig::new(config.topics.command.as_str()).buffer_size(config.topics.buffer_size),
    );
    let lowstate = Topic::<LowState>::with_config(
        TopicConfig::new(config.topics.state.as_str()).buffer_size(config.topics.buffer_size),
    );

    let control = ControlLoop::new(backend, config.clone(), lowstate)?;
    let handle = BridgeNode::new(control, lowcmd.subscribe())
        .spawn()
        .context("failed to start bridge")?;

    if args.hold_pose {
        let cmd = LowCmd::hold(
            config.robot.initial_joint_positions,
            args.hold_kp,
            args.hold_kd,
        );
        if !lowcmd.publish(LowCmdMsg::from_cmd(&cmd, 0)).is_complete() {
            tracing::warn!("hold-pose command not delivered");
        }
        tracing::info!(
            "holding initial pose (kp={}, kd={})",
            args.hold_kp,
            args.hold_kd
        );
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) && handle.is_running() {
        if args
            .duration
            .is_some_and(|limit| start.elapsed().as_secs_f64() >= limit)
        {
            tracing::info!("time limit reached");
            break;
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = handle.control().stats();
            tracing::info!(
                "steps={} sim_time={:.3}s published={} publish_failures={}",
                stats.steps,
                handle.control().sim_time(),
                stats.published,
                stats.publish_failures
            );
            last_report = Instant::now();
        }
        thread::sleep(Duration::from_millis(20));
    }

    let stats = handle.control().stats();
    let timer = handle.timer_stats();
    let outcome = handle.join();

    tracing::info!(
        "stopped: steps={}, commands received={} rejected={} superseded={}",
        stats.steps,
        stats.commands_received,
        stats.commands_rejected,
        stats.commands_superseded
    );
    if let Some(timer) = timer {
        tracing::info!(
            "timer: {} ticks, {} overruns ({:.1}%), jitter {:.1}µs",
            timer.iterations,
            timer.overruns,
            timer.overrun_ratio() * 100.0,
            timer.jitter_std_dev() * 1e6
        );
    }

    outcome.context("simulation stopped with an error")
}

fn load_config(args: &Args) -> Result<SimConfig> {
    let mut config = match &args.config {
        Some(path) => SimConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SimConfig::default(),
    };
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(timing) = args.timing {
        config.timing = timing;
    }
    config.validate()?;
    Ok(config)
}
