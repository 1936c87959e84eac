//! Bridge node: the timer and the command subscription around a control loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::comm::Receiver;
use crate::control::{
    ControlLoop, LoopState, StepPolicy, Timer, TimerConfig, TimerHandle, TimerStats,
};
use crate::msg::LowCmdMsg;
use crate::sim::PhysicsBackend;
use crate::{Error, Result};

/// How long the command thread waits before re-checking for shutdown
const COMMAND_POLL: Duration = Duration::from_millis(20);

/// Forwards bus commands into a [`ControlLoop`] and drives its timer
///
/// State leaves through the sink the control loop was built with.
pub struct BridgeNode<B: PhysicsBackend + 'static> {
    control: Arc<ControlLoop<B>>,
    commands: Receiver<LowCmdMsg>,
}

impl<B: PhysicsBackend + 'static> BridgeNode<B> {
    pub fn new(control: ControlLoop<B>, commands: Receiver<LowCmdMsg>) -> Self {
        Self {
            control: Arc::new(control),
            commands,
        }
    }

    /// Start the control loop and its worker threads
    ///
    /// Fails without spawning anything if the backend cannot be initialized.
    pub fn spawn(self) -> Result<BridgeHandle<B>> {
        self.control.start()?;
        let running = Arc::new(AtomicBool::new(true));

        let timer = match self.control.policy() {
            StepPolicy::TimerDriven { period } => {
                let control = self.control.clone();
                let running = running.clone();
                let config = TimerConfig::new(period).with_name("lowstate_timer");
                tracing::info!("timer-driven stepping at {:.0} Hz", config.rate_hz());
                Some(Timer::spawn(config, move |_| {
                    if !running.load(Ordering::Relaxed) {
                        return Ok(false);
                    }
                    match control.tick() {
                        Ok(_) => Ok(true),
                        Err(e) => {
                            running.store(false, Ordering::Relaxed);
                            if e.is_fatal() {
                                Err(e)
                            } else {
                                Ok(false)
                            }
                        }
                    }
                }))
            }
            StepPolicy::CommandDriven { max_delay } => {
                tracing::info!("command-driven stepping, pacing capped at {:?}", max_delay);
                None
            }
        };

        let commands = {
            let control = self.control.clone();
            let running = running.clone();
            let receiver = self.commands;
            thread::Builder::new()
                .name("lowcmd".into())
                .spawn(move || command_worker(&control, &receiver, &running))
                .map_err(|e| Error::ControlLoop(format!("cannot spawn command thread: {}", e)))?
        };

        Ok(BridgeHandle {
            control: self.control,
            running,
            timer,
            commands: Some(commands),
        })
    }
}

fn command_worker<B: PhysicsBackend>(
    control: &ControlLoop<B>,
    commands: &Receiver<LowCmdMsg>,
    running: &AtomicBool,
) -> Result<()> {
    while running.load(Ordering::Relaxed) {
        let msg = match commands.recv_timeout(COMMAND_POLL) {
            Ok(Some(msg)) => msg,
            Ok(None) => continue,
            Err(_) => {
                tracing::info!("command topic closed");
                break;
            }
        };

        match control.apply_cmd(&msg) {
            Ok(_) => {}
            Err(e) if e.is_fatal() => {
                running.store(false, Ordering::Relaxed);
                return Err(e);
            }
            Err(_) if control.state() == LoopState::Stopped => break,
            // Already logged; the previous command stays in effect
            Err(_) => {}
        }
    }
    Ok(())
}

/// Handle to a running bridge
pub struct BridgeHandle<B: PhysicsBackend + 'static> {
    control: Arc<ControlLoop<B>>,
    running: Arc<AtomicBool>,
    timer: Option<TimerHandle>,
    commands: Option<JoinHandle<Result<()>>>,
}

impl<B: PhysicsBackend + 'static> BridgeHandle<B> {
    /// Whether the loop is still stepping
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && self.control.state() == LoopState::Running
    }

    pub fn control(&self) -> &ControlLoop<B> {
        &self.control
    }

    /// Timer statistics, if timer-driven
    pub fn timer_stats(&self) -> Option<TimerStats> {
        self.timer.as_ref().map(TimerHandle::stats)
    }

    /// Signal the worker threads to stop at their next suspension point
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(timer) = &self.timer {
            timer.stop();
        }
    }

    /// Stop, wait for the workers and tear the backend down
    ///
    /// Returns the fatal error that ended the loop, if any.
    pub fn join(mut self) -> Result<()> {
        self.stop();
        let timer_result = self.timer.take().map_or(Ok(()), TimerHandle::join);
        let command_result = match self.commands.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::ControlLoop("command thread panicked".into()))
                .and_then(|r| r),
            None => Ok(()),
        };
        self.control.stop();
        timer_result.and(command_result)
    }
}
