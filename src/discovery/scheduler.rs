//! Periodic discovery
//!
//! Runs a discovery pass on a background thread at a fixed interval until
//! shut down. A failed pass is logged and retried on the next tick.

use super::runner::{DiscoveryRunner, ShutdownSignal};
use super::PortalQuery;
use crate::registry::TargetRegistry;
use crate::session::SessionDirectory;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Spawns the discovery timer thread
pub struct DiscoveryScheduler;

impl DiscoveryScheduler {
    /// Run a pass now and then every `interval`
    pub fn spawn<Q, R, S>(
        runner: DiscoveryRunner<Q, R, S>,
        interval: Duration,
    ) -> io::Result<SchedulerHandle>
    where
        Q: PortalQuery + 'static,
        R: TargetRegistry + Send + 'static,
        S: SessionDirectory + Send + 'static,
    {
        let shutdown = runner.shutdown_signal();
        let (wake_tx, wake_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("sendtargets-discovery".to_string())
            .spawn(move || {
                log::info!("SendTargets discovery every {:?}", interval);
                let mut passes: u64 = 0;

                loop {
                    if runner.shutdown_signal().is_triggered() {
                        break;
                    }

                    passes += 1;
                    match runner.run_pass() {
                        Ok(report) => log::debug!(
                            "Discovery pass {} finished: {} portal(s), {} failure(s)",
                            passes,
                            report.portals.len(),
                            report.failures()
                        ),
                        Err(e) => log::error!(pass = passes; "discovery pass failed: {}", e),
                    }

                    match wake_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                log::info!("SendTargets discovery stopped after {} pass(es)", passes);
            })?;

        Ok(SchedulerHandle {
            shutdown,
            wake: wake_tx,
            thread: Some(thread),
        })
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    shutdown: ShutdownSignal,
    wake: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop after the portal currently being reconciled and wait for the thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn stop(&mut self) {
        self.shutdown.trigger();
        let _ = self.wake.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("discovery thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
