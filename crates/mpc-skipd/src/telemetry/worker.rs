//! Background-thread telemetry source.
//!
//! Polling runs on a dedicated OS thread with its own single-threaded tokio
//! runtime, so a busy main runtime cannot delay ticks. The thread shares no
//! state with the caller: it is driven by [`ControlMessage`]s and reports
//! through the event channel, suppressing statuses that did not change.
//!
//! If the thread cannot build its runtime, or the polling task panics, the
//! worker reports `WorkerUnavailable` and exits.

use std::thread::JoinHandle;

use mpc_proto::config::TelemetryConfig;
use mpc_proto::protocol::{ControlMessage, ErrorContext, TelemetryError, TelemetryEvent};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::fetch::StatusFetcher;
use super::poller::{Emitter, Poller};
use super::{SourceMode, TelemetrySource};

pub struct WorkerSource {
    control: mpsc::UnboundedSender<ControlMessage>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerSource {
    pub fn spawn(
        config: TelemetryConfig,
        events: mpsc::Sender<TelemetryEvent>,
    ) -> Result<Self, TelemetryError> {
        let (control, control_rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("mpc-telemetry".to_string())
            .spawn(move || worker_main(control_rx, events))
            .map_err(|e| TelemetryError::WorkerUnavailable(e.to_string()))?;

        let mut source = Self {
            control,
            thread: Some(thread),
        };
        source.send(ControlMessage::Init { config })?;
        info!("telemetry: background worker started");
        Ok(source)
    }

    fn send(&mut self, msg: ControlMessage) -> Result<(), TelemetryError> {
        self.control
            .send(msg)
            .map_err(|_| TelemetryError::WorkerUnavailable("worker thread has exited".to_string()))
    }
}

impl TelemetrySource for WorkerSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Worker
    }

    fn start(&mut self) -> Result<(), TelemetryError> {
        self.send(ControlMessage::Start)
    }

    fn stop(&mut self) -> Result<(), TelemetryError> {
        self.send(ControlMessage::Stop)
    }

    fn fetch_once(&mut self) -> Result<(), TelemetryError> {
        self.send(ControlMessage::FetchOnce)
    }

    fn update_config(&mut self, config: TelemetryConfig) -> Result<(), TelemetryError> {
        self.send(ControlMessage::UpdateConfig { config })
    }

    fn shutdown(&mut self) {
        let _ = self.control.send(ControlMessage::Terminate);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("telemetry: worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(
    mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    events: mpsc::Sender<TelemetryEvent>,
) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TelemetryError::WorkerUnavailable(format!("runtime: {}", e)));
    // The client's connection pool belongs to this thread's runtime.
    let setup = runtime.and_then(|rt| {
        let client = {
            let _guard = rt.enter();
            StatusFetcher::build_client()
        };
        client
            .map(|c| (rt, c))
            .map_err(|e| TelemetryError::WorkerUnavailable(e.to_string()))
    });
    let (runtime, client) = match setup {
        Ok(setup) => setup,
        Err(error) => {
            let _ = events.blocking_send(TelemetryEvent::Error {
                context: ErrorContext::Worker,
                error,
            });
            return;
        }
    };

    runtime.block_on(async move {
        let mut poller: Option<Poller> = None;

        loop {
            tokio::select! {
                msg = control_rx.recv() => {
                    let Some(msg) = msg else { break };
                    debug!("telemetry worker: {:?}", msg);
                    match msg {
                        ControlMessage::Init { config } => {
                            if let Some(mut old) = poller.take() {
                                old.abort_all();
                            }
                            poller = Some(Poller::new(
                                client.clone(),
                                config,
                                Emitter::new(events.clone(), true),
                            ));
                        }
                        ControlMessage::Terminate => break,
                        other => match poller.as_mut() {
                            Some(p) => apply(p, other),
                            None => debug!("telemetry worker: {:?} before init, ignored", other),
                        },
                    }
                }
                joined = wait_poll_task(&mut poller) => {
                    if let Some(p) = poller.as_mut() {
                        *p.poll_task_mut() = None;
                    }
                    if let Err(e) = joined {
                        if e.is_panic() {
                            let _ = events
                                .send(TelemetryEvent::Error {
                                    context: ErrorContext::Worker,
                                    error: TelemetryError::WorkerUnavailable(
                                        "polling task panicked".to_string(),
                                    ),
                                })
                                .await;
                            break;
                        }
                    }
                }
            }
        }

        if let Some(mut p) = poller {
            p.abort_all();
        }
    });
}

fn apply(poller: &mut Poller, msg: ControlMessage) {
    match msg {
        ControlMessage::Start => poller.start(),
        ControlMessage::Stop => poller.stop(),
        ControlMessage::FetchOnce => poller.fetch_once(),
        ControlMessage::UpdateConfig { config } => poller.update_config(config),
        ControlMessage::Init { .. } | ControlMessage::Terminate => {}
    }
}

/// Resolves when the polling task ends; pending forever when there is none.
async fn wait_poll_task(
    poller: &mut Option<Poller>,
) -> Result<(), tokio::task::JoinError> {
    match poller.as_mut().and_then(|p| p.poll_task_mut().as_mut()) {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}
