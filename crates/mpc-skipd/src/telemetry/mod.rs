//! Player status acquisition.
//!
//! Two interchangeable [`TelemetrySource`]s exist: [`WorkerSource`] polls on
//! its own thread and drops unchanged statuses, [`TimerSource`] polls on the
//! caller's runtime and emits everything. [`Telemetry`] owns whichever is
//! active and switches to the timer, for good, the first time the worker
//! reports `WorkerUnavailable`.

mod fetch;
mod poller;
mod timer;
mod worker;


use std::fmt;

use mpc_proto::config::TelemetryConfig;
use mpc_proto::protocol::{TelemetryError, TelemetryEvent};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use fetch::StatusFetcher;
pub use timer::TimerSource;
pub use worker::WorkerSource;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Worker,
    Timer,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Worker => f.write_str("background worker"),
            SourceMode::Timer => f.write_str("same-thread timer"),
        }
    }
}

/// Control surface shared by both acquisition strategies.
pub trait TelemetrySource: Send {
    fn mode(&self) -> SourceMode;
    fn start(&mut self) -> Result<(), TelemetryError>;
    fn stop(&mut self) -> Result<(), TelemetryError>;
    fn fetch_once(&mut self) -> Result<(), TelemetryError>;
    fn update_config(&mut self, config: TelemetryConfig) -> Result<(), TelemetryError>;
    /// Stops everything and releases threads. Idempotent.
    fn shutdown(&mut self);
}

pub struct Telemetry {
    source: Box<dyn TelemetrySource>,
    client: reqwest::Client,
    config: TelemetryConfig,
    running: bool,
    events_tx: mpsc::Sender<TelemetryEvent>,
    events_rx: mpsc::Receiver<TelemetryEvent>,
}

impl Telemetry {
    /// Must be called inside a tokio runtime.
    pub fn new(config: TelemetryConfig, prefer_worker: bool) -> Result<Self, TelemetryError> {
        let client = StatusFetcher::build_client()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

        let source: Box<dyn TelemetrySource> = if prefer_worker {
            match WorkerSource::spawn(config.clone(), events_tx.clone()) {
                Ok(worker) => Box::new(worker),
                Err(e) => {
                    warn!("telemetry: {}; using {}", e, SourceMode::Timer);
                    Box::new(TimerSource::new(client.clone(), config.clone(), events_tx.clone()))
                }
            }
        } else {
            Box::new(TimerSource::new(client.clone(), config.clone(), events_tx.clone()))
        };
        info!("telemetry: mode = {}", source.mode());

        Ok(Self {
            source,
            client,
            config,
            running: false,
            events_tx,
            events_rx,
        })
    }

    pub fn mode(&self) -> SourceMode {
        self.source.mode()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn start(&mut self) {
        self.running = true;
        self.with_source(|s| s.start());
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.with_source(|s| s.stop());
    }

    pub fn fetch_once(&mut self) {
        self.with_source(|s| s.fetch_once());
    }

    pub fn update_config(&mut self, config: TelemetryConfig) {
        self.config = config.clone();
        self.with_source(move |s| s.update_config(config.clone()));
    }

    /// Next event from the active source. A `WorkerUnavailable` error is
    /// still returned to the caller, after the switch to the timer.
    pub async fn next_event(&mut self) -> Option<TelemetryEvent> {
        let event = self.events_rx.recv().await?;
        if let TelemetryEvent::Error { error, .. } = &event {
            if error.is_fatal_for_worker() {
                self.degrade(error);
            }
        }
        Some(event)
    }

    pub fn shutdown(&mut self) {
        self.running = false;
        self.source.shutdown();
    }

    fn with_source<F>(&mut self, op: F)
    where
        F: Fn(&mut dyn TelemetrySource) -> Result<(), TelemetryError>,
    {
        match op(self.source.as_mut()) {
            Ok(()) => {}
            Err(e) if e.is_fatal_for_worker() => {
                self.degrade(&e);
                if let Err(e) = op(self.source.as_mut()) {
                    warn!("telemetry: {}", e);
                }
            }
            Err(e) => warn!("telemetry: {}", e),
        }
    }

    /// Replaces the worker with a timer source. The timer picks up the
    /// current config and running state. No-op once already degraded.
    fn degrade(&mut self, cause: &TelemetryError) {
        if self.source.mode() == SourceMode::Timer {
            return;
        }
        warn!(
            "telemetry: {}; falling back to {} for this session",
            cause,
            SourceMode::Timer
        );
        self.source.shutdown();
        let mut timer = TimerSource::new(
            self.client.clone(),
            self.config.clone(),
            self.events_tx.clone(),
        );
        if self.running {
            // Infallible for the timer.
            let _ = timer.start();
        }
        self.source = Box::new(timer);
    }

    /// Tears the worker down without telling anyone, as a crashed thread would.
    #[cfg(test)]
    pub(crate) fn kill_source(&mut self) {
        self.source.shutdown();
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.source.shutdown();
    }
}
