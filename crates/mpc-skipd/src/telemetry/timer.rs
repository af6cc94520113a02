use mpc_proto::config::TelemetryConfig;
use mpc_proto::protocol::{TelemetryError, TelemetryEvent};
use tokio::sync::mpsc;

use super::poller::{Emitter, Poller};
use super::{SourceMode, TelemetrySource};

/// Same-thread fallback: an interval task on the caller's runtime. Every
/// fetched status is emitted, repeated or not.
pub struct TimerSource {
    poller: Poller,
}

impl TimerSource {
    pub fn new(
        client: reqwest::Client,
        config: TelemetryConfig,
        events: mpsc::Sender<TelemetryEvent>,
    ) -> Self {
        Self {
            poller: Poller::new(client, config, Emitter::new(events, false)),
        }
    }
}

impl TelemetrySource for TimerSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Timer
    }

    fn start(&mut self) -> Result<(), TelemetryError> {
        self.poller.start();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TelemetryError> {
        self.poller.stop();
        Ok(())
    }

    fn fetch_once(&mut self) -> Result<(), TelemetryError> {
        self.poller.fetch_once();
        Ok(())
    }

    fn update_config(&mut self, config: TelemetryConfig) -> Result<(), TelemetryError> {
        self.poller.update_config(config);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.poller.abort_all();
    }
}

impl Drop for TimerSource {
    fn drop(&mut self) {
        self.poller.abort_all();
    }
}
