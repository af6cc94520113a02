//! Fetch-parse-emit cycle shared by both telemetry sources.

use std::sync::{Arc, Mutex};

use mpc_proto::config::TelemetryConfig;
use mpc_proto::protocol::{ErrorContext, SourceState, TelemetryEvent};
use mpc_proto::status::PlaybackSnapshot;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::fetch::StatusFetcher;

/// Sends events to the consumer. With `suppress_repeats` on, a status equal
/// (position, state, path) to the previously emitted one is dropped.
pub(crate) struct Emitter {
    events: mpsc::Sender<TelemetryEvent>,
    last: Option<Mutex<Option<PlaybackSnapshot>>>,
}

impl Emitter {
    pub(crate) fn new(events: mpsc::Sender<TelemetryEvent>, suppress_repeats: bool) -> Self {
        Self {
            events,
            last: suppress_repeats.then(|| Mutex::new(None)),
        }
    }

    async fn fetch_and_emit(&self, fetcher: &StatusFetcher) {
        let event = match fetcher.fetch().await {
            Ok(snapshot) => {
                if !self.is_new(&snapshot) {
                    return;
                }
                TelemetryEvent::Status(snapshot)
            }
            Err(error) => {
                debug!("telemetry: fetch error: {}", error);
                TelemetryEvent::Error {
                    context: ErrorContext::Fetch,
                    error,
                }
            }
        };
        let _ = self.events.send(event).await;
    }

    fn is_new(&self, snapshot: &PlaybackSnapshot) -> bool {
        let Some(last) = &self.last else {
            return true;
        };
        let mut last = match last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if last.as_ref().is_some_and(|prev| !snapshot.differs_from(prev)) {
            return false;
        }
        *last = Some(snapshot.clone());
        true
    }

    /// Non-blocking send for use outside async context.
    pub(crate) fn emit_now(&self, event: TelemetryEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("telemetry: event dropped: {}", e);
        }
    }
}

/// Owns the polling task and any one-shot fetches. Must be driven from
/// inside a tokio runtime; tasks land on whichever runtime that is.
pub(crate) struct Poller {
    client: reqwest::Client,
    fetcher: Arc<StatusFetcher>,
    emitter: Arc<Emitter>,
    poll_task: Option<JoinHandle<()>>,
    oneshots: Vec<JoinHandle<()>>,
}

impl Poller {
    pub(crate) fn new(client: reqwest::Client, config: TelemetryConfig, emitter: Emitter) -> Self {
        Self {
            fetcher: Arc::new(StatusFetcher::new(client.clone(), config)),
            client,
            emitter: Arc::new(emitter),
            poll_task: None,
            oneshots: Vec::new(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.poll_task.is_some()
    }

    /// Mutable access for the worker, which watches the task for panics.
    pub(crate) fn poll_task_mut(&mut self) -> &mut Option<JoinHandle<()>> {
        &mut self.poll_task
    }

    pub(crate) fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let fetcher = Arc::clone(&self.fetcher);
        let emitter = Arc::clone(&self.emitter);
        self.poll_task = Some(tokio::spawn(async move {
            // First tick completes immediately.
            let mut ticker = tokio::time::interval(fetcher.config().interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                emitter.fetch_and_emit(&fetcher).await;
            }
        }));
        self.emitter.emit_now(TelemetryEvent::State(SourceState::Started));
    }

    /// Cancels the timer and every in-flight fetch.
    pub(crate) fn stop(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        for task in self.oneshots.drain(..) {
            task.abort();
        }
        self.emitter.emit_now(TelemetryEvent::State(SourceState::Stopped));
    }

    pub(crate) fn fetch_once(&mut self) {
        self.oneshots.retain(|t| !t.is_finished());
        let fetcher = Arc::clone(&self.fetcher);
        let emitter = Arc::clone(&self.emitter);
        self.oneshots.push(tokio::spawn(async move {
            emitter.fetch_and_emit(&fetcher).await;
        }));
    }

    /// Applies a new endpoint/timeout/interval, restarting if running.
    pub(crate) fn update_config(&mut self, config: TelemetryConfig) {
        let was_running = self.is_running();
        if was_running {
            self.stop();
        }
        self.fetcher = Arc::new(StatusFetcher::new(self.client.clone(), config));
        if was_running {
            self.start();
        }
    }

    /// Cancels everything without emitting a state event.
    pub(crate) fn abort_all(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        for task in self.oneshots.drain(..) {
            task.abort();
        }
    }
}
