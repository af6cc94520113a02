//! The event loop tying telemetry, rules, the detector and the command
//! channel together. Everything observable is broadcast as a [`CoreEvent`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mpc_proto::config::Config;
use mpc_proto::protocol::{ErrorContext, SourceState, TelemetryError, TelemetryEvent};
use mpc_proto::rules::{RuleStore, SkipRule};
use mpc_proto::status::PlaybackSnapshot;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::command::{CommandChannel, CommandDispatcher, CommandOutcome, MpcCommandClient};
use crate::detector::{Clock, Detector, DetectorConfig, SkipAction, SystemClock};
use crate::telemetry::Telemetry;

#[derive(Debug, Clone)]
pub enum CoreEvent {
    Status(PlaybackSnapshot),
    Skipped(SkipAction),
    TelemetryState(SourceState),
    TelemetryError {
        context: ErrorContext,
        error: TelemetryError,
    },
    /// A player command finished; `error` is set when it failed.
    Command {
        command: String,
        error: Option<String>,
    },
    Log(String),
}

/// Rule lookup plus detector: one snapshot in, at most one command out.
pub struct SkipEngine<C: Clock = SystemClock> {
    rules: RuleStore,
    detector: Detector<C>,
    enabled: bool,
}

impl SkipEngine<SystemClock> {
    pub fn new(rules: RuleStore, config: DetectorConfig, enabled: bool) -> Self {
        Self::with_detector(rules, Detector::new(config), enabled)
    }
}

impl<C: Clock> SkipEngine<C> {
    pub fn with_detector(rules: RuleStore, detector: Detector<C>, enabled: bool) -> Self {
        Self {
            rules,
            detector,
            enabled,
        }
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn detector(&self) -> &Detector<C> {
        &self.detector
    }

    /// Runs the detector on `snapshot` and hands any resulting action to
    /// `channel`. Rule file edits made since the last call take effect here
    /// and restart tracking as if a new file had started.
    pub fn process(
        &mut self,
        snapshot: &PlaybackSnapshot,
        channel: &dyn CommandChannel,
    ) -> Option<SkipAction> {
        if !self.enabled {
            return None;
        }
        if self.rules.reload_if_changed() {
            self.detector.reset();
        }
        let rule: Option<&SkipRule> = self.rules.find_match(&snapshot.file_path);
        let action = self.detector.observe(snapshot, rule)?;
        action.dispatch(channel);
        Some(action)
    }
}

pub struct SkipCore {
    telemetry: Telemetry,
    engine: SkipEngine,
    dispatcher: CommandDispatcher,
    outcome_rx: mpsc::Receiver<CommandOutcome>,
    broadcast_tx: broadcast::Sender<CoreEvent>,
}

impl SkipCore {
    /// Must be called inside a tokio runtime.
    pub fn new(config: &Config, broadcast_tx: broadcast::Sender<CoreEvent>) -> anyhow::Result<Self> {
        let telemetry = Telemetry::new(config.telemetry_config(), config.telemetry.background_worker)
            .context("starting telemetry")?;

        let rules = RuleStore::open(&config.paths.rules_file);
        info!(
            "loaded {} skip rules from {:?}",
            rules.rules().len(),
            rules.path()
        );
        let engine = SkipEngine::new(rules, DetectorConfig::from(&config.skip), config.skip.enabled);

        let client = MpcCommandClient::new(
            config.command_url(),
            Duration::from_millis(config.player.command_timeout_ms),
        )
        .context("building command client")?;
        let (outcome_tx, outcome_rx) = mpsc::channel(32);
        let dispatcher = CommandDispatcher::new(Arc::new(client), outcome_tx);

        Ok(Self {
            telemetry,
            engine,
            dispatcher,
            outcome_rx,
            broadcast_tx,
        })
    }

    /// Runs until Ctrl-C.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);
        self.telemetry.start();
        info!("core: running, telemetry via {}", self.telemetry.mode());

        loop {
            tokio::select! {
                Some(event) = self.telemetry.next_event() => self.on_telemetry(event),
                Some(outcome) = self.outcome_rx.recv() => self.on_command_outcome(outcome),
                _ = &mut shutdown => {
                    info!("core: shutdown requested");
                    break;
                }
            }
        }

        self.telemetry.stop();
        self.telemetry.shutdown();
        info!("core: stopped");
        Ok(())
    }

    fn on_telemetry(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Status(snapshot) => {
                if let Some(action) = self.engine.process(&snapshot, &self.dispatcher) {
                    let _ = self.broadcast_tx.send(CoreEvent::Skipped(action));
                }
                let _ = self.broadcast_tx.send(CoreEvent::Status(snapshot));
            }
            TelemetryEvent::State(state) => {
                debug!("telemetry: {:?}", state);
                let _ = self.broadcast_tx.send(CoreEvent::TelemetryState(state));
            }
            TelemetryEvent::Error { context, error } => {
                debug!("telemetry {} error: {}", context, error);
                let _ = self
                    .broadcast_tx
                    .send(CoreEvent::TelemetryError { context, error });
            }
        }
    }

    fn on_command_outcome(&mut self, outcome: CommandOutcome) {
        let command = outcome.command.to_string();
        let error = match outcome.result {
            Ok(()) => {
                debug!("command {} ok", command);
                // Show the effect right away instead of on the next tick.
                self.telemetry.fetch_once();
                None
            }
            Err(e) => {
                warn!("command failed: {}", e);
                Some(e.to_string())
            }
        };
        let _ = self.broadcast_tx.send(CoreEvent::Command { command, error });
    }
}
