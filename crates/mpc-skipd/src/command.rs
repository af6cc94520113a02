//! Command transport to the player's web interface.
//!
//! The skip detector only sees [`CommandChannel`]: two fire-and-forget
//! primitives. [`CommandDispatcher`] implements it by spawning each request
//! and reporting the outcome back to the core loop, which logs it and asks
//! telemetry for an immediate refresh.

use std::sync::Arc;
use std::time::Duration;

use mpc_proto::timespec::format_clock;
use reqwest::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Player command id for the percent/position pseudo-command.
const SEEK_COMMAND: i32 = -1;

pub trait CommandChannel: Send + Sync {
    fn send_discrete_command(&self, id: u32);
    fn send_seek_percent(&self, percent: f64);
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Discrete(u32),
    /// 0..=100
    SeekPercent(f64),
    /// Absolute position in milliseconds.
    JumpTo(u64),
}

impl std::fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerCommand::Discrete(id) => write!(f, "wm_command={}", id),
            PlayerCommand::SeekPercent(p) => write!(f, "seek {:.2}%", p),
            PlayerCommand::JumpTo(ms) => write!(f, "jump {}", format_clock(*ms)),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0} timed out")]
    Timeout(String),
    #[error("{command} failed: HTTP {status}")]
    Http { command: String, status: u16 },
    #[error("{command} failed: {source}")]
    Request {
        command: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug)]
pub struct CommandOutcome {
    pub command: PlayerCommand,
    pub result: Result<(), CommandError>,
}

pub struct MpcCommandClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl MpcCommandClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mpc-skipd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub async fn send(&self, command: &PlayerCommand) -> Result<(), CommandError> {
        let request = match command {
            PlayerCommand::Discrete(id) => self.form(format!("wm_command={}&null=0", id)),
            PlayerCommand::SeekPercent(percent) => self
                .client
                .get(format!(
                    "{}?wm_command={}&percent={}",
                    self.url,
                    SEEK_COMMAND,
                    percent.clamp(0.0, 100.0)
                ))
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            PlayerCommand::JumpTo(ms) => self.form(format!(
                "wm_command={}&position={}",
                SEEK_COMMAND,
                urlencoding::encode(&format_clock(*ms))
            )),
        };

        debug!("command: sending {}", command);
        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => return Err(CommandError::Timeout(command.to_string())),
            Ok(Err(source)) => {
                return Err(CommandError::Request {
                    command: command.to_string(),
                    source,
                })
            }
            Ok(Ok(r)) => r,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(CommandError::Http {
                command: command.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn form(&self, body: String) -> reqwest::RequestBuilder {
        self.client
            .post(&self.url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
            )
            .body(body)
    }
}

/// Spawns every command on the runtime and reports outcomes on `done_tx`.
pub struct CommandDispatcher {
    client: Arc<MpcCommandClient>,
    done_tx: mpsc::Sender<CommandOutcome>,
}

impl CommandDispatcher {
    pub fn new(client: Arc<MpcCommandClient>, done_tx: mpsc::Sender<CommandOutcome>) -> Self {
        Self { client, done_tx }
    }

    pub fn dispatch(&self, command: PlayerCommand) {
        let client = Arc::clone(&self.client);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = client.send(&command).await;
            if done_tx.send(CommandOutcome { command, result }).await.is_err() {
                warn!("command: outcome dropped, core loop gone");
            }
        });
    }
}

impl CommandChannel for CommandDispatcher {
    fn send_discrete_command(&self, id: u32) {
        self.dispatch(PlayerCommand::Discrete(id));
    }

    fn send_seek_percent(&self, percent: f64) {
        self.dispatch(PlayerCommand::SeekPercent(percent));
    }
}
