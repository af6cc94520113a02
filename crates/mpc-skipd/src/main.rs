mod cli;
mod command;
mod core;
mod detector;
mod render;
mod telemetry;

use clap::Parser;
use mpc_proto::config::Config;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::{Cli, Command};
use crate::core::{CoreEvent, SkipCore};

/// Forwards WARN and ERROR records to the core's broadcast channel so they
/// show up next to the status line.
struct BroadcastLayer {
    sender: broadcast::Sender<CoreEvent>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<CoreEvent>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));

        // No receivers is fine.
        let _ = self.sender.send(CoreEvent::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(broadcast_tx: broadcast::Sender<CoreEvent>) -> anyhow::Result<()> {
    let log_path = mpc_proto::platform::log_path();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,mpc_skipd=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Created first so the logging layer can feed it.
    let (broadcast_tx, _) = broadcast::channel::<CoreEvent>(100);
    init_logging(broadcast_tx.clone())?;

    let mut config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    if let Some(base_url) = cli.player {
        config.player.base_url = base_url;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, broadcast_tx).await,
        other => cli::execute(other, &config).await,
    }
}

async fn run(config: Config, broadcast_tx: broadcast::Sender<CoreEvent>) -> anyhow::Result<()> {
    let mut events = broadcast_tx.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = render::render_event(&event) {
                        println!("{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    println!("({} updates skipped)", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    println!(
        "mpc-skipd: watching {} (Ctrl-C to quit)",
        config.status_url()
    );
    let core = SkipCore::new(&config, broadcast_tx)?;
    let result = core.run().await;
    printer.abort();
    result
}
