//! Command-line surface. `run` is the long-lived mode; everything else is a
//! one-shot against the player or the rule file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use mpc_proto::config::Config;
use mpc_proto::rules::{MergeMode, RuleStore, SkipRule};
use mpc_proto::timespec::{parse_clock, TimeSpec};

use crate::command::{MpcCommandClient, PlayerCommand};
use crate::render::render_status;
use crate::telemetry::StatusFetcher;

/// Intro/outro skipper for MPC-HC style web interfaces
#[derive(Parser, Debug)]
#[command(name = "mpc-skipd", version, about)]
pub struct Cli {
    /// Player web interface, overrides `player.base_url` (e.g. http://127.0.0.1:13579)
    #[arg(long, global = true)]
    pub player: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll the player and skip according to the rules until Ctrl-C (default)
    Run,
    /// Fetch and print the player status once
    Status,
    /// Send a raw player command id (920 = next file)
    Send { id: u32 },
    /// Seek to a percentage of the current file
    Seek { percent: f64 },
    /// Jump to an absolute time (SS, M:S or H:M:S)
    Jump { time: String },
    /// Manage skip rules
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },
    /// Parse a time or range and print its canonical form
    Parse { time: String },
}

/// Rule indices are 1-based, as printed by `rules list`.
#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    List,
    Add {
        /// Folder name the rule applies to; empty for every folder
        #[arg(long, default_value = "", conflicts_with = "here")]
        folder: String,
        /// Use the folder of the file currently playing
        #[arg(long)]
        here: bool,
        /// Head point or range, e.g. 1:30 or 0:00-1:30
        #[arg(long, default_value = "")]
        head: String,
        /// Tail point (next file) or range (seek past)
        #[arg(long, default_value = "")]
        tail: String,
    },
    Edit {
        index: usize,
        #[arg(long)]
        folder: Option<String>,
        /// New head; an empty string clears it
        #[arg(long)]
        head: Option<String>,
        /// New tail; an empty string clears it
        #[arg(long)]
        tail: Option<String>,
    },
    Remove { index: usize },
    Enable { index: usize },
    Disable { index: usize },
    /// Import rules from a JSON file; replaces the list unless --append
    Import {
        file: PathBuf,
        #[arg(long)]
        append: bool,
    },
    /// Export rules as JSON to a file, or stdout
    Export { file: Option<PathBuf> },
}

/// Executes a one-shot command. `Run` needs the logging setup and is
/// handled by the caller.
pub async fn execute(command: Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Run => bail!("`run` is not a one-shot command"),
        Command::Status => {
            let snapshot = fetch_status(config).await?;
            println!("{}", render_status(&snapshot));
            if !snapshot.file_path.is_empty() {
                println!("{}", snapshot.file_path);
            }
        }
        Command::Send { id } => send(config, PlayerCommand::Discrete(id)).await?,
        Command::Seek { percent } => {
            if !(0.0..=100.0).contains(&percent) {
                bail!("percent must be between 0 and 100, got {}", percent);
            }
            send(config, PlayerCommand::SeekPercent(percent)).await?
        }
        Command::Jump { time } => {
            let ms = parse_clock(&time).with_context(|| format!("not a valid time: {:?}", time))?;
            send(config, PlayerCommand::JumpTo(ms)).await?
        }
        Command::Parse { time } => match TimeSpec::parse(&time) {
            Some(spec) => println!("{}", spec),
            None => bail!("not a valid time or range: {:?}", time),
        },
        Command::Rules { action } => {
            let current_folder = match &action {
                RulesCommand::Add { here: true, .. } => {
                    let snapshot = fetch_status(config).await?;
                    if snapshot.folder.is_empty() {
                        bail!("nothing is playing, cannot use --here");
                    }
                    Some(snapshot.folder)
                }
                _ => None,
            };
            let mut store = RuleStore::open(&config.paths.rules_file);
            let output = apply_rules(action, &mut store, current_folder)?;
            if !output.is_empty() {
                println!("{}", output);
            }
        }
    }
    Ok(())
}

async fn fetch_status(config: &Config) -> anyhow::Result<mpc_proto::status::PlaybackSnapshot> {
    let fetcher = StatusFetcher::new(StatusFetcher::build_client()?, config.telemetry_config());
    fetcher
        .fetch()
        .await
        .with_context(|| format!("reading {}", config.status_url()))
}

async fn send(config: &Config, command: PlayerCommand) -> anyhow::Result<()> {
    let client = MpcCommandClient::new(
        config.command_url(),
        Duration::from_millis(config.player.command_timeout_ms),
    )?;
    client.send(&command).await?;
    println!("sent {}", command);
    Ok(())
}

/// Applies a rules subcommand to `store` and returns the text to print.
pub fn apply_rules(
    action: RulesCommand,
    store: &mut RuleStore,
    current_folder: Option<String>,
) -> anyhow::Result<String> {
    let output = match action {
        RulesCommand::List => list_rules(store),
        RulesCommand::Add {
            folder,
            head,
            tail,
            ..
        } => {
            let folder = current_folder.unwrap_or(folder);
            let rule = SkipRule::from_input(&folder, &head, &tail)?;
            store.add(rule)?;
            format!("added rule {}", store.rules().len())
        }
        RulesCommand::Edit {
            index,
            folder,
            head,
            tail,
        } => {
            let idx = to_index(index)?;
            let current = store
                .rules()
                .get(idx)
                .with_context(|| format!("no rule {}", index))?;
            let keep = |spec: Option<TimeSpec>| spec.map(|s| s.to_string()).unwrap_or_default();
            let mut rule = SkipRule::from_input(
                folder.as_deref().unwrap_or(&current.folder_scope),
                &head.unwrap_or_else(|| keep(current.head)),
                &tail.unwrap_or_else(|| keep(current.tail)),
            )?;
            rule.enabled = current.enabled;
            store.update(idx, rule)?;
            format!("updated rule {}", index)
        }
        RulesCommand::Remove { index } => {
            store.remove(to_index(index)?)?;
            format!("removed rule {}", index)
        }
        RulesCommand::Enable { index } => {
            store.set_enabled(to_index(index)?, true)?;
            format!("enabled rule {}", index)
        }
        RulesCommand::Disable { index } => {
            store.set_enabled(to_index(index)?, false)?;
            format!("disabled rule {}", index)
        }
        RulesCommand::Import { file, append } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {:?}", file))?;
            let mode = if append {
                MergeMode::Append
            } else {
                MergeMode::Replace
            };
            let count = store.import(&json, mode)?;
            format!("imported {} rules, {} total", count, store.rules().len())
        }
        RulesCommand::Export { file } => {
            let json = store.export()?;
            match file {
                Some(path) => {
                    std::fs::write(&path, json).with_context(|| format!("writing {:?}", path))?;
                    format!("exported {} rules to {:?}", store.rules().len(), path)
                }
                None => json,
            }
        }
    };
    Ok(output)
}

fn to_index(one_based: usize) -> anyhow::Result<usize> {
    one_based
        .checked_sub(1)
        .context("rule numbers start at 1")
}

fn list_rules(store: &RuleStore) -> String {
    if store.rules().is_empty() {
        return format!("no rules in {:?}", store.path());
    }
    let spec = |s: Option<TimeSpec>| s.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
    store
        .rules()
        .iter()
        .enumerate()
        .map(|(i, rule)| {
            format!(
                "{:>3} {} {:<20} head {:<17} tail {}",
                i + 1,
                if rule.enabled { "on " } else { "off" },
                if rule.folder_scope.is_empty() {
                    "*"
                } else {
                    rule.folder_scope.as_str()
                },
                spec(rule.head),
                spec(rule.tail),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn store(dir: &tempfile::TempDir) -> RuleStore {
        RuleStore::open(dir.path().join("rules.json"))
    }

    fn rules(args: &[&str]) -> RulesCommand {
        let mut argv = vec!["mpc-skipd", "rules"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Some(Command::Rules { action }) => action,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_is_run() {
        let cli = Cli::try_parse_from(["mpc-skipd", "--player", "http://h:1"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.player.as_deref(), Some("http://h:1"));
    }

    #[test]
    fn test_here_conflicts_with_folder() {
        let err = Cli::try_parse_from(["mpc-skipd", "rules", "add", "--here", "--folder", "x"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_add_edit_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);

        apply_rules(rules(&["add", "--folder", "Show", "--head", "90"]), &mut store, None).unwrap();
        apply_rules(rules(&["add", "--tail", "23:10"]), &mut store, None).unwrap();
        apply_rules(rules(&["edit", "1", "--tail", "0:21:10-0:22:40"]), &mut store, None).unwrap();
        apply_rules(rules(&["disable", "2"]), &mut store, None).unwrap();

        let listing = apply_rules(rules(&["list"]), &mut store, None).unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Show"));
        assert!(lines[0].contains("head 00:01:30"));
        assert!(lines[0].contains("tail 00:21:10-00:22:40"));
        assert!(lines[1].contains("off"));
        assert!(lines[1].contains('*'));
    }

    #[test]
    fn test_add_here_uses_current_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        apply_rules(
            rules(&["add", "--here", "--head", "10"]),
            &mut store,
            Some("Season 2".to_string()),
        )
        .unwrap();
        assert_eq!(store.rules()[0].folder_scope, "Season 2");
    }

    #[test]
    fn test_bad_time_and_index_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        assert!(apply_rules(rules(&["add", "--head", "5:00-2:00"]), &mut store, None).is_err());
        assert!(store.rules().is_empty());
        assert!(apply_rules(rules(&["remove", "0"]), &mut store, None).is_err());
        assert!(apply_rules(rules(&["enable", "1"]), &mut store, None).is_err());
    }

    #[test]
    fn test_export_then_import_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        apply_rules(rules(&["add", "--folder", "A", "--head", "1:30"]), &mut store, None).unwrap();

        let file = dir.path().join("out.json");
        let file_arg = file.to_str().unwrap();
        apply_rules(rules(&["export", file_arg]), &mut store, None).unwrap();
        let msg = apply_rules(rules(&["import", file_arg, "--append"]), &mut store, None).unwrap();
        assert_eq!(msg, "imported 1 rules, 2 total");
        assert_eq!(store.rules()[0], store.rules()[1]);
    }
}
