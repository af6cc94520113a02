use mpc_proto::protocol::SourceState;
use mpc_proto::status::PlaybackSnapshot;

use crate::core::CoreEvent;

/// One printable line per event; `None` for events not worth a line.
pub fn render_event(event: &CoreEvent) -> Option<String> {
    match event {
        CoreEvent::Status(snapshot) => Some(render_status(snapshot)),
        CoreEvent::Skipped(action) => Some(format!("» skip: {}", action.describe())),
        CoreEvent::TelemetryState(SourceState::Started) => Some("polling started".to_string()),
        CoreEvent::TelemetryState(SourceState::Stopped) => Some("polling stopped".to_string()),
        CoreEvent::TelemetryError { context, error } => {
            Some(format!("! telemetry {}: {}", context, error))
        }
        CoreEvent::Command { command, error: Some(e) } => {
            Some(format!("! command {}: {}", command, e))
        }
        CoreEvent::Command { error: None, .. } => None,
        CoreEvent::Log(line) => Some(line.clone()),
    }
}

/// `title | state | 00:01:02/00:24:00 (4.3%) | vol 85` with `muted` in place
/// of the volume when muted.
pub fn render_status(snapshot: &PlaybackSnapshot) -> String {
    let title = if snapshot.window_title.is_empty() {
        "-"
    } else {
        snapshot.window_title.as_str()
    };
    let volume = if snapshot.muted {
        "muted".to_string()
    } else {
        format!("vol {}", snapshot.volume)
    };
    format!(
        "{} | {} | {}/{} ({:.1}%) | {}",
        title,
        snapshot.state.label(),
        snapshot.position_text,
        snapshot.duration_text,
        snapshot.progress_percent(),
        volume
    )
}
