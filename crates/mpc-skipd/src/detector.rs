//! Boundary-crossing detector for intro/outro skipping.
//!
//! Fed one [`PlaybackSnapshot`] per poll, together with the rule matching the
//! snapshot's file. Because polling is coarse (about 1 Hz) the detector
//! compares the previous and the current position: point tails fire on a
//! crossing, ranges fire on containment. After every issued skip it holds
//! off for a while so repeated polls and echoes of the old position cannot
//! trigger a second command.
//!
//! ```text
//!   Idle ──skip issued──▶ AwaitingSkipConfirmation ──hold elapsed──▶ Idle
//! ```
//!
//! Skips only ever move forward: a seek target is always strictly ahead of
//! the current position.

use std::time::{Duration, Instant};

use mpc_proto::config::SkipConfig;
use mpc_proto::rules::SkipRule;
use mpc_proto::status::PlaybackSnapshot;
use mpc_proto::timespec::{format_clock, TimeSpec};
use tracing::{debug, info};

use crate::command::CommandChannel;

/// Source of "now" for cooldown bookkeeping.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub cooldown: Duration,
    pub seek_hold: Duration,
    pub next_track_hold: Duration,
    pub seek_jump_threshold_ms: u64,
    pub new_file_start_ms: u64,
    pub head_point_window_ms: u64,
    pub next_track_command: u32,
}

impl From<&SkipConfig> for DetectorConfig {
    fn from(cfg: &SkipConfig) -> Self {
        Self {
            cooldown: Duration::from_millis(cfg.cooldown_ms),
            seek_hold: Duration::from_millis(cfg.seek_hold_ms),
            next_track_hold: Duration::from_millis(cfg.next_track_hold_ms),
            seek_jump_threshold_ms: cfg.seek_jump_threshold_ms,
            new_file_start_ms: cfg.new_file_start_ms,
            head_point_window_ms: cfg.head_point_window_ms,
            next_track_command: cfg.next_track_command,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from(&SkipConfig::default())
    }
}

/// Why a seek was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A new file (or manual seek) landed at the very start of a file with a head rule.
    NewFileHead,
    Head,
    TailRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipAction {
    Seek {
        from_ms: u64,
        target_ms: u64,
        percent: f64,
        reason: SkipReason,
    },
    /// A point tail was crossed: the rest of the file is not content.
    NextTrack { crossed_ms: u64, command_id: u32 },
}

impl SkipAction {
    pub fn dispatch(&self, channel: &dyn CommandChannel) {
        match *self {
            SkipAction::Seek { percent, .. } => channel.send_seek_percent(percent),
            SkipAction::NextTrack { command_id, .. } => {
                channel.send_discrete_command(command_id)
            }
        }
    }

    pub fn describe(&self) -> String {
        match *self {
            SkipAction::Seek {
                from_ms,
                target_ms,
                percent,
                reason,
            } => format!(
                "{:?}: {} -> {} ({:.2}%)",
                reason,
                format_clock(from_ms),
                format_clock(target_ms),
                percent
            ),
            SkipAction::NextTrack { crossed_ms, .. } => {
                format!("tail {} crossed, next file", format_clock(crossed_ms))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingSkipConfirmation { issued_at: Instant, hold: Duration },
}

#[derive(Debug, Clone)]
pub struct DetectorState {
    pub last_file_path: String,
    pub last_position_ms: u64,
    pub phase: Phase,
    pub last_skip_at: Option<Instant>,
}

impl Default for DetectorState {
    fn default() -> Self {
        Self {
            last_file_path: String::new(),
            last_position_ms: 0,
            phase: Phase::Idle,
            last_skip_at: None,
        }
    }
}

impl DetectorState {
    pub fn skip_in_flight(&self) -> bool {
        matches!(self.phase, Phase::AwaitingSkipConfirmation { .. })
    }
}

pub struct Detector<C: Clock = SystemClock> {
    config: DetectorConfig,
    clock: C,
    state: DetectorState,
}

impl Detector<SystemClock> {
    pub fn new(config: DetectorConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Detector<C> {
    pub fn with_clock(config: DetectorConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            state: DetectorState::default(),
        }
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Forget the last seen file so the next snapshot is treated as a new
    /// file. Called after rules change so edits apply immediately.
    pub fn reset(&mut self) {
        self.state.last_file_path.clear();
    }

    /// Processes one snapshot. Returns the action to issue, if any; at most
    /// one action per snapshot.
    pub fn observe(
        &mut self,
        snapshot: &PlaybackSnapshot,
        rule: Option<&SkipRule>,
    ) -> Option<SkipAction> {
        if !snapshot.is_playing() || snapshot.duration_ms == 0 {
            return None;
        }

        let now = self.clock.now();
        self.release_hold(now);
        let pos = snapshot.position_ms;

        if self.cooling_down(now) {
            // Keep tracking so the echo of a seek is not mistaken for a jump.
            self.state.last_position_ms = pos;
            return None;
        }

        let rule = rule.filter(|r| r.enabled);

        let path_changed = snapshot.file_path != self.state.last_file_path;
        let jumped = pos.abs_diff(self.state.last_position_ms) > self.config.seek_jump_threshold_ms;
        if path_changed || jumped {
            debug!(
                path_changed,
                from = self.state.last_position_ms,
                to = pos,
                "detector: new file or manual seek"
            );
            self.state.last_file_path.clone_from(&snapshot.file_path);
            self.state.last_position_ms = pos;

            if pos < self.config.new_file_start_ms {
                let head = rule.and_then(|r| r.head);
                if let Some(target) = head.map(|h| h.resume_point()).filter(|t| *t > pos) {
                    return Some(self.issue_seek(now, snapshot, target, SkipReason::NewFileHead));
                }
            }
            return None;
        }

        let Some(rule) = rule else {
            self.state.last_position_ms = pos;
            return None;
        };

        if let Some(target) = rule.head.and_then(|head| self.head_target(head, pos)) {
            return Some(self.issue_seek(now, snapshot, target, SkipReason::Head));
        }

        if let Some(tail) = rule.tail {
            match tail {
                TimeSpec::Range { end_ms, .. } if tail.contains(pos) => {
                    return Some(self.issue_seek(now, snapshot, end_ms, SkipReason::TailRange));
                }
                TimeSpec::Point { ms } if self.state.last_position_ms < ms && pos >= ms => {
                    return Some(self.issue_next_track(now, pos, ms));
                }
                _ => {}
            }
        }

        self.state.last_position_ms = pos;
        None
    }

    fn head_target(&self, head: TimeSpec, pos: u64) -> Option<u64> {
        let target = match head {
            TimeSpec::Range { end_ms, .. } => head.contains(pos).then_some(end_ms),
            TimeSpec::Point { ms } => {
                (pos < ms && pos < self.config.head_point_window_ms).then_some(ms)
            }
        };
        target.filter(|t| *t > pos)
    }

    fn release_hold(&mut self, now: Instant) {
        if let Phase::AwaitingSkipConfirmation { issued_at, hold } = self.state.phase {
            if now.saturating_duration_since(issued_at) >= hold {
                self.state.phase = Phase::Idle;
            }
        }
    }

    fn cooling_down(&self, now: Instant) -> bool {
        if self.state.skip_in_flight() {
            return true;
        }
        self.state
            .last_skip_at
            .map(|at| now.saturating_duration_since(at) < self.config.cooldown)
            .unwrap_or(false)
    }

    fn enter_hold(&mut self, now: Instant, hold: Duration) {
        self.state.phase = Phase::AwaitingSkipConfirmation {
            issued_at: now,
            hold,
        };
        self.state.last_skip_at = Some(now);
    }

    fn issue_seek(
        &mut self,
        now: Instant,
        snapshot: &PlaybackSnapshot,
        target_ms: u64,
        reason: SkipReason,
    ) -> SkipAction {
        let percent = (target_ms as f64 / snapshot.duration_ms as f64 * 100.0).min(100.0);
        self.enter_hold(now, self.config.seek_hold);
        self.state.last_position_ms = target_ms;
        let action = SkipAction::Seek {
            from_ms: snapshot.position_ms,
            target_ms,
            percent,
            reason,
        };
        info!("skip: {}", action.describe());
        action
    }

    fn issue_next_track(&mut self, now: Instant, pos: u64, crossed_ms: u64) -> SkipAction {
        self.enter_hold(now, self.config.next_track_hold);
        self.state.last_position_ms = pos;
        let action = SkipAction::NextTrack {
            crossed_ms,
            command_id: self.config.next_track_command,
        };
        info!("skip: {}", action.describe());
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpc_proto::status::PlayState;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<Instant>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Instant::now())))
        }

        fn advance(&self, ms: u64) {
            *self.0.lock().unwrap() += Duration::from_millis(ms);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    fn snap(path: &str, pos: u64, dur: u64) -> PlaybackSnapshot {
        PlaybackSnapshot::parse(&format!(
            r#"OnStatus("t", "Playing", {pos}, "", {dur}, "", 0, 100, "{path}")"#
        ))
        .unwrap()
    }

    fn rule(head: &str, tail: &str) -> SkipRule {
        SkipRule::from_input("", head, tail).unwrap()
    }

    fn detector() -> (Detector<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        (
            Detector::with_clock(DetectorConfig::default(), clock.clone()),
            clock,
        )
    }

    const EP1: &str = "/tv/Show/01.mkv";
    const EP2: &str = "/tv/Show/02.mkv";

    #[test]
    fn head_range_on_new_file_seeks_once() {
        let (mut det, clock) = detector();
        let r = rule("00:00:10-00:00:20", "");

        let action = det.observe(&snap(EP1, 200, 60_000), Some(&r)).unwrap();
        match action {
            SkipAction::Seek {
                target_ms,
                percent,
                reason,
                ..
            } => {
                assert_eq!(target_ms, 20_000);
                assert!((percent - 33.333).abs() < 0.01);
                assert_eq!(reason, SkipReason::NewFileHead);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(det.state().skip_in_flight());

        // Echo of the old position while the seek is in flight.
        clock.advance(200);
        assert_eq!(det.observe(&snap(EP1, 1_200, 60_000), Some(&r)), None);

        // Player landed on the target.
        clock.advance(1_000);
        assert_eq!(det.observe(&snap(EP1, 20_300, 60_000), Some(&r)), None);
        assert!(!det.state().skip_in_flight());
    }

    #[test]
    fn tail_point_crossing_fires_next_track_once() {
        let (mut det, clock) = detector();
        let r = rule("", "00:00:50");

        assert_eq!(det.observe(&snap(EP1, 49_000, 60_000), Some(&r)), None);
        clock.advance(1_000);
        assert_eq!(
            det.observe(&snap(EP1, 51_000, 60_000), Some(&r)),
            Some(SkipAction::NextTrack {
                crossed_ms: 50_000,
                command_id: 920
            })
        );
        clock.advance(1_000);
        assert_eq!(det.observe(&snap(EP1, 52_000, 60_000), Some(&r)), None);
        clock.advance(5_000);
        assert_eq!(det.observe(&snap(EP1, 57_000, 60_000), Some(&r)), None);
    }

    #[test]
    fn cooldown_blocks_repeat_while_still_inside_range() {
        let (mut det, clock) = detector();
        let r = rule("", "00:00:40-00:00:55");

        assert_eq!(det.observe(&snap(EP1, 39_500, 60_000), Some(&r)), None);
        clock.advance(1_000);
        let first = det.observe(&snap(EP1, 40_500, 60_000), Some(&r));
        assert!(matches!(
            first,
            Some(SkipAction::Seek {
                target_ms: 55_000,
                reason: SkipReason::TailRange,
                ..
            })
        ));

        // Player has not applied the seek yet; two more polls inside the window.
        clock.advance(150);
        assert_eq!(det.observe(&snap(EP1, 40_650, 60_000), Some(&r)), None);
        clock.advance(150);
        assert_eq!(det.observe(&snap(EP1, 40_800, 60_000), Some(&r)), None);
    }

    #[test]
    fn manual_seek_resets_tracking_without_skip() {
        let (mut det, clock) = detector();
        let r = rule("00:00:10-00:00:20", "00:00:50");

        assert_eq!(det.observe(&snap(EP1, 25_000, 60_000), Some(&r)), None);
        clock.advance(1_000);
        // Jump back more than 10s, into the head range, but not near the start.
        assert_eq!(det.observe(&snap(EP1, 12_000, 60_000), Some(&r)), None);
        assert_eq!(det.state().last_position_ms, 12_000);
        assert!(!det.state().skip_in_flight());

        // Jump forward past the tail point: no crossing is reported for a jump.
        clock.advance(1_000);
        assert_eq!(det.observe(&snap(EP1, 55_000, 60_000), Some(&r)), None);
    }

    #[test]
    fn manual_seek_to_start_applies_head() {
        let (mut det, clock) = detector();
        let r = rule("00:00:30", "");

        assert_eq!(det.observe(&snap(EP1, 40_000, 60_000), Some(&r)), None);
        clock.advance(1_000);
        assert!(matches!(
            det.observe(&snap(EP1, 300, 60_000), Some(&r)),
            Some(SkipAction::Seek {
                target_ms: 30_000,
                reason: SkipReason::NewFileHead,
                ..
            })
        ));
    }

    #[test]
    fn head_point_only_inside_early_window() {
        let (mut det, clock) = detector();
        let r = rule("00:00:30", "");

        // New file at 3s: not near enough to the start for the new-file path.
        assert_eq!(det.observe(&snap(EP1, 3_000, 60_000), Some(&r)), None);
        clock.advance(1_000);
        assert!(matches!(
            det.observe(&snap(EP1, 4_000, 60_000), Some(&r)),
            Some(SkipAction::Seek {
                target_ms: 30_000,
                reason: SkipReason::Head,
                ..
            })
        ));

        let (mut det, clock) = detector();
        assert_eq!(det.observe(&snap(EP1, 6_000, 60_000), Some(&r)), None);
        clock.advance(1_000);
        assert_eq!(det.observe(&snap(EP1, 7_000, 60_000), Some(&r)), None);
    }

    #[test]
    fn head_takes_priority_over_tail() {
        let (mut det, clock) = detector();
        let r = rule("00:00:10-00:00:20", "00:00:15-00:00:30");

        assert_eq!(det.observe(&snap(EP1, 9_000, 60_000), Some(&r)), None);
        clock.advance(1_000);
        assert!(matches!(
            det.observe(&snap(EP1, 16_000, 60_000), Some(&r)),
            Some(SkipAction::Seek {
                target_ms: 20_000,
                reason: SkipReason::Head,
                ..
            })
        ));
    }

    #[test]
    fn ignores_paused_and_unknown_duration() {
        let (mut det, _clock) = detector();
        let r = rule("00:00:10", "");

        let mut paused = snap(EP1, 100, 60_000);
        paused.state = PlayState::Paused;
        assert_eq!(det.observe(&paused, Some(&r)), None);
        assert_eq!(det.observe(&snap(EP1, 100, 0), Some(&r)), None);
        assert_eq!(det.state().last_file_path, "");
    }

    #[test]
    fn disabled_or_missing_rule_only_tracks() {
        let (mut det, clock) = detector();
        let mut r = rule("00:00:10", "00:00:50");
        r.enabled = false;

        assert_eq!(det.observe(&snap(EP1, 100, 60_000), Some(&r)), None);
        clock.advance(1_000);
        assert_eq!(det.observe(&snap(EP1, 1_100, 60_000), None), None);
        assert_eq!(det.state().last_position_ms, 1_100);
    }

    #[test]
    fn head_target_behind_position_is_never_issued() {
        let (mut det, _clock) = detector();
        let r = rule("0", "");
        assert_eq!(det.observe(&snap(EP1, 200, 60_000), Some(&r)), None);
    }

    #[test]
    fn new_file_after_next_track_gets_head_skip() {
        let (mut det, clock) = detector();
        let r = rule("00:00:05-00:00:12", "00:00:50");

        assert_eq!(det.observe(&snap(EP1, 49_500, 60_000), Some(&r)), None);
        clock.advance(1_000);
        assert!(matches!(
            det.observe(&snap(EP1, 50_500, 60_000), Some(&r)),
            Some(SkipAction::NextTrack { .. })
        ));

        // Inside the next-track hold the new file is not evaluated.
        clock.advance(400);
        assert_eq!(det.observe(&snap(EP2, 0, 60_000), Some(&r)), None);

        clock.advance(800);
        assert!(matches!(
            det.observe(&snap(EP2, 0, 60_000), Some(&r)),
            Some(SkipAction::Seek {
                target_ms: 12_000,
                reason: SkipReason::NewFileHead,
                ..
            })
        ));
    }

    #[test]
    fn reset_makes_next_snapshot_a_new_file() {
        let (mut det, clock) = detector();
        let r = rule("00:00:10", "");

        assert_eq!(det.observe(&snap(EP1, 2_000, 60_000), None), None);
        det.reset();
        clock.advance(1_000);
        assert!(matches!(
            det.observe(&snap(EP1, 400, 60_000), Some(&r)),
            Some(SkipAction::Seek {
                reason: SkipReason::NewFileHead,
                ..
            })
        ));
    }

    #[test]
    fn seek_percent_is_clamped() {
        let (mut det, _clock) = detector();
        let r = rule("00:02:00", "");
        assert!(matches!(
            det.observe(&snap(EP1, 0, 60_000), Some(&r)),
            Some(SkipAction::Seek { percent, .. }) if percent == 100.0
        ));
    }
}
