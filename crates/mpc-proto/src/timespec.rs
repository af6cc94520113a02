//! Time expressions used by skip rules.
//!
//! A rule boundary is either a single timestamp or a half-open interval.
//! Accepted input:
//!
//! ```text
//!   90          bare seconds
//!   1:30        minutes:seconds
//!   0:01:30     hours:minutes:seconds
//!   1:45-2:50   interval, also `1:45~2:50` and `1:45至2:50`
//! ```
//!
//! Components may overflow (`0:90` is 1m30s). Anything else parses to `None`
//! and callers treat the rule side as not applicable.

use std::fmt;

/// Characters that separate the two ends of an interval.
const RANGE_DELIMITERS: &[char] = &['-', '~', '至'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    Point { ms: u64 },
    /// Invariant: `start_ms < end_ms`.
    Range { start_ms: u64, end_ms: u64 },
}

impl TimeSpec {
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        if s.contains(RANGE_DELIMITERS) {
            let mut parts = s.split(RANGE_DELIMITERS);
            let (start, end) = (parts.next()?, parts.next()?);
            if parts.next().is_some() {
                return None;
            }
            return Self::range(parse_clock(start)?, parse_clock(end)?);
        }
        parse_clock(s).map(|ms| TimeSpec::Point { ms })
    }

    /// Builds a range, rejecting empty or inverted intervals.
    pub fn range(start_ms: u64, end_ms: u64) -> Option<Self> {
        (start_ms < end_ms).then_some(TimeSpec::Range { start_ms, end_ms })
    }

    /// Where playback should continue once this boundary is skipped: the
    /// end of a range, or the point itself.
    pub fn resume_point(&self) -> u64 {
        match *self {
            TimeSpec::Point { ms } => ms,
            TimeSpec::Range { end_ms, .. } => end_ms,
        }
    }

    /// True when `pos_ms` lies in `[start, end)` of a range. Points contain nothing.
    pub fn contains(&self, pos_ms: u64) -> bool {
        match *self {
            TimeSpec::Point { .. } => false,
            TimeSpec::Range { start_ms, end_ms } => pos_ms >= start_ms && pos_ms < end_ms,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, TimeSpec::Range { .. })
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TimeSpec::Point { ms } => f.write_str(&format_clock(ms)),
            TimeSpec::Range { start_ms, end_ms } => {
                write!(f, "{}-{}", format_clock(start_ms), format_clock(end_ms))
            }
        }
    }
}

/// Parses `SS`, `MM:SS` or `HH:MM:SS` into milliseconds.
pub fn parse_clock(raw: &str) -> Option<u64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let mut fields = [0u64; 3];
    let mut count = 0usize;
    for part in s.split(':') {
        if count == fields.len() || part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        fields[count] = part.parse().ok()?;
        count += 1;
    }

    let (h, m, sec) = match count {
        1 => (0, 0, fields[0]),
        2 => (0, fields[0], fields[1]),
        _ => (fields[0], fields[1], fields[2]),
    };

    // Overflowing seconds and minutes roll up into the total.
    let total_secs = h
        .checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(sec)?;
    total_secs.checked_mul(1000)
}

/// Zero-padded `HH:MM:SS`; sub-second precision is dropped.
pub fn format_clock(ms: u64) -> String {
    let total = ms / 1000;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
