// ⏱️ Lap Time Codec - milliseconds <-> "MM:SS.mmm"
//
// Every persisted time (best lap and the three sectors) goes through this
// codec, so parse_display(to_display(ms)) == ms must hold for all ms in
// [0, 6h).

use crate::error::{LeaderboardError, Result};

/// Format milliseconds as `MM:SS.mmm`.
///
/// Minutes are zero-padded to at least two digits and grow beyond that as
/// needed (`125:00.000` is valid). Negative input is rejected with
/// `InvalidDuration`.
pub fn to_display(ms: i64) -> Result<String> {
    if ms < 0 {
        return Err(LeaderboardError::InvalidDuration(ms));
    }

    let minutes = ms / 60_000;
    let seconds = (ms / 1_000) % 60;
    let millis = ms % 1_000;

    Ok(format!("{:02}:{:02}.{:03}", minutes, seconds, millis))
}

/// Format a stored lap/sector time. Stored times are unsigned, so this never fails.
pub fn format_ms(ms: u32) -> String {
    let ms = ms as u64;
    format!("{:02}:{:02}.{:03}", ms / 60_000, (ms / 1_000) % 60, ms % 1_000)
}

/// Parse `MM:SS.mmm` back into milliseconds.
///
/// Accepts one or more minute digits, one or two second digits (< 60) and a
/// 1-6 digit fraction. Fractions longer than three digits (older exports
/// wrote microseconds) are truncated to whole milliseconds.
pub fn parse_display(s: &str) -> Result<u32> {
    let text = s.trim();
    let malformed = |why: &str| LeaderboardError::Parse(format!("invalid lap time {:?}: {}", s, why));

    let (minutes, rest) = text
        .split_once(':')
        .ok_or_else(|| malformed("missing ':' separator"))?;
    let (seconds, fraction) = rest
        .split_once('.')
        .ok_or_else(|| malformed("missing '.' separator"))?;

    if !is_digits(minutes) {
        return Err(malformed("minutes are not numeric"));
    }
    if !is_digits(seconds) || seconds.len() > 2 {
        return Err(malformed("seconds must be one or two digits"));
    }
    if !is_digits(fraction) || fraction.len() > 6 {
        return Err(malformed("fraction must be 1-6 digits"));
    }

    let minutes: u64 = minutes.parse().map_err(|_| malformed("minutes out of range"))?;
    let seconds: u64 = seconds.parse().map_err(|_| malformed("seconds out of range"))?;
    if seconds >= 60 {
        return Err(malformed("seconds must be below 60"));
    }

    // Right-pad to microseconds, then truncate to milliseconds
    let micros: u64 = format!("{:0<6}", fraction)
        .parse()
        .map_err(|_| malformed("fraction out of range"))?;
    let millis = micros / 1_000;

    let total = minutes
        .checked_mul(60_000)
        .and_then(|m| m.checked_add(seconds * 1_000 + millis))
        .ok_or_else(|| malformed("value overflows"))?;

    u32::try_from(total).map_err(|_| malformed("value overflows"))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

// ============================================================================
// TESTS
// ============================================================================
