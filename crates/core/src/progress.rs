// crates/core/src/progress.rs
//! Progress extraction from the transfer tool's stats output.
//!
//! The tool periodically prints a one-line summary such as
//!
//! ```text
//! 2024/05/01 10:00:01 NOTICE:    1.500 MiB / 10 MiB, 15%, 512 KiB/s, ETA 17s
//! Transferred:   	  512 KiB / 1 GiB, 0%, 128 KiB/s, ETA 2h10m
//! Checks:                 3 / 10, 30%
//! ```
//!
//! Interactive renderers overwrite lines with `\r`, so the accumulated tail is
//! split on both `\r` and `\n` and the last recognisable line wins. Failing to
//! find one is not an error: the caller simply has no new signal yet.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::types::TransferProgress;

fn transfer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<done>\d+(?:\.\d+)?)\s*(?P<done_unit>[kKMGTP]?i?B)\s*/\s*(?P<total>\d+(?:\.\d+)?)\s*(?P<total_unit>[kKMGTP]?i?B),\s*(?P<pct>-|\d+)%(?:,\s*(?P<speed>\d+(?:\.\d+)?\s*[kKMGTP]?i?B/s))?(?:,\s*ETA\s*(?P<eta>\S+))?",
        )
        .expect("transfer stats regex is valid")
    })
}

fn checks_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Checks:\s*(?P<done>\d+)\s*/\s*(?P<total>\d+),\s*(?P<pct>-|\d+)%")
            .expect("checks stats regex is valid")
    })
}

/// Extract the most recent progress reading from accumulated output.
///
/// Returns `None` when no stats line is present yet.
pub fn parse_progress(text: &str) -> Option<TransferProgress> {
    text.split(['\r', '\n'])
        .rev()
        .filter(|line| !line.trim().is_empty())
        .find_map(parse_line)
}

fn parse_line(line: &str) -> Option<TransferProgress> {
    if let Some(caps) = transfer_re().captures(line) {
        let transferred_bytes = to_bytes(&caps["done"], &caps["done_unit"])?;
        let total_bytes = to_bytes(&caps["total"], &caps["total_unit"])?;
        let percent = percent_or_ratio(&caps["pct"], transferred_bytes, total_bytes);
        return Some(TransferProgress {
            percent,
            transferred_bytes,
            total_bytes,
            speed: caps.name("speed").map(|m| normalize_ws(m.as_str())),
            eta: caps
                .name("eta")
                .map(|m| m.as_str().to_string())
                .filter(|eta| eta != "-"),
        });
    }

    let caps = checks_re().captures(line)?;
    let done: u64 = caps["done"].parse().ok()?;
    let total: u64 = caps["total"].parse().ok()?;
    Some(TransferProgress {
        percent: percent_or_ratio(&caps["pct"], done, total),
        transferred_bytes: 0,
        total_bytes: 0,
        speed: None,
        eta: None,
    })
}

fn percent_or_ratio(raw: &str, done: u64, total: u64) -> u8 {
    match raw.parse::<u64>() {
        Ok(p) => p.min(100) as u8,
        Err(_) if total > 0 => ((done.saturating_mul(100)) / total).min(100) as u8,
        Err(_) => 0,
    }
}

fn to_bytes(value: &str, unit: &str) -> Option<u64> {
    let value: f64 = value.parse().ok()?;
    let multiplier: f64 = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0_f64.powi(3),
        "TiB" => 1024.0_f64.powi(4),
        "PiB" => 1024.0_f64.powi(5),
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "PB" => 1e15,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Per-job high-water mark so reported progress never moves backwards.
///
/// The tool restarts its percentage when it retries a file; those dips are
/// swallowed and the previous maximum is kept.
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    high_water: u8,
    last: Option<TransferProgress>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a percentage that has already been published.
    pub fn starting_at(percent: u8) -> Self {
        Self {
            high_water: percent.min(100),
            last: None,
        }
    }

    /// Feed the accumulated tail. Returns the clamped reading when the tail
    /// contains a stats line.
    pub fn observe(&mut self, text: &str) -> Option<TransferProgress> {
        let mut reading = parse_progress(text)?;
        self.high_water = self.high_water.max(reading.percent.min(100));
        reading.percent = self.high_water;
        self.last = Some(reading.clone());
        Some(reading)
    }

    pub fn percent(&self) -> u8 {
        self.high_water
    }

    pub fn last(&self) -> Option<&TransferProgress> {
        self.last.as_ref()
    }

    /// Mark the transfer as fully done.
    pub fn complete(&mut self) {
        self.high_water = 100;
        if let Some(last) = self.last.as_mut() {
            last.percent = 100;
            last.eta = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_one_line_stats_with_log_prefix() {
        let text = "2024/05/01 10:00:01 NOTICE:    1.500 MiB / 10 MiB, 15%, 512 KiB/s, ETA 17s\n";
        let p = parse_progress(text).unwrap();
        assert_eq!(
            p,
            TransferProgress {
                percent: 15,
                transferred_bytes: 1_572_864,
                total_bytes: 10_485_760,
                speed: Some("512 KiB/s".to_string()),
                eta: Some("17s".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_transferred_block_line() {
        let text = "Transferred:   \t  512 KiB / 1 GiB, 0%, 128 KiB/s, ETA 2h10m\nErrors: 0\n";
        let p = parse_progress(text).unwrap();
        assert_eq!(p.percent, 0);
        assert_eq!(p.transferred_bytes, 524_288);
        assert_eq!(p.total_bytes, 1_073_741_824);
        assert_eq!(p.eta.as_deref(), Some("2h10m"));
    }

    #[test]
    fn test_last_line_wins_with_carriage_returns() {
        let text = "10 B / 100 B, 10%, 1 B/s, ETA 90s\r50 B / 100 B, 50%, 1 B/s, ETA 50s\r60 B / 10";
        let p = parse_progress(text).unwrap();
        assert_eq!(p.percent, 50);
        assert_eq!(p.transferred_bytes, 50);
    }

    #[test]
    fn test_unknown_percent_is_derived_from_bytes() {
        let p = parse_progress("25 B / 100 B, -%, 0 B/s, ETA -").unwrap();
        assert_eq!(p.percent, 25);
        assert_eq!(p.eta, None);
    }

    #[test]
    fn test_unknown_percent_with_zero_total() {
        let p = parse_progress("0 B / 0 B, -%, 0 B/s, ETA -").unwrap();
        assert_eq!(p.percent, 0);
    }

    #[test]
    fn test_decimal_units() {
        let p = parse_progress("1.5 MB / 3 MB, 50%, 1 MB/s, ETA 1s").unwrap();
        assert_eq!(p.transferred_bytes, 1_500_000);
        assert_eq!(p.total_bytes, 3_000_000);
    }

    #[test]
    fn test_percent_is_clamped() {
        let p = parse_progress("1 B / 1 B, 250%, 1 B/s, ETA 0s").unwrap();
        assert_eq!(p.percent, 100);
    }

    #[test]
    fn test_checks_line() {
        let p = parse_progress("Checks:                 3 / 10, 30%\n").unwrap();
        assert_eq!(p.percent, 30);
        assert_eq!(p.total_bytes, 0);
    }

    #[test]
    fn test_no_signal() {
        assert!(parse_progress("").is_none());
        assert!(parse_progress("INFO  : file.txt: Copied (new)\n").is_none());
        assert!(parse_progress("Elapsed time: 1.2s\n").is_none());
    }

    #[test]
    fn test_tracker_never_regresses() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe("40 B / 100 B, 40%, 1 B/s, ETA 60s").unwrap().percent, 40);
        assert_eq!(tracker.observe("10 B / 100 B, 10%, 1 B/s, ETA 90s").unwrap().percent, 40);
        assert_eq!(tracker.observe("70 B / 100 B, 70%, 1 B/s, ETA 30s").unwrap().percent, 70);
        assert_eq!(tracker.percent(), 70);
    }

    #[test]
    fn test_tracker_ignores_parse_miss() {
        let mut tracker = ProgressTracker::starting_at(20);
        assert!(tracker.observe("no stats here").is_none());
        assert_eq!(tracker.percent(), 20);
    }

    #[test]
    fn test_tracker_complete() {
        let mut tracker = ProgressTracker::new();
        tracker.observe("40 B / 100 B, 40%, 1 B/s, ETA 60s");
        tracker.complete();
        assert_eq!(tracker.percent(), 100);
        let last = tracker.last().unwrap();
        assert_eq!(last.percent, 100);
        assert_eq!(last.eta, None);
    }
}
