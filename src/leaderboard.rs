// 🏆 Leaderboard Aggregator - merge sessions into a best-lap table
//
// One Leaderboard = one (track, condition, season). It owns its entries and a
// watermark per host. `update` scans one host's listing, merges new sessions
// and advances that host's watermark. Entries and watermark are committed
// together or not at all.
//
// Phases: Empty -> Merging -> Idle (finalize), Idle -> Merging on the next
// update. Never back to Empty.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use crate::catalog::{Condition, Season, Track};
use crate::entry::{Entry, EntryKey};
use crate::error::{LeaderboardError, Result};
use crate::session::{PageListing, SessionFetcher, SessionQuery, SessionResult};
use crate::temporal::{format_timestamp, Watermarks};

/// Hard stop for "scan until exhausted" so an ever-growing listing cannot
/// loop forever.
pub const DEFAULT_MAX_PAGES: usize = 8000;

// ============================================================================
// KEY + OPTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaderboardKey {
    pub track: Track,
    pub condition: Condition,
    pub season: u32,
}

impl fmt::Display for LeaderboardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-S{}", self.track.display_name(), self.condition, self.season)
    }
}

/// Everything one `update` call depends on, passed in explicitly
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// `None`: incremental scan, stop at the watermark.
    /// `Some(n)`: forced re-scan of exactly n pages (bounded by `max_pages`).
    pub page_limit: Option<usize>,

    /// Skip sessions whose page lacks a league password marker
    pub password_required: bool,

    /// `All` accepts any session; otherwise the wet flag must match
    pub condition_filter: Condition,

    /// Circuit breaker for the page loop
    pub max_pages: usize,

    /// Checked between pages only, never inside a page
    pub deadline: Option<Instant>,

    /// Session filenames never to merge for this track
    pub exclusions: Vec<String>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            page_limit: None,
            password_required: true,
            condition_filter: Condition::All,
            max_pages: DEFAULT_MAX_PAGES,
            deadline: None,
            exclusions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No update has run on this instance yet (fresh or loaded from a store)
    Empty,
    Merging,
    /// Finalized; another update re-enters Merging
    Idle,
}

/// What one host update did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub host: String,
    pub pages_scanned: usize,
    pub sessions_seen: usize,
    pub sessions_merged: usize,
    pub entries_added: usize,
    pub entries_improved: usize,
    pub watermark: Option<DateTime<Utc>>,
}

impl UpdateReport {
    pub fn changed(&self) -> bool {
        self.entries_added + self.entries_improved > 0
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} pages, {} sessions seen, {} merged, +{} new, {} improved",
            self.host,
            self.pages_scanned,
            self.sessions_seen,
            self.sessions_merged,
            self.entries_added,
            self.entries_improved
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub improved: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.added + self.improved > 0
    }
}

// ============================================================================
// PERSISTED STATE
// ============================================================================

/// Everything a store reads or writes for one leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardState {
    pub key: LeaderboardKey,
    /// Ascending by best_time
    pub entries: Vec<Entry>,
    pub watermarks: Watermarks,
    pub last_updated: Option<DateTime<Utc>>,
}

impl LeaderboardState {
    /// Collapse rows sharing a (driver, car model) identity onto the fastest
    /// one and re-sort. Returns how many rows were folded away.
    pub fn fold_duplicates(&mut self) -> usize {
        let before = self.entries.len();
        let mut entries = Vec::with_capacity(before);
        merge_into(&mut entries, &self.entries);
        sort_by_time(&mut entries);
        self.entries = entries;
        before - self.entries.len()
    }

    /// Content hash of entries + watermarks (last_updated excluded), used to
    /// detect saves that would not change anything.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key.to_string());
        for entry in &self.entries {
            hasher.update(format!(
                "|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
                entry.driver_id,
                entry.car_id,
                entry.first_name,
                entry.last_name,
                entry.short_name,
                entry.best_time,
                entry.sector_1,
                entry.sector_2,
                entry.sector_3,
                entry.is_wet
            ));
        }
        for (host, ts) in self.watermarks.iter() {
            hasher.update(format!("#{}={}", host, format_timestamp(ts)));
        }
        format!("{:x}", hasher.finalize())
    }

    /// (rank, entry) pairs, rank starting at 1
    pub fn ranked(&self) -> impl Iterator<Item = (usize, &Entry)> {
        self.entries.iter().enumerate().map(|(i, e)| (i + 1, e))
    }
}

// ============================================================================
// LEADERBOARD
// ============================================================================

#[derive(Debug, Clone)]
pub struct Leaderboard {
    key: LeaderboardKey,
    season: Season,
    entries: Vec<Entry>,
    watermarks: Watermarks,
    last_updated: Option<DateTime<Utc>>,
    phase: Phase,
}

impl Leaderboard {
    /// Fresh leaderboard, every host's watermark at season start
    pub fn new<I, S>(track: Track, condition: Condition, season: Season, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let watermarks = Watermarks::seeded(hosts, season.start);
        Leaderboard {
            key: LeaderboardKey {
                track,
                condition,
                season: season.number,
            },
            season,
            entries: Vec::new(),
            watermarks,
            last_updated: None,
            phase: Phase::Empty,
        }
    }

    /// Rebuild from stored state. Duplicate identities in the stored rows are
    /// folded (fastest wins) so the one-entry-per-identity rule holds.
    pub fn from_state(mut state: LeaderboardState, season: Season) -> Result<Self> {
        if state.key.season != season.number {
            return Err(LeaderboardError::InvalidState(
                "stored leaderboard belongs to a different season",
            ));
        }

        let folded = state.fold_duplicates();
        if folded > 0 {
            warn!("{}: folded {} duplicate stored entries", state.key, folded);
        }
        debug!("{}: hydrated {} entries", state.key, state.entries.len());

        Ok(Leaderboard {
            key: state.key,
            season,
            entries: state.entries,
            watermarks: state.watermarks,
            last_updated: state.last_updated,
            phase: Phase::Empty,
        })
    }

    pub fn key(&self) -> LeaderboardKey {
        self.key
    }

    pub fn season(&self) -> &Season {
        &self.season
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn watermarks(&self) -> &Watermarks {
        &self.watermarks
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// (rank, entry) pairs, rank starting at 1
    pub fn ranked(&self) -> impl Iterator<Item = (usize, &Entry)> {
        self.entries.iter().enumerate().map(|(i, e)| (i + 1, e))
    }

    /// Give hosts that have never been scanned a season-start watermark
    pub fn seed_hosts<S: AsRef<str>>(&mut self, hosts: &[S]) {
        for host in hosts {
            self.watermarks.seed_missing(host.as_ref(), self.season.start);
        }
    }

    pub fn to_state(&self) -> LeaderboardState {
        LeaderboardState {
            key: self.key,
            entries: self.entries.clone(),
            watermarks: self.watermarks.clone(),
            last_updated: self.last_updated,
        }
    }

    fn query(&self) -> SessionQuery {
        SessionQuery {
            track: self.key.track,
            condition: self.key.condition,
            start: self.season.start,
            end: self.season.end,
        }
    }

    /// Merge one session's entries directly (no watermark bookkeeping).
    /// Re-merging the same session is a no-op.
    pub fn merge_session(&mut self, session: &SessionResult) -> MergeOutcome {
        let outcome = merge_into(&mut self.entries, &session.entries);
        sort_by_time(&mut self.entries);
        outcome
    }

    /// Scan one host and merge what is new. Returns whether any entry was
    /// added or improved.
    pub fn update(
        &mut self,
        fetcher: &dyn SessionFetcher,
        host: &str,
        options: &UpdateOptions,
    ) -> Result<bool> {
        self.update_with_report(fetcher, host, options)
            .map(|report| report.changed())
    }

    pub fn update_with_report(
        &mut self,
        fetcher: &dyn SessionFetcher,
        host: &str,
        options: &UpdateOptions,
    ) -> Result<UpdateReport> {
        self.phase = Phase::Merging;

        let stored = self.watermarks.get(host);
        let forced = options.page_limit.is_some();
        let pages = options
            .page_limit
            .unwrap_or(options.max_pages)
            .min(options.max_pages);
        let query = self.query();

        info!(
            "{}: updating from {} via {} ({}, watermark {})",
            self.key,
            host,
            fetcher.name(),
            if forced { format!("forced {} pages", pages) } else { "incremental".to_string() },
            stored.map(|ts| format_timestamp(&ts)).unwrap_or_else(|| "none".to_string())
        );

        // Work on a copy; nothing below touches self until the watermark check passes
        let mut staged = self.entries.clone();
        let mut newest: Option<DateTime<Utc>> = None;
        let mut report = UpdateReport {
            host: host.to_string(),
            ..UpdateReport::default()
        };

        'pages: for page in 0..pages {
            if let Some(deadline) = options.deadline {
                if Instant::now() >= deadline {
                    warn!("{}: deadline reached on {} before page {}", self.key, host, page + 1);
                    return Err(LeaderboardError::DeadlineExceeded {
                        host: host.to_string(),
                        page: page + 1,
                    });
                }
            }

            let refs = match fetcher.list_sessions(host, &query, page)? {
                PageListing::NotFound => {
                    debug!("{}: page {} not found, stopping", host, page + 1);
                    break;
                }
                PageListing::Sessions(refs) if refs.is_empty() => {
                    debug!("{}: page {} empty, stopping", host, page + 1);
                    break;
                }
                PageListing::Sessions(refs) => refs,
            };

            info!("===== {}: processing page {} =====", host, page + 1);
            report.pages_scanned += 1;

            for session_ref in refs {
                let filename = session_ref.filename.as_str();

                if options.exclusions.iter().any(|f| f == filename) {
                    debug!("excluded session || {}/{}", host, filename);
                    continue;
                }
                if options.password_required && !session_ref.password_protected {
                    debug!("no password || {}/{}", host, filename);
                    continue;
                }

                report.sessions_seen += 1;
                newest = Some(newest.map_or(session_ref.timestamp, |n| n.max(session_ref.timestamp)));

                if let Some(mark) = stored {
                    if !forced && session_ref.timestamp <= mark {
                        info!("{}: reached already-merged session {}, stopping", host, filename);
                        break 'pages;
                    }
                    if forced && session_ref.timestamp < mark {
                        debug!("old session || {}/{}", host, filename);
                        continue;
                    }
                }
                if !self.season.contains(&session_ref.timestamp) {
                    debug!("outside season {} || {}/{}", self.season.number, host, filename);
                    continue;
                }

                let session = match fetcher.fetch_session(host, filename) {
                    Ok(session) => session,
                    Err(LeaderboardError::NoLapsRecorded { .. }) => {
                        debug!("no laps || {}/{}", host, filename);
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                if !session.is_track(self.key.track) {
                    debug!("track doesn't match ({}) || {}/{}", session.track, host, filename);
                    continue;
                }
                if !options.condition_filter.accepts(session.is_wet) {
                    debug!("condition doesn't match || {}/{}", host, filename);
                    continue;
                }

                debug!("merging {}/{} ({} entries)", host, filename, session.entries.len());
                let outcome = merge_into(&mut staged, &session.entries);
                report.sessions_merged += 1;
                report.entries_added += outcome.added;
                report.entries_improved += outcome.improved;
            }

            info!("===== {}: finished page {} =====", host, page + 1);
        }

        // Commit point: watermark must not move backwards
        if let Some(observed) = newest {
            let mut marks = self.watermarks.clone();
            if let Err(e) = marks.advance(host, observed) {
                error!("{}: {}; leaving state untouched", self.key, e);
                return Err(e);
            }
            self.watermarks = marks;
        }

        sort_by_time(&mut staged);
        self.entries = staged;
        report.watermark = self.watermarks.get(host);

        info!("{}: {}", self.key, report);
        Ok(report)
    }

    /// Stamp last_updated. Requires at least one update on this instance.
    pub fn finalize(&mut self) -> Result<()> {
        self.finalize_at(Utc::now())
    }

    pub fn finalize_at(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.phase == Phase::Empty {
            return Err(LeaderboardError::InvalidState("finalize called before any update"));
        }
        self.last_updated = Some(now);
        self.phase = Phase::Idle;
        Ok(())
    }
}

// ============================================================================
// MERGE HELPERS
// ============================================================================

/// Merge `incoming` into `entries`: new identities are appended, existing
/// ones only ever get faster.
fn merge_into(entries: &mut Vec<Entry>, incoming: &[Entry]) -> MergeOutcome {
    let mut index: HashMap<EntryKey, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.key(), i))
        .collect();
    let mut outcome = MergeOutcome::default();

    for candidate in incoming {
        match index.get(&candidate.key()) {
            Some(&i) => {
                if entries[i].absorb(candidate) {
                    debug!(
                        "{} in {} improved to {}",
                        entries[i].display_name(),
                        entries[i].car_label(),
                        entries[i].best_time_display()
                    );
                    outcome.improved += 1;
                }
            }
            None => {
                index.insert(candidate.key(), entries.len());
                entries.push(candidate.clone());
                outcome.added += 1;
            }
        }
    }

    outcome
}

/// Stable: equal times keep their current relative order
fn sort_by_time(entries: &mut [Entry]) {
    entries.sort_by_key(|e| e.best_time);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::tests::create_test_entry;
    use crate::session::SessionRef;
    use crate::source::StaticSessionSource;
    use crate::temporal::parse_timestamp;

    const HOST: &str = "h1.example";

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn season() -> Season {
        Season {
            number: 3,
            start: ts("2022-01-01T00:00:00Z"),
            end: ts("2022-12-31T00:00:00Z"),
        }
    }

    fn board() -> Leaderboard {
        Leaderboard::new(Track::Zandvoort, Condition::Dry, season(), [HOST])
    }

    fn session_ref(filename: &str, when: &str) -> SessionRef {
        SessionRef {
            filename: filename.to_string(),
            timestamp: ts(when),
            track_label: "Zandvoort".to_string(),
            session_type: "FP".to_string(),
            password_protected: true,
        }
    }

    fn session(filename: &str, entries: Vec<Entry>) -> SessionResult {
        SessionResult {
            filename: filename.to_string(),
            track: "zandvoort".to_string(),
            session_type: "FP".to_string(),
            is_wet: false,
            entries,
        }
    }

    fn source_with(sessions: Vec<(SessionRef, SessionResult)>) -> StaticSessionSource {
        let mut source = StaticSessionSource::new();
        let refs = sessions.iter().map(|(r, _)| r.clone()).collect();
        source.push_page(HOST, refs);
        for (r, s) in sessions {
            source.add_result(HOST, &r.filename, s);
        }
        source
    }

    #[test]
    fn test_first_session_creates_entry_and_advances_watermark() {
        let mut lb = board();
        let source = source_with(vec![(
            session_ref("s1", "2022-01-02T00:00:00Z"),
            session("s1", vec![create_test_entry("D1", 5, 95_000)]),
        )]);

        let changed = lb.update(&source, HOST, &UpdateOptions::default()).unwrap();

        assert!(changed);
        assert_eq!(lb.entries().len(), 1);
        assert_eq!(lb.entries()[0].best_time, 95_000);
        assert_eq!(lb.watermarks().get(HOST), Some(ts("2022-01-02T00:00:00Z")));
        assert_eq!(lb.phase(), Phase::Merging);
    }

    #[test]
    fn test_faster_session_improves_in_place() {
        let mut lb = board();
        let first = source_with(vec![(
            session_ref("s1", "2022-01-02T00:00:00Z"),
            session("s1", vec![create_test_entry("D1", 5, 95_000)]),
        )]);
        lb.update(&first, HOST, &UpdateOptions::default()).unwrap();

        let second = source_with(vec![
            (
                session_ref("s2", "2022-01-03T00:00:00Z"),
                session("s2", vec![create_test_entry("D1", 5, 90_000)]),
            ),
            (
                session_ref("s1", "2022-01-02T00:00:00Z"),
                session("s1", vec![create_test_entry("D1", 5, 95_000)]),
            ),
        ]);
        let changed = lb.update(&second, HOST, &UpdateOptions::default()).unwrap();

        assert!(changed);
        assert_eq!(lb.entries().len(), 1);
        assert_eq!(lb.entries()[0].best_time, 90_000);
        assert_eq!(lb.watermarks().get(HOST), Some(ts("2022-01-03T00:00:00Z")));
        // Incremental scan stops at s1 without fetching it
        assert_eq!(second.fetch_count("s1"), 0);
    }

    #[test]
    fn test_forced_rescan_of_older_session_is_rejected_without_mutation() {
        let mut lb = board();
        lb.update(
            &source_with(vec![(
                session_ref("s2", "2022-01-03T00:00:00Z"),
                session("s2", vec![create_test_entry("D1", 5, 90_000)]),
            )]),
            HOST,
            &UpdateOptions::default(),
        )
        .unwrap();
        let before = lb.to_state();

        let stale = source_with(vec![(
            session_ref("s0", "2021-12-31T00:00:00Z"),
            session("s0", vec![create_test_entry("D9", 7, 80_000)]),
        )]);
        let options = UpdateOptions {
            page_limit: Some(1),
            ..UpdateOptions::default()
        };
        let err = lb.update(&stale, HOST, &options).unwrap_err();

        assert!(matches!(err, LeaderboardError::WatermarkRegression { .. }));
        assert_eq!(lb.to_state(), before);
        assert_eq!(stale.fetch_count("s0"), 0);
    }

    #[test]
    fn test_host_behind_watermark_is_regression() {
        let mut lb = board();
        lb.watermarks.set(HOST, ts("2022-06-01T00:00:00Z"));
        let source = source_with(vec![(
            session_ref("s1", "2022-05-01T00:00:00Z"),
            session("s1", vec![create_test_entry("D1", 5, 95_000)]),
        )]);

        let err = lb.update(&source, HOST, &UpdateOptions::default()).unwrap_err();
        assert!(matches!(err, LeaderboardError::WatermarkRegression { .. }));
        assert!(lb.entries().is_empty());
        assert_eq!(lb.watermarks().get(HOST), Some(ts("2022-06-01T00:00:00Z")));
    }

    #[test]
    fn test_same_session_twice_is_idempotent() {
        let mut lb = board();
        let s = session(
            "s1",
            vec![create_test_entry("D1", 5, 95_000), create_test_entry("D2", 5, 93_000)],
        );

        let first = lb.merge_session(&s);
        let state = lb.to_state();
        let second = lb.merge_session(&s);

        assert_eq!(first.added, 2);
        assert!(!second.changed());
        assert_eq!(lb.to_state(), state);
    }

    #[test]
    fn test_forced_rescan_of_merged_sessions_is_noop() {
        let mut lb = board();
        let source = source_with(vec![(
            session_ref("s1", "2022-01-02T00:00:00Z"),
            session("s1", vec![create_test_entry("D1", 5, 95_000)]),
        )]);
        lb.update(&source, HOST, &UpdateOptions::default()).unwrap();
        let state = lb.to_state();

        let options = UpdateOptions {
            page_limit: Some(3),
            ..UpdateOptions::default()
        };
        let changed = lb.update(&source, HOST, &options).unwrap();

        assert!(!changed);
        assert_eq!(lb.to_state(), state);
        // Equal-to-watermark sessions are re-fetched in forced mode
        assert_eq!(source.fetch_count("s1"), 2);
    }

    #[test]
    fn test_same_driver_different_cars_are_separate_entries() {
        let mut lb = board();
        lb.merge_session(&session(
            "s1",
            vec![create_test_entry("D1", 5, 95_000), create_test_entry("D1", 50, 105_000)],
        ));
        assert_eq!(lb.entries().len(), 2);
    }

    #[test]
    fn test_duplicate_identity_inside_one_session_folds() {
        let mut lb = board();
        lb.merge_session(&session(
            "s1",
            vec![create_test_entry("D1", 5, 95_000), create_test_entry("D1", 5, 94_000)],
        ));
        assert_eq!(lb.entries().len(), 1);
        assert_eq!(lb.entries()[0].best_time, 94_000);
    }

    #[test]
    fn test_entries_sorted_and_ties_keep_arrival_order() {
        let mut lb = board();
        lb.merge_session(&session(
            "s1",
            vec![
                create_test_entry("SLOW", 1, 99_000),
                create_test_entry("TIE_A", 1, 90_000),
                create_test_entry("FAST", 1, 85_000),
                create_test_entry("TIE_B", 1, 90_000),
            ],
        ));

        let order: Vec<(usize, &str)> = lb.ranked().map(|(r, e)| (r, e.driver_id.as_str())).collect();
        assert_eq!(order, vec![(1, "FAST"), (2, "TIE_A"), (3, "TIE_B"), (4, "SLOW")]);
    }

    #[test]
    fn test_filters_exclusion_password_track_condition() {
        let mut lb = board();
        let mut locked = session_ref("nopw", "2022-01-05T00:00:00Z");
        locked.password_protected = false;
        let mut wet = session("wet", vec![create_test_entry("W", 1, 80_000)]);
        wet.is_wet = true;
        let mut spa = session("spa", vec![create_test_entry("S", 1, 80_000)]);
        spa.track = "spa".to_string();

        let source = source_with(vec![
            (session_ref("excluded", "2022-01-06T00:00:00Z"), session("excluded", vec![create_test_entry("X", 1, 80_000)])),
            (locked, session("nopw", vec![create_test_entry("N", 1, 80_000)])),
            (session_ref("wet", "2022-01-04T00:00:00Z"), wet),
            (session_ref("spa", "2022-01-03T00:00:00Z"), spa),
            (session_ref("ok", "2022-01-02T00:00:00Z"), session("ok", vec![create_test_entry("OK", 1, 90_000)])),
        ]);
        let options = UpdateOptions {
            condition_filter: Condition::Dry,
            exclusions: vec!["excluded".to_string()],
            ..UpdateOptions::default()
        };

        let report = lb.update_with_report(&source, HOST, &options).unwrap();

        let ids: Vec<&str> = lb.entries().iter().map(|e| e.driver_id.as_str()).collect();
        assert_eq!(ids, vec!["OK"]);
        assert_eq!(report.sessions_merged, 1);
        assert_eq!(source.fetch_count("excluded"), 0);
        assert_eq!(source.fetch_count("nopw"), 0);
        // Newest observed session (wet, filtered later) still moves the watermark
        assert_eq!(lb.watermarks().get(HOST), Some(ts("2022-01-04T00:00:00Z")));
    }

    #[test]
    fn test_password_not_required_accepts_open_sessions() {
        let mut lb = board();
        let mut open = session_ref("open", "2022-01-02T00:00:00Z");
        open.password_protected = false;
        let source = source_with(vec![(open, session("open", vec![create_test_entry("D1", 5, 95_000)]))]);
        let options = UpdateOptions {
            password_required: false,
            ..UpdateOptions::default()
        };

        assert!(lb.update(&source, HOST, &options).unwrap());
    }

    #[test]
    fn test_no_laps_session_is_skipped() {
        let mut lb = board();
        let mut source = StaticSessionSource::new();
        source.push_page(HOST, vec![session_ref("empty", "2022-01-02T00:00:00Z")]);
        source.add_no_laps(HOST, "empty");

        let changed = lb.update(&source, HOST, &UpdateOptions::default()).unwrap();

        assert!(!changed);
        assert_eq!(lb.watermarks().get(HOST), Some(ts("2022-01-02T00:00:00Z")));
    }

    #[test]
    fn test_fetch_error_leaves_state_untouched() {
        let mut lb = board();
        let mut source = StaticSessionSource::new();
        source.push_page(HOST, vec![session_ref("missing", "2022-01-02T00:00:00Z")]);

        let err = lb.update(&source, HOST, &UpdateOptions::default()).unwrap_err();

        assert!(matches!(err, LeaderboardError::Fetch { .. }));
        assert_eq!(lb.watermarks().get(HOST), Some(season().start));
    }

    #[test]
    fn test_pagination_stops_at_circuit_breaker() {
        let mut lb = board();
        let mut source = StaticSessionSource::new();
        source.repeat_forever(HOST, session_ref("loop", "2022-06-01T00:00:00Z"));
        source.add_no_laps(HOST, "loop");
        let options = UpdateOptions {
            max_pages: 5,
            ..UpdateOptions::default()
        };

        let report = lb.update_with_report(&source, HOST, &options).unwrap();
        assert_eq!(report.pages_scanned, 5);
    }

    #[test]
    fn test_forced_page_limit_is_capped_by_circuit_breaker() {
        let mut lb = board();
        let mut source = StaticSessionSource::new();
        source.repeat_forever(HOST, session_ref("loop", "2022-06-01T00:00:00Z"));
        source.add_no_laps(HOST, "loop");
        let options = UpdateOptions {
            page_limit: Some(50),
            max_pages: 3,
            ..UpdateOptions::default()
        };

        let report = lb.update_with_report(&source, HOST, &options).unwrap();
        assert_eq!(report.pages_scanned, 3);
    }

    #[test]
    fn test_session_outside_season_is_not_fetched() {
        let mut lb = board();
        let source = source_with(vec![
            (
                session_ref("late", "2023-02-01T00:00:00Z"),
                session("late", vec![create_test_entry("D1", 5, 80_000)]),
            ),
            (
                session_ref("s1", "2022-01-02T00:00:00Z"),
                session("s1", vec![create_test_entry("D2", 5, 95_000)]),
            ),
        ]);

        let report = lb.update_with_report(&source, HOST, &UpdateOptions::default()).unwrap();

        assert_eq!(source.fetch_count("late"), 0);
        assert_eq!(report.sessions_merged, 1);
        assert_eq!(lb.entries().len(), 1);
        assert_eq!(lb.entries()[0].driver_id, "D2");
    }

    #[test]
    fn test_expired_deadline_aborts_before_first_page() {
        let mut lb = board();
        let source = source_with(vec![(
            session_ref("s1", "2022-01-02T00:00:00Z"),
            session("s1", vec![create_test_entry("D1", 5, 95_000)]),
        )]);
        let options = UpdateOptions {
            deadline: Some(Instant::now()),
            ..UpdateOptions::default()
        };

        let err = lb.update(&source, HOST, &options).unwrap_err();
        assert!(matches!(err, LeaderboardError::DeadlineExceeded { page: 1, .. }));
        assert!(lb.entries().is_empty());
        assert_eq!(lb.watermarks().get(HOST), Some(season().start));
    }

    #[test]
    fn test_empty_listing_keeps_watermark() {
        let mut lb = board();
        let source = StaticSessionSource::new();
        assert!(!lb.update(&source, HOST, &UpdateOptions::default()).unwrap());
        assert_eq!(lb.watermarks().get(HOST), Some(season().start));
    }

    #[test]
    fn test_finalize_requires_update_and_is_repeatable() {
        let mut lb = board();
        assert!(matches!(lb.finalize(), Err(LeaderboardError::InvalidState(_))));

        lb.update(&StaticSessionSource::new(), HOST, &UpdateOptions::default()).unwrap();
        lb.finalize_at(ts("2022-02-01T00:00:00Z")).unwrap();
        assert_eq!(lb.phase(), Phase::Idle);
        lb.finalize_at(ts("2022-02-01T00:00:00Z")).unwrap();
        assert_eq!(lb.last_updated(), Some(ts("2022-02-01T00:00:00Z")));

        lb.update(&StaticSessionSource::new(), HOST, &UpdateOptions::default()).unwrap();
        assert_eq!(lb.phase(), Phase::Merging);
    }

    #[test]
    fn test_from_state_folds_duplicates_and_sorts() {
        let state = LeaderboardState {
            key: LeaderboardKey {
                track: Track::Zandvoort,
                condition: Condition::Dry,
                season: 3,
            },
            entries: vec![
                create_test_entry("D2", 1, 99_000),
                create_test_entry("D1", 1, 95_000),
                create_test_entry("D1", 1, 92_000),
            ],
            watermarks: Watermarks::seeded([HOST], ts("2022-03-01T00:00:00Z")),
            last_updated: None,
        };

        let lb = Leaderboard::from_state(state, season()).unwrap();
        let times: Vec<u32> = lb.entries().iter().map(|e| e.best_time).collect();
        assert_eq!(times, vec![92_000, 99_000]);
        assert_eq!(lb.phase(), Phase::Empty);
    }

    #[test]
    fn test_fold_duplicates_keeps_fastest_per_identity() {
        let mut state = board().to_state();
        state.entries = vec![
            create_test_entry("D1", 1, 95_000),
            create_test_entry("D1", 2, 97_000),
            create_test_entry("D1", 1, 92_000),
        ];

        assert_eq!(state.fold_duplicates(), 1);
        let rows: Vec<(u32, u32)> = state.entries.iter().map(|e| (e.car_id, e.best_time)).collect();
        assert_eq!(rows, vec![(1, 92_000), (2, 97_000)]);
        assert_eq!(state.fold_duplicates(), 0);
    }

    #[test]
    fn test_from_state_rejects_other_season() {
        let state = board().to_state();
        let mut other = season();
        other.number = 4;
        assert!(Leaderboard::from_state(state, other).is_err());
    }

    #[test]
    fn test_fingerprint_ignores_last_updated() {
        let mut lb = board();
        lb.merge_session(&session("s1", vec![create_test_entry("D1", 5, 95_000)]));
        let a = lb.to_state();
        let mut b = a.clone();
        b.last_updated = Some(ts("2022-02-01T00:00:00Z"));
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.entries[0].best_time = 94_000;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(board().key().to_string(), "Zandvoort-Dry-S3");
    }
}
