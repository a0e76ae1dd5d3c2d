// CSV leaderboard file
//
//   Rank,First Name,Last Name,Short Name,ID,Car,Car ID,Best Lap,S1,S2,S3,Wet
//   1,Ana,Silva,SIL,S765...,McLaren 720S GT3 2019,22,01:35.000,...,0
//   Last updated?2022-06-18T00:00:00Z
//   ?MR?,host,2022-06-17T02:51:55Z
//
// Rank is written from row order and ignored on read.

use log::{debug, info};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::entry::Entry;
use crate::error::{LeaderboardError, Result};
use crate::laptime::{format_ms, parse_display};
use crate::leaderboard::{LeaderboardKey, LeaderboardState};
use crate::store::LeaderboardStore;
use crate::temporal::{format_last_updated, format_timestamp, parse_timestamp, Watermarks};

pub const CSV_HEADER: [&str; 12] = [
    "Rank",
    "First Name",
    "Last Name",
    "Short Name",
    "ID",
    "Car",
    "Car ID",
    "Best Lap",
    "S1",
    "S2",
    "S3",
    "Wet",
];

const LAST_UPDATED_PREFIX: &str = "Last updated?";
const WATERMARK_MARKER: &str = "?MR?";

/// One file per leaderboard key under a directory
pub struct CsvStore {
    dir: PathBuf,
}

impl CsvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvStore { dir: dir.into() }
    }

    /// `<dir>/<track>_<condition>_s<season>.csv`
    pub fn path_for(&self, key: &LeaderboardKey) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_s{}.csv",
            key.track.key(),
            key.condition.label().to_lowercase(),
            key.season
        ))
    }
}

impl LeaderboardStore for CsvStore {
    fn load(&self, key: &LeaderboardKey) -> Result<LeaderboardState> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(LeaderboardError::NotFound(key.to_string()));
        }
        let file = fs::File::open(&path)?;
        let state = read_leaderboard_csv(file, *key)?;
        debug!("loaded {} entries from {}", state.entries.len(), path.display());
        Ok(state)
    }

    fn save(&self, state: &LeaderboardState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&state.key);
        write_atomically(&path, state)?;
        info!("saved {} to {}", state.key, path.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "csv"
    }
}

/// Write via a temp file + rename so readers see the old or the new file
pub fn write_atomically(path: &Path, state: &LeaderboardState) -> Result<()> {
    let tmp = path.with_extension("csv.tmp");
    {
        let file = fs::File::create(&tmp)?;
        write_leaderboard_csv(file, state)?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn write_leaderboard_csv<W: Write>(writer: W, state: &LeaderboardState) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(writer);

    wtr.write_record(CSV_HEADER)?;
    for (rank, entry) in state.ranked() {
        wtr.write_record([
            rank.to_string(),
            entry.first_name.clone(),
            entry.last_name.clone(),
            entry.short_name.clone(),
            entry.driver_id.clone(),
            entry.car_label(),
            entry.car_id.to_string(),
            entry.best_time_display(),
            format_ms(entry.sector_1),
            format_ms(entry.sector_2),
            format_ms(entry.sector_3),
            if entry.is_wet { "1" } else { "0" }.to_string(),
        ])?;
    }

    if let Some(ts) = state.last_updated {
        wtr.write_record([format!("{}{}", LAST_UPDATED_PREFIX, format_last_updated(&ts))])?;
    }
    for (host, ts) in state.watermarks.iter() {
        wtr.write_record([WATERMARK_MARKER, host, format_timestamp(ts).as_str()])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Any malformed row aborts the whole read
pub fn read_leaderboard_csv<R: Read>(reader: R, key: LeaderboardKey) -> Result<LeaderboardState> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut entries = Vec::new();
    let mut watermarks = Watermarks::new();
    let mut last_updated = None;

    for (index, record) in rdr.records().enumerate() {
        let record = record?;
        let line = index + 2;
        let first = record.get(0).unwrap_or("");

        if let Some(ts) = first.strip_prefix(LAST_UPDATED_PREFIX) {
            last_updated = Some(parse_timestamp(ts)?);
            continue;
        }
        if first == WATERMARK_MARKER {
            let (Some(host), Some(ts)) = (record.get(1), record.get(2)) else {
                return Err(LeaderboardError::Parse(format!("line {}: incomplete watermark row", line)));
            };
            watermarks.set(host.trim(), parse_timestamp(ts)?);
            continue;
        }

        entries.push(parse_entry_row(&record, line)?);
    }

    Ok(LeaderboardState {
        key,
        entries,
        watermarks,
        last_updated,
    })
}

fn parse_entry_row(record: &csv::StringRecord, line: usize) -> Result<Entry> {
    if record.len() < CSV_HEADER.len() {
        return Err(LeaderboardError::Parse(format!(
            "line {}: expected {} columns, found {}",
            line,
            CSV_HEADER.len(),
            record.len()
        )));
    }
    // Name and id columns are kept verbatim; only numbers and flags are trimmed.
    let text = |i: usize| record.get(i).unwrap_or("");
    let field = |i: usize| text(i).trim();

    let car_id = field(6)
        .parse::<u32>()
        .map_err(|_| LeaderboardError::Parse(format!("line {}: bad car id {:?}", line, field(6))))?;
    let is_wet = match field(11) {
        "0" | "false" | "False" => false,
        "1" | "true" | "True" => true,
        other => {
            return Err(LeaderboardError::Parse(format!("line {}: bad wet flag {:?}", line, other)))
        }
    };

    Ok(Entry {
        driver_id: text(4).to_string(),
        car_id,
        first_name: text(1).to_string(),
        last_name: text(2).to_string(),
        short_name: text(3).to_string(),
        best_time: parse_display(field(7))?,
        sector_1: parse_display(field(8))?,
        sector_2: parse_display(field(9))?,
        sector_3: parse_display(field(10))?,
        is_wet,
    })
}

// ============================================================================
// TESTS
// ============================================================================
