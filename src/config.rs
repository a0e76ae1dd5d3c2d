use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::catalog::{Condition, Season, SeasonCalendar, Track};
use crate::leaderboard::{LeaderboardKey, UpdateOptions, DEFAULT_MAX_PAGES};

/// Environment variable that overrides `api_token`
pub const TOKEN_ENV: &str = "SRA_API_TOKEN";

/// Where finished leaderboards are loaded from and saved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The league's leaderboard service (GET to load, POST to save)
    Remote,
    Sqlite,
    Csv,
}

/// Runtime configuration, read from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Race-server hosts, processed in this order
    pub hosts: Vec<String>,
    pub scheme: String,

    pub backend: Backend,
    /// Also POST to the remote service after saving to a local backend
    pub publish: bool,
    pub api_base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Text on a session page that marks a league session
    pub password_markers: Vec<String>,
    pub max_pages: usize,
    pub request_timeout_secs: u64,
    /// Per-host wall-clock budget, checked between pages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_deadline_secs: Option<u64>,

    pub csv_dir: PathBuf,
    pub sqlite_path: PathBuf,

    pub seasons: Vec<Season>,
    /// Track key -> session filenames never merged for that track
    pub exclusions: BTreeMap<String, Vec<String>>,
    /// Keys processed by `refresh`
    pub tracked: Vec<LeaderboardKey>,
}

impl Config {
    /// Load config from `path`; a missing file gives the defaults.
    /// `SRA_API_TOKEN` wins over the file's token.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_token_override(std::env::var(TOKEN_ENV).ok());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("sra-leaderboard.toml")
    }

    fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.api_token = Some(token);
        }
    }

    pub fn calendar(&self) -> SeasonCalendar {
        SeasonCalendar::new(self.seasons.clone())
    }

    pub fn exclusions_for(&self, track: Track) -> Vec<String> {
        self.exclusions.get(track.key()).cloned().unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Options for one host update of `key`; the deadline starts now
    pub fn update_options(
        &self,
        key: &LeaderboardKey,
        page_limit: Option<usize>,
        password_required: bool,
    ) -> UpdateOptions {
        UpdateOptions {
            page_limit,
            password_required,
            condition_filter: key.condition,
            max_pages: self.max_pages,
            deadline: self
                .host_deadline_secs
                .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs))),
            exclusions: self.exclusions_for(key.track),
        }
    }
}

fn utc(y: i32, m: u32, d: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single().unwrap_or_default()
}

fn default_seasons() -> Vec<Season> {
    vec![
        Season { number: 1, start: utc(2021, 9, 1), end: utc(2022, 1, 31) },
        Season { number: 2, start: utc(2022, 2, 1), end: utc(2022, 5, 30) },
        Season { number: 3, start: utc(2022, 5, 31), end: utc(2022, 9, 30) },
        Season { number: 4, start: utc(2022, 10, 1), end: utc(2023, 1, 31) },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hosts: vec![
                "simracingalliance.emperorservers.com".to_string(),
                "accsm.simracingalliance.com".to_string(),
            ],
            scheme: "https".to_string(),
            backend: Backend::Remote,
            publish: false,
            api_base_url: "https://www.simracingalliance.com/api".to_string(),
            api_token: None,
            password_markers: vec!["Password: sra".to_string(), "SRA League race".to_string()],
            max_pages: DEFAULT_MAX_PAGES,
            request_timeout_secs: 15,
            host_deadline_secs: None,
            csv_dir: PathBuf::from("leaderboards"),
            sqlite_path: PathBuf::from("leaderboards.db"),
            seasons: default_seasons(),
            exclusions: BTreeMap::new(),
            tracked: Vec::new(),
        }
    }
}
