// 🔄 Update Cycle - load, update every host, finalize, write
//
// One cycle handles exactly one leaderboard key. Hosts run in configured
// order. A host that fails (fetch error, deadline, watermark regression) is
// reported and skipped; the other hosts still run and their merges are kept.

use log::{error, info, warn};
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::api::PublishDocument;
use crate::config::Config;
use crate::error::{LeaderboardError, Result};
use crate::leaderboard::{Leaderboard, LeaderboardKey, LeaderboardState, UpdateReport};
use crate::publish::Publisher;
use crate::session::SessionFetcher;
use crate::store::csv_file::write_atomically;
use crate::store::LeaderboardStore;

/// Per-invocation switches
#[derive(Debug, Clone)]
pub struct CycleOptions {
    /// `Some(n)` forces a re-scan of n pages on every host
    pub page_limit: Option<usize>,
    pub password_required: bool,
    /// Write `<track>_POST.csv` instead of saving/publishing
    pub simulate: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        CycleOptions {
            page_limit: None,
            password_required: true,
            simulate: false,
        }
    }
}

#[derive(Debug)]
pub struct HostOutcome {
    pub host: String,
    pub result: Result<UpdateReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Written {
    /// Simulation output file
    Simulated(PathBuf),
    /// Saved to the named store (and published, if a publisher was set)
    Stored { store: String, published: bool },
}

#[derive(Debug)]
pub struct CycleReport {
    pub key: LeaderboardKey,
    /// No stored leaderboard existed; started empty
    pub bootstrapped: bool,
    pub hosts: Vec<HostOutcome>,
    /// `None` when every host failed and nothing was written
    pub written: Option<Written>,
    pub state: LeaderboardState,
}

impl CycleReport {
    pub fn changed(&self) -> bool {
        self.hosts
            .iter()
            .any(|h| h.result.as_ref().map(|r| r.changed()).unwrap_or(false))
    }

    pub fn failed_hosts(&self) -> impl Iterator<Item = &HostOutcome> {
        self.hosts.iter().filter(|h| h.result.is_err())
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} entries", self.key, self.state.entries.len())?;
        if self.bootstrapped {
            write!(f, " (new)")?;
        }
        for outcome in &self.hosts {
            match &outcome.result {
                Ok(report) => write!(f, "\n  ✓ {}", report)?,
                Err(e) => write!(f, "\n  ✗ {}: {}", outcome.host, e)?,
            }
        }
        match &self.written {
            Some(Written::Simulated(path)) => write!(f, "\n  → simulated to {}", path.display()),
            Some(Written::Stored { store, published }) => {
                write!(f, "\n  → saved to {}{}", store, if *published { " and published" } else { "" })
            }
            None => write!(f, "\n  → nothing written"),
        }
    }
}

/// Everything one cycle talks to
pub struct Cycle<'a> {
    config: &'a Config,
    fetcher: &'a dyn SessionFetcher,
    store: &'a dyn LeaderboardStore,
    publisher: Option<&'a dyn Publisher>,
}

impl<'a> Cycle<'a> {
    pub fn new(config: &'a Config, fetcher: &'a dyn SessionFetcher, store: &'a dyn LeaderboardStore) -> Self {
        Cycle {
            config,
            fetcher,
            store,
            publisher: None,
        }
    }

    /// Publish after every successful save
    pub fn with_publisher(mut self, publisher: &'a dyn Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Load (or bootstrap) `key`, update it from every host and write it
    pub fn run(&self, key: LeaderboardKey, options: &CycleOptions) -> Result<CycleReport> {
        let season = self.config.calendar().get(key.season)?.clone();

        let (mut leaderboard, bootstrapped) = match self.store.load(&key) {
            Ok(state) => (Leaderboard::from_state(state, season)?, false),
            Err(LeaderboardError::NotFound(_)) => {
                info!("{} does not exist in {}, starting empty", key, self.store.name());
                let fresh = Leaderboard::new(key.track, key.condition, season, &self.config.hosts);
                (fresh, true)
            }
            Err(e) => return Err(e),
        };
        leaderboard.seed_hosts(&self.config.hosts);

        let mut hosts = Vec::with_capacity(self.config.hosts.len());
        for host in &self.config.hosts {
            let update_options = self
                .config
                .update_options(&key, options.page_limit, options.password_required);

            match leaderboard.update_with_report(self.fetcher, host, &update_options) {
                Ok(report) => hosts.push(HostOutcome {
                    host: host.clone(),
                    result: Ok(report),
                }),
                Err(e) if e.is_host_local() => {
                    if matches!(e, LeaderboardError::WatermarkRegression { .. }) {
                        error!("{}: {}", key, e);
                    } else {
                        warn!("{}: host {} failed: {}", key, host, e);
                    }
                    hosts.push(HostOutcome {
                        host: host.clone(),
                        result: Err(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if !hosts.is_empty() && hosts.iter().all(|h| h.result.is_err()) {
            warn!("{}: every host failed, nothing written", key);
            return Ok(CycleReport {
                key,
                bootstrapped,
                hosts,
                written: None,
                state: leaderboard.to_state(),
            });
        }

        leaderboard.finalize()?;
        let state = leaderboard.to_state();
        let written = self.write(&state, options)?;

        Ok(CycleReport {
            key,
            bootstrapped,
            hosts,
            written: Some(written),
            state,
        })
    }

    fn write(&self, state: &LeaderboardState, options: &CycleOptions) -> Result<Written> {
        if options.simulate {
            fs::create_dir_all(&self.config.csv_dir)?;
            let path = self
                .config
                .csv_dir
                .join(format!("{}_POST.csv", state.key.track.key()));
            write_atomically(&path, state)?;
            info!("{}: simulated to {}", state.key, path.display());
            return Ok(Written::Simulated(path));
        }

        self.store.save(state)?;

        // Local state is already saved; a publish failure only reaches the caller
        let published = match self.publisher {
            Some(publisher) => {
                publisher.publish(&PublishDocument::from_state(state))?;
                true
            }
            None => false,
        };

        Ok(Written::Stored {
            store: self.store.name().to_string(),
            published,
        })
    }

    /// Run every key in order; one key failing does not stop the rest
    pub fn refresh(
        &self,
        keys: &[LeaderboardKey],
        options: &CycleOptions,
    ) -> Vec<(LeaderboardKey, Result<CycleReport>)> {
        keys.iter()
            .map(|key| {
                info!("refreshing {}", key);
                let result = self.run(*key, options);
                if let Err(e) = &result {
                    error!("{}: refresh failed: {}", key, e);
                }
                (*key, result)
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
