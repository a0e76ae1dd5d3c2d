// 📤 Publisher - push finished leaderboards to the league's service
//
// One authenticated POST per publish. Failures go back to the caller as
// `LeaderboardError::Publish`; nothing is retried here and local state is
// never touched because of a failed publish.

use log::{debug, info, warn};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

use crate::api::{LeaderboardResponse, PublishDocument};
use crate::error::{LeaderboardError, Result};
use crate::leaderboard::{LeaderboardKey, LeaderboardState};
use crate::store::LeaderboardStore;

/// What the service answered to a successful publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReceipt {
    pub status: u16,
    pub body: String,
}

pub trait Publisher {
    fn publish(&self, document: &PublishDocument) -> Result<PublishReceipt>;
}

/// HTTP client for the leaderboard service
pub struct RemoteService {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteService {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| LeaderboardError::Publish {
            status: None,
            message: format!("http client: {}", e),
        })?;

        Ok(RemoteService {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// `{base}/leaderboard/get/{track}/{condition}?season=N`
    pub fn get_url(&self, key: &LeaderboardKey) -> String {
        format!(
            "{}/leaderboard/get/{}/{}?season={}",
            self.base_url,
            urlencoding::encode(key.track.key()),
            key.condition.as_int(),
            key.season
        )
    }

    pub fn update_url(&self) -> String {
        format!("{}/leaderboard/update", self.base_url)
    }

    fn request(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        let builder = builder
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

impl Publisher for RemoteService {
    fn publish(&self, document: &PublishDocument) -> Result<PublishReceipt> {
        let url = self.update_url();
        if self.token.is_none() {
            return Err(LeaderboardError::Publish {
                status: None,
                message: "no API token configured".to_string(),
            });
        }

        let body = serde_json::to_string(document)?;
        debug!("POST {} ({} drivers)", url, document.drivers.len());

        let response = self
            .request(self.client.post(&url))
            .body(body)
            .send()
            .map_err(|e| LeaderboardError::Publish {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text();
        if !status.is_success() {
            let message = match text {
                Ok(body) => body,
                Err(e) => format!("{} (response body unreadable: {})", status, e),
            };
            return Err(LeaderboardError::Publish {
                status: Some(status.as_u16()),
                message,
            });
        }
        let text = text.unwrap_or_else(|e| {
            warn!("{}: accepted, but the response body was unreadable: {}", url, e);
            String::new()
        });

        info!("published {} ({} drivers): HTTP {}", document.track.name, document.drivers.len(), status);
        Ok(PublishReceipt {
            status: status.as_u16(),
            body: text,
        })
    }
}

impl LeaderboardStore for RemoteService {
    fn load(&self, key: &LeaderboardKey) -> Result<LeaderboardState> {
        let url = self.get_url(key);
        debug!("GET {}", url);

        let response = self
            .request(self.client.get(&url))
            .send()
            .map_err(|e| LeaderboardError::fetch(&self.base_url, e))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|e| LeaderboardError::fetch(&self.base_url, e))?;

        // The service reports a missing leaderboard in the body, whatever the status
        match serde_json::from_str::<LeaderboardResponse>(&text) {
            Ok(body) => body.into_state(*key),
            Err(_) if !status.is_success() => {
                Err(LeaderboardError::fetch(&self.base_url, format!("{} returned {}", url, status)))
            }
            Err(e) => Err(LeaderboardError::fetch(&self.base_url, format!("bad response from {}: {}", url, e))),
        }
    }

    /// The service replaces the whole leaderboard on every update
    fn save(&self, state: &LeaderboardState) -> Result<()> {
        self.publish(&PublishDocument::from_state(state)).map(|_| ())
    }

    fn name(&self) -> &str {
        "remote"
    }
}
