// 🌐 Session Sources - where SessionRefs and results files come from
//
// HttpSessionSource talks to the race-server web UI: a search-results listing
// (HTML table, newest first), a per-session page (checked for the league
// password marker) and a JSON download per session.
//
// StaticSessionSource serves canned pages and results from memory.

use log::{debug, warn};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{LeaderboardError, Result};
use crate::session::{PageListing, SessionFetcher, SessionQuery, SessionRef, SessionResult};
use crate::temporal::{format_timestamp, parse_timestamp};

// ============================================================================
// URLS
// ============================================================================

/// Listing search URL for one page of `query` on `host`.
///
/// The search term is form-encoded with spaces as `+` and double quotes left
/// as-is, which is what the results search expects.
pub fn build_query(scheme: &str, host: &str, query: &SessionQuery, page: usize) -> String {
    let mut terms = vec![format!("+{}", query.track.key())];
    if let Some(flag) = query.condition.query_flag() {
        terms.push(format!("+sessionResult.isWetSession:{}", flag));
    }
    terms.push(format!("+Date:>=\"{}\"", format_timestamp(&query.start)));
    terms.push(format!("+Date:<=\"{}\"", format_timestamp(&query.end)));

    let q = urlencoding::encode(&terms.join(" "))
        .replace("%20", "+")
        .replace("%22", "\"");

    format!("{}://{}/results?page={}&q={}&sort=date", scheme, host, page, q)
}

pub fn session_page_url(scheme: &str, host: &str, filename: &str) -> String {
    format!("{}://{}/results/{}", scheme, host, filename)
}

pub fn download_url(scheme: &str, host: &str, filename: &str) -> String {
    format!("{}://{}/results/download/{}.json", scheme, host, filename)
}

// ============================================================================
// LISTING PARSER
// ============================================================================

/// One `row-link` row of the results table, before the password check
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    pub filename: String,
    pub timestamp_raw: String,
    pub session_type: String,
    pub track_label: String,
}

/// Pulls `row-link` rows out of the results page HTML
pub struct ListingParser {
    row: Regex,
    href: Regex,
    cell: Regex,
    tag: Regex,
}

impl ListingParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| LeaderboardError::Parse(format!("listing pattern: {}", e)))
        };
        Ok(ListingParser {
            row: compile(r"(?is)<tr\b([^>]*)>(.*?)</tr>")?,
            href: compile(r#"(?i)data-href\s*=\s*["']?([^"'\s>]+)"#)?,
            cell: compile(r"(?is)<td\b[^>]*>(.*?)</td>")?,
            tag: compile(r"(?s)<[^>]+>")?,
        })
    }

    pub fn parse(&self, html: &str) -> Vec<ListingRow> {
        let mut rows = Vec::new();

        for caps in self.row.captures_iter(html) {
            let attrs = &caps[1];
            if !attrs.contains("row-link") {
                continue;
            }
            let Some(filename) = self
                .href
                .captures(attrs)
                .and_then(|h| filename_from_href(&h[1]))
            else {
                continue;
            };

            let cells: Vec<String> = self
                .cell
                .captures_iter(&caps[2])
                .map(|c| self.cell_text(&c[1]))
                .collect();
            if cells.len() < 3 {
                debug!("short listing row for {} ({} cells)", filename, cells.len());
                continue;
            }

            rows.push(ListingRow {
                filename,
                timestamp_raw: cells[0].clone(),
                session_type: cells[1].clone(),
                track_label: cells[2].clone(),
            });
        }

        rows
    }

    fn cell_text(&self, inner: &str) -> String {
        let text = self.tag.replace_all(inner, " ");
        let text = text
            .replace("&nbsp;", " ")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&#39;", "'")
            .replace("&quot;", "\"");
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// "/results/220210_232907_FP" -> "220210_232907_FP"
fn filename_from_href(href: &str) -> Option<String> {
    let rest = href.trim_start_matches('/').strip_prefix("results/")?;
    let name = rest.split(['/', '?', '#']).next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

pub fn has_password_marker<S: AsRef<str>>(page: &str, markers: &[S]) -> bool {
    markers.iter().any(|m| page.contains(m.as_ref()))
}

// ============================================================================
// HTTP SOURCE
// ============================================================================

pub struct HttpSessionSource {
    client: Client,
    scheme: String,
    password_markers: Vec<String>,
    parser: ListingParser,
}

impl HttpSessionSource {
    pub fn new(scheme: &str, password_markers: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LeaderboardError::fetch("-", e))?;

        Ok(HttpSessionSource {
            client,
            scheme: scheme.to_string(),
            password_markers,
            parser: ListingParser::new()?,
        })
    }

    fn get(&self, host: &str, url: &str) -> Result<(StatusCode, String)> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| LeaderboardError::fetch(host, format!("{}: {}", url, e)))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| LeaderboardError::fetch(host, format!("{}: {}", url, e)))?;
        Ok((status, body))
    }

    fn is_password_protected(&self, host: &str, filename: &str) -> Result<bool> {
        let url = session_page_url(&self.scheme, host, filename);
        let (status, body) = self.get(host, &url)?;
        if !status.is_success() {
            return Err(LeaderboardError::fetch(host, format!("{} returned {}", url, status)));
        }
        Ok(has_password_marker(&body, &self.password_markers))
    }
}

impl SessionFetcher for HttpSessionSource {
    fn list_sessions(&self, host: &str, query: &SessionQuery, page: usize) -> Result<PageListing> {
        let url = build_query(&self.scheme, host, query, page);
        let (status, body) = self.get(host, &url)?;

        if status == StatusCode::NOT_FOUND {
            debug!("404: {}", url);
            return Ok(PageListing::NotFound);
        }
        if !status.is_success() {
            return Err(LeaderboardError::fetch(host, format!("{} returned {}", url, status)));
        }

        let mut refs = Vec::new();
        for row in self.parser.parse(&body) {
            let timestamp = match parse_timestamp(&row.timestamp_raw) {
                Ok(ts) => ts,
                Err(e) => {
                    warn!("{}: skipping {} ({})", host, row.filename, e);
                    continue;
                }
            };
            let password_protected = self.is_password_protected(host, &row.filename)?;
            refs.push(SessionRef {
                filename: row.filename,
                timestamp,
                track_label: row.track_label,
                session_type: row.session_type,
                password_protected,
            });
        }

        Ok(PageListing::Sessions(refs))
    }

    fn fetch_session(&self, host: &str, filename: &str) -> Result<SessionResult> {
        let url = download_url(&self.scheme, host, filename);
        let (status, body) = self.get(host, &url)?;
        if !status.is_success() {
            return Err(LeaderboardError::fetch(host, format!("{} returned {}", url, status)));
        }

        SessionResult::from_json(filename, &body).map_err(|e| match e {
            LeaderboardError::Json(e) => {
                LeaderboardError::fetch(host, format!("bad results file {}: {}", filename, e))
            }
            other => other,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// STATIC SOURCE (in-memory)
// ============================================================================

/// Canned listings and results, keyed by host. Counts every results fetch.
#[derive(Default)]
pub struct StaticSessionSource {
    pages: HashMap<String, Vec<Vec<SessionRef>>>,
    endless: HashMap<String, SessionRef>,
    failing: Vec<String>,
    /// (host, filename) -> result; `None` means the file has no laps
    results: HashMap<(String, String), Option<SessionResult>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl StaticSessionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one listing page (newest first) for `host`
    pub fn push_page(&mut self, host: &str, refs: Vec<SessionRef>) {
        self.pages.entry(host.to_string()).or_default().push(refs);
    }

    /// Every page of `host` returns the same single session
    pub fn repeat_forever(&mut self, host: &str, session_ref: SessionRef) {
        self.endless.insert(host.to_string(), session_ref);
    }

    /// Listing requests to `host` fail like an unreachable server
    pub fn fail_host(&mut self, host: &str) {
        self.failing.push(host.to_string());
    }

    pub fn add_result(&mut self, host: &str, filename: &str, result: SessionResult) {
        self.results
            .insert((host.to_string(), filename.to_string()), Some(result));
    }

    pub fn add_no_laps(&mut self, host: &str, filename: &str) {
        self.results.insert((host.to_string(), filename.to_string()), None);
    }

    /// How many times `filename` was fetched, across hosts
    pub fn fetch_count(&self, filename: &str) -> usize {
        self.fetches
            .lock()
            .map(|f| f.get(filename).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl SessionFetcher for StaticSessionSource {
    fn list_sessions(&self, host: &str, _query: &SessionQuery, page: usize) -> Result<PageListing> {
        if self.failing.iter().any(|h| h == host) {
            return Err(LeaderboardError::fetch(host, "connection refused"));
        }
        if let Some(session_ref) = self.endless.get(host) {
            return Ok(PageListing::Sessions(vec![session_ref.clone()]));
        }

        let listing = self
            .pages
            .get(host)
            .and_then(|pages| pages.get(page))
            .map(|refs| PageListing::Sessions(refs.clone()))
            .unwrap_or(PageListing::NotFound);
        Ok(listing)
    }

    fn fetch_session(&self, host: &str, filename: &str) -> Result<SessionResult> {
        if let Ok(mut fetches) = self.fetches.lock() {
            *fetches.entry(filename.to_string()).or_insert(0) += 1;
        }

        match self.results.get(&(host.to_string(), filename.to_string())) {
            Some(Some(result)) => Ok(result.clone()),
            Some(None) => Err(LeaderboardError::NoLapsRecorded {
                filename: filename.to_string(),
            }),
            None => Err(LeaderboardError::fetch(host, format!("no such session {}", filename))),
        }
    }

    fn name(&self) -> &str {
        "static"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::{Condition, Track};
    use chrono::{TimeZone, Utc};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    /// One canned answer of a stub host, picked by request path prefix
    #[derive(Clone)]
    pub(crate) struct CannedResponse {
        prefix: &'static str,
        status: u16,
        body: String,
        declared_len: Option<usize>,
    }

    impl CannedResponse {
        pub(crate) fn new(prefix: &'static str, status: u16, body: impl Into<String>) -> Self {
            CannedResponse {
                prefix,
                status,
                body: body.into(),
                declared_len: None,
            }
        }

        /// Announce more body bytes than are sent, then hang up
        pub(crate) fn truncated(mut self) -> Self {
            self.declared_len = Some(self.body.len() + 64);
            self
        }
    }

    /// Plain HTTP/1.1 host on 127.0.0.1 answering every connection with the
    /// first matching canned response (404 otherwise). Returns `ip:port`.
    pub(crate) fn serve_canned(responses: Vec<CannedResponse>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let path = read_request_path(&mut stream);
                let (status, body, len) = match responses.iter().find(|r| path.starts_with(r.prefix)) {
                    Some(r) => (r.status, r.body.as_str(), r.declared_len.unwrap_or(r.body.len())),
                    None => (404, "", 0),
                };
                let head = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status, len
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(body.as_bytes());
                let _ = stream.flush();
            }
        });

        addr.to_string()
    }

    /// Reads the head and any Content-Length body; returns the request target
    fn read_request_path(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return String::new(),
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let body_len = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + body_len {
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }

        head.split_whitespace().nth(1).unwrap_or("").to_string()
    }

    fn http_source() -> HttpSessionSource {
        HttpSessionSource::new("http", vec!["Password: sra".to_string()], Duration::from_secs(5)).unwrap()
    }

    fn query(condition: Condition) -> SessionQuery {
        SessionQuery {
            track: Track::Zandvoort,
            condition,
            start: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2022, 12, 31, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_build_query_encodes_like_form_search() {
        let url = build_query("https", "h.example", &query(Condition::Dry), 0);
        assert_eq!(
            url,
            "https://h.example/results?page=0&q=%2Bzandvoort+%2BsessionResult.isWetSession%3A0+\
             %2BDate%3A%3E%3D\"2022-01-01T00%3A00%3A00Z\"+%2BDate%3A%3C%3D\"2022-12-31T00%3A00%3A00Z\"&sort=date"
        );
    }

    #[test]
    fn test_build_query_all_conditions_omits_wet_term() {
        let url = build_query("http", "h.example", &query(Condition::All), 3);
        assert!(url.starts_with("http://h.example/results?page=3&q=%2Bzandvoort+%2BDate"));
        assert!(!url.contains("isWetSession"));
    }

    #[test]
    fn test_session_urls() {
        assert_eq!(
            session_page_url("https", "h", "220210_232907_FP"),
            "https://h/results/220210_232907_FP"
        );
        assert_eq!(
            download_url("https", "h", "220210_232907_FP"),
            "https://h/results/download/220210_232907_FP.json"
        );
    }

    const LISTING: &str = r#"
        <table class="table">
          <tr><th>Date</th><th>Type</th><th>Track</th></tr>
          <tr class="row-link" data-href="/results/220210_232907_FP">
            <td> Thu, 10 Feb 2022 23:29:07 UTC </td>
            <td><span class="badge">Practice</span></td>
            <td>Zandvoort</td>
            <td>12</td>
          </tr>
          <tr data-href="/results/220209_200000_R" class="row-link clickable">
            <td>Wed, 09 Feb 2022 20:00:00 UTC</td><td>Race</td><td>Brands &amp; Hatch</td>
          </tr>
          <tr class="row-link" data-href="/results/broken"><td>only one</td></tr>
          <tr class="other" data-href="/results/ignored"><td>a</td><td>b</td><td>c</td></tr>
        </table>"#;

    #[test]
    fn test_listing_parser_extracts_rows() {
        let rows = ListingParser::new().unwrap().parse(LISTING);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].filename, "220210_232907_FP");
        assert_eq!(rows[0].timestamp_raw, "Thu, 10 Feb 2022 23:29:07 UTC");
        assert_eq!(rows[0].session_type, "Practice");
        assert_eq!(rows[0].track_label, "Zandvoort");
        assert_eq!(rows[1].filename, "220209_200000_R");
        assert_eq!(rows[1].track_label, "Brands & Hatch");
        assert!(parse_timestamp(&rows[0].timestamp_raw).is_ok());
    }

    #[test]
    fn test_filename_from_href() {
        assert_eq!(filename_from_href("/results/abc").as_deref(), Some("abc"));
        assert_eq!(filename_from_href("results/abc/").as_deref(), Some("abc"));
        assert_eq!(filename_from_href("/other/abc"), None);
        assert_eq!(filename_from_href("/results/"), None);
    }

    #[test]
    fn test_password_marker() {
        let markers = vec!["Password: sra".to_string(), "SRA League race".to_string()];
        assert!(has_password_marker("<p>Password: sra</p>", &markers));
        assert!(has_password_marker("An SRA League race", &markers));
        assert!(!has_password_marker("open lobby", &markers));
    }

    #[test]
    fn test_static_source_pages_then_not_found() {
        let mut source = StaticSessionSource::new();
        source.push_page("h", vec![]);
        assert_eq!(
            source.list_sessions("h", &query(Condition::All), 0).unwrap(),
            PageListing::Sessions(vec![])
        );
        assert_eq!(
            source.list_sessions("h", &query(Condition::All), 1).unwrap(),
            PageListing::NotFound
        );
    }

    #[test]
    fn test_static_source_fetch_outcomes() {
        let mut source = StaticSessionSource::new();
        source.add_no_laps("h", "empty");
        source.fail_host("down");

        assert!(matches!(
            source.fetch_session("h", "empty"),
            Err(LeaderboardError::NoLapsRecorded { .. })
        ));
        assert!(matches!(source.fetch_session("h", "nope"), Err(LeaderboardError::Fetch { .. })));
        assert!(source.list_sessions("down", &query(Condition::All), 0).is_err());
        assert_eq!(source.fetch_count("empty"), 1);
    }

    #[test]
    fn test_http_listing_reads_rows_and_password_pages() {
        let host = serve_canned(vec![
            CannedResponse::new("/results?page=0", 200, LISTING),
            CannedResponse::new("/results/220210_232907_FP", 200, "<p>Password: sra</p>"),
            CannedResponse::new("/results/220209_200000_R", 200, "open lobby"),
        ]);

        match http_source().list_sessions(&host, &query(Condition::Dry), 0).unwrap() {
            PageListing::Sessions(refs) => {
                assert_eq!(refs.len(), 2);
                assert_eq!(refs[0].filename, "220210_232907_FP");
                assert!(refs[0].password_protected);
                assert!(!refs[1].password_protected);
            }
            other => panic!("expected sessions, got {:?}", other),
        }
    }

    #[test]
    fn test_http_listing_404_is_not_found() {
        let host = serve_canned(vec![CannedResponse::new("/results?page=1", 404, "no such page")]);
        assert_eq!(
            http_source().list_sessions(&host, &query(Condition::Dry), 1).unwrap(),
            PageListing::NotFound
        );
    }

    #[test]
    fn test_http_listing_server_error_is_fetch_error() {
        let host = serve_canned(vec![CannedResponse::new("/results?page=0", 500, "boom")]);

        match http_source().list_sessions(&host, &query(Condition::Dry), 0) {
            Err(LeaderboardError::Fetch { host: failed, message }) => {
                assert_eq!(failed, host);
                assert!(message.contains("500"));
            }
            other => panic!("expected fetch error, got {:?}", other),
        }
    }

    #[test]
    fn test_http_listing_fails_when_session_page_errors() {
        let host = serve_canned(vec![
            CannedResponse::new("/results?page=0", 200, LISTING),
            CannedResponse::new("/results/220210_232907_FP", 503, "busy"),
        ]);
        assert!(matches!(
            http_source().list_sessions(&host, &query(Condition::Dry), 0),
            Err(LeaderboardError::Fetch { .. })
        ));
    }

    #[test]
    fn test_http_download_error_is_fetch_error() {
        let host = serve_canned(vec![CannedResponse::new("/results/download/", 503, "busy")]);
        assert!(matches!(
            http_source().fetch_session(&host, "220210_232907_FP"),
            Err(LeaderboardError::Fetch { .. })
        ));
    }
}
