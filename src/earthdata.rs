use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use directories::BaseDirs;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{DateRange, DayNight, MgrsTile};
use crate::error::SyncError;
use crate::granule::GranuleRecord;

pub const URS_HOST: &str = "urs.earthdata.nasa.gov";
const CMR_SEARCH_URL: &str = "https://cmr.earthdata.nasa.gov/search/granules.umm_json";
const TOKEN_URL: &str = "https://urs.earthdata.nasa.gov/api/users/find_or_create_token";
const SEARCH_AFTER: &str = "CMR-Search-After";
const PAGE_SIZE: usize = 2000;

/// One granule search: collection, optional tile, time window and day/night flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub short_name: String,
    pub tile: Option<MgrsTile>,
    pub range: DateRange,
    pub day_night: DayNight,
}

impl SearchQuery {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("short_name", self.short_name.clone()),
            ("temporal", self.range.as_temporal()),
            ("day_night_flag", self.day_night.as_query().to_string()),
            ("cloud_hosted", "true".to_string()),
            ("page_size", PAGE_SIZE.to_string()),
        ];
        if let Some(tile) = &self.tile {
            params.push(("readable_granule_name", format!("*{tile}*")));
            params.push(("options[readable_granule_name][pattern]", "true".to_string()));
        }
        params
    }
}

pub trait EarthdataClient: Send + Sync {
    fn authenticate(&self) -> Result<(), SyncError>;
    fn search(&self, query: &SearchQuery) -> Result<Vec<GranuleRecord>, SyncError>;
    /// Fetches `url` into `destination` and returns the number of bytes written.
    fn download(&self, url: &str, destination: &Path) -> Result<u64, SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    Login { username: String, password: String },
}

impl Credentials {
    /// Looks up `EARTHDATA_TOKEN`, then `EARTHDATA_USERNAME`/`EARTHDATA_PASSWORD`,
    /// then the `~/.netrc` entry for the Earthdata login host.
    pub fn discover() -> Result<Self, SyncError> {
        let netrc = netrc_path().and_then(|path| fs::read_to_string(path).ok());
        Self::resolve(|key| std::env::var(key).ok(), netrc.as_deref())
    }

    pub fn resolve<F>(env: F, netrc: Option<&str>) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| env(key).filter(|value| !value.trim().is_empty());
        if let Some(token) = non_empty("EARTHDATA_TOKEN") {
            return Ok(Credentials::Token(token.trim().to_string()));
        }
        if let (Some(username), Some(password)) =
            (non_empty("EARTHDATA_USERNAME"), non_empty("EARTHDATA_PASSWORD"))
        {
            return Ok(Credentials::Login { username, password });
        }
        netrc
            .and_then(|contents| parse_netrc(contents, URS_HOST))
            .map(|(username, password)| Credentials::Login { username, password })
            .ok_or(SyncError::MissingCredentials)
    }
}

/// Returns the login and password of the `machine` entry for `host`.
pub fn parse_netrc(contents: &str, host: &str) -> Option<(String, String)> {
    let mut tokens = contents.split_whitespace();
    let mut in_host = false;
    let mut login = None;
    let mut password = None;

    while let Some(token) = tokens.next() {
        match token {
            "machine" => {
                if in_host {
                    break;
                }
                in_host = tokens.next() == Some(host);
            }
            "default" => {
                if in_host {
                    break;
                }
            }
            "login" if in_host => login = tokens.next().map(str::to_string),
            "password" if in_host => password = tokens.next().map(str::to_string),
            "login" | "password" | "account" => {
                tokens.next();
            }
            _ => {}
        }
    }

    login.zip(password)
}

fn netrc_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".netrc"))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<Value>,
}

pub struct EarthdataHttpClient {
    client: Client,
    search_url: String,
    token_url: String,
    token: Mutex<Option<String>>,
}

impl EarthdataHttpClient {
    pub fn new() -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ecosync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::EarthdataHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| SyncError::EarthdataHttp(err.to_string()))?;

        Ok(Self {
            client,
            search_url: CMR_SEARCH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            token: Mutex::new(None),
        })
    }

    fn bearer(&self) -> Option<String> {
        self.token.lock().ok().and_then(|token| token.clone())
    }

    fn exchange_login(&self, username: &str, password: &str) -> Result<String, SyncError> {
        let response = self.send_with_retries(|| {
            self.client
                .post(&self.token_url)
                .basic_auth(username, Some(password))
        })?;
        let response = handle_status(response)
            .map_err(|err| SyncError::AuthenticationFailed(err.to_string()))?;
        let body: TokenResponse = response
            .json()
            .map_err(|err| SyncError::AuthenticationFailed(err.to_string()))?;
        Ok(body.access_token)
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, SyncError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        debug!(status, attempt, "retrying Earthdata request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        debug!(error = %err, attempt, "retrying Earthdata request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::EarthdataHttp(err.to_string()));
                }
            }
        }
    }
}

impl EarthdataClient for EarthdataHttpClient {
    fn authenticate(&self) -> Result<(), SyncError> {
        let token = match Credentials::discover()? {
            Credentials::Token(token) => token,
            Credentials::Login { username, password } => {
                self.exchange_login(&username, &password)?
            }
        };
        let mut slot = self
            .token
            .lock()
            .map_err(|err| SyncError::AuthenticationFailed(err.to_string()))?;
        *slot = Some(token);
        info!("authenticated with Earthdata");
        Ok(())
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<GranuleRecord>, SyncError> {
        let params = query.params();
        let token = self.bearer();
        let mut search_after: Option<String> = None;
        let mut granules = Vec::new();

        loop {
            let response = self.send_with_retries(|| {
                let mut request = self.client.get(&self.search_url).query(&params);
                if let Some(token) = &token {
                    request = request.bearer_auth(token);
                }
                if let Some(after) = &search_after {
                    request = request.header(SEARCH_AFTER, after.as_str());
                }
                request
            })?;
            let response = handle_status(response)?;
            let next = response
                .headers()
                .get(SEARCH_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let page: SearchPage = response
                .json()
                .map_err(|err| SyncError::SearchResponse(err.to_string()))?;

            let count = page.items.len();
            granules.extend(page.items.into_iter().map(GranuleRecord::new));
            debug!(page_items = count, total = granules.len(), "search page received");

            match next {
                Some(after) if count == PAGE_SIZE => search_after = Some(after),
                _ => break,
            }
        }

        info!(count = granules.len(), "granules found");
        Ok(granules)
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, SyncError> {
        let token = self
            .bearer()
            .ok_or_else(|| SyncError::AuthenticationFailed("not authenticated".to_string()))?;
        let response = self.send_with_retries(|| self.client.get(url).bearer_auth(&token))?;
        let mut response = handle_status(response)?;

        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut temp = tempfile::Builder::new()
            .prefix(".ecosync-")
            .tempfile_in(parent)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let bytes = std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| SyncError::EarthdataHttp(format!("{url}: {err}")))?;
        if bytes == 0 {
            return Err(SyncError::DownloadVerification(format!("{url}: empty response body")));
        }
        temp.persist(destination)
            .map_err(|err| SyncError::Filesystem(err.error.to_string()))?;
        Ok(bytes)
    }
}

fn handle_status(response: Response) -> Result<Response, SyncError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "Earthdata request failed".to_string());
    Err(SyncError::EarthdataStatus { status, message })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const NETRC: &str = "machine example.org login other password nope\n\
                         machine urs.earthdata.nasa.gov\n  login alice\n  password s3cret\n";

    #[test]
    fn netrc_entry_for_host() {
        assert_eq!(
            parse_netrc(NETRC, URS_HOST),
            Some(("alice".to_string(), "s3cret".to_string()))
        );
        assert_eq!(parse_netrc(NETRC, "missing.example"), None);
    }

    #[test]
    fn token_wins_over_login() {
        let creds = Credentials::resolve(
            |key| match key {
                "EARTHDATA_TOKEN" => Some("abc".to_string()),
                "EARTHDATA_USERNAME" => Some("bob".to_string()),
                "EARTHDATA_PASSWORD" => Some("pw".to_string()),
                _ => None,
            },
            Some(NETRC),
        )
        .unwrap();
        assert_eq!(creds, Credentials::Token("abc".to_string()));
    }

    #[test]
    fn netrc_is_last_resort() {
        let creds = Credentials::resolve(|_| None, Some(NETRC)).unwrap();
        assert_matches!(creds, Credentials::Login { username, .. } if username == "alice");

        let err = Credentials::resolve(|_| None, None).unwrap_err();
        assert_matches!(err, SyncError::MissingCredentials);
    }

    #[test]
    fn query_params_include_tile_pattern() {
        let query = SearchQuery {
            short_name: "ECO_L2T_LSTE".to_string(),
            tile: Some("18TUN".parse().unwrap()),
            range: DateRange::parse("2025-01-01", "2025-01-31").unwrap(),
            day_night: DayNight::Day,
        };
        let params = query.params();
        assert!(params.contains(&("readable_granule_name", "*18TUN*".to_string())));
        assert!(params.contains(&(
            "temporal",
            "2025-01-01T00:00:00Z,2025-01-31T23:59:59Z".to_string()
        )));
        assert!(params.contains(&("day_night_flag", "DAY".to_string())));
    }
}
