use std::fmt;
use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::DatasetError;

pub struct FetchResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error_for_status(self, url: &str) -> Result<Self, DatasetError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(DatasetError::HttpStatus {
            url: url.to_string(),
            status: self.status,
        })
    }
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

pub trait Fetcher: Send + Sync {
    fn get(&self, url: &str) -> Result<FetchResponse, DatasetError>;
}

pub fn fetch_text(fetcher: &dyn Fetcher, url: &str) -> Result<String, DatasetError> {
    let mut response = fetcher.get(url)?.error_for_status(url)?;
    let mut text = String::new();
    response
        .body
        .read_to_string(&mut text)
        .map_err(|err| DatasetError::Network {
            url: url.to_string(),
            message: err.to_string(),
            retryable: true,
        })?;
    Ok(text)
}

#[derive(Debug, Clone, Copy)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    /// Upper bound for one whole attempt, body included.
    pub timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(options: HttpOptions) -> Result<Self, DatasetError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mtdl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DatasetError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(options.connect_timeout)
            .timeout(options.timeout)
            .build()
            .map_err(|err| DatasetError::Network {
                url: String::new(),
                message: err.to_string(),
                retryable: false,
            })?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<FetchResponse, DatasetError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| DatasetError::Network {
                url: url.to_string(),
                message: err.to_string(),
                retryable: is_retryable_error(&err),
            })?;
        Ok(FetchResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}
