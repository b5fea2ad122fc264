//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with the configured user agent
//! - GET requests for listing index and detail pages
//! - Classifying failures into a `FetchResult` instead of raising them

use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched the page
    Success {
        /// Final URL after redirects
        final_url: String,
        /// HTTP status code
        status_code: u16,
        /// Page body content
        body: String,
    },

    /// The listing no longer exists (404 / 410)
    Gone {
        status_code: u16,
    },

    /// Any other non-success HTTP status
    HttpError {
        status_code: u16,
    },

    /// Network error (connection refused, timeout, unreadable body)
    NetworkError {
        error: String,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Short description of a failed fetch
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::Gone { status_code } => Some(format!("listing gone (HTTP {})", status_code)),
            Self::HttpError { status_code } => Some(format!("HTTP {}", status_code)),
            Self::NetworkError { error } => Some(error.clone()),
        }
    }
}

/// Builds an HTTP client for fetching listing pages
///
/// # Arguments
///
/// * `user_agent` - User-Agent header sent with every request
/// * `timeout` - Per-request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a page and classifies the outcome
///
/// Never fails: timeouts, connection errors and non-success statuses are
/// all reported through the returned `FetchResult`.
///
/// | Condition | Result |
/// |-----------|--------|
/// | 2xx | Success |
/// | HTTP 404 / 410 | Gone |
/// | other status | HttpError |
/// | timeout / connect / body error | NetworkError |
pub async fn fetch_page(client: &Client, url: &str) -> FetchResult {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => {
            let error = if e.is_timeout() {
                "Request timeout".to_string()
            } else if e.is_connect() {
                "Connection refused".to_string()
            } else {
                e.to_string()
            };
            return FetchResult::NetworkError { error };
        }
    };

    let status = response.status();
    let final_url = response.url().to_string();

    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return FetchResult::Gone {
            status_code: status.as_u16(),
        };
    }

    if !status.is_success() {
        return FetchResult::HttpError {
            status_code: status.as_u16(),
        };
    }

    match response.text().await {
        Ok(body) => FetchResult::Success {
            final_url,
            status_code: status.as_u16(),
            body,
        },
        Err(e) => FetchResult::NetworkError {
            error: e.to_string(),
        },
    }
}
