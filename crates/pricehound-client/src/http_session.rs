use std::time::Duration;

use futures::future::BoxFuture;
use pricehound_core::error::SourceError;
use pricehound_core::traits::{PageRequest, PageSession, SessionBackend, SessionProfile};
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};

/// Plain HTTP session backend using reqwest.
///
/// Each session gets its own `Client` with the profile's User-Agent and
/// `Accept-Language`, and no cookie store, so nothing is shared between
/// sessions. Pages are not rendered: sites that build their listings with
/// JavaScript need the `browser` backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    connect_timeout: Duration,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn build_client(&self, profile: &SessionProfile) -> Result<Client, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        let language = accept_language(&profile.locale);
        if let Ok(value) = HeaderValue::from_str(&language) {
            headers.insert(ACCEPT_LANGUAGE, value);
        }

        Client::builder()
            .user_agent(&profile.user_agent)
            .default_headers(headers)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("Failed to build HTTP client: {e}")))
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for HttpBackend {
    fn open<'a>(
        &'a self,
        profile: &'a SessionProfile,
    ) -> BoxFuture<'a, Result<Box<dyn PageSession>, SourceError>> {
        Box::pin(async move {
            let client = self.build_client(profile)?;
            Ok(Box::new(HttpSession { client }) as Box<dyn PageSession>)
        })
    }
}

/// One isolated HTTP session.
pub struct HttpSession {
    client: Client,
}

impl PageSession for HttpSession {
    fn load<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<String, SourceError>> {
        Box::pin(async move {
            let url = request.url.as_str();
            let response = self
                .client
                .get(url)
                .timeout(request.timeout)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        SourceError::Network(format!("Request to {url} timed out"))
                    } else if e.is_connect() {
                        SourceError::Network(format!("Connection failed: {e}"))
                    } else {
                        SourceError::Network(e.to_string())
                    }
                })?;

            if let Some(err) = classify_status(response.status().as_u16(), url) {
                return Err(err);
            }

            response
                .text()
                .await
                .map_err(|e| SourceError::Network(format!("Failed to read response body: {e}")))
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { drop(self) })
    }
}

/// Map a non-success HTTP status to a source error.
fn classify_status(status: u16, url: &str) -> Option<SourceError> {
    match status {
        200..=299 => None,
        403 | 429 | 503 => Some(SourceError::Blocked(format!("HTTP {status} for {url}"))),
        _ => Some(SourceError::Network(format!("HTTP {status} for {url}"))),
    }
}

/// `it-IT` becomes `it-IT,it;q=0.9`.
fn accept_language(locale: &str) -> String {
    match locale.split_once('-') {
        Some((lang, _)) => format!("{locale},{lang};q=0.9"),
        None => locale.to_string(),
    }
}
