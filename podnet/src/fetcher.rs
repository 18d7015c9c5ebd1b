use std::time::Duration;

use reqwest::{redirect, Client};
use tracing::{debug, info, warn};
use url::Url;

use crate::{error::FetchError, stream::ByteStream};

/// Connection parameters of an [`HttpFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Maximum silence between two reads of the response.
    pub read_timeout: Duration,
    pub max_redirects: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: podutils::default_user_agent(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// HTTP(S) GET returning the body as a [`ByteStream`].
///
/// No retries: a failed request is reported once as a [`FetchError`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    settings: FetchSettings,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .redirect(redirect::Policy::limited(settings.max_redirects))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Opens `url` and validates the final response status.
    ///
    /// Resolves once the response headers are in; the body is streamed as it
    /// is read from the returned [`ByteStream`].
    pub async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        let url = url.trim();
        let parsed = validate_url(url)?;

        debug!(url, "GET");
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::transport(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "HTTP request rejected");
            return Err(FetchError::Status {
                url: url.to_string(),
                status_code: status.as_u16(),
            });
        }

        let stream = ByteStream::from_response(url, response);
        info!(
            url,
            final_url = stream.url(),
            status = stream.status(),
            content_length = ?stream.content_length(),
            content_type = ?stream.content_type(),
            "HTTP response streaming"
        );
        Ok(stream)
    }
}

/// Parses `url` and checks that it is an absolute http(s) URL.
///
/// Surrounding whitespace is ignored, errors report the trimmed text.
pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    let url = url.trim();
    let invalid = |reason: String| FetchError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".into()));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert!(validate_url("http://example.com/feed.xml").is_ok());
        assert!(validate_url("https://example.com/a.mp3?x=1").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        for url in ["ftp://example.com/feed", "file:///tmp/feed.xml", "feed.xml", ""] {
            match validate_url(url) {
                Err(FetchError::InvalidUrl { url: reported, .. }) => assert_eq!(reported, url),
                other => panic!("{url}: expected InvalidUrl, got {other:?}"),
            }
        }
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let parsed = validate_url("  http://example.com/feed.xml\n").unwrap();
        assert_eq!(parsed.as_str(), "http://example.com/feed.xml");
        match validate_url(" ftp://example.com/feed ") {
            Err(FetchError::InvalidUrl { url, .. }) => assert_eq!(url, "ftp://example.com/feed"),
            other => panic!("expected InvalidUrl, got {other:?}"),
        }
    }

    #[test]
    fn default_settings_use_podplay_user_agent() {
        let settings = FetchSettings::default();
        assert!(settings.user_agent.starts_with("podplay/"));
        assert_eq!(settings.max_redirects, 10);
    }
}
