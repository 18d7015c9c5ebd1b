use std::{error::Error as StdError, io};

/// Failures of the transport layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("HTTP status {status_code} for {url}")]
    Status { url: String, status_code: u16 },
    #[error("transport error for {url}: {cause}")]
    Transport { url: String, cause: String },
    #[error("HTTP client configuration error: {0}")]
    Client(String),
}

impl FetchError {
    pub fn url(&self) -> Option<&str> {
        match self {
            FetchError::InvalidUrl { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Transport { url, .. } => Some(url),
            FetchError::Client(_) => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub(crate) fn transport(url: &str, err: &reqwest::Error) -> Self {
        let cause = if err.is_redirect() {
            "too many redirects".to_string()
        } else {
            error_chain(err)
        };
        FetchError::Transport {
            url: url.to_string(),
            cause,
        }
    }

    /// Recovers a `FetchError` carried inside an `io::Error` read from a
    /// [`ByteStream`](crate::ByteStream).
    pub fn from_io_error(err: &io::Error) -> Option<FetchError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<FetchError>())
            .cloned()
    }
}

// reqwest hides the interesting part (hyper, io) in the source chain
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let err = FetchError::Status {
            url: "http://host/feed".into(),
            status_code: 404,
        };
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(err.url(), Some("http://host/feed"));
        assert_eq!(err.to_string(), "HTTP status 404 for http://host/feed");
    }

    #[test]
    fn io_wrapping_round_trip() {
        let err = FetchError::Transport {
            url: "http://host/a.mp3".into(),
            cause: "connection reset".into(),
        };
        let io_err = io::Error::other(err.clone());
        assert_eq!(FetchError::from_io_error(&io_err), Some(err));

        let plain = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(FetchError::from_io_error(&plain), None);
    }
}
