use podnet::FetchError;

/// Failures of the feed decoder.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FeedParseError {
    #[error("feed document is empty")]
    Empty,
    #[error("feed document has no root element")]
    NoRoot,
    #[error("unsupported feed root element <{0}>")]
    UnsupportedRoot(String),
    #[error("feed document ended inside <{element}>")]
    Unterminated { element: String },
    #[error("malformed XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },
    /// The underlying byte stream failed; `transport` is set when the
    /// failure came from the network.
    #[error("failed to read feed: {message}")]
    Read {
        message: String,
        transport: Option<FetchError>,
    },
}

impl FeedParseError {
    pub fn transport(&self) -> Option<&FetchError> {
        match self {
            FeedParseError::Read { transport, .. } => transport.as_ref(),
            _ => None,
        }
    }
}

/// Failures while picking an episode.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("episode \"{title}\" was not offered for selection")]
    NotPresented { title: String },
    #[error("episode selection failed: {0}")]
    Interaction(String),
}
