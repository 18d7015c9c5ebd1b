use podfeed::{FeedMetadata, SelectionError};

/// What the user did with the episode list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// One of the offered labels
    Selected(String),
    Cancelled,
}

/// Presents the episode labels and returns the user's choice.
///
/// `choose` blocks; the player calls it on a blocking thread and does not
/// start the media fetch before it returns.
pub trait EpisodeSelector: Send + 'static {
    fn choose(&mut self, metadata: &FeedMetadata, labels: &[String]) -> Result<Choice, SelectionError>;
}

impl<F> EpisodeSelector for F
where
    F: FnMut(&FeedMetadata, &[String]) -> Result<Choice, SelectionError> + Send + 'static,
{
    fn choose(&mut self, metadata: &FeedMetadata, labels: &[String]) -> Result<Choice, SelectionError> {
        self(metadata, labels)
    }
}
