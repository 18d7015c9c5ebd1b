use std::collections::{HashMap, HashSet};

use crate::error::SelectionError;

/// Channel level information, shown before the episode list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMetadata {
    pub title: String,
    pub link: String,
}

/// One playable item of a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub title: String,
    pub enclosure_url: String,
    pub mime_type: Option<String>,
    pub length: Option<u64>,
    pub published: Option<String>,
}

impl Episode {
    /// Last path segment of the enclosure URL, without query.
    pub fn file_name(&self) -> Option<&str> {
        let path = self.enclosure_url.split(['?', '#']).next()?;
        path.rsplit('/').next().filter(|name| !name.is_empty())
    }
}

/// The finalized episodes of a feed, in document order.
///
/// Each episode gets a unique display label: its title, a file name when the
/// title is empty, and a ` (n)` suffix on repeated titles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeList {
    episodes: Vec<Episode>,
    labels: Vec<String>,
}

impl EpisodeList {
    pub fn new(episodes: Vec<Episode>) -> Self {
        let mut used = HashSet::with_capacity(episodes.len());
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut labels = Vec::with_capacity(episodes.len());

        for (index, episode) in episodes.iter().enumerate() {
            let base = match episode.title.trim() {
                "" => episode
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Episode {}", index + 1)),
                title => title.to_string(),
            };

            let count = seen.entry(base.clone()).or_insert(0);
            let mut label = base.clone();
            while !used.insert(label.clone()) {
                *count += 1;
                label = format!("{} ({})", base, *count + 1);
            }
            labels.push(label);
        }

        Self { episodes, labels }
    }

    /// Display labels, one per episode, in the same order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the episode shown under `label`.
    pub fn select(&self, label: &str) -> Result<&Episode, SelectionError> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|index| &self.episodes[index])
            .ok_or_else(|| SelectionError::NotPresented {
                title: label.to_string(),
            })
    }

    pub fn get(&self, index: usize) -> Option<&Episode> {
        self.episodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Episode)> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.episodes.iter())
    }
}

/// A decoded feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    pub metadata: FeedMetadata,
    pub episodes: EpisodeList,
}
