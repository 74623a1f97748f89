//! Store records, view models, and the mapping between them.
//!
//! The store owns `PodcastData` / `EpisodeData` records. The presentation
//! layer only ever sees `Podcast` / `Episode`, projected from whatever the
//! latest snapshot delivered.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which table a record lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Podcast,
    Episode,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Podcast => "podcast",
            ModelKind::Episode => "episode",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record type the store knows how to persist and query.
pub trait Model: Serialize + DeserializeOwned + Send + 'static {
    const KIND: ModelKind;

    fn id(&self) -> &str;
}

/// Podcast category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cloud,
    Comedy,
    Technology,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Cloud, Category::Comedy, Category::Technology];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Cloud => "cloud",
            Category::Comedy => "comedy",
            Category::Technology => "technology",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Store records ---

/// Podcast as stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodcastData {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub author: String,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub image: Option<String>,
}

impl Model for PodcastData {
    const KIND: ModelKind = ModelKind::Podcast;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Episode as stored. `podcast_id` is the foreign key to the owning podcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeData {
    pub id: String,
    pub date: String,
    pub title: String,
    pub duration: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub podcast_id: Option<String>,
}

impl EpisodeData {
    /// Build the store record for a view-model episode owned by `podcast_id`.
    pub fn for_podcast(episode: &Episode, podcast_id: impl Into<String>) -> Self {
        Self {
            id: episode.id.clone(),
            date: episode.date.clone(),
            title: episode.title.clone(),
            duration: episode.duration.clone(),
            description: episode.description.clone(),
            podcast_id: Some(podcast_id.into()),
        }
    }
}

impl Model for EpisodeData {
    const KIND: ModelKind = ModelKind::Episode;

    fn id(&self) -> &str {
        &self.id
    }
}

// --- View models ---

/// Podcast as shown to the presentation layer.
///
/// Episodes are not part of the projection; they are loaded on demand through
/// their own subscription keyed by the podcast id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Podcast {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub author: String,
    pub rating: Option<i64>,
    pub image: Option<String>,
}

impl From<&PodcastData> for Podcast {
    fn from(data: &PodcastData) -> Self {
        Self {
            id: data.id.clone(),
            name: data.name.clone(),
            category: data.category,
            author: data.author.clone(),
            rating: data.rating,
            image: data.image.clone(),
        }
    }
}

impl From<PodcastData> for Podcast {
    fn from(data: PodcastData) -> Self {
        Self {
            id: data.id,
            name: data.name,
            category: data.category,
            author: data.author,
            rating: data.rating,
            image: data.image,
        }
    }
}

impl From<&Podcast> for PodcastData {
    fn from(podcast: &Podcast) -> Self {
        Self {
            id: podcast.id.clone(),
            name: podcast.name.clone(),
            category: podcast.category,
            author: podcast.author.clone(),
            rating: podcast.rating,
            image: podcast.image.clone(),
        }
    }
}

/// Episode as shown to the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Episode {
    pub id: String,
    pub date: String,
    pub title: String,
    pub duration: String,
    pub description: Option<String>,
}

impl From<&EpisodeData> for Episode {
    fn from(data: &EpisodeData) -> Self {
        Self {
            id: data.id.clone(),
            date: data.date.clone(),
            title: data.title.clone(),
            duration: data.duration.clone(),
            description: data.description.clone(),
        }
    }
}

impl From<EpisodeData> for Episode {
    fn from(data: EpisodeData) -> Self {
        Self {
            id: data.id,
            date: data.date,
            title: data.title,
            duration: data.duration,
            description: data.description,
        }
    }
}

/// Input for creating a new episode (before an id is assigned).
#[derive(Clone, Debug, Default)]
pub struct EpisodeDraft {
    pub date: String,
    pub title: String,
    pub duration: String,
    pub description: Option<String>,
}

impl EpisodeDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = duration.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Assign a fresh id and attach the draft to `podcast_id`.
    pub fn into_record(self, podcast_id: impl Into<String>) -> EpisodeData {
        EpisodeData {
            id: uuid::Uuid::new_v4().to_string(),
            date: self.date,
            title: self.title,
            duration: self.duration,
            description: self.description,
            podcast_id: Some(podcast_id.into()),
        }
    }
}
