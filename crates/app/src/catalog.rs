//! Episode catalog
//!
//! Episode lists keyed by anime id, read from a TOML file:
//!
//! ```toml
//! [[anime]]
//! id = "frieren-18542"
//! title = "Frieren"
//!
//! [[anime.episodes]]
//! id = "frieren-18542?ep=107257"
//! episode_no = 1
//! title = "The Journey's End"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use watchparty_core::{read_toml, EpisodePointer, Result};

/// Source of episode lists
pub trait EpisodeProvider {
    /// Episodes of an anime in list order; empty when unknown
    fn episodes(&self, anime_id: &str) -> &[Episode];

    /// Display title of an anime
    fn title(&self, _anime_id: &str) -> Option<&str> {
        None
    }

    /// Resolve user input (episode id or number) to a pointer
    fn resolve(&self, anime_id: &str, input: &str) -> Option<EpisodePointer> {
        let input = input.trim();
        let episodes = self.episodes(anime_id);
        let found = episodes
            .iter()
            .find(|ep| ep.episode_id() == input)
            .or_else(|| {
                let number: u32 = input.parse().ok()?;
                episodes.iter().find(|ep| ep.episode_no == number)
            })?;
        EpisodePointer::new(anime_id, found.episode_id()).ok()
    }

    /// Default episode when none is given: the first listed
    fn first(&self, anime_id: &str) -> Option<EpisodePointer> {
        let first = self.episodes(anime_id).first()?;
        EpisodePointer::new(anime_id, first.episode_id()).ok()
    }

    /// Display number of an episode id
    fn episode_no(&self, pointer: &EpisodePointer) -> Option<u32> {
        self.episodes(&pointer.anime_id)
            .iter()
            .find(|ep| ep.episode_id() == pointer.episode_id)
            .map(|ep| ep.episode_no)
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Episode {
    /// Provider id, usually `<animeId>?ep=<episodeId>`
    pub id: String,
    pub episode_no: u32,
    #[serde(default)]
    pub title: Option<String>,
}

impl Episode {
    /// The `ep` value of the id, or the whole id when it has none
    pub fn episode_id(&self) -> &str {
        match self.id.split_once("ep=") {
            Some((_, rest)) => rest.split('&').next().unwrap_or(rest),
            None => &self.id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    anime: Vec<AnimeEntry>,
}

#[derive(Debug, Deserialize)]
struct AnimeEntry {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    episodes: Vec<Episode>,
}

/// File-backed catalog
#[derive(Debug, Default)]
pub struct StaticCatalog {
    episodes: HashMap<String, Vec<Episode>>,
    titles: HashMap<String, String>,
}

impl StaticCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let file: CatalogFile = read_toml(path)?;
        let mut catalog = Self::default();
        for entry in file.anime {
            if let Some(title) = entry.title {
                catalog.titles.insert(entry.id.clone(), title);
            }
            catalog.episodes.insert(entry.id, entry.episodes);
        }
        tracing::info!(anime = catalog.episodes.len(), "Loaded episode catalog");
        Ok(catalog)
    }
}

impl EpisodeProvider for StaticCatalog {
    fn episodes(&self, anime_id: &str) -> &[Episode] {
        self.episodes.get(anime_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn title(&self, anime_id: &str) -> Option<&str> {
        self.titles.get(anime_id).map(String::as_str)
    }
}
