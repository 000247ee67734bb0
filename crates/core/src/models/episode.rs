//! Episode pointer - what the room is currently watching

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodePointer {
    pub anime_id: String,
    pub episode_id: String,
}

impl EpisodePointer {
    /// Build a pointer, trimming and rejecting empty ids
    pub fn new(anime_id: &str, episode_id: &str) -> Result<Self> {
        let anime_id = anime_id.trim();
        let episode_id = episode_id.trim();
        if anime_id.is_empty() {
            return Err(Error::Validation("Anime id is required".into()));
        }
        if episode_id.is_empty() {
            return Err(Error::Validation("Episode id is required".into()));
        }
        Ok(Self {
            anime_id: anime_id.to_string(),
            episode_id: episode_id.to_string(),
        })
    }
}
