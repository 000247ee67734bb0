//! Navigation synchronizer
//!
//! Reconciles the room's current episode with the client's own location,
//! `/watch/<animeId>?ep=<episodeId>&room=<roomCode>`, without navigating
//! when the client is already where the room is.

use std::fmt;

use url::Url;
use watchparty_core::{EpisodePointer, RoomCode};

/// Locations are paths; the base only exists to make them parseable
const BASE_URL: &str = "http://localhost/";

/// Page-navigation primitive
pub trait Navigator {
    /// Current path and query
    fn location(&self) -> String;
    /// Go to `path`; `replace` rewrites the current entry instead of pushing
    fn navigate(&mut self, path: &str, replace: bool);
}

/// A parsed client location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    url: Url,
}

impl Location {
    pub fn parse(path: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(BASE_URL)?.join(path)?;
        Ok(Self { url })
    }

    /// Watch page for an episode, optionally carrying a room code
    pub fn watch(
        episode: &EpisodePointer,
        room: Option<&RoomCode>,
    ) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(BASE_URL)?;
        url.set_path(&format!("/watch/{}", episode.anime_id));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("ep", &episode.episode_id);
            if let Some(code) = room {
                query.append_pair("room", code.as_str());
            }
        }
        Ok(Self { url })
    }

    pub fn anime_id(&self) -> Option<&str> {
        let mut segments = self.url.path_segments()?;
        match (segments.next(), segments.next()) {
            (Some("watch"), Some(id)) if !id.is_empty() => Some(id),
            _ => None,
        }
    }

    pub fn episode_id(&self) -> Option<String> {
        self.query_value("ep")
    }

    pub fn room(&self) -> Option<String> {
        self.query_value("room")
    }

    /// Same anime and episode, regardless of room
    pub fn is_watching(&self, episode: &EpisodePointer) -> bool {
        self.anime_id() == Some(episode.anime_id.as_str())
            && self.episode_id().as_deref() == Some(episode.episode_id.as_str())
    }

    /// Same location with the `room` parameter set or removed
    pub fn with_room(&self, room: Option<&RoomCode>) -> Self {
        let kept: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(key, _)| key != "room")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let mut url = self.url.clone();
        url.set_query(None);
        if !kept.is_empty() || room.is_some() {
            let mut query = url.query_pairs_mut();
            for (key, value) in &kept {
                query.append_pair(key, value);
            }
            if let Some(code) = room {
                query.append_pair("room", code.as_str());
            }
        }
        Self { url }
    }

    /// Path plus query, as handed to the navigator
    pub fn to_path(&self) -> String {
        match self.url.query() {
            Some(query) if !query.is_empty() => format!("{}?{}", self.url.path(), query),
            _ => self.url.path().to_string(),
        }
    }

    fn query_value(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path())
    }
}

/// What the session needs from navigation after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationRequest {
    /// Entered a room; follow its episode if one is set
    Enter {
        code: RoomCode,
        episode: Option<EpisodePointer>,
    },
    /// The host moved the room to another episode
    Follow {
        code: RoomCode,
        episode: EpisodePointer,
    },
    /// Left the room
    Leave,
}

/// Applies [`NavigationRequest`]s to a [`Navigator`]
pub struct NavigationSync<N> {
    navigator: N,
}

impl<N: Navigator> NavigationSync<N> {
    pub fn new(navigator: N) -> Self {
        Self { navigator }
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    /// Apply a request; returns the path navigated to, if any
    pub fn apply(&mut self, request: NavigationRequest) -> Option<String> {
        match request {
            NavigationRequest::Enter { code, episode } => {
                let episode = episode?;
                self.on_room_entered(&code, &episode)
            }
            NavigationRequest::Follow { code, episode } => self.on_episode_changed(&code, &episode),
            NavigationRequest::Leave => self.on_room_left(),
        }
    }

    fn on_room_entered(&mut self, code: &RoomCode, episode: &EpisodePointer) -> Option<String> {
        let target = Location::watch(episode, Some(code)).ok()?;
        match self.current() {
            Some(current) if current.is_watching(episode) => {
                if current.room().as_deref() == Some(code.as_str()) {
                    tracing::debug!(room = %code, "Already on the room's episode");
                    None
                } else {
                    // Right page, only the room code is missing
                    Some(self.go(&target, true))
                }
            }
            _ => Some(self.go(&target, false)),
        }
    }

    fn on_episode_changed(&mut self, code: &RoomCode, episode: &EpisodePointer) -> Option<String> {
        let target = Location::watch(episode, Some(code)).ok()?;
        match self.current() {
            Some(current) if current.to_path() == target.to_path() => None,
            _ => Some(self.go(&target, false)),
        }
    }

    fn on_room_left(&mut self) -> Option<String> {
        let current = self.current()?;
        current.room()?;
        Some(self.go(&current.with_room(None), true))
    }

    fn current(&self) -> Option<Location> {
        Location::parse(&self.navigator.location()).ok()
    }

    fn go(&mut self, target: &Location, replace: bool) -> String {
        let path = target.to_path();
        tracing::info!(path = %path, replace = replace, "Navigating");
        self.navigator.navigate(&path, replace);
        path
    }
}

/// Navigator that only records where it has been
#[derive(Debug, Clone, Default)]
pub struct MemoryNavigator {
    location: String,
    /// Every navigation as `(path, replace)`
    pub history: Vec<(String, bool)>,
}

impl MemoryNavigator {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            history: Vec::new(),
        }
    }
}

impl Navigator for MemoryNavigator {
    fn location(&self) -> String {
        self.location.clone()
    }

    fn navigate(&mut self, path: &str, replace: bool) {
        self.location = path.to_string();
        self.history.push((path.to_string(), replace));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> RoomCode {
        RoomCode::parse("K7QX2M").unwrap()
    }

    fn frieren(ep: &str) -> EpisodePointer {
        EpisodePointer::new("frieren-18542", ep).unwrap()
    }

    fn sync(at: &str) -> NavigationSync<MemoryNavigator> {
        NavigationSync::new(MemoryNavigator::new(at))
    }

    #[test]
    fn test_location_parts() {
        let loc = Location::parse("/watch/frieren-18542?ep=107257&room=K7QX2M").unwrap();
        assert_eq!(loc.anime_id(), Some("frieren-18542"));
        assert_eq!(loc.episode_id().as_deref(), Some("107257"));
        assert_eq!(loc.room().as_deref(), Some("K7QX2M"));
        assert!(loc.is_watching(&frieren("107257")));

        let home = Location::parse("/").unwrap();
        assert_eq!(home.anime_id(), None);
        assert_eq!(home.episode_id(), None);
    }

    #[test]
    fn test_watch_path_shape() {
        let path = Location::watch(&frieren("107257"), Some(&code()))
            .unwrap()
            .to_path();
        assert_eq!(path, "/watch/frieren-18542?ep=107257&room=K7QX2M");
    }

    #[test]
    fn test_with_room_removes_only_room() {
        let loc = Location::parse("/watch/a?ep=1&room=K7QX2M&server=hd-2").unwrap();
        assert_eq!(loc.with_room(None).to_path(), "/watch/a?ep=1&server=hd-2");

        let bare = Location::parse("/home?room=K7QX2M").unwrap();
        assert_eq!(bare.with_room(None).to_path(), "/home");
    }

    #[test]
    fn test_enter_elsewhere_navigates() {
        let mut nav = sync("/home");
        let path = nav.apply(NavigationRequest::Enter {
            code: code(),
            episode: Some(frieren("107257")),
        });
        assert_eq!(path.as_deref(), Some("/watch/frieren-18542?ep=107257&room=K7QX2M"));
        assert!(!nav.navigator().history[0].1);
    }

    #[test]
    fn test_enter_same_episode_only_adds_room() {
        let mut nav = sync("/watch/frieren-18542?ep=107257");
        nav.apply(NavigationRequest::Enter {
            code: code(),
            episode: Some(frieren("107257")),
        });
        assert_eq!(
            nav.navigator().history,
            vec![("/watch/frieren-18542?ep=107257&room=K7QX2M".to_string(), true)]
        );
    }

    #[test]
    fn test_enter_already_synced_is_noop() {
        let mut nav = sync("/watch/frieren-18542?ep=107257&room=K7QX2M");
        let path = nav.apply(NavigationRequest::Enter {
            code: code(),
            episode: Some(frieren("107257")),
        });
        assert!(path.is_none());
        assert!(nav.navigator().history.is_empty());
    }

    #[test]
    fn test_enter_without_episode_stays() {
        let mut nav = sync("/home");
        assert!(nav
            .apply(NavigationRequest::Enter {
                code: code(),
                episode: None,
            })
            .is_none());
    }

    #[test]
    fn test_follow_host() {
        let mut nav = sync("/watch/frieren-18542?ep=107257&room=K7QX2M");
        nav.apply(NavigationRequest::Follow {
            code: code(),
            episode: frieren("107258"),
        });
        assert_eq!(
            nav.navigator().location(),
            "/watch/frieren-18542?ep=107258&room=K7QX2M"
        );

        // Already there: no second navigation
        nav.apply(NavigationRequest::Follow {
            code: code(),
            episode: frieren("107258"),
        });
        assert_eq!(nav.navigator().history.len(), 1);
    }

    #[test]
    fn test_leave_drops_room_param() {
        let mut nav = sync("/watch/frieren-18542?ep=107257&room=K7QX2M");
        nav.apply(NavigationRequest::Leave);
        assert_eq!(
            nav.navigator().history,
            vec![("/watch/frieren-18542?ep=107257".to_string(), true)]
        );

        // Nothing to drop the second time
        assert!(nav.apply(NavigationRequest::Leave).is_none());
    }
}
