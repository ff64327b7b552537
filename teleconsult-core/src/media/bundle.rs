//! Ownership of a set of capture tracks.

use crate::media::track::{MediaKind, MediaTrack};

/// Zero or more capture tracks plus their enable flags.
///
/// A local bundle is owned by exactly one pipeline/session; clones are
/// observation handles that see the same tracks. Remote bundles are never
/// constructed here, only announced through session events.
#[derive(Debug, Clone, Default)]
pub struct MediaBundle {
    tracks: Vec<MediaTrack>,
}

impl MediaBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: impl IntoIterator<Item = MediaTrack>) -> Self {
        Self {
            tracks: tracks.into_iter().collect(),
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.track_of(MediaKind::Audio)
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.track_of(MediaKind::Video)
    }

    pub fn has_audio(&self) -> bool {
        self.audio_track().is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_track().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Add a track, taking ownership of its device handle.
    pub fn push(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    /// Remove and return the track of `kind`, without stopping it.
    pub fn take(&mut self, kind: MediaKind) -> Option<MediaTrack> {
        let idx = self.tracks.iter().position(|t| t.kind() == kind)?;
        Some(self.tracks.remove(idx))
    }

    /// Enable or disable every track of `kind`. Returns the resulting state,
    /// or `false` if the bundle holds no such track.
    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) -> bool {
        let mut found = false;
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
            found = true;
        }
        found && enabled
    }

    /// Stop every track. Calling this twice is a no-op.
    ///
    /// Returns how many device handles were actually released.
    pub fn release(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }

    /// Live tracks of `kind`.
    pub fn live_count(&self, kind: MediaKind) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.kind() == kind && t.is_live())
            .count()
    }

    fn track_of(&self, kind: MediaKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }
}
