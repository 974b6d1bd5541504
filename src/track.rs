//! Track layout of a disc being dumped or converted.
//!
//! The layout is built once from the table of contents and then
//! refined in place by the subchannel engine as pregaps and indexes
//! are discovered, so it is owned by the dump session and lent out as
//! `&mut TrackLayout`.

use std::collections::BTreeMap;
use std::fmt;

use crate::{ImageError, ImageResult};

/// Possible track types
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackType {
    /// CD-DA audio track (red book audio)
    Audio,
    /// CD-ROM Mode1 data
    Mode1,
    /// CD-ROM XA Mode 2 data
    Mode2,
    /// Data track of unknown mode
    Data,
}

impl TrackType {
    /// Returns true if this is an audio track
    pub fn is_audio(self) -> bool {
        self == TrackType::Audio
    }
}

/// Control flag set in the Q subchannel of data tracks
pub const FLAG_DATA_TRACK: u8 = 0x04;

/// Mutable record describing a single track
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Track {
    /// Track number. 0 is used for a hidden track before track 1.
    pub sequence: u32,
    /// Session number, starting at 1
    pub session: u16,
    /// First sector of the track, pregap included
    pub start_sector: u64,
    /// Last sector of the track
    pub end_sector: u64,
    /// Length of the pregap in sectors
    pub pregap: u64,
    /// Start LBA of every known index of the track
    pub indexes: BTreeMap<u16, i32>,
    /// Track type
    pub track_type: TrackType,
    /// Q subchannel control flags (4 bits) if known
    pub flags: Option<u8>,
}

impl Track {
    /// Create a track spanning `start_sector..=end_sector` with no pregap and
    /// index 1 at `start_sector`
    pub fn new(
        sequence: u32,
        session: u16,
        start_sector: u64,
        end_sector: u64,
        track_type: TrackType,
    ) -> Track {
        let mut indexes = BTreeMap::new();

        if let Ok(lba) = i32::try_from(start_sector) {
            indexes.insert(1, lba);
        }

        Track {
            sequence,
            session,
            start_sector,
            end_sector,
            pregap: 0,
            indexes,
            track_type,
            flags: None,
        }
    }

    /// Returns the control flags to use in the Q subchannel of this track. When
    /// they're not known they're derived from the track type.
    pub fn control_flags(&self) -> u8 {
        match self.flags {
            Some(f) => f & 0xf,
            None if self.track_type.is_audio() => 0,
            None => FLAG_DATA_TRACK,
        }
    }

    /// Returns the number of the highest index starting at or before `sector`
    pub fn index_for_sector(&self, sector: i64) -> Option<u16> {
        self.indexes
            .iter()
            .filter(|&(_, &lba)| i64::from(lba) <= sector)
            .map(|(&index, _)| index)
            .max()
    }

    /// Returns true if `sector` lies within the track bounds
    pub fn contains(&self, sector: u64) -> bool {
        sector >= self.start_sector && sector <= self.end_sector
    }
}

/// Ordered list of the tracks on a disc
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackLayout {
    /// Track list, sorted by start sector
    tracks: Vec<Track>,
}

impl TrackLayout {
    /// Build a layout from a non-empty list of tracks
    pub fn new(mut tracks: Vec<Track>) -> ImageResult<TrackLayout> {
        if tracks.is_empty() {
            return Err(ImageError::EmptyToc);
        }

        tracks.sort_by_key(|t| (t.start_sector, t.sequence));

        Ok(TrackLayout { tracks })
    }

    /// Return the full track list
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Return the full track list for modification
    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    /// Return the track description for the given track number
    pub fn track(&self, sequence: u32) -> ImageResult<&Track> {
        self.tracks
            .iter()
            .find(|t| t.sequence == sequence)
            .ok_or(ImageError::BadTrack)
    }

    /// Return the position of the given track number in the track list
    pub fn position(&self, sequence: u32) -> Option<usize> {
        self.tracks.iter().position(|t| t.sequence == sequence)
    }

    /// Return the last track starting at or before `sector`
    pub fn track_for_sector(&self, sector: i64) -> Option<&Track> {
        self.tracks
            .iter()
            .filter(|t| i64::try_from(t.start_sector).map_or(false, |s| s <= sector))
            .last()
    }

    /// Returns the lowest track number within `session`
    pub fn first_track_in_session(&self, session: u16) -> Option<u32> {
        self.tracks
            .iter()
            .filter(|t| t.session == session)
            .map(|t| t.sequence)
            .min()
    }

    /// Grow the pregap of the track at position `pos` by `delta` sectors, moving its start
    /// backwards by the same amount and clamping the end of the previous track so that they
    /// don't overlap. Returns the sectors that now belong to the pregap.
    ///
    /// The growth is clamped so that the track doesn't start before sector 0.
    pub fn grow_pregap(&mut self, pos: usize, delta: u64) -> Vec<u64> {
        let delta = delta.min(self.tracks[pos].start_sector);

        if delta == 0 {
            return Vec::new();
        }

        let track = &mut self.tracks[pos];
        track.pregap += delta;
        track.start_sector -= delta;

        let start = track.start_sector;

        if pos > 0 {
            let prev = &mut self.tracks[pos - 1];

            if prev.end_sector >= start {
                prev.end_sector = start.saturating_sub(1);
            }
        }

        (start..start + delta).collect()
    }
}

impl fmt::Debug for TrackLayout {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            fmt,
            "Layout: {} track{}",
            self.tracks.len(),
            if self.tracks.len() == 1 { "" } else { "s" },
        )?;

        for t in self.tracks.iter() {
            writeln!(
                fmt,
                " - Session {} Track {:02}: {}..={} pregap {} {:?} indexes {:?}",
                t.session, t.sequence, t.start_sector, t.end_sector, t.pregap, t.track_type, t.indexes,
            )?;
        }

        Ok(())
    }
}
