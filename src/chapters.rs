//! Split a media file into logical chapters.
//!
//! Chapters come from container cue points when the format exposes them (e.g. FLAC cue
//! sheets). Files without markers become a single chapter spanning the whole file.
//!
//! Symphonia's MP4 reader does not expose chapter markers, so M4B audiobooks currently
//! always come out as one whole-file chapter.

use std::path::{Path, PathBuf};

use symphonia::core::formats::Cue;
use symphonia::core::meta::StandardTagKey;

use crate::Result;
use crate::media::MediaFile;

/// A chapter's position inside its source file, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start_seconds: f64,
    /// `None` when the container doesn't report a duration for the final chapter.
    pub end_seconds: Option<f64>,
}

/// One logical chapter of an audio file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    source_path: PathBuf,
    label: String,
    id: u64,
    index: usize,
    time_range: Option<TimeRange>,
}

impl Chapter {
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Marker title, or the file's base name for whole-file chapters.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The container's declared chapter id (0 for whole-file chapters).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Position in the file's chapter list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// `None` means the chapter is the whole file.
    pub fn time_range(&self) -> Option<TimeRange> {
        self.time_range
    }

    /// Offset of this chapter from the start of the file.
    pub fn start_seconds(&self) -> f64 {
        self.time_range.map_or(0.0, |r| r.start_seconds)
    }

    /// Decode this chapter's audio as mono 16 kHz `f32` samples.
    pub fn samples(&self) -> Result<Vec<f32>> {
        let media = MediaFile::open(&self.source_path)?;
        match self.time_range {
            Some(range) => media.decode_range(range.start_seconds, range.end_seconds),
            None => media.decode_range(0.0, None),
        }
    }
}

/// List the chapters of `path`, ordered and covering the file with no gaps or overlaps.
///
/// Fails with [`crate::Error::MediaRead`] when the file can't be opened or probed.
pub fn extract_chapters(path: &Path) -> Result<Vec<Chapter>> {
    let media = MediaFile::open(path)?;
    Ok(chapters_from_media(&media))
}

fn chapters_from_media(media: &MediaFile) -> Vec<Chapter> {
    let markers: Vec<Marker> = media
        .cues()
        .iter()
        .map(|cue| Marker {
            start_seconds: media.ts_to_seconds(cue.start_ts),
            id: u64::from(cue.index),
            title: cue_title(cue),
        })
        .collect();

    chapters_from_markers(media.path(), markers, media.duration_seconds())
}

/// A chapter marker as read from the container.
#[derive(Debug, Clone, PartialEq)]
struct Marker {
    start_seconds: f64,
    id: u64,
    title: Option<String>,
}

/// Turn container-ordered markers into chapters that cover the whole file.
///
/// Each chapter ends where the next one starts; the last ends at `duration_seconds`.
fn chapters_from_markers(
    path: &Path,
    markers: Vec<Marker>,
    duration_seconds: Option<f64>,
) -> Vec<Chapter> {
    if markers.is_empty() {
        return vec![whole_file_chapter(path)];
    }

    let starts: Vec<f64> = markers.iter().map(|m| m.start_seconds).collect();

    markers
        .into_iter()
        .enumerate()
        .map(|(index, marker)| {
            // The first chapter absorbs any lead-in before its marker so the file stays covered.
            let start_seconds = if index == 0 { 0.0 } else { starts[index] };
            let end_seconds = starts.get(index + 1).copied().or(duration_seconds);

            Chapter {
                source_path: path.to_path_buf(),
                label: marker.title.unwrap_or_default(),
                id: marker.id,
                index,
                time_range: Some(TimeRange {
                    start_seconds,
                    end_seconds,
                }),
            }
        })
        .collect()
}

fn whole_file_chapter(path: &Path) -> Chapter {
    Chapter {
        source_path: path.to_path_buf(),
        label: base_name(path),
        id: 0,
        index: 0,
        time_range: None,
    }
}

fn cue_title(cue: &Cue) -> Option<String> {
    cue.tags
        .iter()
        .find(|tag| {
            tag.std_key == Some(StandardTagKey::TrackTitle) || tag.key.eq_ignore_ascii_case("title")
        })
        .map(|tag| tag.value.to_string())
}

/// The final path component as a string (lossy for non-UTF-8 names).
pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
