//! Compression engine
//!
//! Given a media file and a target byte budget, produce a new file at or
//! under budget. The algorithm is chosen by file extension:
//!
//! - `.jpg`/`.jpeg`: quality ladder, 75 down to 10
//! - `.png`: adaptive palette ladder, 256 colors down to 16
//! - `.gif`: binary search over a gifsicle parameter table
//! - `.mp4`/`.avi`/`.mov`/`.mkv`/`.webm`: two-pass bitrate-targeted ffmpeg
//!
//! The search is best-effort: when even the most aggressive setting stays
//! over budget the engine returns the result and logs a warning rather
//! than failing. All scratch space lives in a [`tempfile::TempDir`] owned
//! by the invocation, so probes are removed on every exit path.

pub mod gif;
pub mod image;
pub mod video;

use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

pub use video::{allocate_bitrates, EncodeOptions};

/// Suffix appended to a source file's stem for its compressed artifact.
///
/// The synchronizer excludes files carrying this suffix from candidate
/// scans; they are pipeline-internal outputs, never top-level records.
pub const COMPRESSED_SUFFIX: &str = "_compressed";

/// Whether a path names a compression artifact.
pub fn is_compressed_artifact(path: &Path) -> bool {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().ends_with(COMPRESSED_SUFFIX))
        .unwrap_or(false)
}

/// Sibling output path for `input`: `<stem>_compressed.<ext>`.
///
/// `extension` overrides the input's extension (the video path re-muxes
/// into the chosen container).
pub fn compressed_sibling(input: &Path, extension: Option<&str>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = extension
        .map(str::to_string)
        .or_else(|| input.extension().map(|e| e.to_string_lossy().into_owned()));
    let name = match ext {
        Some(ext) => format!("{stem}{COMPRESSED_SUFFIX}.{ext}"),
        None => format!("{stem}{COMPRESSED_SUFFIX}"),
    };
    input.with_file_name(name)
}

/// Media kinds the engine can recompress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Gif,
    Jpeg,
    Png,
    Video,
}

impl MediaKind {
    /// Classify a path by its (lowercased) extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "gif" => Some(MediaKind::Gif),
            "jpg" | "jpeg" => Some(MediaKind::Jpeg),
            "png" => Some(MediaKind::Png),
            "mp4" | "avi" | "mov" | "mkv" | "webm" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// Compress `input` to at most `target` bytes, dispatching on extension.
///
/// Returns the path of the new artifact (a `_compressed` sibling of the
/// input). Unsupported extensions fail with
/// [`AppError::UnsupportedType`].
pub async fn compress_file(input: &Path, target: u64) -> Result<PathBuf> {
    let kind = MediaKind::from_path(input).ok_or_else(|| {
        let ext = input
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<none>".to_string());
        AppError::UnsupportedType(ext)
    })?;

    match kind {
        MediaKind::Gif => gif::compress_gif(input, target).await,
        MediaKind::Jpeg => image::compress_jpeg(input, target).await,
        MediaKind::Png => image::compress_png(input, target).await,
        MediaKind::Video => {
            video::compress_video(input, target, &EncodeOptions::default()).await
        }
    }
}

/// Result of a [`descend_ladder`] search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LadderOutcome {
    /// The level the returned artifact was encoded at.
    pub level: u64,
    /// Size of the artifact encoded at `level`.
    pub size: u64,
    /// Whether `size` meets the target.
    pub fits: bool,
    /// How many levels were tried (monotonic search stops at the first
    /// level that fits).
    pub attempts: usize,
}

/// Walk `levels` in order, encoding at each, and stop at the first level
/// whose output size is at or under `target`.
///
/// When no level fits, the artifact from the final (most aggressive)
/// level is kept and `fits` is false; the caller decides whether that is
/// a warning or an error. `levels` must be ordered least to most
/// aggressive and non-empty.
pub(crate) fn descend_ladder<F>(levels: &[u64], target: u64, mut encode: F) -> Result<LadderOutcome>
where
    F: FnMut(u64) -> Result<u64>,
{
    debug_assert!(!levels.is_empty());
    let mut outcome = LadderOutcome {
        level: 0,
        size: 0,
        fits: false,
        attempts: 0,
    };
    for &level in levels {
        let size = encode(level)?;
        outcome = LadderOutcome {
            level,
            size,
            fits: size <= target,
            attempts: outcome.attempts + 1,
        };
        if outcome.fits {
            break;
        }
    }
    Ok(outcome)
}
