//! Two-pass bitrate-targeted video compression
//!
//! Pipeline phases: probe the duration with ffprobe, allocate video and
//! audio bitrates for the margined byte budget, run an analysis-only
//! first pass (`-an`, null muxer), then a second pass producing the
//! final muxed output. A failed second pass removes the partial output
//! before the error propagates; the pass log lives in a temp directory
//! that is removed on every exit path.

use super::COMPRESSED_SUFFIX;
use crate::error::{AppError, Result};
use crate::utils::fs as vfs;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

pub const MIN_VIDEO_BITRATE_KBPS: u32 = 10;
pub const MIN_AUDIO_BITRATE_KBPS: u32 = 8;

const AUDIO_STANDARD_BPS: f64 = 128_000.0;
const AUDIO_MIN_BPS: f64 = 8_000.0;
const VIDEO_MIN_BPS: f64 = 10_000.0;

/// Fraction of the target size actually budgeted; rate control overshoots
/// a little, so aim 5% under.
const TARGET_MARGIN: f64 = 0.95;

/// Caller preferences for the output. Leave fields `None` to get the
/// H.264/AAC/MP4 default (or VP9/Opus when the container is WebM).
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

/// Fully reconciled codec/container selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EncodeSettings {
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub pix_fmt: Option<&'static str>,
}

/// Pipeline phase, for logs and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Probing,
    FirstPass,
    SecondPass,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Probing => write!(f, "probe"),
            Phase::FirstPass => write!(f, "first pass"),
            Phase::SecondPass => write!(f, "second pass"),
        }
    }
}

const WEBM_VIDEO_CODECS: [&str; 5] = ["libvpx-vp9", "vp9", "libaom-av1", "av1", "vp8"];
const WEBM_AUDIO_CODECS: [&str; 3] = ["libopus", "opus", "vorbis"];
const MP4_VIDEO_CODECS: [&str; 4] = ["libx264", "libx265", "h264", "h265"];

/// Reconcile caller preferences into a consistent codec/container set.
///
/// An unspecified container follows the video codec (WebM-family codecs
/// get a WebM container, everything else MP4). Codecs incompatible with
/// the chosen container are substituted with a warning unless the caller
/// asked for the pairing explicitly.
pub(crate) fn reconcile_settings(opts: &EncodeOptions) -> EncodeSettings {
    let mut video_codec = opts
        .video_codec
        .clone()
        .unwrap_or_else(|| "libx264".to_string());
    let mut audio_codec = opts
        .audio_codec
        .clone()
        .unwrap_or_else(|| "aac".to_string());

    let container = match &opts.container {
        Some(container) => container.to_lowercase(),
        None if WEBM_VIDEO_CODECS.contains(&video_codec.as_str()) => "webm".to_string(),
        None => "mp4".to_string(),
    };

    if container == "webm" {
        if !WEBM_VIDEO_CODECS.contains(&video_codec.as_str()) {
            warn!(
                from = %video_codec,
                "webm container, switching video codec to libvpx-vp9"
            );
            video_codec = "libvpx-vp9".to_string();
        }
        if !WEBM_AUDIO_CODECS.contains(&audio_codec.as_str()) {
            warn!(
                from = %audio_codec,
                "webm container, switching audio codec to libopus"
            );
            audio_codec = "libopus".to_string();
        }
    } else if container == "mp4" {
        if !MP4_VIDEO_CODECS.contains(&video_codec.as_str()) {
            if WEBM_VIDEO_CODECS.contains(&video_codec.as_str()) && opts.video_codec.is_some() {
                debug!(codec = %video_codec, "keeping explicitly requested codec in mp4");
            } else {
                warn!(
                    from = %video_codec,
                    "mp4 container, switching video codec to libx264"
                );
                video_codec = "libx264".to_string();
            }
        }
        if audio_codec != "aac" {
            if WEBM_AUDIO_CODECS.contains(&audio_codec.as_str()) && opts.audio_codec.is_some() {
                debug!(codec = %audio_codec, "keeping explicitly requested codec in mp4");
            } else {
                warn!(
                    from = %audio_codec,
                    "mp4 container, switching audio codec to aac"
                );
                audio_codec = "aac".to_string();
            }
        }
    }

    let pix_fmt = matches!(video_codec.as_str(), "libx264" | "libvpx-vp9").then_some("yuv420p");

    EncodeSettings {
        container,
        video_codec,
        audio_codec,
        pix_fmt,
    }
}

/// Query a media file's duration in seconds via ffprobe.
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let result = Command::new("ffprobe")
        .args(["-v", "error", "-show_entries", "format=duration"])
        .args(["-of", "default=noprint_wrappers=1:nokey=1"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !result.status.success() {
        return Err(AppError::duration(
            String::from_utf8_lossy(&result.stderr).trim().to_string(),
            Some(path.to_path_buf()),
        ));
    }
    let raw = String::from_utf8_lossy(&result.stdout);
    raw.trim()
        .parse::<f64>()
        .map_err(|_| AppError::duration(format!("unparseable duration '{}'", raw.trim()), Some(path.to_path_buf())))
}

/// Split a byte budget over `duration` seconds into (video, audio)
/// bitrates in bits per second.
///
/// Preference order: standard audio (128 kbps) with video taking the
/// rest; then floor video (10 kbps) with audio taking the rest; then a
/// proportional split of whatever remains across both floors. The floors
/// sum to a constant here, so the 80/20 degenerate fallback split exists
/// only for safety.
pub fn allocate_bitrates(target_size: u64, duration: f64) -> Result<(f64, f64)> {
    if !(duration > 0.0) {
        return Err(AppError::validation(format!(
            "cannot allocate bitrates over non-positive duration {duration}"
        )));
    }

    let target_bits = (target_size as f64) * 8.0;
    let total_bps = target_bits / duration;

    let (video_bps, audio_bps) = if total_bps >= VIDEO_MIN_BPS + AUDIO_STANDARD_BPS {
        (total_bps - AUDIO_STANDARD_BPS, AUDIO_STANDARD_BPS)
    } else if total_bps >= VIDEO_MIN_BPS + AUDIO_MIN_BPS {
        (VIDEO_MIN_BPS, total_bps - VIDEO_MIN_BPS)
    } else {
        let floor_sum = VIDEO_MIN_BPS + AUDIO_MIN_BPS;
        if floor_sum > 0.0 {
            (
                total_bps * (VIDEO_MIN_BPS / floor_sum),
                total_bps * (AUDIO_MIN_BPS / floor_sum),
            )
        } else {
            warn!("bitrate floors sum to zero, falling back to an 80/20 split");
            (total_bps * 0.8, total_bps * 0.2)
        }
    };

    if video_bps < 0.0 || audio_bps < 0.0 {
        return Err(AppError::validation(format!(
            "target size {target_size} over {duration}s allocates a negative bitrate"
        )));
    }
    Ok((video_bps, audio_bps))
}

fn null_device() -> &'static str {
    if cfg!(target_os = "windows") {
        "NUL"
    } else {
        "/dev/null"
    }
}

async fn run_ffmpeg(command: &mut Command, phase: Phase) -> Result<()> {
    debug!(phase = %phase, "entering phase");
    let result = command.stdin(Stdio::null()).output().await?;
    if !result.status.success() {
        return Err(AppError::encode(
            "ffmpeg",
            phase.to_string(),
            String::from_utf8_lossy(&result.stderr).trim().to_string(),
        ));
    }
    Ok(())
}

/// Compress a video to at most `target` bytes with a two-pass encode.
///
/// The final size is best-effort: rate control can still overshoot, in
/// which case a warning is logged and the artifact is returned anyway.
pub async fn compress_video(input: &Path, target: u64, opts: &EncodeOptions) -> Result<PathBuf> {
    debug!(input = %input.display(), phase = %Phase::Probing, "entering phase");
    let duration = probe_duration(input).await?;
    if duration < 0.0 {
        return Err(AppError::duration(
            format!("negative duration {duration}"),
            Some(input.to_path_buf()),
        ));
    }

    let margined = (target as f64 * TARGET_MARGIN) as u64;
    let (video_bps, audio_bps) = allocate_bitrates(margined, duration)?;
    let video_kbps = ((video_bps / 1000.0) as u32).max(MIN_VIDEO_BITRATE_KBPS);
    let audio_kbps = ((audio_bps / 1000.0) as u32).max(MIN_AUDIO_BITRATE_KBPS);

    let settings = reconcile_settings(opts);
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let output = input.with_file_name(format!(
        "{stem}{COMPRESSED_SUFFIX}.{}",
        settings.container
    ));

    debug!(
        input = %input.display(),
        duration,
        video_kbps,
        audio_kbps,
        container = %settings.container,
        vcodec = %settings.video_codec,
        acodec = %settings.audio_codec,
        "starting two-pass encode"
    );

    // Pass log shared by both passes; removed with the scratch dir on
    // every exit path.
    let scratch = tempfile::tempdir()?;
    let passlog = scratch.path().join("ffmpeg2pass");

    let mut first = Command::new("ffmpeg");
    first
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-c:v", &settings.video_codec])
        .args(["-b:v", &format!("{video_kbps}k")])
        .args(["-pass", "1"])
        .arg("-an")
        .args(["-fps_mode", "cfr"])
        .args(["-preset", "medium"]);
    if let Some(pix_fmt) = settings.pix_fmt {
        first.args(["-pix_fmt", pix_fmt]);
    }
    first
        .arg("-passlogfile")
        .arg(&passlog)
        .args(["-f", "null"])
        .arg(null_device());
    run_ffmpeg(&mut first, Phase::FirstPass).await?;

    let mut second = Command::new("ffmpeg");
    second
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-c:v", &settings.video_codec])
        .args(["-b:v", &format!("{video_kbps}k")])
        .args(["-pass", "2"])
        .args(["-c:a", &settings.audio_codec])
        .args(["-b:a", &format!("{audio_kbps}k")])
        .args(["-fps_mode", "cfr"])
        .args(["-preset", "medium"]);
    if let Some(pix_fmt) = settings.pix_fmt {
        second.args(["-pix_fmt", pix_fmt]);
    }
    second
        .arg("-passlogfile")
        .arg(&passlog)
        .args(["-f", &settings.container])
        .arg(&output);
    if let Err(e) = run_ffmpeg(&mut second, Phase::SecondPass).await {
        // Never leave a half-muxed artifact behind.
        vfs::remove_file(&output).await.ok();
        return Err(e);
    }

    let final_size = vfs::file_size(&output).await?;
    debug!(
        output = %output.display(),
        size = final_size,
        target,
        "two-pass encode finished"
    );
    if final_size > target {
        warn!(
            output = %output.display(),
            size = final_size,
            target,
            "compressed video still exceeds target"
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_allocation_generous_budget_gives_standard_audio() {
        // 9.5 MB over 10 seconds is plenty.
        let (video, audio) = allocate_bitrates(9_500_000, 10.0).unwrap();
        assert_eq!(audio, AUDIO_STANDARD_BPS);
        assert!(video > VIDEO_MIN_BPS);
        let total = (9_500_000u64 as f64) * 8.0 / 10.0;
        assert!((video + audio - total).abs() < 1.0);
    }

    #[test]
    fn test_allocation_tight_budget_floors_video() {
        // 12_500 bytes over one second is 100_000 bits/s, which lands
        // between video_min+audio_min and video_min+audio_standard.
        let (video, audio) = allocate_bitrates(12_500, 1.0).unwrap();
        assert_eq!(video, VIDEO_MIN_BPS);
        assert!((audio - (100_000.0 - VIDEO_MIN_BPS)).abs() < 1.0);
    }

    #[test]
    fn test_allocation_starved_budget_splits_proportionally() {
        // 10_000 bits/s total, under the 18_000 floor sum.
        let (video, audio) = allocate_bitrates(1_250, 1.0).unwrap();
        let ratio = VIDEO_MIN_BPS / (VIDEO_MIN_BPS + AUDIO_MIN_BPS);
        assert!((video - 10_000.0 * ratio).abs() < 1.0);
        assert!(video > 0.0 && audio > 0.0);
    }

    #[test]
    fn test_allocation_rejects_non_positive_duration() {
        assert!(allocate_bitrates(1_000_000, 0.0).is_err());
        assert!(allocate_bitrates(1_000_000, -3.0).is_err());
    }

    #[test]
    fn test_allocation_for_oversized_upload_scenario() {
        // A 15 MB source must fit a 10 MB ceiling; the pipeline margins
        // the target by 5% before allocating.
        let max_file_size = 10_000_000u64;
        let margined = (max_file_size as f64 * TARGET_MARGIN) as u64;
        let duration = 42.0;

        let (video_bps, audio_bps) = allocate_bitrates(margined, duration).unwrap();
        assert!(video_bps > 0.0 && audio_bps > 0.0);

        let video_kbps = ((video_bps / 1000.0) as u32).max(MIN_VIDEO_BITRATE_KBPS);
        let audio_kbps = ((audio_bps / 1000.0) as u32).max(MIN_AUDIO_BITRATE_KBPS);
        assert!(video_kbps >= MIN_VIDEO_BITRATE_KBPS);
        assert!(audio_kbps >= MIN_AUDIO_BITRATE_KBPS);
    }

    #[test]
    fn test_reconcile_defaults_to_h264_aac_mp4() {
        let settings = reconcile_settings(&EncodeOptions::default());
        assert_eq!(
            settings,
            EncodeSettings {
                container: "mp4".to_string(),
                video_codec: "libx264".to_string(),
                audio_codec: "aac".to_string(),
                pix_fmt: Some("yuv420p"),
            }
        );
    }

    #[test]
    fn test_reconcile_webm_container_forces_vp9_opus() {
        let settings = reconcile_settings(&EncodeOptions {
            container: Some("webm".to_string()),
            ..Default::default()
        });
        assert_eq!(settings.video_codec, "libvpx-vp9");
        assert_eq!(settings.audio_codec, "libopus");
        assert_eq!(settings.pix_fmt, Some("yuv420p"));
    }

    #[test]
    fn test_reconcile_vp9_codec_implies_webm() {
        let settings = reconcile_settings(&EncodeOptions {
            video_codec: Some("libvpx-vp9".to_string()),
            ..Default::default()
        });
        assert_eq!(settings.container, "webm");
        assert_eq!(settings.audio_codec, "libopus");
    }

    #[test]
    fn test_reconcile_explicit_vp9_in_mp4_is_kept() {
        let settings = reconcile_settings(&EncodeOptions {
            container: Some("mp4".to_string()),
            video_codec: Some("vp9".to_string()),
            audio_codec: Some("libopus".to_string()),
        });
        assert_eq!(settings.video_codec, "vp9");
        assert_eq!(settings.audio_codec, "libopus");
        assert_eq!(settings.pix_fmt, None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_allocation_never_negative_and_conserves_budget(
            target in 1u64..1_000_000_000,
            duration in 0.1f64..36_000.0,
        ) {
            let (video, audio) = allocate_bitrates(target, duration).unwrap();
            prop_assert!(video >= 0.0);
            prop_assert!(audio >= 0.0);
            let total = (target as f64) * 8.0 / duration;
            prop_assert!(video + audio <= total * 1.0001 + 1.0);
        }
    }
}
