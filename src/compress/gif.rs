//! GIF recompression via gifsicle
//!
//! Binary search over a fixed table of (colors, lossy) settings ordered
//! least to most aggressive. The search relies on sizes shrinking
//! monotonically across the table: probes go to temp files, and the
//! winning (least aggressive fitting) setting is re-encoded once more as
//! the final output.

use super::compressed_sibling;
use crate::error::{AppError, Result};
use crate::utils::fs as vfs;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// (colors, lossy) settings, least to most aggressive. Order matters:
/// the binary search assumes size decreases monotonically along it.
pub(crate) const GIF_LEVELS: [(u16, u16); 30] = [
    (256, 0), (256, 20), (256, 40), (256, 60), (256, 80), (256, 100),
    (128, 0), (128, 20), (128, 40), (128, 60), (128, 80), (128, 100),
    (64, 0), (64, 20), (64, 40), (64, 60), (64, 80), (64, 100),
    (32, 0), (32, 20), (32, 40), (32, 60), (32, 80), (32, 100),
    (16, 0), (16, 20), (16, 40), (16, 60), (16, 80), (16, 100),
];

/// One probe of the parameter table: encode at a setting and report the
/// output size. Abstracted so the search is testable without gifsicle.
#[async_trait]
pub(crate) trait GifProbe {
    async fn encode(&mut self, colors: u16, lossy: u16, output: &Path) -> Result<u64>;
}

struct Gifsicle {
    input: PathBuf,
}

#[async_trait]
impl GifProbe for Gifsicle {
    async fn encode(&mut self, colors: u16, lossy: u16, output: &Path) -> Result<u64> {
        let result = Command::new("gifsicle")
            .arg("--optimize")
            .arg(format!("--colors={colors}"))
            .arg(format!("--lossy={lossy}"))
            .arg("-i")
            .arg(&self.input)
            .arg("-o")
            .arg(output)
            .output()
            .await?;
        if !result.status.success() {
            return Err(AppError::encode(
                "gifsicle",
                "encode",
                String::from_utf8_lossy(&result.stderr).trim().to_string(),
            ));
        }
        vfs::file_size(output).await
    }
}

/// Find the least aggressive table index whose output fits `target`.
///
/// Probes are written under `scratch` and abandoned there (the caller
/// owns the directory). Returns `None` when no setting fits.
pub(crate) async fn search_least_aggressive<P: GifProbe + Send>(
    probe: &mut P,
    target: u64,
    scratch: &Path,
) -> Result<Option<usize>> {
    let mut low = 0usize;
    let mut high = GIF_LEVELS.len() - 1;
    let mut best: Option<usize> = None;

    while low <= high {
        let mid = (low + high) / 2;
        let (colors, lossy) = GIF_LEVELS[mid];
        let probe_path = scratch.join(format!("probe_{mid}.gif"));
        let size = probe.encode(colors, lossy, &probe_path).await?;
        debug!(colors, lossy, size, "gif probe");

        if size <= target {
            best = Some(mid);
            if mid == 0 {
                break;
            }
            high = mid - 1;
        } else {
            low = mid + 1;
        }
    }
    Ok(best)
}

/// Compress a GIF to at most `target` bytes.
///
/// Falls back to the most aggressive setting (with a warning) when
/// nothing in the table reaches the target.
pub async fn compress_gif(input: &Path, target: u64) -> Result<PathBuf> {
    let scratch = tempfile::tempdir()?;
    let mut probe = Gifsicle {
        input: input.to_path_buf(),
    };

    let best = search_least_aggressive(&mut probe, target, scratch.path()).await?;
    let (colors, lossy) = match best {
        Some(index) => GIF_LEVELS[index],
        None => {
            warn!(
                input = %input.display(),
                target,
                "no gifsicle setting reaches the target, using the most aggressive"
            );
            GIF_LEVELS[GIF_LEVELS.len() - 1]
        }
    };

    let output = compressed_sibling(input, None);
    let final_size = probe.encode(colors, lossy, &output).await?;
    debug!(
        input = %input.display(),
        colors,
        lossy,
        size = final_size,
        "gif compression finished"
    );
    if final_size > target {
        warn!(
            output = %output.display(),
            size = final_size,
            target,
            "compressed gif still exceeds target"
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Fake probe backed by a monotonically decreasing size table.
    struct TableProbe {
        sizes: Vec<u64>,
        tried: Vec<usize>,
    }

    impl TableProbe {
        fn monotonic(top: u64) -> Self {
            // Strictly decreasing sizes along the table.
            let sizes = (0..GIF_LEVELS.len() as u64)
                .map(|i| top.saturating_sub(i * 100))
                .collect();
            Self {
                sizes,
                tried: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl GifProbe for TableProbe {
        async fn encode(&mut self, colors: u16, lossy: u16, output: &Path) -> Result<u64> {
            let index = GIF_LEVELS
                .iter()
                .position(|&(c, l)| (c, l) == (colors, lossy))
                .unwrap();
            self.tried.push(index);
            std::fs::write(output, b"probe").unwrap();
            Ok(self.sizes[index])
        }
    }

    #[test]
    fn test_table_ordering_is_least_to_most_aggressive() {
        assert_eq!(GIF_LEVELS.len(), 30);
        assert_eq!(GIF_LEVELS[0], (256, 0));
        assert_eq!(GIF_LEVELS[GIF_LEVELS.len() - 1], (16, 100));
        for pair in GIF_LEVELS.windows(2) {
            let (c0, l0) = pair[0];
            let (c1, l1) = pair[1];
            // Colors never increase; lossy increases within a color group.
            assert!(c1 <= c0);
            if c1 == c0 {
                assert!(l1 > l0);
            }
        }
    }

    #[tokio::test]
    async fn test_search_finds_least_aggressive_fit() {
        let scratch = TempDir::new().unwrap();
        // Sizes run 3000, 2900, ... so target 2500 is first met at
        // index 5 (size 2500).
        let mut probe = TableProbe::monotonic(3000);
        let best = search_least_aggressive(&mut probe, 2500, scratch.path())
            .await
            .unwrap();
        assert_eq!(best, Some(5));
        // Binary search, not a linear walk.
        assert!(probe.tried.len() <= 6);
    }

    #[tokio::test]
    async fn test_search_everything_fits_picks_first_level() {
        let scratch = TempDir::new().unwrap();
        let mut probe = TableProbe::monotonic(100);
        let best = search_least_aggressive(&mut probe, 10_000, scratch.path())
            .await
            .unwrap();
        assert_eq!(best, Some(0));
    }

    #[tokio::test]
    async fn test_search_nothing_fits_returns_none() {
        let scratch = TempDir::new().unwrap();
        let mut probe = TableProbe::monotonic(1_000_000);
        let best = search_least_aggressive(&mut probe, 10, scratch.path())
            .await
            .unwrap();
        assert_eq!(best, None);
        // The whole table was bisected away.
        assert!(probe.tried.len() <= 6);
    }
}
