//! Synchronizer integration tests

use media_vault::config::DEFAULT_MAX_FILE_SIZE;
use media_vault::{AppConfig, FileDatabase, FileSynchronizer};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    config: AppConfig,
    db: FileDatabase,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = AppConfig::with_data_dir(dir.path().to_path_buf(), DEFAULT_MAX_FILE_SIZE);
    config.ensure_directories().await.unwrap();
    let db = FileDatabase::open(&config.database_path).await.unwrap();
    Fixture {
        _dir: dir,
        config,
        db,
    }
}

impl Fixture {
    fn synchronizer(&self) -> FileSynchronizer {
        FileSynchronizer::new(self.db.clone(), self.config.clone())
    }

    async fn write(&self, relative: &str, content: &[u8]) {
        let path = self.config.data_dir.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    async fn remove(&self, relative: &str) {
        tokio::fs::remove_file(self.config.data_dir.join(relative))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn discovers_new_files_in_both_categories() {
    let fx = fixture().await;
    fx.write("memes/a.png", b"content-a").await;
    fx.write("private/b.png", b"content-b").await;

    let report = fx.synchronizer().synchronize().await.unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.scanned, 2);

    assert_eq!(fx.db.count_by_category("meme").await.unwrap(), 1);
    assert_eq!(fx.db.count_by_category("private").await.unwrap(), 1);

    let record = fx
        .db
        .get_by_path(Path::new("memes/a.png"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.file_size, 9);
    assert_eq!(record.category, "meme");
}

#[tokio::test]
async fn second_run_with_no_changes_inserts_nothing() {
    let fx = fixture().await;
    fx.write("memes/a.png", b"content-a").await;
    fx.write("memes/b.png", b"content-b").await;

    let first = fx.synchronizer().synchronize().await.unwrap();
    assert_eq!(first.inserted, 2);

    let second = fx.synchronizer().synchronize().await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.removed, 0);
    assert_eq!(fx.db.count_by_category("meme").await.unwrap(), 2);
}

#[tokio::test]
async fn identical_copies_collapse_to_first_enumerated() {
    let fx = fixture().await;
    // Three byte-identical files; enumeration is sorted, so a.png wins.
    fx.write("memes/a.png", b"same-bytes").await;
    fx.write("memes/b.png", b"same-bytes").await;
    fx.write("memes/c.png", b"same-bytes").await;

    let report = fx.synchronizer().synchronize().await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.duplicates, 2);

    assert_eq!(fx.db.count_by_category("meme").await.unwrap(), 1);
    let hashes = fx.db.all_hashes().await.unwrap();
    let record = fx
        .db
        .get_by_hash(hashes.iter().next().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.file_path, PathBuf::from("memes/a.png"));
    assert_eq!(record.category, "meme");
}

#[tokio::test]
async fn already_tracked_content_under_new_path_is_skipped() {
    let fx = fixture().await;
    fx.write("memes/a.png", b"same-bytes").await;
    fx.synchronizer().synchronize().await.unwrap();

    // Same content appears under another path later.
    fx.write("memes/renamed.png", b"same-bytes").await;
    let report = fx.synchronizer().synchronize().await.unwrap();

    assert_eq!(report.inserted, 0);
    assert_eq!(report.already_tracked, 1);
    assert_eq!(fx.db.count_by_category("meme").await.unwrap(), 1);
}

#[tokio::test]
async fn compressed_artifacts_are_not_candidates() {
    let fx = fixture().await;
    fx.write("memes/a.png", b"original").await;
    fx.write("memes/a_compressed.png", b"artifact").await;

    let report = fx.synchronizer().synchronize().await.unwrap();
    assert_eq!(report.inserted, 1);
    assert!(fx
        .db
        .get_by_path(Path::new("memes/a_compressed.png"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn missing_file_without_artifact_is_deleted() {
    let fx = fixture().await;
    fx.write("memes/a.png", b"content-a").await;
    fx.write("memes/b.png", b"content-b").await;
    fx.synchronizer().synchronize().await.unwrap();

    fx.remove("memes/a.png").await;
    let report = fx.synchronizer().synchronize().await.unwrap();

    assert_eq!(report.removed, 1);
    assert!(fx.db.get_by_path(Path::new("memes/a.png")).await.unwrap().is_none());
    assert!(fx.db.get_by_path(Path::new("memes/b.png")).await.unwrap().is_some());
}

#[tokio::test]
async fn missing_original_with_surviving_artifact_is_retained() {
    let fx = fixture().await;
    fx.write("memes/big.mp4", b"huge video").await;
    fx.synchronizer().synchronize().await.unwrap();

    let record = fx
        .db
        .get_by_path(Path::new("memes/big.mp4"))
        .await
        .unwrap()
        .unwrap();

    // A compression pass happened at some point and the original was
    // dropped to save space.
    fx.write("converted/big_compressed.mp4", b"small video").await;
    fx.db
        .update_converted(
            &record.file_hash,
            Path::new("converted/big_compressed.mp4"),
            "cafebabe",
            11,
        )
        .await
        .unwrap()
        .unwrap();
    fx.remove("memes/big.mp4").await;

    let report = fx.synchronizer().synchronize().await.unwrap();
    assert_eq!(report.retained, 1);
    assert_eq!(report.removed, 0);

    let survivor = fx
        .db
        .get_by_path(Path::new("memes/big.mp4"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        survivor.converted_path,
        Some(PathBuf::from("converted/big_compressed.mp4"))
    );
}

#[tokio::test]
async fn nested_directories_are_scanned() {
    let fx = fixture().await;
    fx.write("memes/reaction/surprised.png", b"pikachu").await;

    let report = fx.synchronizer().synchronize().await.unwrap();
    assert_eq!(report.inserted, 1);
    assert!(fx
        .db
        .get_by_path(Path::new("memes/reaction/surprised.png"))
        .await
        .unwrap()
        .is_some());
}
