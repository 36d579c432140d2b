use crate::constants::SUPPORTED_FORMATS;
use crate::models::AssetHint;
use crate::pipeline::{AnnotationPipeline, Resolution};
use crate::utils::extension_lowercase;
use anyhow::{Context, Result};
use ignore::Walk;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Totals of one folder import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub scanned: usize,
    pub saved: usize,
    pub discarded: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum FileOutcome {
    Saved,
    Discarded,
    Failed,
}

fn is_excluded_component(name: &str) -> bool {
    name.starts_with('.') || name == "node_modules" || name == "target"
}

fn is_supported_image(path: &Path) -> bool {
    extension_lowercase(path).is_some_and(|ext| SUPPORTED_FORMATS.contains(&ext.as_str()))
}

/// Image files under `photos_dir`, skipping hidden and build directories.
pub fn collect_photo_files(photos_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Walk::new(photos_dir)
        .filter_map(|entry| entry.ok())
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|e| {
            let relative = e.path().strip_prefix(photos_dir).unwrap_or(e.path());
            !relative
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .any(is_excluded_component)
        })
        .map(|e| e.into_path())
        .filter(|path| is_supported_image(path))
        .collect();
    files.sort();
    files
}

async fn import_file(pipeline: Arc<AnnotationPipeline>, path: PathBuf, source_id: String) -> FileOutcome {
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read photo");
            return FileOutcome::Failed;
        }
    };

    let hint = AssetHint {
        source_id: Some(source_id),
        ..AssetHint::default()
    };
    match pipeline.resolve(bytes, Some(hint)).await {
        Ok(Resolution::Saved(entry)) => {
            debug!(path = %path.display(), id = %entry.id, "Imported photo");
            FileOutcome::Saved
        }
        Ok(Resolution::Discarded(reason)) => {
            debug!(path = %path.display(), %reason, "Photo discarded");
            FileOutcome::Discarded
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to save photo");
            FileOutcome::Failed
        }
    }
}

/// Runs every new image in a folder through the pipeline, at most `concurrency` at a time.
/// Files that already back an entry are skipped.
pub async fn import_folder(
    pipeline: Arc<AnnotationPipeline>,
    photos_dir: &Path,
    concurrency: usize,
) -> Result<ImportStats> {
    if !photos_dir.is_dir() {
        anyhow::bail!("Photos directory not found: {}", photos_dir.display());
    }
    info!(folder = %photos_dir.display(), "Scanning photos directory");

    let dir = photos_dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || collect_photo_files(&dir))
        .await
        .context("Folder scan panicked")?;

    let mut stats = ImportStats {
        scanned: files.len(),
        ..ImportStats::default()
    };
    let start_time = Instant::now();
    let concurrency = concurrency.max(1);
    let mut tasks = JoinSet::new();

    for path in files {
        let source_id = path.to_string_lossy().into_owned();
        if pipeline.store().contains_source(&source_id) {
            stats.skipped += 1;
            continue;
        }
        while tasks.len() >= concurrency {
            if let Some(joined) = tasks.join_next().await {
                tally(&mut stats, joined);
            }
        }
        tasks.spawn(import_file(pipeline.clone(), path, source_id));
    }
    while let Some(joined) = tasks.join_next().await {
        tally(&mut stats, joined);
    }

    info!(
        scanned = stats.scanned,
        saved = stats.saved,
        discarded = stats.discarded,
        skipped = stats.skipped,
        failed = stats.failed,
        elapsed_secs = start_time.elapsed().as_secs_f64(),
        "Import finished"
    );
    Ok(stats)
}

fn tally(stats: &mut ImportStats, joined: Result<FileOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(FileOutcome::Saved) => stats.saved += 1,
        Ok(FileOutcome::Discarded) => stats.discarded += 1,
        Ok(FileOutcome::Failed) => stats.failed += 1,
        Err(e) => {
            warn!(error = %e, "Import task panicked");
            stats.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Annotation, AnnotationError, AnnotationProvider};
    use crate::database::EntryStore;
    use crate::geocoding::GeoLocationResolver;
    use crate::models::Coordinate;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    /// Names every photo after its first byte so discards can be provoked per file.
    struct ByteProvider;

    #[async_trait]
    impl AnnotationProvider for ByteProvider {
        fn name(&self) -> &str {
            "byte"
        }

        async fn annotate(&self, image: &[u8], place_hint: Option<&str>) -> Result<Annotation, AnnotationError> {
            let landmark = match image.first() {
                Some(b'x') => "Captured Scene".to_string(),
                Some(b) => format!("Landmark {}", *b as char),
                None => return Err(AnnotationError::Malformed("empty".to_string())),
            };
            Ok(Annotation {
                landmark_name: landmark,
                place_label: place_hint.map(str::to_string),
                caption: "c".to_string(),
                description: "d".to_string(),
                facts: Vec::new(),
            })
        }
    }

    struct NoGeocoder;

    #[async_trait]
    impl GeoLocationResolver for NoGeocoder {
        async fn reverse_geocode(&self, _coordinate: Coordinate) -> Option<String> {
            None
        }

        async fn forward_geocode(&self, _place_label: &str) -> Option<Coordinate> {
            None
        }
    }

    #[test]
    fn test_collects_supported_files_only() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("day1")).unwrap();
        fs::create_dir_all(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join("day1").join("a.JPG"), b"a").unwrap();
        fs::write(dir.path().join("b.heic"), b"b").unwrap();
        fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        fs::write(dir.path().join(".cache").join("c.jpg"), b"c").unwrap();

        let files = collect_photo_files(dir.path());
        assert_eq!(
            files,
            vec![dir.path().join("b.heic"), dir.path().join("day1").join("a.JPG")]
        );
    }

    #[tokio::test]
    async fn test_import_counts_and_skips_known_files() {
        let photos = tempdir().unwrap();
        let data = tempdir().unwrap();
        fs::write(photos.path().join("1.jpg"), b"a-photo").unwrap();
        fs::write(photos.path().join("2.jpg"), b"b-photo").unwrap();
        fs::write(photos.path().join("3.png"), b"x-photo").unwrap();

        let store = EntryStore::open(data.path()).unwrap();
        let pipeline = Arc::new(AnnotationPipeline::new(
            Arc::new(ByteProvider),
            Arc::new(NoGeocoder),
            store.clone(),
        ));

        let first = import_folder(pipeline.clone(), photos.path(), 2).await.unwrap();
        assert_eq!(
            first,
            ImportStats {
                scanned: 3,
                saved: 2,
                discarded: 1,
                skipped: 0,
                failed: 0,
            }
        );
        assert_eq!(store.len(), 2);

        let second = import_folder(pipeline, photos.path(), 2).await.unwrap();
        assert_eq!(second.saved, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.discarded, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_folder_is_an_error() {
        let data = tempdir().unwrap();
        let store = EntryStore::open(data.path()).unwrap();
        let pipeline = Arc::new(AnnotationPipeline::new(Arc::new(ByteProvider), Arc::new(NoGeocoder), store));
        assert!(import_folder(pipeline, &data.path().join("nope"), 1).await.is_err());
    }
}
