//! The photo directory as seen by the gallery: listing, lookup and deletion.

use crate::errors::BoothError;
use crate::metadata::MetadataStore;
use crate::thermal::{is_thermal_name, thermal_path};
use crate::types::{CaptureKind, SINGLE_PREFIX, STRIP_OUTPUT_PREFIX, STRIP_SHOT_PREFIX};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhotoEntry {
    pub name: String,
    pub url: String,
    pub kind: CaptureKind,
    pub liked: bool,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PhotoLibrary {
    dir: PathBuf,
}

/// Gallery URL of a photo file name.
pub fn photo_url(name: &str) -> String {
    format!("/photos/{name}")
}

/// Reject anything that is not a plain file name.
pub fn validate_name(name: &str) -> Result<(), BoothError> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().is_some_and(|f| f == name);
    if plain {
        Ok(())
    } else {
        Err(BoothError::invalid_argument(format!("invalid photo name: {name:?}")))
    }
}

fn is_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn has_prefix(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('_'))
}

/// Finished output worth listing: singles and stitched strips, not per-shot
/// intermediates or printer rasters.
pub fn is_listed_name(name: &str) -> bool {
    let is_output = has_prefix(name, SINGLE_PREFIX) || has_prefix(name, STRIP_OUTPUT_PREFIX);
    is_image_name(name) && is_output && !is_thermal_name(name)
}

/// Anything that may be sent to the printer again: gallery photos plus the
/// individual shots of a strip.
pub fn is_printable_name(name: &str) -> bool {
    is_listed_name(name)
        || (is_image_name(name) && has_prefix(name, STRIP_SHOT_PREFIX) && !is_thermal_name(name))
}

impl PhotoLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Newest first.
    pub fn list(&self, metadata: &MetadataStore) -> Result<Vec<PhotoEntry>, BoothError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let likes = metadata.snapshot();
        let mut photos: Vec<PhotoEntry> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                if !is_listed_name(&name) {
                    return None;
                }
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let modified: DateTime<Utc> = meta.modified().ok()?.into();
                Some(PhotoEntry {
                    url: photo_url(&name),
                    kind: CaptureKind::from_file_name(&name),
                    liked: likes.get(&name).is_some_and(|m| m.liked),
                    modified,
                    name,
                })
            })
            .collect();

        photos.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(photos)
    }

    /// Path of an existing image in the photo directory. Other files living
    /// there (the metadata store, temp files) are never resolved.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, BoothError> {
        self.resolve_where(name, is_image_name)
    }

    /// Path of a gallery photo, the only names that can be liked or deleted.
    pub fn resolve_listed(&self, name: &str) -> Result<PathBuf, BoothError> {
        self.resolve_where(name, is_listed_name)
    }

    /// Path of a photo that can be reprinted.
    pub fn resolve_printable(&self, name: &str) -> Result<PathBuf, BoothError> {
        self.resolve_where(name, is_printable_name)
    }

    fn resolve_where(&self, name: &str, accept: fn(&str) -> bool) -> Result<PathBuf, BoothError> {
        validate_name(name)?;
        let path = self.dir.join(name);
        if accept(name) && path.is_file() {
            Ok(path)
        } else {
            Err(BoothError::not_found("photo", name))
        }
    }

    /// Delete a photo, its printer raster and its metadata.
    pub fn delete(&self, name: &str, metadata: &MetadataStore) -> Result<(), BoothError> {
        let path = self.resolve_listed(name)?;
        fs::remove_file(&path)?;

        let raster = thermal_path(&path);
        if raster.exists() {
            if let Err(e) = fs::remove_file(&raster) {
                log::warn!("Failed to remove {}: {}", raster.display(), e);
            }
        }

        metadata.remove(name)?;
        log::info!("Deleted {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn touch(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        fs::write(&path, b"jpeg").unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("photo_1.jpg").is_ok());
        for bad in ["", "../secret", "a/b.jpg", ".hidden", "..", "a\\b"] {
            assert!(validate_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_listing_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "photo_old.jpg", 300);
        touch(dir.path(), "photostrip_new.jpg", 10);
        touch(dir.path(), "photo_old_thermal.png", 5);
        touch(dir.path(), "strip_shot.jpg", 1);
        touch(dir.path(), "notes.txt", 1);

        let metadata = MetadataStore::open(dir.path().join("metadata.json"));
        metadata.toggle_like("photo_old.jpg").unwrap();

        let library = PhotoLibrary::new(dir.path());
        let photos = library.list(&metadata).unwrap();
        let names: Vec<&str> = photos.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["photostrip_new.jpg", "photo_old.jpg"]);
        assert_eq!(photos[0].kind, CaptureKind::Strip);
        assert_eq!(photos[1].url, "/photos/photo_old.jpg");
        assert!(photos[1].liked);
        assert!(!photos[0].liked);
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let library = PhotoLibrary::new(dir.path().join("missing"));
        let metadata = MetadataStore::open(dir.path().join("metadata.json"));
        assert!(library.list(&metadata).unwrap().is_empty());
    }

    #[test]
    fn test_only_photos_resolve() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "photo_1.jpg", 0);
        touch(dir.path(), "photo_1_thermal.png", 0);
        touch(dir.path(), "strip_2.jpg", 0);
        let metadata = MetadataStore::open(dir.path().join("metadata.json"));
        metadata.toggle_like("photo_1.jpg").unwrap();
        fs::write(dir.path().join("metadata.json.tmp"), b"{}").unwrap();

        let library = PhotoLibrary::new(dir.path());
        for name in ["metadata.json", "metadata.json.tmp"] {
            assert!(library.resolve(name).is_err(), "{name}");
            assert!(library.resolve_printable(name).is_err(), "{name}");
            assert!(matches!(
                library.delete(name, &metadata),
                Err(BoothError::NotFound { .. })
            ));
        }
        assert!(dir.path().join("metadata.json").exists());
        assert!(MetadataStore::open(dir.path().join("metadata.json")).is_liked("photo_1.jpg"));

        assert!(library.resolve_listed("photo_1.jpg").is_ok());
        assert!(library.resolve_listed("strip_2.jpg").is_err());
        assert!(library.resolve_listed("photo_1_thermal.png").is_err());
        assert!(library.resolve_printable("strip_2.jpg").is_ok());
        assert!(library.resolve_printable("photo_1_thermal.png").is_err());
        assert!(library.resolve("photo_1_thermal.png").is_ok());
    }

    #[test]
    fn test_delete_removes_derivatives() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "photo_1.jpg", 0);
        touch(dir.path(), "photo_1_thermal.png", 0);
        let metadata = MetadataStore::open(dir.path().join("metadata.json"));
        metadata.toggle_like("photo_1.jpg").unwrap();

        let library = PhotoLibrary::new(dir.path());
        library.delete("photo_1.jpg", &metadata).unwrap();
        assert!(!dir.path().join("photo_1.jpg").exists());
        assert!(!dir.path().join("photo_1_thermal.png").exists());
        assert!(!metadata.is_liked("photo_1.jpg"));
        assert!(metadata.snapshot().is_empty());

        assert!(matches!(
            library.delete("photo_1.jpg", &metadata),
            Err(BoothError::NotFound { .. })
        ));
    }
}
