//! Sidecar persistence for per-track metadata overrides.
//!
//! The primary location is a per-user cache directory with hashed file
//! names, so read-only music folders and path characters never matter.
//! A legacy layout (a `.meta.json` next to the audio file) is still
//! read and migrated forward on first touch.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use common::TrackRecord;

use crate::MetadataError;

pub struct SidecarStore {
    dir: Option<PathBuf>,
}

impl SidecarStore {
    /// Store rooted at the per-user config directory. A `None` root
    /// (headless environments without one) degrades every write to the
    /// legacy next-to-file layout.
    pub fn new() -> Self {
        SidecarStore {
            dir: dirs::config_dir().map(|d| d.join("cantata").join("sidecars")),
        }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        SidecarStore {
            dir: Some(dir.into()),
        }
    }

    fn primary_path(&self, track_path: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|d| d.join(common::sidecar_file_name(track_path)))
    }

    fn legacy_path(track_path: &str) -> PathBuf {
        PathBuf::from(format!("{}.meta.json", track_path))
    }

    /// Read the stored record for a path, if any. Checks the hashed
    /// primary location first, then the legacy sibling file; a legacy
    /// hit is copied forward so the next read finds it in the primary.
    /// A failing primary read degrades to the legacy lookup.
    pub fn read(&self, track_path: &str) -> Result<Option<TrackRecord>, MetadataError> {
        let primary = self.primary_path(track_path);

        if let Some(primary) = primary.as_deref() {
            match read_record(primary, track_path) {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {}
                Err(err) => debug!(
                    "primary sidecar read failed for {}: {}",
                    track_path, err
                ),
            }
        }

        let legacy = Self::legacy_path(track_path);
        let record = match read_record(&legacy, track_path)? {
            Some(record) => record,
            None => return Ok(None),
        };

        // Migrate forward, but never clobber a primary that appeared
        // between the two reads.
        if let Some(primary) = primary {
            if !primary.exists() {
                if let Err(err) = write_record(&primary, &record) {
                    debug!(
                        "sidecar migration to {} failed: {}",
                        primary.display(),
                        err
                    );
                }
            }
        }

        Ok(Some(record))
    }

    /// Write the record to the primary location, falling back to the
    /// legacy sibling file if the primary directory is unusable. A
    /// successful primary write removes the stale legacy copy.
    pub fn write(&self, record: &TrackRecord) -> Result<(), MetadataError> {
        if let Some(primary) = self.primary_path(&record.file_path) {
            match write_record(&primary, record) {
                Ok(()) => {
                    let legacy = Self::legacy_path(&record.file_path);
                    if legacy.exists() {
                        if let Err(err) = std::fs::remove_file(&legacy) {
                            debug!(
                                "stale legacy sidecar {} not removed: {}",
                                legacy.display(),
                                err
                            );
                        }
                    }
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "primary sidecar write failed for {}, using legacy: {}",
                        record.file_path, err
                    );
                }
            }
        }
        write_record(&Self::legacy_path(&record.file_path), record)
    }

    /// Remove the whole hashed cache. Legacy sibling files are left in
    /// place; they live next to the user's music.
    pub fn clear_all(&self) -> Result<(), MetadataError> {
        if let Some(dir) = self.dir.as_deref() {
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

impl Default for SidecarStore {
    fn default() -> Self {
        SidecarStore::new()
    }
}

fn read_record(file: &Path, track_path: &str) -> Result<Option<TrackRecord>, MetadataError> {
    let data = match std::fs::read(file) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut record: TrackRecord = serde_json::from_slice(&data)?;
    // The stored path may predate a move or point elsewhere entirely
    // after a hash collision with an old layout. The lookup path wins.
    record.file_path = track_path.to_string();
    record.file_name = common::file_name_of(track_path);
    Ok(Some(record))
}

fn write_record(file: &Path, record: &TrackRecord) -> Result<(), MetadataError> {
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(record)?;
    std::fs::write(file, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(path: &str) -> TrackRecord {
        TrackRecord {
            file_path: path.to_string(),
            file_name: common::file_name_of(path),
            title: "Stored Title".to_string(),
            year: 2010,
            ..TrackRecord::default()
        }
    }

    #[test]
    fn round_trip_rederives_path_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = SidecarStore::with_dir(dir.path().join("sidecars"));
        let track = dir.path().join("song.flac");
        let track_str = track.to_string_lossy().to_string();

        let mut record = sample(&track_str);
        record.file_path = "/somewhere/else/old.flac".to_string();
        record.file_name = "old.flac".to_string();
        // Write under the real path's hash regardless of the stale
        // fields inside the record body.
        let primary = store.primary_path(&track_str).unwrap();
        write_record(&primary, &record).unwrap();

        let loaded = store.read(&track_str).unwrap().unwrap();
        assert_eq!(loaded.file_path, track_str);
        assert_eq!(loaded.file_name, "song.flac");
        assert_eq!(loaded.title, "Stored Title");
    }

    #[test]
    fn read_without_audio_file_still_works() {
        let dir = tempfile::tempdir().unwrap();
        let store = SidecarStore::with_dir(dir.path().join("sidecars"));
        let track = dir.path().join("never_existed.mp3");
        let track_str = track.to_string_lossy().to_string();

        store.write(&sample(&track_str)).unwrap();
        let loaded = store.read(&track_str).unwrap().unwrap();
        assert_eq!(loaded.title, "Stored Title");
        assert_eq!(loaded.year, 2010);
    }

    #[test]
    fn legacy_sidecar_is_read_and_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let store = SidecarStore::with_dir(dir.path().join("sidecars"));
        let track = dir.path().join("song.mp3");
        let track_str = track.to_string_lossy().to_string();

        let legacy = SidecarStore::legacy_path(&track_str);
        write_record(&legacy, &sample(&track_str)).unwrap();

        let loaded = store.read(&track_str).unwrap().unwrap();
        assert_eq!(loaded.title, "Stored Title");

        let primary = store.primary_path(&track_str).unwrap();
        assert!(primary.exists(), "legacy record should migrate forward");
    }

    #[test]
    fn write_removes_stale_legacy_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = SidecarStore::with_dir(dir.path().join("sidecars"));
        let track = dir.path().join("song.mp3");
        let track_str = track.to_string_lossy().to_string();

        let legacy = SidecarStore::legacy_path(&track_str);
        write_record(&legacy, &sample(&track_str)).unwrap();

        store.write(&sample(&track_str)).unwrap();
        assert!(!legacy.exists());
        assert!(store.primary_path(&track_str).unwrap().exists());
    }

    #[test]
    fn unusable_primary_falls_back_to_legacy() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the sidecar directory should be makes every
        // primary write fail.
        let blocked = dir.path().join("sidecars");
        std::fs::write(&blocked, b"occupied").unwrap();

        let store = SidecarStore::with_dir(&blocked);
        let track = dir.path().join("song.mp3");
        let track_str = track.to_string_lossy().to_string();

        store.write(&sample(&track_str)).unwrap();
        assert!(SidecarStore::legacy_path(&track_str).exists());

        let loaded = store.read(&track_str).unwrap().unwrap();
        assert_eq!(loaded.title, "Stored Title");
    }

    #[test]
    fn clear_all_wipes_the_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("sidecars");
        let store = SidecarStore::with_dir(&cache);
        let track = dir.path().join("song.mp3");
        let track_str = track.to_string_lossy().to_string();

        store.write(&sample(&track_str)).unwrap();
        assert!(cache.exists());

        store.clear_all().unwrap();
        assert!(!cache.exists());
        assert!(store.read(&track_str).unwrap().is_none());
    }
}
