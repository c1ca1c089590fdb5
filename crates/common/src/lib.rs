use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Canonical metadata for one audio file. `file_path` is the unique key
/// within the library index. Zero/empty means "unknown" for every field
/// except the path itself; the JSON layout is persisted as-is in sidecars
/// and must stay stable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackRecord {
    pub file_path: String,
    pub file_name: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub track_number: u32,
    pub disc_number: u32,
    pub genre: String,
    pub year: u32,
    pub comment: String,
    pub composer: String,
    pub lyrics: String,
    pub has_cover: bool,
    pub cover_image: String,
    pub format: String,
    pub bitrate: u32,
    pub sample_rate: u32,
}

impl TrackRecord {
    /// Bare record for a path whose tags could not be read: title from the
    /// file stem, sentinel artist/album, format guessed from the extension.
    pub fn minimal(path: &str) -> Self {
        let name = file_name_of(path);
        TrackRecord {
            file_path: path.to_string(),
            file_name: name.clone(),
            title: trim_extension(&name),
            artist: UNKNOWN_ARTIST.to_string(),
            album: UNKNOWN_ALBUM.to_string(),
            format: format_from_extension(path),
            ..TrackRecord::default()
        }
    }
}

/// A partial record applied on top of an existing one. Every field is
/// optional so "not provided" and "explicitly empty" cannot be confused;
/// `None` always leaves the base value intact.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackOverlay {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub comment: Option<String>,
    pub composer: Option<String>,
    pub lyrics: Option<String>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub year: Option<u32>,
    pub cover_image: Option<String>,
    pub format: Option<String>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
}

impl TrackOverlay {
    /// Build an insertable record for a path the index does not know yet.
    pub fn into_record(self, path: &str) -> TrackRecord {
        let mut record = TrackRecord {
            file_path: path.to_string(),
            file_name: file_name_of(path),
            ..TrackRecord::default()
        };
        apply_overlay(&mut record, &self);
        if record.title.trim().is_empty() {
            record.title = trim_extension(&record.file_name);
        }
        if record.format.trim().is_empty() {
            record.format = format_from_extension(path);
        }
        record
    }
}

fn pick(target: &mut String, value: &str) {
    if !value.trim().is_empty() {
        *target = value.to_string();
    }
}

fn pick_num(target: &mut u32, value: u32) {
    if value > 0 {
        *target = value;
    }
}

/// Merge a stored sidecar record on top of a freshly read one. Field-wise:
/// non-empty strings and strictly positive numbers from `stored` win; the
/// cover is taken only when the sidecar both flags it and carries data.
pub fn merge_stored(base: &TrackRecord, stored: &TrackRecord) -> TrackRecord {
    let mut out = base.clone();

    pick(&mut out.title, &stored.title);
    pick(&mut out.artist, &stored.artist);
    pick(&mut out.album, &stored.album);
    pick(&mut out.album_artist, &stored.album_artist);
    pick(&mut out.genre, &stored.genre);
    pick(&mut out.comment, &stored.comment);
    pick(&mut out.composer, &stored.composer);
    pick(&mut out.lyrics, &stored.lyrics);
    pick(&mut out.format, &stored.format);
    pick_num(&mut out.track_number, stored.track_number);
    pick_num(&mut out.disc_number, stored.disc_number);
    pick_num(&mut out.year, stored.year);
    pick_num(&mut out.bitrate, stored.bitrate);
    pick_num(&mut out.sample_rate, stored.sample_rate);

    if stored.has_cover && !stored.cover_image.trim().is_empty() {
        out.cover_image = stored.cover_image.clone();
        out.has_cover = true;
    }

    out
}

/// Apply a sparse overlay in place. Same directional rule as
/// [`merge_stored`]: provided, non-blank values replace; everything else
/// is left alone, so repeated partial overlays compose without clobbering
/// known-good fields.
pub fn apply_overlay(base: &mut TrackRecord, overlay: &TrackOverlay) {
    if let Some(value) = overlay.title.as_deref() {
        pick(&mut base.title, value);
    }
    if let Some(value) = overlay.artist.as_deref() {
        pick(&mut base.artist, value);
    }
    if let Some(value) = overlay.album.as_deref() {
        pick(&mut base.album, value);
    }
    if let Some(value) = overlay.album_artist.as_deref() {
        pick(&mut base.album_artist, value);
    }
    if let Some(value) = overlay.genre.as_deref() {
        pick(&mut base.genre, value);
    }
    if let Some(value) = overlay.comment.as_deref() {
        pick(&mut base.comment, value);
    }
    if let Some(value) = overlay.composer.as_deref() {
        pick(&mut base.composer, value);
    }
    if let Some(value) = overlay.lyrics.as_deref() {
        pick(&mut base.lyrics, value);
    }
    if let Some(value) = overlay.format.as_deref() {
        pick(&mut base.format, value);
    }
    if let Some(value) = overlay.track_number {
        pick_num(&mut base.track_number, value);
    }
    if let Some(value) = overlay.disc_number {
        pick_num(&mut base.disc_number, value);
    }
    if let Some(value) = overlay.year {
        pick_num(&mut base.year, value);
    }
    if let Some(value) = overlay.bitrate {
        pick_num(&mut base.bitrate, value);
    }
    if let Some(value) = overlay.sample_rate {
        pick_num(&mut base.sample_rate, value);
    }
    if let Some(image) = overlay.cover_image.as_deref() {
        if !image.trim().is_empty() {
            base.cover_image = image.to_string();
            base.has_cover = true;
        }
    }
}

/// Stable lookup key for a path: absolute, cleaned, lowercased on
/// case-insensitive filesystems. Works for paths that no longer exist.
pub fn canonical_key(path: &str) -> String {
    let key = match std::path::absolute(Path::new(path)) {
        Ok(abs) => abs.to_string_lossy().to_string(),
        Err(_) => path.to_string(),
    };
    if cfg!(windows) {
        key.to_lowercase()
    } else {
        key
    }
}

/// Sidecar cache file name for a path: SHA-1 hex of the canonical key.
/// Keeps lookups O(1) and avoids filesystem-unsafe characters.
pub fn sidecar_file_name(path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(canonical_key(path).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2 + 10);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out.push_str(".meta.json");
    out
}

pub fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

pub fn trim_extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

pub fn format_from_extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_uppercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_does_not_clobber_with_blanks() {
        let base = TrackRecord {
            title: "X".to_string(),
            artist: String::new(),
            ..TrackRecord::default()
        };
        let stored = TrackRecord {
            title: String::new(),
            artist: "Y".to_string(),
            ..TrackRecord::default()
        };
        let merged = merge_stored(&base, &stored);
        assert_eq!(merged.title, "X");
        assert_eq!(merged.artist, "Y");
    }

    #[test]
    fn merge_ignores_zero_numbers() {
        let base = TrackRecord {
            track_number: 3,
            year: 1999,
            ..TrackRecord::default()
        };
        let stored = TrackRecord {
            track_number: 0,
            year: 2004,
            ..TrackRecord::default()
        };
        let merged = merge_stored(&base, &stored);
        assert_eq!(merged.track_number, 3);
        assert_eq!(merged.year, 2004);
    }

    #[test]
    fn merge_takes_cover_only_when_flagged_with_data() {
        let base = TrackRecord {
            has_cover: true,
            cover_image: "data:image/png;base64,old".to_string(),
            ..TrackRecord::default()
        };
        let unflagged = TrackRecord {
            has_cover: false,
            cover_image: "data:image/png;base64,new".to_string(),
            ..TrackRecord::default()
        };
        assert_eq!(
            merge_stored(&base, &unflagged).cover_image,
            "data:image/png;base64,old"
        );

        let empty = TrackRecord {
            has_cover: true,
            cover_image: String::new(),
            ..TrackRecord::default()
        };
        assert_eq!(
            merge_stored(&base, &empty).cover_image,
            "data:image/png;base64,old"
        );

        let replacing = TrackRecord {
            has_cover: true,
            cover_image: "data:image/png;base64,new".to_string(),
            ..TrackRecord::default()
        };
        let merged = merge_stored(&base, &replacing);
        assert!(merged.has_cover);
        assert_eq!(merged.cover_image, "data:image/png;base64,new");
    }

    #[test]
    fn overlay_none_fields_leave_base_intact() {
        let mut base = TrackRecord {
            title: "Kept".to_string(),
            year: 2001,
            ..TrackRecord::default()
        };
        let overlay = TrackOverlay {
            artist: Some("Someone".to_string()),
            title: Some(String::new()),
            year: Some(0),
            ..TrackOverlay::default()
        };
        apply_overlay(&mut base, &overlay);
        assert_eq!(base.title, "Kept");
        assert_eq!(base.artist, "Someone");
        assert_eq!(base.year, 2001);
    }

    #[test]
    fn overlay_into_record_derives_title_and_format() {
        let overlay = TrackOverlay {
            artist: Some("Someone".to_string()),
            ..TrackOverlay::default()
        };
        let record = overlay.into_record("/music/song.mp3");
        assert_eq!(record.file_name, "song.mp3");
        assert_eq!(record.title, "song");
        assert_eq!(record.format, "MP3");
        assert_eq!(record.artist, "Someone");
    }

    #[test]
    fn sidecar_file_name_is_deterministic() {
        let first = sidecar_file_name("/music/a.mp3");
        let second = sidecar_file_name("/music/a.mp3");
        assert_eq!(first, second);
        assert_ne!(first, sidecar_file_name("/music/b.mp3"));
        assert!(first.ends_with(".meta.json"));
        assert_eq!(first.len(), 40 + ".meta.json".len());
    }

    #[test]
    fn minimal_record_falls_back_to_path_parts() {
        let record = TrackRecord::minimal("/music/untagged.flac");
        assert_eq!(record.title, "untagged");
        assert_eq!(record.artist, UNKNOWN_ARTIST);
        assert_eq!(record.album, UNKNOWN_ALBUM);
        assert_eq!(record.format, "FLAC");
        assert_eq!(record.bitrate, 0);
    }
}
