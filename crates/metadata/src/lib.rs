//! Tag reading and write-back for single audio files.
//!
//! `read_track` never fails on bad tags: unsupported or corrupt files
//! degrade to a minimal record built from the path, and the sidecar
//! override is merged on top in every case so user edits survive even
//! for files whose tags cannot be parsed.

mod props;
mod sidecar;

pub use sidecar::SidecarStore;

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::file::{FileType, TaggedFile};
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::{ItemKey, TagExt, TaggedFileExt};
use lofty::tag::{Tag, TagType};
use tracing::{debug, warn};

use common::{TrackRecord, UNKNOWN_ALBUM, UNKNOWN_ARTIST};

/// Embedded covers above this size are dropped rather than carried in the
/// record, to bound memory and serialization cost.
const MAX_COVER_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Json(serde_json::Error),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::Json(err) => write!(f, "json error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        MetadataError::Json(err)
    }
}

/// Read the full record for one file: embedded tags, derived audio
/// properties, then the sidecar override merged on top.
///
/// Only an unreadable file (vanished mid-batch, permission loss) is an
/// error; tag parse failures fall back to [`TrackRecord::minimal`].
pub fn read_track(path: &str, sidecars: &SidecarStore) -> Result<TrackRecord, MetadataError> {
    std::fs::metadata(path)?;

    let mut record = match lofty::read_from_path(path) {
        Ok(file) => record_from_tagged(path, &file),
        Err(err) => {
            warn!("tag read failed for {}: {}", path, err);
            TrackRecord::minimal(path)
        }
    };

    match sidecars.read(path) {
        Ok(Some(stored)) => record = common::merge_stored(&record, &stored),
        Ok(None) => {}
        Err(err) => debug!("sidecar read failed for {}: {}", path, err),
    }

    Ok(record)
}

/// Persist a record: MP3 files get the tags written back into the file
/// itself, and every format gets the sidecar so edits survive read-only
/// files and formats without writable tags.
pub fn save_track(record: &TrackRecord, sidecars: &SidecarStore) -> Result<(), MetadataError> {
    if is_mp3(&record.file_path) {
        write_embedded(record)?;
    }
    sidecars.write(record)
}

fn is_mp3(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}

fn record_from_tagged(path: &str, file: &TaggedFile) -> TrackRecord {
    let mut record = TrackRecord {
        file_path: path.to_string(),
        file_name: common::file_name_of(path),
        ..TrackRecord::default()
    };

    if let Some(tag) = file.primary_tag().or_else(|| file.first_tag()) {
        record.title = tag_string(tag, &ItemKey::TrackTitle);
        record.artist = tag_string(tag, &ItemKey::TrackArtist);
        record.album = tag_string(tag, &ItemKey::AlbumTitle);
        record.album_artist = tag_string(tag, &ItemKey::AlbumArtist);
        record.genre = tag_string(tag, &ItemKey::Genre);
        record.comment = tag_string(tag, &ItemKey::Comment);
        record.composer = tag_string(tag, &ItemKey::Composer);
        record.lyrics = tag_string(tag, &ItemKey::Lyrics);
        record.track_number = tag
            .get_string(&ItemKey::TrackNumber)
            .and_then(parse_number)
            .unwrap_or(0);
        record.disc_number = tag
            .get_string(&ItemKey::DiscNumber)
            .and_then(parse_number)
            .unwrap_or(0);
        record.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year)
            .unwrap_or(0);

        if let Some(picture) = pick_picture(tag.pictures()) {
            match encode_cover(picture.data(), picture.mime_type()) {
                Some(encoded) => {
                    record.cover_image = encoded;
                    record.has_cover = true;
                }
                None => debug!(
                    "cover too large ({} bytes), skipping embed for {}",
                    picture.data().len(),
                    path
                ),
            }
        }
    }

    if record.title.trim().is_empty() {
        record.title = common::trim_extension(&record.file_name);
    }
    if record.artist.trim().is_empty() {
        record.artist = UNKNOWN_ARTIST.to_string();
    }
    if record.album.trim().is_empty() {
        record.album = UNKNOWN_ALBUM.to_string();
    }
    record.format = format_name(file.file_type())
        .map(|name| name.to_string())
        .unwrap_or_else(|| common::format_from_extension(path));

    let props = props::audio_properties(Path::new(path), file);
    record.bitrate = props.bitrate;
    record.sample_rate = props.sample_rate;

    record
}

fn write_embedded(record: &TrackRecord) -> Result<(), MetadataError> {
    let path = Path::new(&record.file_path);
    let mut file = lofty::read_from_path(path)?;
    let tag = match file.tag_mut(TagType::Id3v2) {
        Some(tag) => tag,
        None => {
            file.insert_tag(Tag::new(TagType::Id3v2));
            match file.tag_mut(TagType::Id3v2) {
                Some(tag) => tag,
                None => return Ok(()),
            }
        }
    };

    set_or_remove(tag, ItemKey::TrackTitle, &record.title);
    set_or_remove(tag, ItemKey::TrackArtist, &record.artist);
    set_or_remove(tag, ItemKey::AlbumTitle, &record.album);
    set_or_remove(tag, ItemKey::AlbumArtist, &record.album_artist);
    set_or_remove(tag, ItemKey::Genre, &record.genre);
    set_or_remove(tag, ItemKey::Comment, &record.comment);
    set_or_remove(tag, ItemKey::Composer, &record.composer);
    set_or_remove(tag, ItemKey::Lyrics, &record.lyrics);
    set_or_remove_num(tag, ItemKey::TrackNumber, record.track_number);
    set_or_remove_num(tag, ItemKey::DiscNumber, record.disc_number);
    set_or_remove_num(tag, ItemKey::Year, record.year);

    tag.remove_picture_type(PictureType::CoverFront);
    if record.has_cover {
        if let Some((mime, data)) = decode_cover(&record.cover_image) {
            tag.push_picture(Picture::new_unchecked(
                PictureType::CoverFront,
                Some(mime),
                None,
                data,
            ));
        }
    }

    tag.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

fn set_or_remove(tag: &mut Tag, key: ItemKey, value: &str) {
    if value.trim().is_empty() {
        let _ = tag.remove_key(&key);
    } else {
        tag.insert_text(key, value.to_string());
    }
}

fn set_or_remove_num(tag: &mut Tag, key: ItemKey, value: u32) {
    if value == 0 {
        let _ = tag.remove_key(&key);
    } else {
        tag.insert_text(key, value.to_string());
    }
}

fn tag_string(tag: &Tag, key: &ItemKey) -> String {
    tag.get_string(key).unwrap_or_default().to_string()
}

fn parse_number(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<u32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    pictures
        .iter()
        .find(|picture| picture.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())
}

/// Data-URI encoding for transport; `None` when the image is empty or
/// past the size ceiling.
fn encode_cover(data: &[u8], mime: Option<&MimeType>) -> Option<String> {
    if data.is_empty() || data.len() > MAX_COVER_BYTES {
        return None;
    }
    let mime = mime.map(|m| m.as_str()).unwrap_or("image/jpeg");
    Some(format!("data:{};base64,{}", mime, BASE64.encode(data)))
}

fn decode_cover(value: &str) -> Option<(MimeType, Vec<u8>)> {
    let (head, encoded) = value.split_once(',')?;
    let mime = head.strip_prefix("data:")?.strip_suffix(";base64")?;
    let data = BASE64.decode(encoded.trim()).ok()?;
    let mime = match mime {
        "image/jpeg" => MimeType::Jpeg,
        "image/png" => MimeType::Png,
        other => MimeType::Unknown(other.to_string()),
    };
    Some((mime, data))
}

fn format_name(file_type: FileType) -> Option<&'static str> {
    match file_type {
        FileType::Mpeg => Some("MP3"),
        FileType::Flac => Some("FLAC"),
        FileType::Wav => Some("WAV"),
        FileType::Vorbis => Some("OGG"),
        FileType::Mp4 => Some("M4A"),
        FileType::Aac => Some("AAC"),
        _ => None,
    }
}
