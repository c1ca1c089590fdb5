use std::env;

use library::{FileTrackSource, JsonPathStore, Manager};
use metadata::SidecarStore;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let music_root = env::args()
        .nth(1)
        .or_else(|| env::var("MUSIC_ROOT").ok())
        .ok_or("MUSIC_ROOT not set and no path argument")?;

    let manager = Manager::new(
        Box::new(JsonPathStore::new()?),
        Box::new(FileTrackSource::new(SidecarStore::new())),
    );
    let loaded = manager.load_stored()?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(&music_root).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_audio = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| AUDIO_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
            .unwrap_or(false);
        if is_audio {
            paths.push(entry.path().to_string_lossy().to_string());
        }
    }

    let result = manager.add_files(&paths);
    for error in &result.errors {
        eprintln!("error: {}", error);
    }
    println!(
        "Library: {} tracks ({} loaded, {} added, {} skipped, {} errors)",
        manager.len(),
        loaded.added.len(),
        result.added.len(),
        result.skipped,
        result.errors.len()
    );

    Ok(())
}
