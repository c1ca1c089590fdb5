//! Audio property extraction with a bitrate fallback cascade.
//!
//! Tag parsers often report a bitrate of zero for VBR or stream-copied
//! files. When that happens we estimate from file size and duration,
//! probing the container with symphonia if the duration is missing too.

use std::fs::File;
use std::path::Path;

use lofty::file::TaggedFile;
use lofty::prelude::AudioFile;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default)]
pub struct AudioProps {
    pub bitrate: u32,
    pub sample_rate: u32,
}

pub fn audio_properties(path: &Path, file: &TaggedFile) -> AudioProps {
    let props = file.properties();
    let mut out = AudioProps {
        bitrate: props
            .audio_bitrate()
            .or_else(|| props.overall_bitrate())
            .unwrap_or(0),
        sample_rate: props.sample_rate().unwrap_or(0),
    };

    if out.bitrate > 0 {
        return out;
    }

    let file_size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return out,
    };

    let duration = props.duration().as_secs_f64();
    if duration > 0.0 {
        out.bitrate = estimate_bitrate(file_size, duration);
        return out;
    }

    if let Some((sample_rate, duration)) = probe_stream(path) {
        if out.sample_rate == 0 {
            out.sample_rate = sample_rate;
        }
        if duration > 0.0 {
            out.bitrate = estimate_bitrate(file_size, duration);
        }
    }

    out
}

/// Whole-file average in kbit/s. Overstates slightly for files with
/// large embedded artwork, which beats reporting zero.
pub fn estimate_bitrate(file_size: u64, duration_secs: f64) -> u32 {
    if duration_secs <= 0.0 {
        return 0;
    }
    ((file_size as f64 * 8.0) / duration_secs / 1000.0).round() as u32
}

/// Container-level probe for sample rate and duration. Returns `None`
/// on any failure; callers treat that as "unknown".
fn probe_stream(path: &Path) -> Option<(u32, f64)> {
    let src = File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| debug!("probe failed for {}: {}", path.display(), err))
        .ok()?;

    let track = probed.format.default_track()?;
    let params = &track.codec_params;
    let sample_rate = params.sample_rate.unwrap_or(0);
    let duration = match (params.time_base, params.n_frames) {
        (Some(tb), Some(frames)) => {
            let time = tb.calc_time(frames);
            time.seconds as f64 + time.frac
        }
        _ => 0.0,
    };

    Some((sample_rate, duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_matches_hand_computed_value() {
        // 4 MiB over 240 s is about 140 kbit/s.
        let kbps = estimate_bitrate(4 * 1024 * 1024, 240.0);
        assert_eq!(kbps, 140);
    }

    #[test]
    fn estimate_refuses_nonpositive_duration() {
        assert_eq!(estimate_bitrate(1_000_000, 0.0), 0);
        assert_eq!(estimate_bitrate(1_000_000, -3.0), 0);
    }

    #[test]
    fn probe_returns_none_for_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_audio.bin");
        std::fs::write(&path, b"\x00\x01\x02\x03nothing here").unwrap();
        assert!(probe_stream(&path).is_none());
    }
}
