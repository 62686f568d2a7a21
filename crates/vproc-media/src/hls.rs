//! HLS renditions and the master playlist.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use vproc_models::encoding::{HLS_MASTER_PLAYLIST, HLS_VARIANT_PLAYLIST};
use vproc_models::{target_dimensions, QualityPreset, VideoMetadata};

use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::transcode::{apply_rendition, EncodeSettings};

/// One entry of the master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlsVariant {
    pub name: String,
    /// Peak bandwidth in bits/second
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
}

impl HlsVariant {
    pub fn for_preset(preset: &QualityPreset, source: &VideoMetadata) -> Self {
        let (width, height) = target_dimensions(preset, source.width, source.height);
        Self {
            name: preset.name.clone(),
            bandwidth: preset.bandwidth(),
            width,
            height,
        }
    }

    /// Playlist path relative to the master playlist.
    pub fn playlist_uri(&self) -> String {
        format!("{}/{}", self.name, HLS_VARIANT_PLAYLIST)
    }
}

/// Directory holding one rendition inside the HLS output directory.
pub fn variant_dir(output_dir: &Path, preset: &QualityPreset) -> PathBuf {
    output_dir.join(&preset.name)
}

/// Build the FFmpeg command that segments one rendition.
pub fn hls_variant_command(
    input: &Path,
    variant_dir: &Path,
    preset: &QualityPreset,
    source: &VideoMetadata,
    settings: &EncodeSettings,
    segment_seconds: u32,
) -> FfmpegCommand {
    let playlist = variant_dir.join(HLS_VARIANT_PLAYLIST);
    let segments = variant_dir.join("segment_%03d.ts");

    // Keyframe on every segment boundary so segments start cleanly.
    let keyframes = format!("expr:gte(t,n_forced*{})", segment_seconds);

    apply_rendition(FfmpegCommand::new(input, &playlist), preset, source, settings).output_args([
        "-force_key_frames".to_string(),
        keyframes,
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        segment_seconds.to_string(),
        "-hls_list_size".to_string(),
        "0".to_string(),
        "-hls_playlist_type".to_string(),
        "vod".to_string(),
        "-hls_segment_filename".to_string(),
        segments.to_string_lossy().to_string(),
    ])
}

/// Render the master playlist for the given renditions.
pub fn master_playlist(variants: &[HlsVariant]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for v in variants {
        let _ = writeln!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
            v.bandwidth, v.width, v.height
        );
        let _ = writeln!(out, "{}", v.playlist_uri());
    }
    out
}

/// Write `master.m3u8` into `output_dir` and return its path.
pub async fn write_master_playlist(output_dir: &Path, variants: &[HlsVariant]) -> MediaResult<PathBuf> {
    let path = output_dir.join(HLS_MASTER_PLAYLIST);
    tokio::fs::write(&path, master_playlist(variants)).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> VideoMetadata {
        VideoMetadata {
            width: 1920,
            height: 1080,
            duration: 30.0,
            audio_codec: Some("aac".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_master_playlist_format() {
        let variants = vec![
            HlsVariant::for_preset(&QualityPreset::new("720p", 1280, 720, 2500, 128), &source()),
            HlsVariant::for_preset(&QualityPreset::new("480p", 854, 480, 1000, 96), &source()),
        ];

        let playlist = master_playlist(&variants);
        let lines: Vec<&str> = playlist.lines().collect();
        assert_eq!(
            lines,
            vec![
                "#EXTM3U",
                "#EXT-X-VERSION:3",
                "#EXT-X-STREAM-INF:BANDWIDTH=2628000,RESOLUTION=1280x720",
                "720p/playlist.m3u8",
                "#EXT-X-STREAM-INF:BANDWIDTH=1096000,RESOLUTION=854x480",
                "480p/playlist.m3u8",
            ]
        );
    }

    #[test]
    fn test_variant_command_layout() {
        let preset = QualityPreset::new("360p", 640, 360, 600, 64);
        let dir = Path::new("/work/hls/360p");
        let args = hls_variant_command(
            Path::new("/work/source.mp4"),
            dir,
            &preset,
            &source(),
            &EncodeSettings {
                preset: "veryfast".into(),
            },
            6,
        )
        .build_args();

        assert_eq!(args.last().map(String::as_str), Some("/work/hls/360p/playlist.m3u8"));
        assert!(args.contains(&"/work/hls/360p/segment_%03d.ts".to_string()));
        assert!(args.contains(&"veryfast".to_string()));
        let hls_time = args.iter().position(|a| a == "-hls_time").unwrap();
        assert_eq!(args[hls_time + 1], "6");
    }

    #[tokio::test]
    async fn test_write_master_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let variants = vec![HlsVariant {
            name: "480p".into(),
            bandwidth: 1_096_000,
            width: 854,
            height: 480,
        }];
        let path = write_master_playlist(dir.path(), &variants).await.unwrap();
        assert!(path.ends_with("master.m3u8"));
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.starts_with("#EXTM3U\n"));
    }
}
