//! Media transcoding.
//!
//! Classifies local files by extension and recompresses them into the
//! scratch directory: JPEGs are re-encoded at a reduced quality, audio is
//! re-encoded at a reduced bitrate by ffmpeg.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use notes_common::config::ProcessingConfig;
use notes_common::{AppError, AppResult, IdGenerator, extension_of};
use tokio::process::Command;

/// Kind of media a file holds, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// JPEG picture
    Picture,
    /// M4A audio
    Audio,
    /// Anything else
    Unsupported,
}

impl MediaKind {
    /// Classify a lowercase or mixed-case extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Picture,
            "m4a" => Self::Audio,
            _ => Self::Unsupported,
        }
    }

    /// Classify a file name, path or object key.
    #[must_use]
    pub fn classify(name: &str) -> Self {
        extension_of(name).map_or(Self::Unsupported, |ext| Self::from_extension(&ext))
    }

    /// Object key prefix transcoded files of this kind are stored under.
    #[must_use]
    pub const fn processed_prefix(self) -> Option<&'static str> {
        match self {
            Self::Picture => Some("processed-photos"),
            Self::Audio => Some("processed-audio"),
            Self::Unsupported => None,
        }
    }
}

/// Media transcoding configuration.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Directory for scratch files
    pub scratch_dir: PathBuf,
    /// JPEG re-encode quality (1-100)
    pub jpeg_quality: u8,
    /// Audio bitrate, ffmpeg syntax
    pub audio_bitrate: String,
    /// `FFmpeg` path
    pub ffmpeg_path: Option<String>,
    /// Upper bound for one ffmpeg run
    pub ffmpeg_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self::from(&ProcessingConfig::default())
    }
}

impl From<&ProcessingConfig> for MediaConfig {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            scratch_dir: config.scratch_dir.clone(),
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
            audio_bitrate: config.audio_bitrate.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffmpeg_timeout: Duration::from_secs(300),
        }
    }
}

/// Media transcoding service.
#[derive(Clone)]
pub struct MediaService {
    config: MediaConfig,
    id_gen: IdGenerator,
}

impl MediaService {
    /// Create a new media service.
    #[must_use]
    pub const fn new(config: MediaConfig) -> Self {
        Self {
            config,
            id_gen: IdGenerator::new(),
        }
    }

    /// A fresh scratch path that keeps the extension of `name`.
    #[must_use]
    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.config.scratch_dir.join(self.id_gen.object_name(name))
    }

    /// Recompress `input` into a new scratch file and return its path.
    ///
    /// The output name is a fresh UUID with the input's extension. On
    /// failure no output file is left behind.
    pub async fn transcode(&self, input: &Path) -> AppResult<PathBuf> {
        let name = input.to_string_lossy();
        let kind = MediaKind::classify(&name);
        if kind == MediaKind::Unsupported {
            return Err(AppError::UnsupportedFileType(name.into_owned()));
        }

        tokio::fs::create_dir_all(&self.config.scratch_dir)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create scratch dir: {e}")))?;
        let output = self.scratch_path(&name);

        let result = if kind == MediaKind::Audio {
            self.reencode_audio(input, &output).await
        } else {
            self.reencode_jpeg(input, &output).await
        };

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e);
        }

        tracing::info!(
            input = %input.display(),
            output = %output.display(),
            kind = ?kind,
            "Transcoded media file"
        );
        Ok(output)
    }

    async fn reencode_jpeg(&self, input: &Path, output: &Path) -> AppResult<()> {
        let quality = self.config.jpeg_quality;
        let input = input.to_path_buf();
        let output = output.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<(), String> {
            let decoded = image::open(&input)
                .map_err(|e| format!("Failed to decode {}: {e}", input.display()))?;
            let rgb = decoded.to_rgb8();

            let file = std::fs::File::create(&output)
                .map_err(|e| format!("Failed to create {}: {e}", output.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut writer, quality)
                .encode(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    ExtendedColorType::Rgb8,
                )
                .map_err(|e| format!("Failed to encode JPEG: {e}"))?;
            writer
                .flush()
                .map_err(|e| format!("Failed to write {}: {e}", output.display()))
        })
        .await
        .map_err(|e| AppError::Internal(format!("JPEG task failed: {e}")))?
        .map_err(AppError::Transcode)
    }

    async fn reencode_audio(&self, input: &Path, output: &Path) -> AppResult<()> {
        let ffmpeg = self.config.ffmpeg_path.as_deref().unwrap_or("ffmpeg");

        let mut cmd = Command::new(ffmpeg);
        cmd.arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-b:a")
            .arg(&self.config.audio_bitrate)
            .arg(output)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.config.ffmpeg_timeout, cmd.output())
            .await
            .map_err(|_| {
                AppError::Transcode(format!(
                    "ffmpeg timed out after {}s",
                    self.config.ffmpeg_timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::Transcode(format!("Failed to execute {ffmpeg}: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(AppError::Transcode(format!(
                "ffmpeg failed ({}): {}",
                result.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
