use crate::catalog::ObjectCatalog;
use crate::config::ExtractionConfig;
use crate::prefix;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of one per-video extraction call.
///
/// Failure is data here, not control flow: the orchestrator records a
/// failed video and moves on to the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub success: bool,
    /// Produced frame keys, in frame order.
    pub frames: Vec<String>,
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn ok(frames: Vec<String>) -> Self {
        Self {
            success: true,
            frames,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            frames: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Receiver for best-effort intermediate progress notifications emitted
/// while a single video is being processed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn update(&self, message: String);
}

/// Sink that drops every notification. Handy in tests.
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn update(&self, _message: String) {}
}

/// Per-video frame extraction boundary.
///
/// Implementations may take substantial wall-clock time and may emit any
/// number of progress notifications before returning. A failing call must
/// not corrupt orchestrator state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract_frames(
        &self,
        bucket: &str,
        video_key: &str,
        output_prefix: &str,
        sample_interval: u32,
        sink: Arc<dyn ProgressSink>,
    ) -> ExtractionResult;
}

/// Extractor that delegates decoding and sampling to an external
/// `ffmpeg` binary: download the video, sample one frame every
/// `sample_interval` seconds, upload the JPEGs under the output prefix.
pub struct FfmpegFrameExtractor {
    catalog: Arc<ObjectCatalog>,
    ffmpeg_path: String,
    work_dir: PathBuf,
}

impl FfmpegFrameExtractor {
    pub fn new(catalog: Arc<ObjectCatalog>, config: &ExtractionConfig) -> Self {
        Self {
            catalog,
            ffmpeg_path: config.ffmpeg_path.clone(),
            work_dir: PathBuf::from(&config.work_dir),
        }
    }

    async fn try_extract(
        &self,
        bucket: &str,
        video_key: &str,
        output_prefix: &str,
        sample_interval: u32,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<String>> {
        let scratch = self.work_dir.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&scratch)
            .await
            .with_context(|| format!("Failed to create scratch dir '{}'", scratch.display()))?;

        let result = self
            .extract_in(&scratch, bucket, video_key, output_prefix, sample_interval, sink)
            .await;

        if let Err(e) = fs::remove_dir_all(&scratch).await {
            warn!(error = %e, scratch = %scratch.display(), "Failed to clean up scratch dir");
        }

        result
    }

    async fn extract_in(
        &self,
        scratch: &Path,
        bucket: &str,
        video_key: &str,
        output_prefix: &str,
        sample_interval: u32,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<String>> {
        let file_name = video_key.rsplit('/').next().unwrap_or(video_key);
        let input_path = scratch.join(file_name);

        self.catalog
            .download_to_path(bucket, video_key, &input_path)
            .await?;

        sink.update(format!("Extracting frames from {file_name}")).await;

        let status = Command::new(&self.ffmpeg_path)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(&input_path)
            .arg("-vf")
            .arg(format!("fps=1/{sample_interval}"))
            .arg(scratch.join("frame_%05d.jpg"))
            .status()
            .await
            .with_context(|| format!("Failed to run '{}'", self.ffmpeg_path))?;

        if !status.success() {
            bail!("ffmpeg exited with {status} for '{video_key}'");
        }

        let mut produced = Vec::new();
        let mut entries = fs::read_dir(scratch)
            .await
            .context("Failed to read scratch dir")?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_frame_file(&name) {
                produced.push(name);
            }
        }
        // read_dir order is unspecified; frame numbering restores it
        produced.sort();

        let total = produced.len();
        let mut keys = Vec::with_capacity(total);

        for (index, name) in produced.iter().enumerate() {
            let data = fs::read(scratch.join(name))
                .await
                .with_context(|| format!("Failed to read frame '{name}'"))?;
            let key = prefix::join_key(output_prefix, name);

            self.catalog
                .put_object(bucket, &key, data, "image/jpeg")
                .await?;
            keys.push(key);

            if (index + 1) % 10 == 0 {
                sink.update(format!("Uploaded {}/{} frames", index + 1, total))
                    .await;
            }
        }

        debug!(
            video_key = %video_key,
            frame_count = total,
            "Frames extracted and uploaded"
        );

        Ok(keys)
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    #[instrument(skip(self, sink), fields(video_key = %video_key))]
    async fn extract_frames(
        &self,
        bucket: &str,
        video_key: &str,
        output_prefix: &str,
        sample_interval: u32,
        sink: Arc<dyn ProgressSink>,
    ) -> ExtractionResult {
        match self
            .try_extract(bucket, video_key, output_prefix, sample_interval, sink.as_ref())
            .await
        {
            Ok(frames) => {
                info!(frame_count = frames.len(), "Video processed");
                ExtractionResult::ok(frames)
            }
            Err(e) => {
                error!(error = %e, "Video extraction failed");
                ExtractionResult::failed(e.to_string())
            }
        }
    }
}

/// Matches files produced by the ffmpeg output pattern.
fn is_frame_file(name: &str) -> bool {
    name.starts_with("frame_") && name.ends_with(".jpg")
}
