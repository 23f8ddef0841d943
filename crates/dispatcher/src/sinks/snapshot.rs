//! SnapshotSink - writes every n-th video frame to disk as PNG

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use contracts::{ContractError, Subscriber, VideoFrame};
use tracing::{debug, error, instrument};

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSinkConfig {
    /// Output directory
    pub base_path: PathBuf,
    /// Keep one frame out of every `every_n`
    pub every_n: u64,
}

impl SnapshotSinkConfig {
    /// Create config from a sink's params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ContractError> {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./snapshots"));
        let every_n = match params.get("every_n") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ContractError::config_validation("every_n", format!("expected a positive integer, got '{raw}'"))
                })?,
            None => 30,
        };
        Ok(Self { base_path, every_n })
    }
}

/// Subscriber on the video channel that persists sampled frames
pub struct SnapshotSink {
    name: String,
    config: SnapshotSinkConfig,
    received: u64,
    written: u64,
}

impl SnapshotSink {
    pub fn new(name: impl Into<String>, config: SnapshotSinkConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;
        Ok(Self {
            name: name.into(),
            config,
            received: 0,
            written: 0,
        })
    }

    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = SnapshotSinkConfig::from_params(params)?;
        Self::new(&name, config).map_err(|e| ContractError::subscriber_send(&name, e.to_string()))
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    fn file_name(frame: &VideoFrame) -> String {
        format!(
            "{}_{:08}_{}.png",
            frame.captured_at.format("%Y%m%dT%H%M%S%.3f"),
            frame.pts,
            frame.origin.label()
        )
    }

    fn save(&self, frame: &VideoFrame) -> Result<PathBuf, image::ImageError> {
        let path = self.config.base_path.join(Self::file_name(frame));
        image::save_buffer(
            &path,
            frame.frame.as_slice(),
            frame.frame.width(),
            frame.frame.height(),
            image::ColorType::Rgb8,
        )?;
        Ok(path)
    }
}

#[async_trait]
impl Subscriber<VideoFrame> for SnapshotSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "snapshot_sink_send", skip(self, frame), fields(sink = %self.name, pts = frame.pts))]
    async fn send(&mut self, frame: &VideoFrame) -> Result<(), ContractError> {
        self.received += 1;
        if !(self.received - 1).is_multiple_of(self.config.every_n) {
            return Ok(());
        }

        let path = self.save(frame).map_err(|e| {
            error!(sink = %self.name, pts = frame.pts, error = %e, "Snapshot write failed");
            ContractError::subscriber_send(&self.name, e.to_string())
        })?;
        self.written += 1;
        debug!(sink = %self.name, path = %path.display(), "Snapshot written");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(sink = %self.name, written = self.written, "SnapshotSink closed");
        Ok(())
    }
}
