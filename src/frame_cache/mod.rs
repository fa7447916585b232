//! Frame Cache - Image Normalization & Persistence
//!
//! ## Responsibilities
//!
//! - Validate that an ingested frame decodes as an image
//! - Normalize frames to RGB8 JPEG (alpha flattened)
//! - Optionally persist received frames to disk with timestamped names

use crate::error::{Error, Result};
use chrono::Utc;
use image::ImageFormat;
use std::io::Cursor;
use std::path::PathBuf;

pub struct FrameCache {
    save_frames: bool,
    frame_dir: PathBuf,
}

impl FrameCache {
    pub fn new(save_frames: bool, frame_dir: PathBuf) -> Self {
        Self {
            save_frames,
            frame_dir,
        }
    }

    /// Create the frame directory when persistence is enabled
    pub async fn init(&self) -> Result<()> {
        if self.save_frames {
            tokio::fs::create_dir_all(&self.frame_dir).await?;
            tracing::info!(frame_dir = %self.frame_dir.display(), "Frame persistence enabled");
        }
        Ok(())
    }

    /// Decode-check a frame and normalize it to RGB8 JPEG.
    ///
    /// Undecodable bytes are a validation error; the workflow short-circuits
    /// before any classifier call.
    pub fn normalize(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| Error::Validation(format!("failed to load image: {}", e)))?;

        // Flatten any alpha channel; JPEG has none
        let rgb = decoded.to_rgb8();

        let mut out = Cursor::new(Vec::new());
        rgb.write_to(&mut out, ImageFormat::Jpeg)
            .map_err(|e| Error::Validation(format!("failed to re-encode image: {}", e)))?;

        Ok(out.into_inner())
    }

    /// Persist a normalized frame if persistence is on; returns the path
    pub async fn persist(&self, jpeg: &[u8]) -> Result<Option<PathBuf>> {
        if !self.save_frames {
            return Ok(None);
        }

        let filename = format!("frame_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S_%f"));
        let path = self.frame_dir.join(filename);
        tokio::fs::write(&path, jpeg).await?;

        tracing::debug!(path = %path.display(), bytes = jpeg.len(), "Frame persisted");
        Ok(Some(path))
    }
}
