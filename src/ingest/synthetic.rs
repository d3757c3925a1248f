//! Synthetic source (stub://) for demos and tests.

use anyhow::Result;
use std::time::Instant;

use super::{frame_interval, FrameSource, SourceConfig};
use crate::frame::RawFrame;

/// Generates frames at the configured resolution and fps.
///
/// The scene is a static gradient with a bright square that drifts across
/// the image, so successive frames differ.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        log::info!(
            "SyntheticSource: {} at {}x{} ({} fps)",
            config.url,
            config.width,
            config.height,
            config.fps
        );
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut pixels = vec![0u8; width * height * 3];

        let square = (height / 6).max(1);
        let travel = width.saturating_sub(square).max(1);
        let square_x = (self.frame_count as usize * 4) % travel;
        let square_y = height.saturating_sub(square) / 2;

        for y in 0..height {
            for x in 0..width {
                let i = (y * width + x) * 3;
                let inside = x >= square_x
                    && x < square_x + square
                    && y >= square_y
                    && y < square_y + square;
                if inside {
                    pixels[i..i + 3].copy_from_slice(&[240, 240, 240]);
                } else {
                    pixels[i] = (x * 255 / width.max(1)) as u8;
                    pixels[i + 1] = (y * 255 / height.max(1)) as u8;
                    pixels[i + 2] = 64;
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.config.width == 0 || self.config.height == 0 {
            None
        } else {
            Some((self.config.width, self.config.height))
        }
    }

    fn is_ready(&self, now: Instant) -> bool {
        if self.dimensions().is_none() {
            return false;
        }
        match self.last_frame_at {
            Some(last) => now.saturating_duration_since(last) >= frame_interval(self.config.fps),
            None => true,
        }
    }

    fn take_frame(&mut self, now: Instant) -> Result<Option<RawFrame>> {
        if !self.is_ready(now) {
            return Ok(None);
        }
        let pixels = self.generate_pixels();
        self.frame_count += 1;
        self.last_frame_at = Some(now);
        Ok(Some(RawFrame::new(
            pixels,
            self.config.width,
            self.config.height,
        )?))
    }

    fn describe(&self) -> String {
        format!("{} (synthetic)", self.config.url)
    }
}
