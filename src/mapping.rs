//! Processing-space to display-space coordinate mapping.
//!
//! The camera image is shown cover-fit inside a container whose aspect
//! ratio usually differs from the camera's: it is scaled until it covers
//! the container and the overflow on one axis is cropped symmetrically.
//! Detection boxes come back in 640x480 processing space, so mapping them
//! onto the screen needs that crop's scale and offset.
//!
//! The fit depends only on the true camera resolution and the container
//! size. `CoordinateMapper` recomputes it when either changes and reuses it
//! for every box in between.

use serde::Serialize;

use crate::decode::BoundingBox;
use crate::frame::{PROCESSING_HEIGHT, PROCESSING_WIDTH};

/// Camera and container sizes that determine the fit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    /// True camera width (not the processing width).
    pub source_width: f64,
    pub source_height: f64,
    pub container_width: f64,
    pub container_height: f64,
}

impl Viewport {
    pub fn new(source: (u32, u32), container: (u32, u32)) -> Self {
        Self {
            source_width: source.0 as f64,
            source_height: source.1 as f64,
            container_width: container.0 as f64,
            container_height: container.1 as f64,
        }
    }

    fn is_valid(&self) -> bool {
        [
            self.source_width,
            self.source_height,
            self.container_width,
            self.container_height,
        ]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0)
    }
}

/// Scale and offset of a cover-fit render.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoverFit {
    pub rendered_width: f64,
    pub rendered_height: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl CoverFit {
    /// Compute the fit, or `None` when any dimension is zero or invalid.
    pub fn compute(viewport: &Viewport) -> Option<Self> {
        if !viewport.is_valid() {
            return None;
        }
        let video_aspect = viewport.source_width / viewport.source_height;
        let container_aspect = viewport.container_width / viewport.container_height;

        let (rendered_width, rendered_height) = if video_aspect > container_aspect {
            // Wider than the container: crop left and right.
            (
                viewport.container_height * video_aspect,
                viewport.container_height,
            )
        } else {
            // Taller (or equal): crop top and bottom.
            (
                viewport.container_width,
                viewport.container_width / video_aspect,
            )
        };

        Some(Self {
            rendered_width,
            rendered_height,
            scale_x: rendered_width / PROCESSING_WIDTH as f64,
            scale_y: rendered_height / PROCESSING_HEIGHT as f64,
            offset_x: -(rendered_width - viewport.container_width) / 2.0,
            offset_y: -(rendered_height - viewport.container_height) / 2.0,
        })
    }

    pub fn map(&self, bbox: &BoundingBox) -> DisplayRect {
        DisplayRect {
            left: bbox.left * self.scale_x + self.offset_x,
            top: bbox.top * self.scale_y + self.offset_y,
            width: bbox.width() * self.scale_x,
            height: bbox.height() * self.scale_y,
        }
    }
}

/// Screen-space rectangle in container pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DisplayRect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

/// Holds the current fit and recomputes it only when the viewport changes.
#[derive(Debug, Default)]
pub struct CoordinateMapper {
    viewport: Option<Viewport>,
    fit: Option<CoverFit>,
    recomputations: u64,
}

impl CoordinateMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the viewport. Returns true if the fit was recomputed.
    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        if self.viewport == Some(viewport) {
            return false;
        }
        self.viewport = Some(viewport);
        self.fit = CoverFit::compute(&viewport);
        self.recomputations += 1;
        if let Some(fit) = &self.fit {
            log::debug!(
                "mapper: {}x{} in {}x{} -> scale {:.3}x{:.3} offset {:.1},{:.1}",
                viewport.source_width,
                viewport.source_height,
                viewport.container_width,
                viewport.container_height,
                fit.scale_x,
                fit.scale_y,
                fit.offset_x,
                fit.offset_y
            );
        }
        true
    }

    /// Convenience for callers holding integer sizes.
    pub fn resize(&mut self, source: (u32, u32), container: (u32, u32)) -> bool {
        self.set_viewport(Viewport::new(source, container))
    }

    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    /// Map a box, or `None` while the viewport is unknown or degenerate.
    pub fn map(&self, bbox: &BoundingBox) -> Option<DisplayRect> {
        self.fit.as_ref().map(|fit| fit.map(bbox))
    }
}
