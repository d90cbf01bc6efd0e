use std::sync::{Mutex, MutexGuard, PoisonError};

use image::{GrayImage, RgbImage};

use super::converter::{self, DepthScale};
use crate::{
    error::{Result, SensorError},
    types::{ImageFormat, RawFrame, Resolution, StreamKind},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub depth: u64,
    pub label: u64,
    pub rgb: u64,
}

#[derive(Debug)]
struct Slot<I> {
    image: I,
    valid: bool,
}

impl<I> Slot<I> {
    fn new(image: I) -> Self {
        Self { image, valid: false }
    }
}

#[derive(Debug)]
struct CacheState {
    raw: RawFrame,
    frame: u64,
    depth: Slot<GrayImage>,
    label: Slot<GrayImage>,
    rgb: Slot<RgbImage>,
    stats: ConversionStats,
}

#[derive(Debug)]
pub struct FrameCache {
    resolution: Resolution,
    image_format: ImageFormat,
    scale: DepthScale,
    state: Mutex<CacheState>,
}

impl FrameCache {
    pub fn new(resolution: Resolution, image_format: ImageFormat, scale: DepthScale) -> Self {
        let Resolution { width, height } = resolution;
        let state = CacheState {
            raw: RawFrame::new(resolution, image_format),
            frame: 0,
            depth: Slot::new(GrayImage::new(width, height)),
            label: Slot::new(GrayImage::new(width, height)),
            rgb: Slot::new(RgbImage::new(width, height)),
            stats: ConversionStats::default(),
        };

        Self {
            resolution,
            image_format,
            scale,
            state: Mutex::new(state),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn image_format(&self) -> ImageFormat {
        self.image_format
    }

    pub fn depth_scale(&self) -> DepthScale {
        self.scale
    }

    pub fn staging_frame(&self) -> RawFrame {
        RawFrame::new(self.resolution, self.image_format)
    }

    // A panic inside a conversion leaves at most one slot marked invalid.
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap `staging` in as the current raw frame and invalidate every output.
    ///
    /// On return `staging` holds the previous frame's buffers, ready to be
    /// refilled. Returns the new frame number, starting at 1.
    pub fn publish(&self, staging: &mut RawFrame) -> Result<u64> {
        if staging.resolution != self.resolution {
            return Err(SensorError::ResolutionDrift {
                stream: StreamKind::Depth,
                expected: self.resolution,
                actual: staging.resolution,
            });
        }
        let pixels = self.resolution.pixel_count();
        let checks = [
            (StreamKind::Depth, staging.depth.len(), pixels),
            (StreamKind::User, staging.label.len(), pixels),
            (
                StreamKind::Image,
                staging.image.len(),
                self.image_format.frame_len(self.resolution),
            ),
        ];
        for (stream, got, expected) in checks {
            if got != expected {
                return Err(SensorError::BufferSize {
                    stream,
                    got,
                    expected,
                });
            }
        }

        let mut state = self.state();
        std::mem::swap(&mut state.raw, staging);
        state.frame += 1;
        state.depth.valid = false;
        state.label.valid = false;
        state.rgb.valid = false;
        Ok(state.frame)
    }

    pub fn invalidate(&self) {
        let mut state = self.state();
        state.depth.valid = false;
        state.label.valid = false;
        state.rgb.valid = false;
    }

    // Number of the frame currently held, 0 before the first publish.
    pub fn frame(&self) -> u64 {
        self.state().frame
    }

    pub fn stats(&self) -> ConversionStats {
        self.state().stats
    }

    pub fn with_depth<R>(&self, f: impl FnOnce(&GrayImage) -> R) -> Result<R> {
        let mut guard = self.state();
        let state = &mut *guard;
        if !state.depth.valid {
            converter::depth_to_gray(
                &state.raw.depth,
                &mut *state.depth.image,
                self.resolution,
                self.scale,
            )?;
            state.depth.valid = true;
            state.stats.depth += 1;
        }
        Ok(f(&state.depth.image))
    }

    pub fn with_label<R>(&self, f: impl FnOnce(&GrayImage) -> R) -> Result<R> {
        let mut guard = self.state();
        let state = &mut *guard;
        if !state.label.valid {
            converter::label_to_gray(&state.raw.label, &mut *state.label.image, self.resolution)?;
            state.label.valid = true;
            state.stats.label += 1;
        }
        Ok(f(&state.label.image))
    }

    pub fn with_rgb<R>(&self, f: impl FnOnce(&RgbImage) -> R) -> Result<R> {
        let mut guard = self.state();
        let state = &mut *guard;
        if !state.rgb.valid {
            converter::image_to_rgb(
                &state.raw.image,
                state.raw.image_format,
                &mut *state.rgb.image,
                self.resolution,
            )?;
            state.rgb.valid = true;
            state.stats.rgb += 1;
        }
        Ok(f(&state.rgb.image))
    }

    pub fn depth_image(&self) -> Result<GrayImage> {
        self.with_depth(GrayImage::clone)
    }

    pub fn label_image(&self) -> Result<GrayImage> {
        self.with_label(GrayImage::clone)
    }

    pub fn rgb_image(&self) -> Result<RgbImage> {
        self.with_rgb(RgbImage::clone)
    }
}
