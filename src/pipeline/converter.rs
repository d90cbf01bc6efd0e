use rayon::prelude::*;
use yuv::{YuvPackedImage, YuvRange, YuvStandardMatrix, uyvy422_to_rgb};

use crate::{
    error::{Result, SensorError},
    types::{ImageFormat, Resolution, StreamKind},
};

// `max_depth_mm` maps to 255; anything beyond it saturates. The default
// range of 10 m matches a divisor of 39.2157 mm per gray level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthScale {
    max_depth_mm: u16,
}

impl DepthScale {
    pub fn new(max_depth_mm: u16) -> Self {
        Self {
            max_depth_mm: max_depth_mm.max(1),
        }
    }

    pub fn max_depth_mm(&self) -> u16 {
        self.max_depth_mm
    }

    pub fn divisor(&self) -> f32 {
        f32::from(self.max_depth_mm) / 255.0
    }

    #[inline]
    pub fn apply(&self, depth: u16) -> u8 {
        (u32::from(depth) * 255 / u32::from(self.max_depth_mm)).min(255) as u8
    }
}

impl Default for DepthScale {
    fn default() -> Self {
        Self::new(10_000)
    }
}

fn check_len(stream: StreamKind, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(SensorError::BufferSize {
            stream,
            got,
            expected,
        });
    }
    Ok(())
}

pub fn depth_to_gray(
    src: &[u16],
    dst: &mut [u8],
    resolution: Resolution,
    scale: DepthScale,
) -> Result<()> {
    let pixels = resolution.pixel_count();
    check_len(StreamKind::Depth, src.len(), pixels)?;
    check_len(StreamKind::Depth, dst.len(), pixels)?;

    dst.par_iter_mut()
        .zip(src.par_iter())
        .for_each(|(out, &depth)| *out = scale.apply(depth));

    Ok(())
}

pub fn label_to_gray(src: &[u16], dst: &mut [u8], resolution: Resolution) -> Result<()> {
    let pixels = resolution.pixel_count();
    check_len(StreamKind::User, src.len(), pixels)?;
    check_len(StreamKind::User, dst.len(), pixels)?;

    dst.par_iter_mut()
        .zip(src.par_iter())
        .for_each(|(out, &label)| *out = label as u8);

    Ok(())
}

pub fn image_to_rgb(
    src: &[u8],
    format: ImageFormat,
    dst: &mut [u8],
    resolution: Resolution,
) -> Result<()> {
    check_len(StreamKind::Image, src.len(), format.frame_len(resolution))?;
    check_len(StreamKind::Image, dst.len(), resolution.pixel_count() * 3)?;

    match format {
        ImageFormat::Rgb24 => dst.copy_from_slice(src),
        ImageFormat::Gray8 => gray_to_rgb(src, dst),
        ImageFormat::Yuv422 => uyvy_to_rgb(src, dst, resolution)?,
    }

    Ok(())
}

fn gray_to_rgb(src: &[u8], dst: &mut [u8]) {
    dst.par_chunks_exact_mut(3)
        .zip(src.par_iter().copied())
        .for_each(|(out, value)| {
            out[0] = value;
            out[1] = value;
            out[2] = value;
        });
}

fn uyvy_to_rgb(src: &[u8], dst: &mut [u8], resolution: Resolution) -> Result<()> {
    if !ImageFormat::Yuv422.supports(resolution) {
        return Err(SensorError::UnsupportedImageLayout {
            format: ImageFormat::Yuv422,
            resolution,
        });
    }
    let Resolution { width, height } = resolution;
    let packed = YuvPackedImage {
        yuy: src,
        yuy_stride: width * 2,
        width,
        height,
    };

    uyvy422_to_rgb(
        &packed,
        dst,
        width * 3,
        YuvRange::Limited,
        YuvStandardMatrix::Bt601,
    )
    .map_err(|err| SensorError::Conversion(format!("UYVY→RGB: {err:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_scale_endpoints() {
        let scale = DepthScale::new(10_000);
        assert_eq!(scale.apply(0), 0);
        assert_eq!(scale.apply(10_000), 255);
        assert_eq!(scale.apply(u16::MAX), 255);
        assert!((scale.divisor() - 39.2157).abs() < 1e-3);
    }

    #[test]
    fn depth_scale_truncates() {
        let scale = DepthScale::new(10_000);
        for depth in (0..=10_000u16).step_by(97) {
            let expected = (f64::from(depth) * 255.0 / 10_000.0).floor() as u8;
            assert_eq!(scale.apply(depth), expected, "depth {depth}");
        }
    }

    #[test]
    fn zero_range_does_not_divide_by_zero() {
        let scale = DepthScale::new(0);
        assert_eq!(scale.max_depth_mm(), 1);
        assert_eq!(scale.apply(0), 0);
        assert_eq!(scale.apply(1), 255);
    }

    #[test]
    fn converts_depth_frame() {
        let res = Resolution::new(2, 2);
        let src = [0u16, 1960, 3920, 65535];
        let mut dst = [0u8; 4];
        depth_to_gray(&src, &mut dst, res, DepthScale::default()).unwrap();
        assert_eq!(dst, [0, 49, 99, 255]);
    }

    #[test]
    fn label_keeps_low_byte() {
        let res = Resolution::new(5, 1);
        let src = [0u16, 1, 255, 256, 65535];
        let mut dst = [0u8; 5];
        label_to_gray(&src, &mut dst, res).unwrap();
        assert_eq!(dst, [0, 1, 255, 0, 255]);
    }

    #[test]
    fn rgb_is_identity() {
        let res = Resolution::new(2, 1);
        let src = [1u8, 2, 3, 250, 251, 252];
        let mut dst = [0u8; 6];
        image_to_rgb(&src, ImageFormat::Rgb24, &mut dst, res).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn gray_image_is_replicated() {
        let res = Resolution::new(2, 1);
        let mut dst = [0u8; 6];
        image_to_rgb(&[7, 200], ImageFormat::Gray8, &mut dst, res).unwrap();
        assert_eq!(dst, [7, 7, 7, 200, 200, 200]);
    }

    #[test]
    fn uyvy_with_neutral_chroma_is_gray() {
        let res = Resolution::new(2, 2);
        // U Y0 V Y1 per pixel pair, mid gray.
        let src = [128u8, 126, 128, 126, 128, 126, 128, 126];
        let mut dst = [0u8; 12];
        image_to_rgb(&src, ImageFormat::Yuv422, &mut dst, res).unwrap();
        for px in dst.chunks_exact(3) {
            assert!(px[0].abs_diff(px[1]) <= 2 && px[1].abs_diff(px[2]) <= 2, "{px:?}");
            assert!((120..=136).contains(&px[0]), "{px:?}");
        }
    }

    #[test]
    fn uyvy_rejects_odd_width() {
        let res = Resolution::new(3, 2);
        let mut dst = [0u8; 18];
        let err = image_to_rgb(&[128u8; 12], ImageFormat::Yuv422, &mut dst, res).unwrap_err();
        assert!(matches!(err, SensorError::UnsupportedImageLayout { .. }));
    }

    #[test]
    fn short_buffers_are_rejected() {
        let res = Resolution::new(2, 2);
        let mut dst = [0u8; 4];
        let err = depth_to_gray(&[0u16; 3], &mut dst, res, DepthScale::default()).unwrap_err();
        assert!(matches!(
            err,
            SensorError::BufferSize {
                stream: StreamKind::Depth,
                got: 3,
                expected: 4
            }
        ));

        let mut rgb = [0u8; 12];
        let err = image_to_rgb(&[0u8; 11], ImageFormat::Rgb24, &mut rgb, res).unwrap_err();
        assert!(matches!(err, SensorError::BufferSize { expected: 12, .. }));
    }
}
