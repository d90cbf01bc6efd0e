use std::{fmt, str::FromStr};

use serde::Deserialize;

pub type UserId = u16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapOutputMode {
    pub resolution: Resolution,
    pub fps: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Depth,
    Image,
    User,
}

impl StreamKind {
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Depth => "depth",
            StreamKind::Image => "image",
            StreamKind::User => "user",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    #[default]
    Rgb24,
    Gray8,
    // Packed 4:2:2 in U Y0 V Y1 order.
    Yuv422,
}

impl ImageFormat {
    pub fn frame_len(&self, resolution: Resolution) -> usize {
        let pixels = resolution.pixel_count();
        match self {
            ImageFormat::Rgb24 => pixels * 3,
            ImageFormat::Gray8 => pixels,
            ImageFormat::Yuv422 => pixels * 2,
        }
    }
}

impl ImageFormat {
    // Packed 4:2:2 stores two pixels per macropixel, so rows must pair up.
    pub fn supports(&self, resolution: Resolution) -> bool {
        match self {
            ImageFormat::Yuv422 => resolution.width % 2 == 0,
            ImageFormat::Rgb24 | ImageFormat::Gray8 => true,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb24" | "rgb" => Ok(ImageFormat::Rgb24),
            "gray8" | "gray" => Ok(ImageFormat::Gray8),
            "yuv422" | "uyvy" => Ok(ImageFormat::Yuv422),
            other => Err(format!("unknown image format '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Clone, Debug)]
pub struct RawFrame {
    pub resolution: Resolution,
    pub image_format: ImageFormat,
    // Millimeters per pixel, 0 where the sensor got no return.
    pub depth: Vec<u16>,
    // User id per pixel, 0 for background.
    pub label: Vec<u16>,
    pub image: Vec<u8>,
}

impl RawFrame {
    pub fn new(resolution: Resolution, image_format: ImageFormat) -> Self {
        let pixels = resolution.pixel_count();
        Self {
            resolution,
            image_format,
            depth: vec![0; pixels],
            label: vec![0; pixels],
            image: vec![0; image_format.frame_len(resolution)],
        }
    }
}
