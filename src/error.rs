use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ImageFormat, Resolution, StreamKind};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("wait for next frame was aborted")]
    Aborted,
    #[error("{0}")]
    Native(String),
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("no sensor config path given")]
    EmptyConfigPath,
    #[error("config file '{}' does not exist", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("failed to open sensor session")]
    Open(#[source] DriverError),
    #[error("no {0} node found")]
    MissingStream(StreamKind),
    #[error("depth and image node must have common framerates (depth {depth}, image {image})")]
    FrameRateMismatch { depth: u32, image: u32 },
    #[error("depth and image node must have common resolutions (depth {depth}, image {image})")]
    ResolutionMismatch {
        depth: Resolution,
        image: Resolution,
    },
    #[error("{format:?} image stream does not support {resolution} (width must be even)")]
    UnsupportedImageLayout {
        format: ImageFormat,
        resolution: Resolution,
    },
    #[error("{stream} resolution must not change: session is {expected}, frame is {actual}")]
    ResolutionDrift {
        stream: StreamKind,
        expected: Resolution,
        actual: Resolution,
    },
    #[error("{stream} buffer has wrong size: got {got}, expected {expected}")]
    BufferSize {
        stream: StreamKind,
        got: usize,
        expected: usize,
    },
    #[error("image conversion failed: {0}")]
    Conversion(String),
    #[error("error while processing sensor data")]
    Driver(#[source] DriverError),
    #[error("failed to spawn sensor reader thread")]
    Spawn(#[source] std::io::Error),
    #[error("sensor has been disposed")]
    Disposed,
    #[error("sensor reader thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, SensorError>;
