pub mod config;
pub mod driver;
pub mod error;
pub mod pipeline;
pub mod types;

pub use config::SessionConfig;
pub use error::{DriverError, SensorError};
pub use pipeline::{FrameCache, Sensor, SensorEvent};
