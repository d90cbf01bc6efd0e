pub mod converter;
pub mod events;
pub mod frame_cache;
pub mod sensor;
pub mod skeleton;

// Re-exports for convenience
pub use converter::DepthScale;
pub use events::{EventHub, SensorEvent, Subscription};
pub use frame_cache::{ConversionStats, FrameCache};
pub use sensor::Sensor;
pub use skeleton::{BONES, Joint, JointPosition, Skeleton, SkeletonStore, bone_is_confident};
