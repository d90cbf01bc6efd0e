pub mod synthetic;

use std::sync::Arc;

use crate::{
    error::DriverError,
    pipeline::skeleton::{Joint, JointPosition},
    types::{ImageFormat, MapOutputMode, Point3, Resolution, StreamKind, UserId},
};

pub use synthetic::{SyntheticConfig, SyntheticDriver};

#[derive(Clone, Copy, Debug)]
pub struct MapView<'a, T> {
    pub resolution: Resolution,
    pub data: &'a [T],
}

#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    pub resolution: Resolution,
    pub format: ImageFormat,
    pub data: &'a [u8],
}

// Cuts a pending [`SensorDriver::wait_and_update`] short. Called from the
// owning thread while the reader thread may be blocked in the driver.
pub trait WaitAbort: Send + Sync {
    fn abort(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationStatus {
    Ok,
    NoUser,
    ArmFailed,
    LegFailed,
    HeadFailed,
    TorsoFailed,
    TopFov,
    SideFov,
    Pose,
    ManualAbort,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserEvent {
    NewUser(UserId),
    UserLost(UserId),
    CalibrationComplete {
        user: UserId,
        status: CalibrationStatus,
    },
}

pub type UserCallback = Box<dyn Fn(UserEvent) + Send + Sync>;

// Which joints the native tracker reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SkeletonProfile {
    #[default]
    None,
    All,
    Upper,
    Lower,
    HeadHands,
}

impl SkeletonProfile {
    pub fn includes(&self, joint: Joint) -> bool {
        use Joint::*;
        match self {
            SkeletonProfile::None => false,
            SkeletonProfile::All => true,
            SkeletonProfile::Upper => matches!(
                joint,
                Head | Neck
                    | Torso
                    | LeftShoulder
                    | LeftElbow
                    | LeftHand
                    | RightShoulder
                    | RightElbow
                    | RightHand
            ),
            SkeletonProfile::Lower => matches!(
                joint,
                Torso | LeftHip | LeftKnee | LeftFoot | RightHip | RightKnee | RightFoot
            ),
            SkeletonProfile::HeadHands => matches!(joint, Head | LeftHand | RightHand),
        }
    }
}

pub trait SkeletonCapability {
    fn set_profile(&mut self, profile: SkeletonProfile);
    fn set_smoothing(&mut self, factor: f32);
    fn request_calibration(&mut self, user: UserId, detect_pose: bool);
    fn start_tracking(&mut self, user: UserId);
    fn is_tracking(&self, user: UserId) -> bool;
    // Real-world position of `joint`, in millimeters.
    fn joint_position(&self, user: UserId, joint: Joint) -> Option<JointPosition>;
    fn real_world_to_projective(&self, point: Point3) -> Point3;
}

pub trait SensorDriver: Send + 'static {
    fn stream_mode(&self, stream: StreamKind) -> Option<MapOutputMode>;

    fn image_format(&self) -> ImageFormat {
        ImageFormat::Rgb24
    }

    // Block until every stream has a new frame. Returns
    // [`DriverError::Aborted`] when woken through the abort handle.
    fn wait_and_update(&mut self) -> Result<(), DriverError>;

    fn depth_map(&self) -> Result<MapView<'_, u16>, DriverError>;

    fn label_map(&self) -> Result<MapView<'_, u16>, DriverError>;

    fn image_map(&self) -> Result<ImageView<'_>, DriverError>;

    fn abort_handle(&self) -> Arc<dyn WaitAbort>;

    // Install the callback for user events. Drivers may invoke it from any
    // thread, typically from inside `wait_and_update`.
    fn set_user_callback(&mut self, callback: UserCallback);

    fn skeleton(&mut self) -> Option<&mut dyn SkeletonCapability> {
        None
    }
}
