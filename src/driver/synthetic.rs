use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use super::{
    CalibrationStatus, ImageView, MapView, SensorDriver, SkeletonCapability, SkeletonProfile,
    UserCallback, UserEvent, WaitAbort,
};
use crate::{
    error::DriverError,
    pipeline::skeleton::{Joint, JointPosition},
    types::{ImageFormat, MapOutputMode, Point3, Resolution, StreamKind, UserId},
};

const USER: UserId = 1;
const FIGURE_DEPTH_MM: u16 = 1_500;
const FLOOR_NEAR_MM: u16 = 2_500;
const FLOOR_FAR_MM: u16 = 4_500;
// Focal length of a 640 px wide depth camera.
const FOCAL_PX_AT_640: f32 = 525.0;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub resolution: Resolution,
    pub fps: u32,
    pub image_format: ImageFormat,
    // Frame number at which the figure is detected as a user.
    pub user_appears_after: Option<u64>,
    // Frame number at which the user is lost again.
    pub user_leaves_after: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(640, 480),
            fps: 30,
            image_format: ImageFormat::Rgb24,
            user_appears_after: Some(15),
            user_leaves_after: None,
        }
    }
}

#[derive(Debug)]
struct SyntheticAbort {
    aborted: AtomicBool,
    tx: Sender<()>,
}

impl WaitAbort for SyntheticAbort {
    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        let _ = self.tx.try_send(());
    }
}

pub struct SyntheticDriver {
    config: SyntheticConfig,
    interval: Duration,
    abort: Arc<SyntheticAbort>,
    abort_rx: Receiver<()>,
    callback: Option<UserCallback>,
    frame: u64,
    user_present: bool,
    calibration_pending: Vec<UserId>,
    tracking: HashSet<UserId>,
    profile: SkeletonProfile,
    smoothing: f32,
    center: (f32, f32),
    radius: f32,
    depth: Vec<u16>,
    label: Vec<u16>,
    image: Vec<u8>,
}

impl SyntheticDriver {
    pub fn new(config: SyntheticConfig) -> Self {
        if !config.image_format.supports(config.resolution) {
            log::warn!(
                "{:?} needs an even width, {} frames are misaligned",
                config.image_format,
                config.resolution
            );
        }
        let (tx, abort_rx) = bounded(1);
        let pixels = config.resolution.pixel_count();
        let interval = Duration::from_secs_f64(1.0 / f64::from(config.fps.max(1)));
        let Resolution { width, height } = config.resolution;

        Self {
            interval,
            abort: Arc::new(SyntheticAbort {
                aborted: AtomicBool::new(false),
                tx,
            }),
            abort_rx,
            callback: None,
            frame: 0,
            user_present: false,
            calibration_pending: Vec::new(),
            tracking: HashSet::new(),
            profile: SkeletonProfile::None,
            smoothing: 0.0,
            center: (width as f32 / 2.0, height as f32 / 2.0),
            radius: height as f32 / 6.0,
            depth: vec![0; pixels],
            label: vec![0; pixels],
            image: vec![0; config.image_format.frame_len(config.resolution)],
            config,
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn profile(&self) -> SkeletonProfile {
        self.profile
    }

    fn emit(&self, event: UserEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    fn focal(&self) -> f32 {
        FOCAL_PX_AT_640 * self.config.resolution.width as f32 / 640.0
    }

    fn advance(&mut self) {
        self.frame += 1;

        if self.config.user_appears_after == Some(self.frame) {
            self.user_present = true;
            self.emit(UserEvent::NewUser(USER));
        }
        if self.config.user_leaves_after == Some(self.frame) && self.user_present {
            self.user_present = false;
            self.tracking.remove(&USER);
            self.calibration_pending.clear();
            self.emit(UserEvent::UserLost(USER));
        }
        for user in std::mem::take(&mut self.calibration_pending) {
            self.emit(UserEvent::CalibrationComplete {
                user,
                status: CalibrationStatus::Ok,
            });
        }

        let Resolution { width, height } = self.config.resolution;
        let phase = self.frame as f32 * 0.05;
        self.center = (
            width as f32 / 2.0 + width as f32 / 4.0 * phase.sin(),
            height as f32 / 2.0,
        );
        self.render();
    }

    fn render(&mut self) {
        let Resolution { width, height } = self.config.resolution;
        let (cx, cy) = self.center;
        let radius_sq = self.radius * self.radius;
        let format = self.config.image_format;
        let span = u32::from(FLOOR_FAR_MM - FLOOR_NEAR_MM);

        for y in 0..height {
            let floor_mm = FLOOR_FAR_MM - (span * y / height.max(1)) as u16;
            for x in 0..width {
                let idx = (y * width + x) as usize;
                let (dx, dy) = (x as f32 - cx, y as f32 - cy);
                let on_figure = dx * dx + dy * dy <= radius_sq;

                self.depth[idx] = if on_figure { FIGURE_DEPTH_MM } else { floor_mm };
                self.label[idx] = if on_figure && self.user_present { USER } else { 0 };

                let rgb = if on_figure {
                    [200, 80, 60]
                } else {
                    [(x * 255 / width) as u8, (y * 255 / height) as u8, 96]
                };
                write_pixel(&mut self.image, format, idx, rgb);
            }
        }
    }

    fn joint_layout(joint: Joint) -> (f32, f32) {
        match joint {
            Joint::Head => (0.0, -1.6),
            Joint::Neck => (0.0, -1.2),
            Joint::Torso => (0.0, -0.4),
            Joint::LeftShoulder => (-0.5, -1.1),
            Joint::LeftElbow => (-0.8, -0.6),
            Joint::LeftHand => (-1.0, -0.1),
            Joint::RightShoulder => (0.5, -1.1),
            Joint::RightElbow => (0.8, -0.6),
            Joint::RightHand => (1.0, -0.1),
            Joint::LeftHip => (-0.3, 0.2),
            Joint::LeftKnee => (-0.35, 0.9),
            Joint::LeftFoot => (-0.4, 1.6),
            Joint::RightHip => (0.3, 0.2),
            Joint::RightKnee => (0.35, 0.9),
            Joint::RightFoot => (0.4, 1.6),
        }
    }
}

fn luma(rgb: [u8; 3]) -> u8 {
    ((u32::from(rgb[0]) * 77 + u32::from(rgb[1]) * 150 + u32::from(rgb[2]) * 29) >> 8) as u8
}

fn write_pixel(image: &mut [u8], format: ImageFormat, idx: usize, rgb: [u8; 3]) {
    match format {
        ImageFormat::Rgb24 => image[idx * 3..idx * 3 + 3].copy_from_slice(&rgb),
        ImageFormat::Gray8 => image[idx] = luma(rgb),
        ImageFormat::Yuv422 => {
            // U Y0 V Y1 with neutral chroma.
            let pair = (idx / 2) * 4;
            if pair + 3 >= image.len() {
                return;
            }
            let y_offset = if idx % 2 == 0 { 1 } else { 3 };
            image[pair] = 128;
            image[pair + 2] = 128;
            image[pair + y_offset] = luma(rgb);
        }
    }
}

impl SensorDriver for SyntheticDriver {
    fn stream_mode(&self, _stream: StreamKind) -> Option<MapOutputMode> {
        Some(MapOutputMode {
            resolution: self.config.resolution,
            fps: self.config.fps,
        })
    }

    fn image_format(&self) -> ImageFormat {
        self.config.image_format
    }

    fn wait_and_update(&mut self) -> Result<(), DriverError> {
        if self.abort.aborted.load(Ordering::SeqCst) {
            return Err(DriverError::Aborted);
        }
        match self.abort_rx.recv_timeout(self.interval) {
            Err(RecvTimeoutError::Timeout) => {
                self.advance();
                Ok(())
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => Err(DriverError::Aborted),
        }
    }

    fn depth_map(&self) -> Result<MapView<'_, u16>, DriverError> {
        Ok(MapView {
            resolution: self.config.resolution,
            data: &self.depth,
        })
    }

    fn label_map(&self) -> Result<MapView<'_, u16>, DriverError> {
        Ok(MapView {
            resolution: self.config.resolution,
            data: &self.label,
        })
    }

    fn image_map(&self) -> Result<ImageView<'_>, DriverError> {
        Ok(ImageView {
            resolution: self.config.resolution,
            format: self.config.image_format,
            data: &self.image,
        })
    }

    fn abort_handle(&self) -> Arc<dyn WaitAbort> {
        self.abort.clone()
    }

    fn set_user_callback(&mut self, callback: UserCallback) {
        self.callback = Some(callback);
    }

    fn skeleton(&mut self) -> Option<&mut dyn SkeletonCapability> {
        Some(self)
    }
}

impl SkeletonCapability for SyntheticDriver {
    fn set_profile(&mut self, profile: SkeletonProfile) {
        self.profile = profile;
    }

    fn set_smoothing(&mut self, factor: f32) {
        self.smoothing = factor.clamp(0.0, 1.0);
    }

    fn request_calibration(&mut self, user: UserId, _detect_pose: bool) {
        if self.user_present && user == USER && !self.calibration_pending.contains(&user) {
            self.calibration_pending.push(user);
        }
    }

    fn start_tracking(&mut self, user: UserId) {
        if self.user_present {
            self.tracking.insert(user);
        }
    }

    fn is_tracking(&self, user: UserId) -> bool {
        self.tracking.contains(&user)
    }

    fn joint_position(&self, user: UserId, joint: Joint) -> Option<JointPosition> {
        if !self.tracking.contains(&user) || !self.profile.includes(joint) {
            return None;
        }
        let (ox, oy) = Self::joint_layout(joint);
        let (cx, cy) = self.center;
        let u = cx + ox * self.radius;
        let v = cy + oy * self.radius;
        let z = f32::from(FIGURE_DEPTH_MM);

        // Invert the projection so callers get millimeters back.
        let Resolution { width, height } = self.config.resolution;
        let f = self.focal();
        let position = Point3::new(
            (u - width as f32 / 2.0) * z / f,
            (height as f32 / 2.0 - v) * z / f,
            z,
        );
        let confidence = match joint {
            Joint::LeftHand | Joint::RightHand => 0.4,
            _ => 1.0,
        };
        Some(JointPosition {
            position,
            confidence,
        })
    }

    fn real_world_to_projective(&self, point: Point3) -> Point3 {
        let Resolution { width, height } = self.config.resolution;
        let f = self.focal();
        Point3::new(
            width as f32 / 2.0 + point.x * f / point.z,
            height as f32 / 2.0 - point.y * f / point.z,
            point.z,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn small(format: ImageFormat) -> SyntheticConfig {
        SyntheticConfig {
            resolution: Resolution::new(32, 24),
            fps: 500,
            image_format: format,
            user_appears_after: Some(1),
            user_leaves_after: Some(3),
        }
    }

    #[test]
    fn buffers_follow_image_format() {
        for (format, len) in [
            (ImageFormat::Rgb24, 32 * 24 * 3),
            (ImageFormat::Gray8, 32 * 24),
            (ImageFormat::Yuv422, 32 * 24 * 2),
        ] {
            let mut driver = SyntheticDriver::new(small(format));
            driver.wait_and_update().unwrap();
            assert_eq!(driver.image_map().unwrap().data.len(), len);
            assert_eq!(driver.depth_map().unwrap().data.len(), 32 * 24);
        }
    }

    #[test]
    fn figure_is_nearer_than_floor() {
        let mut driver = SyntheticDriver::new(small(ImageFormat::Rgb24));
        driver.wait_and_update().unwrap();
        let depth = driver.depth_map().unwrap().data;
        assert!(depth.contains(&FIGURE_DEPTH_MM));
        assert!(depth.iter().all(|&d| d <= FLOOR_FAR_MM && d > 0));
        assert!(driver.label_map().unwrap().data.contains(&USER));
    }

    #[test]
    fn user_lifecycle_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut driver = SyntheticDriver::new(small(ImageFormat::Rgb24));
        let sink = seen.clone();
        driver.set_user_callback(Box::new(move |event| sink.lock().unwrap().push(event)));
        driver.set_profile(SkeletonProfile::All);

        driver.wait_and_update().unwrap();
        driver.request_calibration(USER, true);
        driver.wait_and_update().unwrap();
        driver.start_tracking(USER);
        assert!(driver.joint_position(USER, Joint::Head).is_some());
        driver.wait_and_update().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                UserEvent::NewUser(USER),
                UserEvent::CalibrationComplete {
                    user: USER,
                    status: CalibrationStatus::Ok
                },
                UserEvent::UserLost(USER),
            ]
        );
        assert!(!driver.is_tracking(USER));
        assert!(!driver.label_map().unwrap().data.contains(&USER));
    }

    #[test]
    fn projection_round_trips_joint_layout() {
        let mut driver = SyntheticDriver::new(small(ImageFormat::Rgb24));
        driver.set_profile(SkeletonProfile::All);
        driver.wait_and_update().unwrap();
        driver.start_tracking(USER);
        let torso = driver.joint_position(USER, Joint::Torso).unwrap();
        let projected = driver.real_world_to_projective(torso.position);
        let (cx, cy) = driver.center;
        assert!((projected.x - cx).abs() < 1e-3);
        assert!((projected.y - (cy - 0.4 * driver.radius)).abs() < 1e-3);
    }

    #[test]
    fn profile_limits_reported_joints() {
        let mut driver = SyntheticDriver::new(small(ImageFormat::Rgb24));
        driver.wait_and_update().unwrap();
        driver.start_tracking(USER);
        assert_eq!(driver.profile(), SkeletonProfile::None);
        assert!(driver.joint_position(USER, Joint::Head).is_none());

        driver.set_profile(SkeletonProfile::Upper);
        assert!(driver.joint_position(USER, Joint::RightHand).is_some());
        assert!(driver.joint_position(USER, Joint::LeftFoot).is_none());

        driver.set_profile(SkeletonProfile::HeadHands);
        assert!(driver.joint_position(USER, Joint::Head).is_some());
        assert!(driver.joint_position(USER, Joint::Torso).is_none());
    }

    #[test]
    fn abort_cuts_wait_short() {
        let mut driver = SyntheticDriver::new(SyntheticConfig {
            fps: 1,
            ..small(ImageFormat::Rgb24)
        });
        let handle = driver.abort_handle();
        handle.abort();
        let start = std::time::Instant::now();
        assert!(matches!(driver.wait_and_update(), Err(DriverError::Aborted)));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(driver.frame(), 0);
    }
}
