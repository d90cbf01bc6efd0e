use std::{
    path::Path,
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread,
};

use crossbeam_channel::{Receiver, unbounded};

use super::{
    converter::DepthScale,
    events::{EventHub, SensorEvent, Subscription},
    frame_cache::FrameCache,
    skeleton::{Skeleton, SkeletonStore, SkeletonTracker},
};
use crate::{
    config::SessionConfig,
    driver::{SensorDriver, UserEvent, WaitAbort},
    error::{DriverError, Result, SensorError},
    types::{ImageFormat, MapOutputMode, RawFrame, Resolution, StreamKind, UserId},
};

#[derive(Debug, Default)]
struct LoopFlags {
    running: bool,
    paused: bool,
}

#[derive(Debug, Default)]
struct LoopControl {
    flags: Mutex<LoopFlags>,
    wake: Condvar,
}

impl LoopControl {
    fn flags(&self) -> std::sync::MutexGuard<'_, LoopFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Park while paused. Returns whether the loop should keep running.
    fn wait_while_paused(&self) -> bool {
        let mut flags = self.flags();
        while flags.paused && flags.running {
            flags = self.wake.wait(flags).unwrap_or_else(PoisonError::into_inner);
        }
        flags.running
    }

    fn is_running(&self) -> bool {
        self.flags().running
    }

    fn is_paused(&self) -> bool {
        self.flags().paused
    }

    fn set_running(&self, running: bool) {
        self.flags().running = running;
        self.wake.notify_all();
    }

    fn set_paused(&self, paused: bool) {
        self.flags().paused = paused;
        self.wake.notify_all();
    }
}

struct Reader {
    driver: Box<dyn SensorDriver>,
    resolution: Resolution,
    staging: RawFrame,
    cache: Arc<FrameCache>,
    events: EventHub,
    tracker: SkeletonTracker,
    user_rx: Receiver<UserEvent>,
    control: Arc<LoopControl>,
}

impl Reader {
    fn run(mut self) -> Result<()> {
        log::info!("sensor reader started ({})", self.resolution);

        let result = self.run_loop();
        match &result {
            Ok(()) => log::info!("sensor reader stopped after {} frames", self.cache.frame()),
            Err(err) => {
                log::error!("sensor reader failed: {err}");
                self.events.publish(SensorEvent::Failed {
                    message: error_chain(err),
                });
            }
        }
        result
    }

    fn run_loop(&mut self) -> Result<()> {
        while self.control.wait_while_paused() {
            match self.driver.wait_and_update() {
                Ok(()) => {}
                Err(DriverError::Aborted) if !self.control.is_running() => {
                    log::info!("sensor reader interrupted");
                    return Ok(());
                }
                Err(err) => return Err(SensorError::Driver(err)),
            }

            // Disposal can race a wait that completed normally.
            if !self.control.is_running() {
                return Ok(());
            }

            self.capture()?;
            let frame = self.cache.publish(&mut self.staging)?;
            self.track_users();
            self.events.publish(SensorEvent::FrameUpdated { frame });
        }
        Ok(())
    }

    fn capture(&mut self) -> Result<()> {
        let expected = self.resolution;

        let depth = self.driver.depth_map().map_err(SensorError::Driver)?;
        check_resolution(StreamKind::Depth, expected, depth.resolution)?;
        copy_map(StreamKind::Depth, depth.data, &mut self.staging.depth)?;

        let image = self.driver.image_map().map_err(SensorError::Driver)?;
        check_resolution(StreamKind::Image, expected, image.resolution)?;
        copy_map(StreamKind::Image, image.data, &mut self.staging.image)?;

        let label = self.driver.label_map().map_err(SensorError::Driver)?;
        check_resolution(StreamKind::User, expected, label.resolution)?;
        copy_map(StreamKind::User, label.data, &mut self.staging.label)?;

        Ok(())
    }

    fn track_users(&mut self) {
        for event in self.user_rx.try_iter() {
            self.tracker.handle_event(event, self.driver.skeleton());
        }
        if let Some(capability) = self.driver.skeleton() {
            self.tracker.update(capability);
        }
    }
}

fn check_resolution(stream: StreamKind, expected: Resolution, actual: Resolution) -> Result<()> {
    if expected != actual {
        return Err(SensorError::ResolutionDrift {
            stream,
            expected,
            actual,
        });
    }
    Ok(())
}

fn copy_map<T: Copy>(stream: StreamKind, src: &[T], dst: &mut [T]) -> Result<()> {
    if src.len() != dst.len() {
        return Err(SensorError::BufferSize {
            stream,
            got: src.len(),
            expected: dst.len(),
        });
    }
    dst.copy_from_slice(src);
    Ok(())
}

fn error_chain(err: &SensorError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn log_user_event(event: &UserEvent) {
    match event {
        UserEvent::NewUser(user) => log::info!("[{user}] found"),
        UserEvent::UserLost(user) => log::info!("[{user}] lost"),
        UserEvent::CalibrationComplete { user, status } => {
            log::info!("[{user}] calibration status: {status:?}")
        }
    }
}

pub struct Sensor {
    config: SessionConfig,
    mode: MapOutputMode,
    image_format: ImageFormat,
    cache: Arc<FrameCache>,
    events: EventHub,
    skeletons: SkeletonStore,
    control: Arc<LoopControl>,
    abort: Arc<dyn WaitAbort>,
    reader: Option<Reader>,
    handle: Option<thread::JoinHandle<Result<()>>>,
    disposed: bool,
}

impl Sensor {
    pub fn open<D, F>(config: SessionConfig, open_driver: F) -> Result<Self>
    where
        D: SensorDriver,
        F: FnOnce(&Path) -> std::result::Result<D, DriverError>,
    {
        let path = config.config_path.as_path();
        if path.as_os_str().is_empty() {
            return Err(SensorError::EmptyConfigPath);
        }
        if !path.is_file() {
            return Err(SensorError::ConfigNotFound(path.to_path_buf()));
        }

        let driver = open_driver(path).map_err(SensorError::Open)?;
        log::info!("sensor session opened from {}", path.display());
        Self::new(driver, config)
    }

    pub fn new<D: SensorDriver>(mut driver: D, config: SessionConfig) -> Result<Self> {
        let depth = driver
            .stream_mode(StreamKind::Depth)
            .ok_or(SensorError::MissingStream(StreamKind::Depth))?;
        let image = driver
            .stream_mode(StreamKind::Image)
            .ok_or(SensorError::MissingStream(StreamKind::Image))?;
        driver
            .stream_mode(StreamKind::User)
            .ok_or(SensorError::MissingStream(StreamKind::User))?;

        if depth.fps != image.fps {
            return Err(SensorError::FrameRateMismatch {
                depth: depth.fps,
                image: image.fps,
            });
        }
        if depth.resolution != image.resolution {
            return Err(SensorError::ResolutionMismatch {
                depth: depth.resolution,
                image: image.resolution,
            });
        }

        let image_format = driver.image_format();
        if !image_format.supports(depth.resolution) {
            return Err(SensorError::UnsupportedImageLayout {
                format: image_format,
                resolution: depth.resolution,
            });
        }
        let cache = Arc::new(FrameCache::new(
            depth.resolution,
            image_format,
            DepthScale::new(config.max_depth_mm),
        ));
        let events = EventHub::new();

        if let Some(skeleton) = driver.skeleton() {
            SkeletonTracker::configure(skeleton, config.skeleton_smoothing);
        }

        let (user_tx, user_rx) = unbounded();
        let hub = events.clone();
        driver.set_user_callback(Box::new(move |event| {
            log_user_event(&event);
            hub.publish(event.into());
            let _ = user_tx.send(event);
        }));

        let control = Arc::new(LoopControl::default());
        control.set_paused(config.pause_initially);

        let tracker = SkeletonTracker::new(config.display_skeleton);
        let skeletons = tracker.store();
        let abort = driver.abort_handle();

        let reader = Reader {
            driver: Box::new(driver),
            resolution: depth.resolution,
            staging: cache.staging_frame(),
            cache: cache.clone(),
            events: events.clone(),
            tracker,
            user_rx,
            control: control.clone(),
        };

        log::info!(
            "sensor ready: {} @ {} fps, image {:?}",
            depth.resolution,
            depth.fps,
            image_format
        );

        Ok(Self {
            config,
            mode: depth,
            image_format,
            cache,
            events,
            skeletons,
            control,
            abort,
            reader: Some(reader),
            handle: None,
            disposed: false,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        if self.disposed {
            return Err(SensorError::Disposed);
        }
        let Some(reader) = self.reader.take() else {
            log::warn!("sensor reader already started");
            return Ok(());
        };

        self.control.set_running(true);
        let handle = thread::Builder::new()
            .name("sensor-reader".into())
            .spawn(move || reader.run())
            .map_err(|err| {
                self.control.set_running(false);
                SensorError::Spawn(err)
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn pause(&self, paused: bool) {
        log::debug!("sensor {}", if paused { "paused" } else { "resumed" });
        self.control.set_paused(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // Stop the reader, abort a pending wait and join the thread.
    // Returns the error that ended the reader, if any. Later calls return `Ok`.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        self.control.set_running(false);
        self.abort.abort();
        self.reader = None;

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(SensorError::WorkerPanicked),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn resolution(&self) -> Resolution {
        self.mode.resolution
    }

    pub fn frame_rate(&self) -> u32 {
        self.mode.fps
    }

    pub fn image_format(&self) -> ImageFormat {
        self.image_format
    }

    pub fn frame_cache(&self) -> Arc<FrameCache> {
        self.cache.clone()
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn skeletons(&self) -> Vec<(UserId, Skeleton)> {
        self.skeletons.snapshot()
    }

    pub fn skeleton_store(&self) -> SkeletonStore {
        self.skeletons.clone()
    }

    pub fn frames_acquired(&self) -> u64 {
        self.cache.frame()
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            log::error!("sensor reader exited with error: {}", error_chain(&err));
        }
    }
}
