use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    driver::{CalibrationStatus, SkeletonCapability, SkeletonProfile, UserEvent},
    types::{Point3, UserId},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Joint {
    Head = 0,
    Neck = 1,
    Torso = 2,
    LeftShoulder = 3,
    LeftElbow = 4,
    LeftHand = 5,
    RightShoulder = 6,
    RightElbow = 7,
    RightHand = 8,
    LeftHip = 9,
    LeftKnee = 10,
    LeftFoot = 11,
    RightHip = 12,
    RightKnee = 13,
    RightFoot = 14,
}

impl Joint {
    pub const COUNT: usize = 15;

    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::Head,
        Joint::Neck,
        Joint::Torso,
        Joint::LeftShoulder,
        Joint::LeftElbow,
        Joint::LeftHand,
        Joint::RightShoulder,
        Joint::RightElbow,
        Joint::RightHand,
        Joint::LeftHip,
        Joint::LeftKnee,
        Joint::LeftFoot,
        Joint::RightHip,
        Joint::RightKnee,
        Joint::RightFoot,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Joint::Head => "head",
            Joint::Neck => "neck",
            Joint::Torso => "torso",
            Joint::LeftShoulder => "left_shoulder",
            Joint::LeftElbow => "left_elbow",
            Joint::LeftHand => "left_hand",
            Joint::RightShoulder => "right_shoulder",
            Joint::RightElbow => "right_elbow",
            Joint::RightHand => "right_hand",
            Joint::LeftHip => "left_hip",
            Joint::LeftKnee => "left_knee",
            Joint::LeftFoot => "left_foot",
            Joint::RightHip => "right_hip",
            Joint::RightKnee => "right_knee",
            Joint::RightFoot => "right_foot",
        }
    }
}

// Joint pairs a renderer connects with a line, 16 bones in total.
pub const BONES: &[(Joint, Joint)] = &[
    (Joint::Head, Joint::Neck),
    (Joint::Neck, Joint::RightShoulder),
    (Joint::Neck, Joint::LeftShoulder),
    (Joint::RightShoulder, Joint::RightElbow),
    (Joint::LeftShoulder, Joint::LeftElbow),
    (Joint::RightElbow, Joint::RightHand),
    (Joint::LeftElbow, Joint::LeftHand),
    (Joint::RightShoulder, Joint::Torso),
    (Joint::LeftShoulder, Joint::Torso),
    (Joint::Torso, Joint::RightHip),
    (Joint::Torso, Joint::LeftHip),
    (Joint::RightHip, Joint::LeftHip),
    (Joint::RightHip, Joint::RightKnee),
    (Joint::LeftHip, Joint::LeftKnee),
    (Joint::RightKnee, Joint::RightFoot),
    (Joint::LeftKnee, Joint::LeftFoot),
];

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct JointPosition {
    pub position: Point3,
    pub confidence: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Skeleton {
    pub joints: [JointPosition; Joint::COUNT],
}

impl Skeleton {
    pub fn get(&self, joint: Joint) -> &JointPosition {
        &self.joints[joint as usize]
    }

    fn set(&mut self, joint: Joint, position: JointPosition) {
        self.joints[joint as usize] = position;
    }
}

pub fn bone_is_confident(skeleton: &Skeleton, bone: (Joint, Joint), threshold: f32) -> bool {
    let threshold = threshold.clamp(0.0, 1.0);
    skeleton.get(bone.0).confidence > threshold && skeleton.get(bone.1).confidence > threshold
}

#[derive(Clone, Debug, Default)]
pub struct SkeletonStore {
    inner: Arc<Mutex<HashMap<UserId, Skeleton>>>,
}

impl SkeletonStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Skeleton>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Vec<(UserId, Skeleton)> {
        let mut users: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, skeleton)| (*id, skeleton.clone()))
            .collect();
        users.sort_by_key(|(id, _)| *id);
        users
    }

    pub fn get(&self, user: UserId) -> Option<Skeleton> {
        self.lock().get(&user).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, user: UserId) {
        self.lock().insert(user, Skeleton::default());
    }

    fn remove(&self, user: UserId) -> bool {
        self.lock().remove(&user).is_some()
    }

    fn users(&self) -> Vec<UserId> {
        self.lock().keys().copied().collect()
    }

    fn update(&self, user: UserId, skeleton: Skeleton) {
        // A concurrent loss removes the entry; do not resurrect it.
        if let Some(slot) = self.lock().get_mut(&user) {
            *slot = skeleton;
        }
    }
}

#[derive(Debug)]
pub struct SkeletonTracker {
    display_skeleton: bool,
    store: SkeletonStore,
}

impl SkeletonTracker {
    pub fn new(display_skeleton: bool) -> Self {
        Self {
            display_skeleton,
            store: SkeletonStore::default(),
        }
    }

    pub fn store(&self) -> SkeletonStore {
        self.store.clone()
    }

    pub fn configure(capability: &mut dyn SkeletonCapability, smoothing: f32) {
        capability.set_profile(SkeletonProfile::All);
        capability.set_smoothing(smoothing);
    }

    pub fn handle_event(&mut self, event: UserEvent, capability: Option<&mut dyn SkeletonCapability>) {
        match event {
            UserEvent::NewUser(user) => {
                if !self.display_skeleton {
                    return;
                }
                if let Some(capability) = capability {
                    capability.request_calibration(user, true);
                }
            }
            UserEvent::UserLost(user) => {
                if self.store.remove(user) {
                    log::debug!("[{user}] skeleton dropped");
                }
            }
            UserEvent::CalibrationComplete { user, status } => {
                let Some(capability) = capability else {
                    return;
                };
                match status {
                    CalibrationStatus::Ok => {
                        capability.start_tracking(user);
                        self.store.insert(user);
                    }
                    CalibrationStatus::ManualAbort => {}
                    _ => capability.request_calibration(user, true),
                }
            }
        }
    }

    pub fn update(&mut self, capability: &dyn SkeletonCapability) {
        for user in self.store.users() {
            if !capability.is_tracking(user) {
                continue;
            }
            let mut skeleton = Skeleton::default();
            for joint in Joint::ALL {
                let position = capability
                    .joint_position(user, joint)
                    .map(|raw| project_joint(capability, raw))
                    .unwrap_or_default();
                skeleton.set(joint, position);
            }
            self.store.update(user, skeleton);
        }
    }
}

fn project_joint(capability: &dyn SkeletonCapability, raw: JointPosition) -> JointPosition {
    // z == 0 means the tracker has no estimate for this joint.
    if raw.position.z == 0.0 {
        return JointPosition {
            position: raw.position,
            confidence: 0.0,
        };
    }
    JointPosition {
        position: capability.real_world_to_projective(raw.position),
        confidence: raw.confidence.clamp(0.0, 1.0),
    }
}
