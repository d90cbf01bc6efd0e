use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::{
    driver::{CalibrationStatus, UserEvent},
    types::UserId,
};

#[derive(Clone, Debug, PartialEq)]
pub enum SensorEvent {
    FrameUpdated { frame: u64 },
    NewUser(UserId),
    UserLost(UserId),
    CalibrationComplete {
        user: UserId,
        status: CalibrationStatus,
    },
    // The reader thread stopped on a fatal error.
    Failed { message: String },
}

impl From<UserEvent> for SensorEvent {
    fn from(event: UserEvent) -> Self {
        match event {
            UserEvent::NewUser(user) => SensorEvent::NewUser(user),
            UserEvent::UserLost(user) => SensorEvent::UserLost(user),
            UserEvent::CalibrationComplete { user, status } => {
                SensorEvent::CalibrationComplete { user, status }
            }
        }
    }
}

pub type SubscriberId = u64;

// Receiving end handed out by [`EventHub::subscribe`]. Dropping it is
// enough to stop receiving; the hub prunes it on the next publish.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: Receiver<SensorEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn receiver(&self) -> &Receiver<SensorEvent> {
        &self.rx
    }

    pub fn recv(&self) -> Option<SensorEvent> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SensorEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_iter(&self) -> impl Iterator<Item = SensorEvent> + '_ {
        self.rx.try_iter()
    }

    // Wait up to `timeout` for an event, then drain the queue. Runs of
    // `FrameUpdated` collapse to the newest one; user events keep their order.
    pub fn recv_latest(&self, timeout: Duration) -> Vec<SensorEvent> {
        let first = match self.rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                return Vec::new();
            }
        };

        let mut events = vec![first];
        for event in self.rx.try_iter() {
            let replace = matches!(
                (events.last(), &event),
                (
                    Some(SensorEvent::FrameUpdated { .. }),
                    SensorEvent::FrameUpdated { .. }
                )
            );
            if replace {
                events.pop();
            }
            events.push(event);
        }
        events
    }
}

#[derive(Debug, Default)]
struct HubState {
    next_id: SubscriberId,
    subscribers: Vec<(SubscriberId, Sender<SensorEvent>)>,
}

#[derive(Clone, Debug, Default)]
pub struct EventHub {
    inner: Arc<Mutex<HubState>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = unbounded();
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push((id, tx));
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub, _)| *sub != id);
        state.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }

    pub fn publish(&self, event: SensorEvent) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}
