//! Per-symbol connection state owned by the pool.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::PriceHandler;
use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::SubscriberRegistry;
use crate::domain::symbol::SymbolKey;

/// Which timer a [`ScheduledTask`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TimerKind {
    /// Tear the connection down if nobody resubscribed.
    Grace,
    /// Start the next connect attempt.
    Reconnect,
}

/// Handle to a spawned timer.
///
/// The id lets a timer that fires late tell whether it is still the one the
/// connection is waiting on.
#[derive(Debug)]
pub(super) struct ScheduledTask {
    id: u64,
    cancel: CancellationToken,
}

impl ScheduledTask {
    pub(super) const fn new(id: u64, cancel: CancellationToken) -> Self {
        Self { id, cancel }
    }

    pub(super) const fn id(&self) -> u64 {
        self.id
    }

    pub(super) fn cancel(self) {
        self.cancel.cancel();
    }
}

/// Mutable state, guarded by [`Connection::state`].
pub(super) struct ConnectionInner {
    pub(super) lifecycle: ConnectionState,
    pub(super) registry: SubscriberRegistry<dyn PriceHandler>,
    pub(super) policy: ReconnectPolicy,
    pub(super) session: Option<CancellationToken>,
    pub(super) grace_timer: Option<ScheduledTask>,
    pub(super) reconnect_timer: Option<ScheduledTask>,
    next_timer_id: u64,
}

impl ConnectionInner {
    /// Allocate an id for a new timer.
    pub(super) const fn next_timer_id(&mut self) -> u64 {
        self.next_timer_id += 1;
        self.next_timer_id
    }

    /// Whether `id` is the pending timer of the given kind.
    pub(super) fn is_current_timer(&self, kind: TimerKind, id: u64) -> bool {
        let slot = match kind {
            TimerKind::Grace => &self.grace_timer,
            TimerKind::Reconnect => &self.reconnect_timer,
        };
        slot.as_ref().map(ScheduledTask::id) == Some(id)
    }

    /// Cancel a pending grace teardown, if any.
    pub(super) fn cancel_grace(&mut self) -> bool {
        self.grace_timer.take().is_some_and(|timer| {
            timer.cancel();
            true
        })
    }

    /// Cancel every timer and the session, then drop all registrations.
    ///
    /// With a live session the state stays `Closing` until its task has
    /// closed the transport and called [`Connection::finish_close`].
    pub(super) fn shut_down(&mut self) {
        self.cancel_grace();
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
        self.registry.clear();
        self.lifecycle = match self.session.take() {
            Some(session) => {
                session.cancel();
                ConnectionState::Closing
            }
            None => ConnectionState::Closed,
        };
    }
}

/// One upstream connection for one symbol key.
pub(super) struct Connection {
    pub(super) id: Uuid,
    pub(super) key: SymbolKey,
    pub(super) state: Mutex<ConnectionInner>,
}

impl Connection {
    /// Mark a `Closing` connection `Closed` once its session has exited.
    pub(super) fn finish_close(&self) {
        let mut state = self.state.lock();
        if state.lifecycle == ConnectionState::Closing {
            state.lifecycle = ConnectionState::Closed;
        }
    }

    pub(super) fn new(key: SymbolKey, reconnect: ReconnectConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            state: Mutex::new(ConnectionInner {
                lifecycle: ConnectionState::Connecting,
                registry: SubscriberRegistry::new(),
                policy: ReconnectPolicy::new(reconnect),
                session: None,
                grace_timer: None,
                reconnect_timer: None,
                next_timer_id: 0,
            }),
        }
    }
}
