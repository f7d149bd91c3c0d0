//! Connection Pool
//!
//! Keeps at most one upstream connection per normalized symbol key and fans
//! every decoded trade out to all subscribers of that key.
//!
//! # Lifecycle
//!
//! ```text
//! subscribe ──► Connecting ──► Open ──► (last unsubscribe + grace) ──► Closing ──► Closed
//!                   ▲            │
//!                   │            ▼ unexpected drop
//!                   └──── Reconnecting ──► Failed (attempts exhausted)
//! ```
//!
//! # Concurrency
//!
//! Three event sources interleave freely: subscribe/unsubscribe calls, one
//! session task per connection reading frames, and spawned timer tasks.
//!
//! - Lock order is pool map, then connection state. Handlers never run while
//!   either is held.
//! - The cache write and the registry snapshot for a tick happen under the
//!   connection state lock, so a concurrent subscriber gets the price either
//!   as its replay or as a live tick.
//! - Every delivery to a subscriber holds that subscriber's own delivery lock.
//!   `subscribe` takes it before registering and keeps it through the replay,
//!   which keeps the replay ahead of any live tick.
//! - Timers carry an id; one that fires after being superseded does nothing.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{FutureExt, Stream};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::connection::{Connection, ConnectionInner, ScheduledTask, TimerKind};
use super::reconnect::ReconnectConfig;
use crate::application::ports::{
    LifecycleEvent, LifecycleSink, PriceHandler, TeardownReason, TransportError,
    UpstreamConnector,
};
use crate::domain::pricing::{CachedPrice, PriceCache};
use crate::domain::streaming::{
    ConnectionState, PriceTick, PriceUpdate, StreamError, StreamFailure,
};
use crate::domain::subscription::{Subscriber, SubscriptionId};
use crate::domain::symbol::{SymbolError, SymbolKey};
use crate::infrastructure::metrics;
use crate::infrastructure::upstream::codec::TradeCodec;

type SharedSubscriber = Arc<Subscriber<dyn PriceHandler>>;

// =============================================================================
// Configuration
// =============================================================================

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long an unsubscribed connection stays open waiting for a new
    /// subscriber.
    pub grace_period: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Buffered updates per [`PriceStream`].
    pub stream_buffer: usize,
    /// Backoff after unexpected drops.
    pub reconnect: ReconnectConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            stream_buffer: 1024,
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by [`ConnectionPool::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// The symbol does not normalize to a valid key.
    #[error(transparent)]
    InvalidSymbol(#[from] SymbolError),
}

// =============================================================================
// Stats
// =============================================================================

/// Snapshot of one tracked connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Symbol key.
    pub symbol: SymbolKey,
    /// Connection instance id.
    pub connection_id: Uuid,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Registered subscribers.
    pub subscribers: usize,
    /// Consecutive failures since the last successful open.
    pub reconnect_attempts: u32,
}

/// Snapshot of the whole pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections currently tracked.
    pub active_connections: usize,
    /// Connections created since the pool started.
    pub connections_created: u64,
    /// Symbols with a cached price.
    pub cached_prices: usize,
    /// Per-connection detail, ordered by symbol.
    pub connections: Vec<ConnectionStats>,
}

impl PoolStats {
    /// Whether any connection is waiting to reconnect.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.connections
            .iter()
            .any(|c| c.state == ConnectionState::Reconnecting)
    }

    /// Whether every tracked connection is open.
    #[must_use]
    pub fn all_open(&self) -> bool {
        self.connections
            .iter()
            .all(|c| c.state == ConnectionState::Open)
    }
}

// =============================================================================
// Connection Pool
// =============================================================================

/// Shares one upstream connection per symbol key among all its subscribers.
///
/// Dropping the pool tears every connection down, as does
/// [`ConnectionPool::disconnect_all`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use market_stream::application::ports::UpstreamConnector;
/// use market_stream::application::services::{ConnectionPool, PoolConfig};
/// use market_stream::domain::streaming::PriceUpdate;
/// use market_stream::infrastructure::telemetry::TracingLifecycleSink;
///
/// # async fn run(connector: Arc<dyn UpstreamConnector>) -> anyhow::Result<()> {
/// let pool = ConnectionPool::new(PoolConfig::default(), connector, Arc::new(TracingLifecycleSink));
///
/// let subscription = pool.subscribe("BTC-USDT", |update: &PriceUpdate| -> anyhow::Result<()> {
///     if let Some(tick) = update.as_tick() {
///         println!("{} {}", tick.symbol, tick.price);
///     }
///     Ok(())
/// })?;
///
/// subscription.unsubscribe();
/// pool.disconnect_all();
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("connections", &self.inner.connections.lock().len())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Create an empty pool.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime; session and timer tasks are
    /// spawned on the runtime current at construction.
    #[must_use]
    pub fn new(
        config: PoolConfig,
        connector: Arc<dyn UpstreamConnector>,
        sink: Arc<dyn LifecycleSink>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                connector,
                sink,
                cache: Arc::new(PriceCache::new()),
                codec: TradeCodec::new(),
                runtime: Handle::current(),
                connections: Mutex::new(HashMap::new()),
                next_subscription_id: AtomicU64::new(1),
                connections_created: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe a handler to a symbol.
    ///
    /// If a price is cached for the symbol, the handler receives it once with
    /// `cached: true` before this call returns and before any live tick.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError::InvalidSymbol`] if the symbol does not
    /// normalize; no connection is created in that case.
    pub fn subscribe<H>(&self, symbol: &str, handler: H) -> Result<Subscription, SubscribeError>
    where
        H: PriceHandler + 'static,
    {
        self.subscribe_shared(symbol, Arc::new(handler))
    }

    /// Subscribe an already shared handler to a symbol.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError::InvalidSymbol`] if the symbol does not
    /// normalize.
    pub fn subscribe_shared(
        &self,
        symbol: &str,
        handler: Arc<dyn PriceHandler>,
    ) -> Result<Subscription, SubscribeError> {
        let key = SymbolKey::parse(symbol)?;
        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let subscriber: SharedSubscriber = Arc::new(Subscriber::new(id, handler));

        let delivery = subscriber.exclusive();
        self.inner.register(&key, Arc::clone(&subscriber));

        if let Some(cached) = self.inner.cache.get(&key) {
            let replay = PriceUpdate::Tick(PriceTick {
                symbol: key.clone(),
                price: cached.price,
                timestamp: cached.timestamp,
                cached: true,
            });
            match delivery.deliver(|handler| invoke(handler, &replay)) {
                Some(Ok(())) => metrics::record_updates_delivered(1),
                Some(Err(error)) => self.inner.report_handler_failure(&key, id, error),
                None => {}
            }
        }
        drop(delivery);

        tracing::debug!(symbol = %key, subscription_id = id, "Subscribed");

        Ok(Subscription {
            id,
            symbol: key.clone(),
            unsubscribe: Unsubscribe {
                inner: Arc::new(UnsubscribeInner {
                    id,
                    symbol: key,
                    done: AtomicBool::new(false),
                    subscriber: Arc::downgrade(&subscriber),
                    pool: Arc::downgrade(&self.inner),
                }),
            },
        })
    }

    /// Subscribe through a bounded channel.
    ///
    /// When the consumer falls behind and the buffer is full, updates are
    /// dropped for this stream only. Dropping the stream unsubscribes.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError::InvalidSymbol`] if the symbol does not
    /// normalize.
    pub fn subscribe_stream(&self, symbol: &str) -> Result<PriceStream, SubscribeError> {
        let (sender, receiver) = mpsc::channel(self.inner.config.stream_buffer.max(1));
        let subscription = self.subscribe(symbol, ChannelHandler { sender })?;
        Ok(PriceStream {
            receiver: ReceiverStream::new(receiver),
            subscription,
        })
    }

    /// Remove one registration.
    ///
    /// Returns whether a registration was removed. When the last subscriber
    /// of a connection leaves, the grace period starts.
    pub fn unsubscribe(&self, symbol: &str, id: SubscriptionId) -> bool {
        SymbolKey::parse(symbol).is_ok_and(|key| self.inner.unsubscribe(&key, id))
    }

    /// Tear down every connection and clear the price cache.
    ///
    /// Returns without waiting for upstream close acknowledgements.
    pub fn disconnect_all(&self) {
        self.inner.disconnect_all();
    }

    /// Last cached price for a symbol, if any.
    #[must_use]
    pub fn current_price(&self, symbol: &str) -> Option<CachedPrice> {
        let key = SymbolKey::parse(symbol).ok()?;
        self.inner.cache.get(&key)
    }

    /// Shared handle to the price cache.
    #[must_use]
    pub fn price_cache(&self) -> Arc<PriceCache> {
        Arc::clone(&self.inner.cache)
    }

    /// Lifecycle state of the connection tracked for a symbol.
    #[must_use]
    pub fn connection_state(&self, symbol: &str) -> Option<ConnectionState> {
        let key = SymbolKey::parse(symbol).ok()?;
        let connection = self.inner.connections.lock().get(&key).cloned()?;
        let state = connection.state.lock().lifecycle;
        Some(state)
    }

    /// Introspection snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let tracked: Vec<_> = self.inner.connections.lock().values().cloned().collect();

        let mut connections: Vec<ConnectionStats> = tracked
            .iter()
            .map(|connection| {
                let state = connection.state.lock();
                ConnectionStats {
                    symbol: connection.key.clone(),
                    connection_id: connection.id,
                    state: state.lifecycle,
                    subscribers: state.registry.len(),
                    reconnect_attempts: state.policy.attempt_count(),
                }
            })
            .collect();
        connections.sort_by(|a, b| a.symbol.as_str().cmp(b.symbol.as_str()));

        PoolStats {
            active_connections: connections.len(),
            connections_created: self.inner.connections_created.load(Ordering::Relaxed),
            cached_prices: self.inner.cache.len(),
            connections,
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.inner.disconnect_all();
    }
}

// =============================================================================
// Pool Internals
// =============================================================================

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn UpstreamConnector>,
    sink: Arc<dyn LifecycleSink>,
    cache: Arc<PriceCache>,
    codec: TradeCodec,
    runtime: Handle,
    connections: Mutex<HashMap<SymbolKey, Arc<Connection>>>,
    next_subscription_id: AtomicU64,
    connections_created: AtomicU64,
}

impl PoolInner {
    /// Attach a subscriber to the key's connection, creating one if needed.
    fn register(self: &Arc<Self>, key: &SymbolKey, subscriber: SharedSubscriber) {
        let (created, active) = {
            let mut connections = self.connections.lock();

            let reusable = connections
                .get(key)
                .filter(|connection| !connection.state.lock().lifecycle.is_finished())
                .cloned();
            let (connection, created) = match reusable {
                Some(connection) => (connection, None),
                None => {
                    let connection =
                        Arc::new(Connection::new(key.clone(), self.config.reconnect.clone()));
                    connections.insert(key.clone(), Arc::clone(&connection));
                    self.connections_created.fetch_add(1, Ordering::Relaxed);
                    let id = connection.id;
                    (connection, Some(id))
                }
            };

            let mut state = connection.state.lock();
            if state.cancel_grace() {
                tracing::debug!(symbol = %key, "Grace teardown cancelled, reusing connection");
            }
            state.registry.add(subscriber);
            if created.is_some() {
                self.start_session(&connection, &mut state);
            }
            (created, connections.len())
        };

        if let Some(connection_id) = created {
            self.sink.record(&LifecycleEvent::Created {
                symbol: key.clone(),
                connection_id,
            });
            metrics::set_active_connections(active);
        }
    }

    fn unsubscribe(self: &Arc<Self>, key: &SymbolKey, id: SubscriptionId) -> bool {
        let connections = self.connections.lock();
        let Some(connection) = connections.get(key).cloned() else {
            return false;
        };
        let mut state = connection.state.lock();

        let removed = state.registry.remove(id);
        if removed
            && state.registry.is_empty()
            && !state.lifecycle.is_finished()
            && state.grace_timer.is_none()
        {
            let grace = self.config.grace_period;
            let timer = self.schedule(&connection, &mut state, TimerKind::Grace, grace);
            state.grace_timer = Some(timer);
            tracing::debug!(
                symbol = %key,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "Last subscriber left, grace period started"
            );
        }
        drop(state);
        drop(connections);

        if removed {
            tracing::debug!(symbol = %key, subscription_id = id, "Unsubscribed");
        }
        removed
    }

    fn disconnect_all(&self) {
        let drained: Vec<_> = self.connections.lock().drain().collect();
        for (_, connection) in &drained {
            connection.state.lock().shut_down();
        }
        self.cache.clear();

        for (key, _) in drained {
            self.sink.record(&LifecycleEvent::TornDown {
                symbol: key,
                reason: TeardownReason::Shutdown,
            });
        }
        metrics::set_active_connections(0);
    }

    fn start_session(self: &Arc<Self>, connection: &Arc<Connection>, state: &mut ConnectionInner) {
        let session = CancellationToken::new();
        state.session = Some(session.clone());

        let pool = Arc::clone(self);
        let connection = Arc::clone(connection);
        self.runtime.spawn(async move {
            let outcome = AssertUnwindSafe(pool.run_session(&connection, &session))
                .catch_unwind()
                .await;
            if session.is_cancelled() {
                connection.finish_close();
            } else if let Err(payload) = outcome {
                let error = TransportError::Panicked(panic_message(payload.as_ref()));
                pool.handle_failure(&connection, &session, error);
            }
        });
    }

    /// Connect, then read frames until the session ends or is cancelled.
    async fn run_session(self: &Arc<Self>, connection: &Arc<Connection>, session: &CancellationToken) {
        let attempt = connection.state.lock().policy.attempt_count();
        self.sink.record(&LifecycleEvent::Connecting {
            symbol: connection.key.clone(),
            attempt,
        });

        let timeout = self.config.connect_timeout;
        let connected = tokio::select! {
            biased;
            () = session.cancelled() => return,
            result = tokio::time::timeout(timeout, self.connector.connect(&connection.key)) => {
                result.unwrap_or_else(|_| Err(TransportError::ConnectTimeout(timeout)))
            }
        };

        let mut stream = match connected {
            Ok(stream) => stream,
            Err(error) => {
                self.handle_failure(connection, session, error);
                return;
            }
        };

        let opened = {
            let mut state = connection.state.lock();
            if session.is_cancelled() || state.lifecycle.is_finished() {
                false
            } else {
                state.lifecycle = ConnectionState::Open;
                state.policy.reset();
                true
            }
        };
        if !opened {
            stream.close().await;
            return;
        }
        self.sink.record(&LifecycleEvent::Connected {
            symbol: connection.key.clone(),
            connection_id: connection.id,
        });

        loop {
            tokio::select! {
                biased;
                () = session.cancelled() => {
                    stream.close().await;
                    return;
                }
                frame = stream.next_frame() => match frame {
                    Some(Ok(text)) => self.ingest(connection, &text),
                    Some(Err(error)) => {
                        stream.close().await;
                        self.handle_failure(connection, session, error);
                        return;
                    }
                    None => {
                        let error = TransportError::Closed("stream ended".to_string());
                        self.handle_failure(connection, session, error);
                        return;
                    }
                },
            }
        }
    }

    /// Decode one frame, cache the price and fan it out.
    fn ingest(&self, connection: &Connection, text: &str) {
        metrics::record_frame_received();

        let trade = match self.codec.decode(text) {
            Ok(Some(trade)) => trade,
            Ok(None) => return,
            Err(error) => {
                self.sink.record(&LifecycleEvent::FrameDropped {
                    symbol: connection.key.clone(),
                    error: error.to_string(),
                });
                return;
            }
        };

        if SymbolKey::parse(&trade.symbol).ok().as_ref() != Some(&connection.key) {
            self.sink.record(&LifecycleEvent::FrameDropped {
                symbol: connection.key.clone(),
                error: format!("trade for unexpected symbol {}", trade.symbol),
            });
            return;
        }

        let subscribers = {
            let state = connection.state.lock();
            if state.lifecycle != ConnectionState::Open {
                return;
            }
            self.cache
                .put(connection.key.clone(), trade.price, trade.timestamp);
            state.registry.snapshot()
        };

        let update = PriceUpdate::Tick(PriceTick {
            symbol: connection.key.clone(),
            price: trade.price,
            timestamp: trade.timestamp,
            cached: false,
        });
        self.fan_out(&connection.key, &subscribers, &update);
    }

    /// Deliver to each subscriber in the snapshot that is still active.
    fn fan_out(&self, key: &SymbolKey, subscribers: &[SharedSubscriber], update: &PriceUpdate) {
        let mut delivered = 0_u64;
        for subscriber in subscribers {
            match subscriber.deliver(|handler| invoke(handler, update)) {
                Some(Ok(())) => delivered += 1,
                Some(Err(error)) => self.report_handler_failure(key, subscriber.id(), error),
                None => {}
            }
        }
        metrics::record_updates_delivered(delivered);
    }

    fn report_handler_failure(&self, key: &SymbolKey, id: SubscriptionId, error: String) {
        self.sink.record(&LifecycleEvent::HandlerFailed {
            symbol: key.clone(),
            subscription_id: id,
            error,
        });
    }

    /// React to an unexpected session end or failed connect.
    fn handle_failure(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
        session: &CancellationToken,
        error: TransportError,
    ) {
        let mut events = Vec::with_capacity(2);
        let mut terminal = None;

        let active = {
            let mut connections = self.connections.lock();
            let mut state = connection.state.lock();
            if session.is_cancelled() || state.lifecycle.is_finished() {
                return;
            }

            events.push(LifecycleEvent::Disconnected {
                symbol: connection.key.clone(),
                error,
            });
            state.session = None;

            if state.registry.is_empty() {
                state.shut_down();
                remove_entry(&mut connections, connection);
                events.push(LifecycleEvent::TornDown {
                    symbol: connection.key.clone(),
                    reason: TeardownReason::DroppedWithoutSubscribers,
                });
            } else if let Some(delay) = state.policy.next_delay() {
                state.lifecycle = ConnectionState::Reconnecting;
                let timer = self.schedule(connection, &mut state, TimerKind::Reconnect, delay);
                state.reconnect_timer = Some(timer);
                events.push(LifecycleEvent::ReconnectScheduled {
                    symbol: connection.key.clone(),
                    attempt: state.policy.attempt_count(),
                    delay,
                });
            } else {
                let attempts = state.policy.attempt_count();
                state.lifecycle = ConnectionState::Failed;
                terminal = Some((state.registry.snapshot(), attempts));
                remove_entry(&mut connections, connection);
                events.push(LifecycleEvent::Failed {
                    symbol: connection.key.clone(),
                    attempts,
                });
            }
            connections.len()
        };

        for event in &events {
            self.sink.record(event);
        }
        metrics::set_active_connections(active);

        if let Some((subscribers, attempts)) = terminal {
            let update = PriceUpdate::Failure(StreamFailure {
                symbol: connection.key.clone(),
                error: StreamError::ReconnectExhausted { attempts }.to_string(),
                terminal: true,
            });
            self.fan_out(&connection.key, &subscribers, &update);
            connection.state.lock().registry.clear();
        }
    }

    /// Spawn a timer task and return its handle.
    fn schedule(
        self: &Arc<Self>,
        connection: &Arc<Connection>,
        state: &mut ConnectionInner,
        kind: TimerKind,
        delay: Duration,
    ) -> ScheduledTask {
        let id = state.next_timer_id();
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let pool = Arc::clone(self);
        let connection = Arc::clone(connection);
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => match kind {
                    TimerKind::Grace => pool.on_grace_expired(&connection, id),
                    TimerKind::Reconnect => pool.on_reconnect_due(&connection, id),
                },
            }
        });

        ScheduledTask::new(id, cancel)
    }

    fn on_grace_expired(&self, connection: &Arc<Connection>, id: u64) {
        let active = {
            let mut connections = self.connections.lock();
            let mut state = connection.state.lock();
            if !state.is_current_timer(TimerKind::Grace, id) {
                return;
            }
            state.grace_timer = None;
            if !state.registry.is_empty() || state.lifecycle.is_finished() {
                return;
            }
            state.shut_down();
            remove_entry(&mut connections, connection);
            connections.len()
        };

        self.sink.record(&LifecycleEvent::TornDown {
            symbol: connection.key.clone(),
            reason: TeardownReason::GracePeriodExpired,
        });
        metrics::set_active_connections(active);
    }

    fn on_reconnect_due(self: &Arc<Self>, connection: &Arc<Connection>, id: u64) {
        let mut state = connection.state.lock();
        if !state.is_current_timer(TimerKind::Reconnect, id)
            || state.lifecycle != ConnectionState::Reconnecting
        {
            return;
        }
        state.reconnect_timer = None;
        state.lifecycle = ConnectionState::Connecting;
        self.start_session(connection, &mut state);
    }
}

/// Remove the map entry for a connection, unless a newer one replaced it.
fn remove_entry(connections: &mut HashMap<SymbolKey, Arc<Connection>>, connection: &Arc<Connection>) {
    if connections
        .get(&connection.key)
        .is_some_and(|current| Arc::ptr_eq(current, connection))
    {
        connections.remove(&connection.key);
    }
}

/// Run one handler, turning errors and panics into a message.
fn invoke(handler: &dyn PriceHandler, update: &PriceUpdate) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.on_update(update))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(format!("{error:#}")),
        Err(payload) => Err(format!("handler panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// =============================================================================
// Subscription Handles
// =============================================================================

/// A live subscription.
///
/// Dropping the handle does not unsubscribe; call
/// [`Subscription::unsubscribe`] (or keep an [`Unsubscribe`] action).
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    symbol: SymbolKey,
    unsubscribe: Unsubscribe,
}

impl Subscription {
    /// Subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Normalized symbol key.
    #[must_use]
    pub const fn symbol(&self) -> &SymbolKey {
        &self.symbol
    }

    /// Stop deliveries. Repeat calls do nothing.
    ///
    /// Returns `true` only on the call that removed the registration.
    pub fn unsubscribe(&self) -> bool {
        self.unsubscribe.call()
    }

    /// A cloneable unsubscribe action for this subscription.
    #[must_use]
    pub fn unsubscribe_action(&self) -> Unsubscribe {
        self.unsubscribe.clone()
    }
}

/// Idempotent unsubscribe action.
///
/// Safe to call from any thread, from inside the subscription's own handler,
/// and after the pool is gone.
#[derive(Clone)]
pub struct Unsubscribe {
    inner: Arc<UnsubscribeInner>,
}

struct UnsubscribeInner {
    id: SubscriptionId,
    symbol: SymbolKey,
    done: AtomicBool,
    subscriber: Weak<Subscriber<dyn PriceHandler>>,
    pool: Weak<PoolInner>,
}

impl Unsubscribe {
    /// Unsubscribe. Returns `true` only on the call that removed the
    /// registration.
    pub fn call(&self) -> bool {
        let inner = &self.inner;
        if inner.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(subscriber) = inner.subscriber.upgrade() {
            subscriber.deactivate();
        }
        inner
            .pool
            .upgrade()
            .is_some_and(|pool| pool.unsubscribe(&inner.symbol, inner.id))
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.inner.id)
            .field("symbol", &self.inner.symbol)
            .field("done", &self.inner.done.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Price Stream
// =============================================================================

/// Updates for one subscription as an async stream.
///
/// Ends after a terminal failure or when the pool tears the connection down.
/// Dropping the stream unsubscribes.
#[derive(Debug)]
pub struct PriceStream {
    receiver: ReceiverStream<PriceUpdate>,
    subscription: Subscription,
}

impl PriceStream {
    /// Subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    /// Normalized symbol key.
    #[must_use]
    pub const fn symbol(&self) -> &SymbolKey {
        self.subscription.symbol()
    }
}

impl Stream for PriceStream {
    type Item = PriceUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl Drop for PriceStream {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

/// Forwards updates into a [`PriceStream`]'s channel.
struct ChannelHandler {
    sender: mpsc::Sender<PriceUpdate>,
}

impl PriceHandler for ChannelHandler {
    fn on_update(&self, update: &PriceUpdate) -> anyhow::Result<()> {
        match self.sender.try_send(update.clone()) {
            Ok(()) | Err(TrySendError::Closed(_)) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(symbol = %update.symbol(), "Stream buffer full, update dropped");
                metrics::record_stream_overflow();
                Ok(())
            }
        }
    }
}
