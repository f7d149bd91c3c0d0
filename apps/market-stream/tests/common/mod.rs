//! Shared fixtures for the pool integration tests.
//!
//! `FakeConnector` stands in for the exchange: each connect opens a scripted
//! session the test feeds frames into, and connects can be made to fail or
//! hang. `RecordingSink` keeps every lifecycle event; `Recorder` keeps every
//! update a handler saw.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use market_stream::{
    ConnectionPool, LifecycleEvent, LifecycleSink, PoolConfig, PriceHandler, PriceUpdate,
    SymbolKey, TransportError, UpstreamConnector, UpstreamStream,
};

// =============================================================================
// Fake Upstream
// =============================================================================

enum Script {
    Frame(String),
    Fail(TransportError),
}

#[derive(Default)]
struct FakeState {
    connects: HashMap<String, usize>,
    closes: usize,
    scripted_failures: VecDeque<TransportError>,
    fail_all: bool,
    hang: bool,
    panic: bool,
    sessions: HashMap<String, mpsc::UnboundedSender<Script>>,
}

/// Scripted upstream.
#[derive(Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Send a raw text frame on the symbol's current session.
    pub fn push_frame(&self, symbol: &str, text: impl Into<String>) {
        let sender = self.session(symbol);
        sender.send(Script::Frame(text.into())).unwrap();
    }

    /// Send a trade frame on the symbol's current session.
    pub fn push_trade(&self, symbol: &str, price: &str) {
        self.push_frame(symbol, trade_frame(&symbol.to_uppercase(), price));
    }

    /// End the symbol's current session with a transport error.
    pub fn drop_session(&self, symbol: &str) {
        let sender = self.session(symbol);
        sender
            .send(Script::Fail(TransportError::Closed("reset by peer".to_string())))
            .unwrap();
    }

    /// Fail the next `n` connects.
    pub fn fail_next_connects(&self, n: usize) {
        let mut state = self.state.lock();
        for _ in 0..n {
            state
                .scripted_failures
                .push_back(TransportError::ConnectFailed("connection refused".to_string()));
        }
    }

    /// Fail every connect from now on.
    pub fn fail_all_connects(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    /// Make connects panic.
    pub fn panic_connects(&self, panic: bool) {
        self.state.lock().panic = panic;
    }

    /// Make connects never complete.
    pub fn hang_connects(&self, hang: bool) {
        self.state.lock().hang = hang;
    }

    /// Total connect attempts.
    pub fn connects(&self) -> usize {
        self.state.lock().connects.values().sum()
    }

    /// Connect attempts for one symbol key.
    pub fn connects_for(&self, symbol: &str) -> usize {
        self.state.lock().connects.get(symbol).copied().unwrap_or(0)
    }

    /// Sessions closed by the pool.
    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    fn session(&self, symbol: &str) -> mpsc::UnboundedSender<Script> {
        self.state
            .lock()
            .sessions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| panic!("no session open for {symbol}"))
    }
}

#[async_trait]
impl UpstreamConnector for FakeConnector {
    async fn connect(&self, symbol: &SymbolKey) -> Result<Box<dyn UpstreamStream>, TransportError> {
        let (hang, panic) = {
            let mut state = self.state.lock();
            *state.connects.entry(symbol.to_string()).or_default() += 1;

            if let Some(error) = state.scripted_failures.pop_front() {
                return Err(error);
            }
            if state.fail_all {
                return Err(TransportError::ConnectFailed("connection refused".to_string()));
            }
            (state.hang, state.panic)
        };
        assert!(!panic, "connector blew up for {symbol}");
        if hang {
            std::future::pending::<()>().await;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.state
            .lock()
            .sessions
            .insert(symbol.to_string(), sender);

        Ok(Box::new(FakeSession {
            receiver,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    receiver: mpsc::UnboundedReceiver<Script>,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl UpstreamStream for FakeSession {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        match self.receiver.recv().await? {
            Script::Frame(text) => Some(Ok(text)),
            Script::Fail(error) => Some(Err(error)),
        }
    }

    async fn close(&mut self) {
        self.state.lock().closes += 1;
    }
}

/// A trade event as the exchange sends it.
pub fn trade_frame(symbol: &str, price: &str) -> String {
    format!(
        r#"{{"e":"trade","E":1718000000123,"s":"{symbol}","t":1,"p":"{price}","q":"0.010","T":1718000000120,"m":true}}"#
    )
}

// =============================================================================
// Observers
// =============================================================================

/// Lifecycle sink that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&LifecycleEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl LifecycleSink for RecordingSink {
    fn record(&self, event: &LifecycleEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Handler that keeps every update it receives.
#[derive(Clone, Default)]
pub struct Recorder {
    updates: Arc<Mutex<Vec<PriceUpdate>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<PriceUpdate> {
        self.updates.lock().clone()
    }

    /// `(price, cached)` for every tick seen.
    pub fn ticks(&self) -> Vec<(Decimal, bool)> {
        self.updates
            .lock()
            .iter()
            .filter_map(PriceUpdate::as_tick)
            .map(|tick| (tick.price, tick.cached))
            .collect()
    }
}

impl PriceHandler for Recorder {
    fn on_update(&self, update: &PriceUpdate) -> anyhow::Result<()> {
        self.updates.lock().push(update.clone());
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub pool: ConnectionPool,
    pub connector: Arc<FakeConnector>,
    pub sink: Arc<RecordingSink>,
}

pub fn harness() -> Harness {
    harness_with(PoolConfig::default())
}

pub fn harness_with(config: PoolConfig) -> Harness {
    let connector = FakeConnector::new();
    let sink = RecordingSink::new();
    let pool = ConnectionPool::new(
        config,
        Arc::clone(&connector) as Arc<dyn UpstreamConnector>,
        Arc::clone(&sink) as Arc<dyn LifecycleSink>,
    );
    Harness {
        pool,
        connector,
        sink,
    }
}

/// Let spawned session and timer tasks run until they go idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn price(raw: &str) -> Decimal {
    raw.parse().unwrap()
}
