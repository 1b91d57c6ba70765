//! Liquidation event source with reconnection handling.
//!
//! Subscribes to every configured protocol's liquidation-relevant logs over
//! WebSocket, normalizes them into [`LiquidationEvent`]s and delivers them on
//! a bounded channel. A supervisor task owns the connection state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Degraded -> Reconnecting -> Connected
//!                                   |                         |
//!                                   +---- ping failure -------+-> Failed
//! ```
//!
//! All protocols share one connection lifecycle. A reconnect attempt
//! succeeds only when every protocol resubscribes, and any single protocol
//! feed ending takes the whole connection down for a full resubscribe.
//!
//! The event queue is drop-new: when the consumer falls behind, new events
//! are discarded and counted rather than blocking the subscription.

use crate::protocol::{LiquidationEvent, ProtocolSubscription, RawLog};
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::Filter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Stream of raw logs from one subscription.
pub type LogStream = Pin<Box<dyn Stream<Item = RawLog> + Send>>;

type EventStream = Pin<Box<dyn Stream<Item = LiquidationEvent> + Send>>;

/// Errors surfaced by the event source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventSourceError {
    #[error("initial subscription failed: {0}")]
    InitialConnection(String),

    #[error("reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("event source already started")]
    AlreadyStarted,
}

impl EventSourceError {
    /// Fatal errors mean the event feed is dead and will not recover.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}

/// Connection state of the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Transport that can open log subscriptions.
#[async_trait]
pub trait LogSubscriber: Send + Sync + fmt::Debug {
    /// Subscribe to logs emitted by `addresses` with any of `signatures` as topic0.
    async fn subscribe(&self, addresses: Vec<Address>, signatures: Vec<B256>) -> Result<LogStream>;

    /// Liveness check; returns the current block number.
    async fn ping(&self) -> Result<u64>;
}

/// WebSocket log subscriber backed by Alloy.
#[derive(Debug, Clone)]
pub struct WsLogSubscriber {
    ws_url: String,
}

impl WsLogSubscriber {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

#[async_trait]
impl LogSubscriber for WsLogSubscriber {
    async fn subscribe(&self, addresses: Vec<Address>, signatures: Vec<B256>) -> Result<LogStream> {
        debug!(
            ws_url = %self.ws_url,
            contracts = addresses.len(),
            topics = signatures.len(),
            "Opening log subscription"
        );

        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new().on_ws(ws).await?;

        let filter = Filter::new().address(addresses).event_signature(signatures);
        let sub = provider.subscribe_logs(&filter).await?;
        let inner_stream = sub.into_stream();

        // The provider must live in the stream state or the socket closes
        let log_stream = stream::unfold(
            (provider, inner_stream),
            |(provider, mut inner)| async move {
                let log = inner.next().await?;
                Some((RawLog::from(&log), (provider, inner)))
            },
        );

        Ok(Box::pin(log_stream))
    }

    async fn ping(&self) -> Result<u64> {
        let provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(&self.ws_url))
            .await?;
        Ok(provider.get_block_number().await?)
    }
}

/// Reconnection and delivery settings.
#[derive(Debug, Clone)]
pub struct EventSourceConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub liveness_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(120),
            queue_capacity: 1024,
        }
    }
}

/// Receiving ends handed to the consumer by [`EventSource::start`].
#[derive(Debug)]
pub struct EventChannels {
    pub events: mpsc::Receiver<LiquidationEvent>,
    pub errors: mpsc::UnboundedReceiver<EventSourceError>,
}

/// Live liquidation event feed across all configured protocols.
#[derive(Debug)]
pub struct EventSource {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Shared {
    subscriber: Arc<dyn LogSubscriber>,
    subscriptions: Vec<ProtocolSubscription>,
    config: EventSourceConfig,
    state: RwLock<ConnectionState>,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl EventSource {
    pub fn new(
        subscriber: Arc<dyn LogSubscriber>,
        subscriptions: Vec<ProtocolSubscription>,
        config: EventSourceConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscriber,
                subscriptions,
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                emitted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Establish all subscriptions and start delivering events.
    ///
    /// Fails if the initial subscriptions cannot be opened.
    pub async fn start(&self) -> Result<EventChannels, EventSourceError> {
        if self.task.lock().is_some() {
            return Err(EventSourceError::AlreadyStarted);
        }

        self.shared.set_state(ConnectionState::Connecting);
        info!(
            protocols = self.shared.subscriptions.len(),
            "Starting event source"
        );

        let stream = match self.shared.subscribe_all().await {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.set_state(ConnectionState::Failed);
                error!(error = %e, "Initial event subscription failed");
                return Err(EventSourceError::InitialConnection(e.to_string()));
            }
        };

        let (events_tx, events_rx) = mpsc::channel(self.shared.config.queue_capacity.max(1));
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        self.shared.set_state(ConnectionState::Connected);
        info!("Event source connected");

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            shared.supervise(stream, events_tx, errors_tx).await;
        });
        *self.task.lock() = Some(handle);

        Ok(EventChannels {
            events: events_rx,
            errors: errors_rx,
        })
    }

    /// Tear down all subscriptions. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!("Event source stopped");
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Events delivered to the queue.
    pub fn emitted(&self) -> u64 {
        self.shared.emitted.load(Ordering::Relaxed)
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(from = %*state, to = %next, "Event source state change");
            *state = next;
        }
    }

    /// Open every protocol's subscription and merge them.
    ///
    /// One refused subscription fails the whole attempt. The merged stream
    /// ends as soon as any single subscription ends.
    async fn subscribe_all(&self) -> Result<EventStream> {
        let mut streams = Vec::with_capacity(self.subscriptions.len());
        for sub in &self.subscriptions {
            let logs = self
                .subscriber
                .subscribe(sub.addresses.clone(), sub.event_signatures())
                .await
                .with_context(|| format!("subscribing to {} logs", sub.kind))?;
            let sub = sub.clone();
            // Trailing None marks the end of this subscription
            let events = logs
                .map(move |log| Some(sub.normalize(&log)))
                .chain(stream::once(future::ready(None)));
            streams.push(events.boxed());
        }
        let merged = stream::select_all(streams)
            .take_while(|item| future::ready(item.is_some()))
            .filter_map(|item| future::ready(item.flatten()));
        Ok(Box::pin(merged))
    }

    async fn supervise(
        &self,
        mut stream: EventStream,
        events_tx: mpsc::Sender<LiquidationEvent>,
        errors_tx: mpsc::UnboundedSender<EventSourceError>,
    ) {
        loop {
            if !self.pump(&mut stream, &events_tx, &errors_tx).await {
                // Consumer went away
                return;
            }

            self.set_state(ConnectionState::Reconnecting);
            match self.reconnect(&errors_tx).await {
                Some(next) => {
                    stream = next;
                    self.set_state(ConnectionState::Connected);
                }
                None => return,
            }
        }
    }

    /// Forward events until the subscription dies.
    ///
    /// Returns `false` when the consumer dropped the receiver.
    async fn pump(
        &self,
        stream: &mut EventStream,
        events_tx: &mpsc::Sender<LiquidationEvent>,
        errors_tx: &mpsc::UnboundedSender<EventSourceError>,
    ) -> bool {
        let mut liveness = tokio::time::interval(self.config.liveness_interval);
        liveness.tick().await;

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(event) => {
                        if !self.forward(event, events_tx) {
                            return false;
                        }
                    }
                    None => {
                        self.set_state(ConnectionState::Degraded);
                        warn!("Event subscription stream ended");
                        let _ = errors_tx.send(EventSourceError::Transport(
                            "subscription stream ended".to_string(),
                        ));
                        return true;
                    }
                },
                _ = liveness.tick() => {
                    if let Err(e) = self.subscriber.ping().await {
                        warn!(error = %e, "Liveness check failed");
                        let _ = errors_tx.send(EventSourceError::Transport(e.to_string()));
                        return true;
                    }
                }
            }
        }
    }

    fn forward(&self, event: LiquidationEvent, events_tx: &mpsc::Sender<LiquidationEvent>) -> bool {
        match events_tx.try_send(event) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    user = %event.debtor,
                    protocol = %event.protocol,
                    dropped = dropped,
                    "Event queue full, dropping event"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    async fn reconnect(
        &self,
        errors_tx: &mpsc::UnboundedSender<EventSourceError>,
    ) -> Option<EventStream> {
        let max_attempts = self.config.max_reconnect_attempts;
        let mut attempts = 0u32;

        while attempts < max_attempts {
            attempts += 1;
            tokio::time::sleep(self.config.reconnect_delay).await;

            match self.subscribe_all().await {
                Ok(stream) => {
                    info!(attempt = attempts, "Event source reconnected");
                    return Some(stream);
                }
                Err(e) => {
                    warn!(
                        attempt = attempts,
                        max_attempts = max_attempts,
                        error = %e,
                        "Reconnection attempt failed"
                    );
                    let _ = errors_tx.send(EventSourceError::Transport(e.to_string()));
                }
            }
        }

        self.set_state(ConnectionState::Failed);
        error!(
            attempts = attempts,
            "Reconnection attempts exhausted, event feed is dead"
        );
        let _ = errors_tx.send(EventSourceError::ReconnectExhausted { attempts });
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{IComet, ICToken, IPool};
    use crate::protocol::ProtocolKind;
    use crate::testing::{MockLogSubscriber, SubscribeOutcome};
    use alloy::primitives::{Bytes, U256};
    use alloy::sol_types::SolEvent;

    const POOL: Address = Address::repeat_byte(0x01);
    const COMET: Address = Address::repeat_byte(0x02);
    const BASE: Address = Address::repeat_byte(0x03);
    const CTOKEN: Address = Address::repeat_byte(0x04);
    const UNDERLYING: Address = Address::repeat_byte(0x05);

    fn config(max_attempts: u32, capacity: usize) -> EventSourceConfig {
        EventSourceConfig {
            max_reconnect_attempts: max_attempts,
            reconnect_delay: Duration::from_millis(100),
            liveness_interval: Duration::from_secs(120),
            queue_capacity: capacity,
        }
    }

    fn liquidation_log(user: u8) -> RawLog {
        let ev = IPool::LiquidationCall {
            collateralAsset: Address::repeat_byte(0x10),
            debtAsset: Address::repeat_byte(0x20),
            user: Address::repeat_byte(user),
            debtToCover: U256::from(1u64),
            liquidatedCollateralAmount: U256::from(1u64),
            liquidator: Address::repeat_byte(0x40),
            receiveAToken: false,
        };
        let data = ev.encode_log_data();
        RawLog {
            address: POOL,
            topics: data.topics().to_vec(),
            data: Bytes::from(data.data.to_vec()),
            block_number: Some(1),
            tx_hash: None,
        }
    }

    fn raw_log(address: Address, data: alloy::primitives::LogData) -> RawLog {
        RawLog {
            address,
            topics: data.topics().to_vec(),
            data: Bytes::from(data.data.to_vec()),
            block_number: Some(1),
            tx_hash: None,
        }
    }

    fn comet_withdraw_log(user: u8) -> RawLog {
        let ev = IComet::Withdraw {
            src: Address::repeat_byte(user),
            to: Address::repeat_byte(user),
            amount: U256::from(1u64),
        };
        raw_log(COMET, ev.encode_log_data())
    }

    fn ctoken_borrow_log(user: u8) -> RawLog {
        let ev = ICToken::Borrow {
            borrower: Address::repeat_byte(user),
            borrowAmount: U256::from(1u64),
            accountBorrows: U256::from(1u64),
            totalBorrows: U256::from(1u64),
        };
        raw_log(CTOKEN, ev.encode_log_data())
    }

    fn all_protocols() -> Vec<ProtocolSubscription> {
        vec![
            ProtocolSubscription::aave_v3(POOL),
            ProtocolSubscription::compound_v3(COMET, BASE),
            ProtocolSubscription::compound_v2([(CTOKEN, UNDERLYING)]),
        ]
    }

    /// Emit one log per protocol and return the protocols delivered.
    async fn delivered_protocols(
        subscriber: &MockLogSubscriber,
        channels: &mut EventChannels,
    ) -> Vec<ProtocolKind> {
        subscriber.emit(liquidation_log(0x30));
        subscriber.emit(comet_withdraw_log(0x31));
        subscriber.emit(ctoken_borrow_log(0x32));
        let mut kinds = Vec::new();
        for _ in 0..3 {
            kinds.push(channels.events.recv().await.unwrap().protocol);
        }
        kinds.sort();
        kinds
    }

    async fn drain_errors(errors: &mut mpsc::UnboundedReceiver<EventSourceError>) -> Vec<EventSourceError> {
        let mut seen = Vec::new();
        while let Some(err) = errors.recv().await {
            let fatal = err.is_fatal();
            seen.push(err);
            if fatal {
                break;
            }
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_delivered_normalized() {
        let subscriber = Arc::new(MockLogSubscriber::new(vec![SubscribeOutcome::Live]));
        let source = EventSource::new(
            subscriber.clone(),
            vec![ProtocolSubscription::aave_v3(POOL)],
            config(5, 16),
        );

        let mut channels = source.start().await.unwrap();
        assert_eq!(source.state(), ConnectionState::Connected);

        subscriber.emit(liquidation_log(0x30));
        let event = channels.events.recv().await.unwrap();
        assert_eq!(event.debtor, Address::repeat_byte(0x30));
        assert_eq!(source.emitted(), 1);

        source.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_new_events() {
        let subscriber = Arc::new(MockLogSubscriber::new(vec![SubscribeOutcome::Live]));
        let source = EventSource::new(
            subscriber.clone(),
            vec![ProtocolSubscription::aave_v3(POOL)],
            config(5, 1),
        );
        let mut channels = source.start().await.unwrap();

        subscriber.emit(liquidation_log(0x31));
        subscriber.emit(liquidation_log(0x32));
        subscriber.emit(liquidation_log(0x33));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let first = channels.events.recv().await.unwrap();
        assert_eq!(first.debtor, Address::repeat_byte(0x31));
        assert_eq!(source.dropped(), 2);
        assert!(channels.events.try_recv().is_err());

        source.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_is_fatal() {
        // Initial subscription ends immediately, then every reconnect fails
        let subscriber = Arc::new(MockLogSubscriber::new(vec![SubscribeOutcome::Ended]));
        let source = EventSource::new(
            subscriber.clone(),
            vec![ProtocolSubscription::aave_v3(POOL)],
            config(5, 16),
        );
        let mut channels = source.start().await.unwrap();

        let errors = drain_errors(&mut channels.errors).await;
        assert_eq!(
            errors.last(),
            Some(&EventSourceError::ReconnectExhausted { attempts: 5 })
        );
        assert_eq!(source.state(), ConnectionState::Failed);
        // One initial subscription plus exactly five reconnection attempts
        assert_eq!(subscriber.subscribe_calls(), 6);

        // No further attempts after the fatal error
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(subscriber.subscribe_calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_reconnect_resets_counter() {
        let subscriber = Arc::new(MockLogSubscriber::new(vec![
            SubscribeOutcome::Ended,
            SubscribeOutcome::Fail,
            SubscribeOutcome::Fail,
            SubscribeOutcome::Ended,
            SubscribeOutcome::Fail,
            SubscribeOutcome::Fail,
            SubscribeOutcome::Live,
        ]));
        let source = EventSource::new(
            subscriber.clone(),
            vec![ProtocolSubscription::aave_v3(POOL)],
            config(3, 16),
        );
        let mut channels = source.start().await.unwrap();

        // Two failures, a reconnect that ends, two more failures, then live.
        // Never three consecutive failures, so the feed survives.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.state(), ConnectionState::Connected);
        assert_eq!(subscriber.subscribe_calls(), 7);

        subscriber.emit(liquidation_log(0x35));
        let event = channels.events.recv().await.unwrap();
        assert_eq!(event.debtor, Address::repeat_byte(0x35));
        assert!(channels
            .errors
            .try_recv()
            .map(|e| !e.is_fatal())
            .unwrap_or(true));

        source.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_failure_triggers_reconnect() {
        let subscriber = Arc::new(MockLogSubscriber::new(vec![
            SubscribeOutcome::Live,
            SubscribeOutcome::Live,
        ]));
        let source = EventSource::new(
            subscriber.clone(),
            vec![ProtocolSubscription::aave_v3(POOL)],
            config(5, 16),
        );
        let _channels = source.start().await.unwrap();

        subscriber.set_ping_ok(false);
        tokio::time::sleep(Duration::from_secs(121)).await;
        subscriber.set_ping_ok(true);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(subscriber.subscribe_calls(), 2);
        assert_eq!(source.state(), ConnectionState::Connected);
        source.stop();
    }

    #[tokio::test]
    async fn test_initial_failure_is_reported() {
        let subscriber = Arc::new(MockLogSubscriber::new(vec![SubscribeOutcome::Fail]));
        let source = EventSource::new(
            subscriber,
            vec![ProtocolSubscription::aave_v3(POOL)],
            config(5, 16),
        );

        let err = source.start().await.unwrap_err();
        assert!(matches!(err, EventSourceError::InitialConnection(_)));
        assert_eq!(source.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let subscriber = Arc::new(MockLogSubscriber::new(vec![SubscribeOutcome::Live]));
        let source = EventSource::new(
            subscriber,
            vec![ProtocolSubscription::aave_v3(POOL)],
            config(5, 16),
        );
        let _channels = source.start().await.unwrap();
        assert!(matches!(
            source.start().await,
            Err(EventSourceError::AlreadyStarted)
        ));

        source.stop();
        source.stop();
        assert_eq!(source.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resubscribes_every_protocol() {
        use SubscribeOutcome::{Ended, Live};
        let subscriber = Arc::new(MockLogSubscriber::new(vec![
            Ended, Ended, Ended, // initial connection drops
            Ended, Ended, Ended, // first reconnect drops again
            Live, Live, Live,
        ]));
        let source = EventSource::new(subscriber.clone(), all_protocols(), config(3, 16));
        let mut channels = source.start().await.unwrap();
        assert_eq!(subscriber.subscribe_calls(), 3);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(subscriber.subscribe_calls(), 6);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(subscriber.subscribe_calls(), 9);
        assert_eq!(source.state(), ConnectionState::Connected);

        assert_eq!(
            delivered_protocols(&subscriber, &mut channels).await,
            vec![ProtocolKind::AaveV3, ProtocolKind::CompoundV3, ProtocolKind::CompoundV2]
        );
        while let Ok(err) = channels.errors.try_recv() {
            assert!(!err.is_fatal(), "{err}");
        }

        source.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_feed_ending_resubscribes_all() {
        use SubscribeOutcome::{Ended, Live};
        let subscriber = Arc::new(MockLogSubscriber::new(vec![
            Live, Ended, Live, // the Comet feed drops on its own
            Live, Live, Live,
        ]));
        let source = EventSource::new(subscriber.clone(), all_protocols(), config(3, 16));
        let mut channels = source.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(subscriber.subscribe_calls(), 6);
        assert_eq!(source.state(), ConnectionState::Connected);
        assert_eq!(
            channels.errors.try_recv(),
            Ok(EventSourceError::Transport("subscription stream ended".to_string()))
        );

        // Only the new subscriptions deliver, once per protocol
        let kinds = delivered_protocols(&subscriber, &mut channels).await;
        assert_eq!(kinds.len(), 3);
        assert!(kinds.contains(&ProtocolKind::CompoundV3));
        assert!(channels.events.try_recv().is_err());

        source.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_resubscribe_is_a_failed_attempt() {
        use SubscribeOutcome::{Ended, Fail, Live};
        // The reconnect opens Aave, then Comet is refused
        let subscriber = Arc::new(MockLogSubscriber::new(vec![Ended, Ended, Ended, Live, Fail]));
        let source = EventSource::new(subscriber.clone(), all_protocols(), config(1, 16));
        let mut channels = source.start().await.unwrap();

        let errors = drain_errors(&mut channels.errors).await;
        let refused = errors
            .iter()
            .find_map(|e| match e {
                EventSourceError::Transport(msg) if msg != "subscription stream ended" => Some(msg),
                _ => None,
            })
            .unwrap();
        assert!(refused.contains(&ProtocolKind::CompoundV3.to_string()), "{refused}");
        assert_eq!(
            errors.last(),
            Some(&EventSourceError::ReconnectExhausted { attempts: 1 })
        );
        assert_eq!(source.state(), ConnectionState::Failed);
        assert_eq!(subscriber.subscribe_calls(), 5);

        // The Aave subscription from the failed attempt was discarded
        subscriber.emit(liquidation_log(0x36));
        assert!(channels.events.recv().await.is_none());
    }
}
