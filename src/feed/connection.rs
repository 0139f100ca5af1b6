// =============================================================================
// Feed Connection: connect, subscribe, heartbeat, decode, reconnect
// =============================================================================
//
//   Disconnected -> Connecting -> Connected -> Backoff -> Connecting -> ...
//
// One task owns the loop. Inbound binary frames are handled synchronously on
// arrival (decode -> aggregate -> drain -> publish), so per-message work stays
// O(1). A remote close, read/send error or heartbeat timeout drops back to
// Backoff; the delay resets once a connection reaches Connected.
//
// The loop ends when the shutdown watch flips to `true` (checked while
// connecting, streaming and sleeping) or when the endpoint rejects the
// credentials, which no amount of retrying will fix.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::backoff::Backoff;
use super::decoder::{decode_packet, Decoded, TickRecord};
use super::heartbeat::{Heartbeat, HeartbeatAction};
use super::subscription::{feed_url, SubscriptionRequest};
use crate::app_state::{AppState, FeedStatus};
use crate::error::FeedError;
use crate::market_data::{CandleAggregator, TickOutcome};
use crate::runtime_config::{Credentials, RuntimeConfig};

/// How often the heartbeat is evaluated while connected.
const HEARTBEAT_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
    Stopped,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Backoff => write!(f, "Backoff"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tick pipeline
// ---------------------------------------------------------------------------

/// Decode -> aggregate -> drain -> publish for one binary frame.
pub struct TickPipeline {
    aggregator: CandleAggregator,
    state: Arc<AppState>,
}

impl TickPipeline {
    pub fn new(aggregator: CandleAggregator, state: Arc<AppState>) -> Self {
        Self { aggregator, state }
    }

    /// Handle one binary frame. Returns the number of candles published.
    pub fn handle_packet(&mut self, bytes: &[u8]) -> usize {
        let status = &self.state.feed_status;
        match decode_packet(bytes) {
            Ok(Decoded::Tick(tick)) => self.handle_tick(tick),
            Ok(Decoded::Ignored { feed_code }) => {
                FeedStatus::bump(&status.packets_ignored);
                trace!(feed_code, len = bytes.len(), "non-ticker packet ignored");
                0
            }
            Err(e) => {
                FeedStatus::bump(&status.decode_errors);
                debug!(error = %e, len = bytes.len(), "packet dropped");
                0
            }
        }
    }

    fn handle_tick(&mut self, tick: TickRecord) -> usize {
        let status = &self.state.feed_status;
        let outcome = self.aggregator.add_tick(tick.price, tick.exchange_timestamp);
        if let TickOutcome::Rejected(reason) = outcome {
            FeedStatus::bump(&status.ticks_rejected);
            warn!(
                ?reason,
                price = tick.price,
                exchange_ts = tick.exchange_timestamp,
                "tick rejected"
            );
            return 0;
        }
        status.record_tick(tick.exchange_timestamp);

        let completed = self.aggregator.drain_completed();
        let published = completed.len();
        if published > 0 {
            for c in &completed {
                info!(
                    timestamp = %c.bucket_start,
                    open = c.open,
                    high = c.high,
                    low = c.low,
                    close = c.close,
                    "candle closed"
                );
            }
            self.state.candle_store.append(completed);
            status
                .candles_published
                .fetch_add(published as u64, std::sync::atomic::Ordering::Relaxed);
            self.state.increment_version();
        }
        self.state
            .candle_store
            .set_live(self.aggregator.current().cloned());
        published
    }
}

// ---------------------------------------------------------------------------
// Connection manager
// ---------------------------------------------------------------------------

enum SessionEnd {
    Shutdown,
    Failed(String),
}

pub struct FeedConnection {
    config: RuntimeConfig,
    url: Url,
    subscription: SubscriptionRequest,
    pipeline: TickPipeline,
    backoff: Backoff,
    state: Arc<AppState>,
}

impl FeedConnection {
    pub fn new(
        config: RuntimeConfig,
        tz: Tz,
        credentials: &Credentials,
        state: Arc<AppState>,
    ) -> Result<Self, FeedError> {
        let url = feed_url(
            &config.endpoint,
            config.protocol_version,
            config.auth_type,
            credentials,
        )?;
        let subscription = SubscriptionRequest::ticker(
            config.exchange_segment.clone(),
            config.security_id.clone(),
        );
        let aggregator = CandleAggregator::new(config.timeframe_secs, tz);
        let backoff = Backoff::new(config.reconnect_initial(), config.reconnect_max());

        Ok(Self {
            pipeline: TickPipeline::new(aggregator, state.clone()),
            config,
            url,
            subscription,
            backoff,
            state,
        })
    }

    fn transition(&self, next: ConnectionState) {
        let prev = self.state.feed_status.state();
        if prev != next {
            debug!(from = %prev, to = %next, "feed state transition");
        }
        self.state.feed_status.set_state(next);
    }

    /// Run until shutdown or a non-retryable failure.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), FeedError> {
        let endpoint = self.config.endpoint.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.transition(ConnectionState::Connecting);
            info!(endpoint = %endpoint, "connecting to market feed");

            let connect = tokio::time::timeout(
                self.config.connect_timeout(),
                connect_async(self.url.as_str()),
            );
            let attempt = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                res = connect => res,
            };

            match attempt {
                Ok(Ok((stream, _response))) => {
                    self.transition(ConnectionState::Connected);
                    FeedStatus::bump(&self.state.feed_status.connections);
                    self.backoff.reset();
                    info!(endpoint = %endpoint, "market feed connected");

                    match self.run_session(stream, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Failed(reason) => {
                            FeedStatus::bump(&self.state.feed_status.disconnects);
                            warn!(reason = %reason, "market feed disconnected");
                            self.state.feed_status.record_error(reason);
                        }
                    }
                }
                Ok(Err(e)) => {
                    if let Some(status) = auth_rejection(&e) {
                        error!(status, "feed rejected credentials; not retrying");
                        self.state
                            .feed_status
                            .record_error(format!("authentication rejected (HTTP {status})"));
                        self.transition(ConnectionState::Stopped);
                        return Err(FeedError::AuthRejected { status });
                    }
                    warn!(error = %e, "market feed connect failed");
                    self.state.feed_status.record_error(format!("connect failed: {e}"));
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.config.connect_timeout_secs,
                        "market feed connect timed out"
                    );
                    self.state.feed_status.record_error("connect timed out");
                }
            }

            self.transition(ConnectionState::Backoff);
            let delay = self.backoff.next_delay();
            self.state
                .feed_status
                .record_backoff(self.backoff.attempt(), delay);
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.backoff.attempt(),
                "reconnecting after backoff"
            );
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.transition(ConnectionState::Stopped);
        info!("market feed stopped");
        Ok(())
    }

    async fn run_session(
        &mut self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        let request = match self.subscription.to_json() {
            Ok(json) => json,
            Err(e) => return SessionEnd::Failed(format!("failed to encode subscription: {e}")),
        };
        if let Err(e) = write.send(Message::Text(request)).await {
            return SessionEnd::Failed(format!("subscription send failed: {e}"));
        }
        info!(
            segment = %self.config.exchange_segment,
            security_id = %self.config.security_id,
            "subscription sent"
        );

        let mut heartbeat = Heartbeat::new(
            self.config.heartbeat_interval(),
            self.config.heartbeat_timeout(),
            Instant::now(),
        );
        let mut heartbeat_check = tokio::time::interval(HEARTBEAT_POLL);
        heartbeat_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Binary(bytes))) => {
                        self.pipeline.handle_packet(&bytes);
                    }
                    Some(Ok(Message::Pong(_))) => heartbeat.record_pong(),
                    // tungstenite queues the Pong reply itself.
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Text(text))) => {
                        debug!(len = text.len(), "text frame ignored");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Failed(format!("remote close: {frame:?}"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Failed(format!("read error: {e}")),
                    None => return SessionEnd::Failed("stream ended".to_string()),
                },

                _ = heartbeat_check.tick() => match heartbeat.check(Instant::now()) {
                    HeartbeatAction::Idle => {}
                    HeartbeatAction::SendPing => {
                        if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                            return SessionEnd::Failed(format!("ping send failed: {e}"));
                        }
                        heartbeat.record_ping_sent(Instant::now());
                    }
                    HeartbeatAction::TimedOut => {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Failed("heartbeat timeout".to_string());
                    }
                },
            }
        }
    }
}

/// HTTP status of a handshake that refused our credentials.
fn auth_rejection(err: &WsError) -> Option<u16> {
    match err {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            matches!(status, 401 | 403).then_some(status)
        }
        _ => None,
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
