//! Tunnel session lifecycle: connect, pump, reconnect.
//!
//! The proxy dials out to the tunnel server and stays connected for as long
//! as the process runs. Any failure - refused connect, handshake timeout,
//! broken read, missed pong - drops the session and schedules a reconnect
//! with exponential backoff (1 s doubling up to 60 s, reset on a successful
//! open). Queued replies from the previous life of the connection are
//! flushed before new frames are processed.
//!
//! Frames are dispatched concurrently: the read loop spawns one task per
//! inbound frame and keeps reading, so a slow gateway call never blocks
//! close detection or other requests. Replies travel through the
//! [`ReplyRouter`], which writes into the live session when one exists and
//! falls back to the offline queue otherwise.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use backon::{BackoffBuilder as _, ExponentialBuilder};
use eyre::Context as _;
use futures::{
    SinkExt as _, StreamExt as _,
    stream::{SplitSink, SplitStream},
};
use parking_lot::Mutex;
use secrecy::ExposeSecret as _;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{
        self, Bytes,
        protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ProxyConfig,
    pump::MessagePump,
    queue::{OFFLINE_QUEUE_CAPACITY, OfflineQueue},
    stats::ProxyStats,
};

type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WebSocket, tungstenite::Message>;
type WsStream = SplitStream<WebSocket>;

const REPLY_CHANNEL_CAPACITY: usize = 32;

/// Routes finished replies to the live session, or to the offline queue when
/// the tunnel is down.
pub(crate) struct ReplyRouter {
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    queue: Arc<OfflineQueue>,
    stats: Arc<ProxyStats>,
}

impl ReplyRouter {
    pub(crate) fn new(queue: Arc<OfflineQueue>, stats: Arc<ProxyStats>) -> Self {
        Self {
            outbound: Mutex::new(None),
            queue,
            stats,
        }
    }

    fn attach(&self, sender: mpsc::Sender<String>) {
        *self.outbound.lock() = Some(sender);
    }

    fn detach(&self) {
        *self.outbound.lock() = None;
    }

    /// Hands a serialized reply to the live session, or queues it.
    pub(crate) async fn deliver(&self, frame: String) {
        let sender = self.outbound.lock().clone();
        match sender {
            Some(sender) => {
                if let Err(mpsc::error::SendError(frame)) = sender.send(frame).await {
                    // the session died while we were waiting
                    self.enqueue(frame);
                }
            }
            None => self.enqueue(frame),
        }
    }

    fn enqueue(&self, frame: String) {
        if self.queue.push_back(frame) {
            tracing::warn!(
                "tunnel down, queued message ({}/{OFFLINE_QUEUE_CAPACITY})",
                self.queue.len()
            );
        } else {
            tracing::error!(
                "queue full ({OFFLINE_QUEUE_CAPACITY}/{OFFLINE_QUEUE_CAPACITY}), dropping message"
            );
            self.stats.inc_errors();
        }
    }
}

pub(crate) struct ReconnectorTaskArgs {
    pub(crate) config: Arc<ProxyConfig>,
    pub(crate) pump: Arc<MessagePump>,
    pub(crate) router: Arc<ReplyRouter>,
    pub(crate) queue: Arc<OfflineQueue>,
    pub(crate) stats: Arc<ProxyStats>,
    pub(crate) connected: Arc<AtomicBool>,
    pub(crate) cancellation_token: CancellationToken,
}

/// Runs the connect/pump/reconnect loop until cancelled.
pub(crate) async fn reconnector_task(args: ReconnectorTaskArgs) -> eyre::Result<()> {
    let ReconnectorTaskArgs {
        config,
        pump,
        router,
        queue,
        stats,
        connected,
        cancellation_token,
    } = args;

    let mut backoff = new_backoff(&config);
    while !cancellation_token.is_cancelled() {
        match connect(&config).await {
            Ok(ws) => {
                tracing::info!("connected to tunnel server");
                connected.store(true, Ordering::Relaxed);
                // a successful open resets the backoff to its minimum
                backoff = new_backoff(&config);

                let result = run_session(
                    ws,
                    &pump,
                    &router,
                    &queue,
                    &stats,
                    &config,
                    &cancellation_token,
                )
                .await;
                connected.store(false, Ordering::Relaxed);
                if cancellation_token.is_cancelled() {
                    break;
                }
                stats.inc_reconnections();
                match result {
                    Ok(()) => tracing::warn!("connection closed by server"),
                    Err(err) => tracing::warn!("connection lost: {err:?}"),
                }
            }
            Err(err) => {
                tracing::error!("connection failed: {err:?}");
            }
        }

        let delay = backoff.next().unwrap_or(config.reconnect_max_delay);
        tracing::warn!("reconnecting in {delay:?}...");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancellation_token.cancelled() => break,
        }
    }
    tracing::info!("reconnector stopped");
    Ok(())
}

fn new_backoff(config: &ProxyConfig) -> impl Iterator<Item = std::time::Duration> {
    ExponentialBuilder::default()
        .with_min_delay(config.reconnect_min_delay)
        .with_max_delay(config.reconnect_max_delay)
        .without_max_times()
        .build()
}

/// Opens the WebSocket with the bearer credential in the query string.
async fn connect(config: &ProxyConfig) -> eyre::Result<WebSocket> {
    tracing::info!("connecting to tunnel server: {}", config.server_url);
    let url = format!(
        "{}?token={}",
        config.server_url,
        config.token.expose_secret()
    );
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(tunnel_types::wire::MAX_FRAME_SIZE));
    let (ws, _) = tokio::time::timeout(
        config.connect_timeout,
        connect_async_with_config(url, Some(ws_config), false),
    )
    .await
    .map_err(|_| eyre::eyre!("connection timeout"))?
    .context("while connecting to tunnel server")?;
    Ok(ws)
}

/// One connected session: flush the offline queue, then serve frames until
/// the connection dies or the process shuts down.
async fn run_session(
    ws: WebSocket,
    pump: &Arc<MessagePump>,
    router: &Arc<ReplyRouter>,
    queue: &OfflineQueue,
    stats: &Arc<ProxyStats>,
    config: &ProxyConfig,
    cancellation_token: &CancellationToken,
) -> eyre::Result<()> {
    let (mut sink, stream) = ws.split();

    let (reply_tx, mut reply_rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
    router.attach(reply_tx);
    flush_queue(&mut sink, queue, stats).await;

    let result = serve(
        &mut sink,
        stream,
        &mut reply_rx,
        pump,
        router,
        stats,
        config,
        cancellation_token,
    )
    .await;

    // replies finished after this point go to the offline queue, together
    // with anything still buffered for this session
    router.detach();
    reply_rx.close();
    while let Ok(frame) = reply_rx.try_recv() {
        router.enqueue(frame);
    }
    result
}

#[expect(clippy::too_many_arguments)]
async fn serve(
    sink: &mut WsSink,
    mut stream: WsStream,
    reply_rx: &mut mpsc::Receiver<String>,
    pump: &Arc<MessagePump>,
    router: &Arc<ReplyRouter>,
    stats: &Arc<ProxyStats>,
    config: &ProxyConfig,
    cancellation_token: &CancellationToken,
) -> eyre::Result<()> {
    let mut ping_interval = tokio::time::interval(config.ping_interval);
    // the connect handshake just finished, skip the immediate tick
    ping_interval.tick().await;
    let mut awaiting_pong: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                tracing::info!("closing tunnel connection");
                let _ = sink
                    .send(tungstenite::Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "shutting down".into(),
                    })))
                    .await;
                return Ok(());
            }
            _ = ping_interval.tick() => {
                if let Some(since) = awaiting_pong
                    && since.elapsed() > config.pong_timeout
                {
                    eyre::bail!("no pong within {:?} - connection stale", config.pong_timeout);
                }
                sink.send(tungstenite::Message::Ping(Bytes::new()))
                    .await
                    .context("while sending ping")?;
                if awaiting_pong.is_none() {
                    awaiting_pong = Some(Instant::now());
                }
            }
            reply = reply_rx.recv() => {
                // the loop holds both channel ends, recv cannot return None
                let Some(frame) = reply else { return Ok(()) };
                if let Err(err) = sink.send(tungstenite::Message::text(frame.clone())).await {
                    router.enqueue(frame);
                    return Err(err).context("while sending reply");
                }
                stats.inc_sent();
            }
            message = stream.next() => {
                match message {
                    None => return Ok(()),
                    Some(Err(err)) => return Err(err).context("while reading from tunnel"),
                    Some(Ok(tungstenite::Message::Text(frame))) => {
                        let pump = Arc::clone(pump);
                        let router = Arc::clone(router);
                        tokio::spawn(async move {
                            let reply = pump.handle_frame(frame.as_str()).await;
                            let serialized =
                                serde_json::to_string(&reply).expect("reply serializes");
                            router.deliver(serialized).await;
                        });
                    }
                    Some(Ok(tungstenite::Message::Pong(_))) => {
                        awaiting_pong = None;
                    }
                    // tungstenite answers pings for us
                    Some(Ok(tungstenite::Message::Ping(_))) => {}
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        tracing::warn!("server closed the connection: {frame:?}");
                        return Ok(());
                    }
                    Some(Ok(other)) => {
                        tracing::debug!("ignoring unexpected frame: {other:?}");
                    }
                }
            }
        }
    }
}

/// Delivers queued replies from before the disconnect, oldest first.
///
/// A failed send puts the frame back at the head and aborts the flush; the
/// read loop will notice the broken socket right after.
async fn flush_queue(sink: &mut WsSink, queue: &OfflineQueue, stats: &ProxyStats) {
    if queue.is_empty() {
        return;
    }
    tracing::info!("flushing {} queued messages...", queue.len());
    while let Some(frame) = queue.pop_front() {
        if let Err(err) = sink.send(tungstenite::Message::text(frame.clone())).await {
            tracing::error!("failed to send queued message: {err}");
            queue.push_front(frame);
            return;
        }
        stats.inc_sent();
        tracing::info!("sent queued message ({} remaining)", queue.len());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config_with_backoff(min: Duration, max: Duration) -> ProxyConfig {
        ProxyConfig {
            server_url: "ws://127.0.0.1:1/ws".to_owned(),
            token: secrecy::SecretString::from("token"),
            routing_config: "routing_config.yaml".into(),
            health_bind_addr: "127.0.0.1:0".parse().expect("valid addr"),
            connect_timeout: Duration::from_secs(15),
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
            reconnect_min_delay: min,
            reconnect_max_delay: max,
            stats_interval: Duration::from_secs(3600),
            max_wait_time_shutdown: Duration::from_secs(10),
        }
    }

    #[test]
    fn backoff_doubles_and_saturates_at_the_cap() {
        let config = config_with_backoff(Duration::from_secs(1), Duration::from_secs(60));
        let delays: Vec<_> = new_backoff(&config).take(8).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16, 32, 60, 60].map(Duration::from_secs)
        );
    }

    #[tokio::test]
    async fn detached_router_queues_replies() {
        let queue = Arc::new(OfflineQueue::default());
        let stats = Arc::new(ProxyStats::default());
        let router = ReplyRouter::new(Arc::clone(&queue), Arc::clone(&stats));

        router.deliver("reply-1".to_owned()).await;
        assert_eq!(queue.len(), 1);

        // attached: the reply goes to the channel, not the queue
        let (tx, mut rx) = mpsc::channel(4);
        router.attach(tx);
        router.deliver("reply-2".to_owned()).await;
        assert_eq!(rx.try_recv().as_deref(), Ok("reply-2"));
        assert_eq!(queue.len(), 1);

        router.detach();
        router.deliver("reply-3".to_owned()).await;
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn router_counts_dropped_replies_on_overflow() {
        let queue = Arc::new(OfflineQueue::default());
        let stats = Arc::new(ProxyStats::default());
        let router = ReplyRouter::new(Arc::clone(&queue), Arc::clone(&stats));

        for i in 0..crate::queue::OFFLINE_QUEUE_CAPACITY {
            router.deliver(format!("reply-{i}")).await;
        }
        assert_eq!(stats.snapshot().errors, 0);

        router.deliver("overflow".to_owned()).await;
        assert_eq!(queue.len(), crate::queue::OFFLINE_QUEUE_CAPACITY);
        assert_eq!(stats.snapshot().errors, 1);
    }
}
