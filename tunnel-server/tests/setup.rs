use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt as _, StreamExt as _};
use metrics_exporter_prometheus::PrometheusBuilder;
use secrecy::SecretString;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tokio_util::sync::CancellationToken;
use tunnel_server::{
    TunnelServerBuilder,
    config::ServerConfig,
    services::{
        connection_manager::ConnectionManager,
        registry::{RegistryService, memory::MemoryRegistry},
        token_verifier::JwtTokenVerifier,
    },
};
use tunnel_types::{KioskId, wire::TunnelRequest};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub type KioskSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestTunnelServer {
    pub addr: SocketAddr,
    pub registry: RegistryService,
    pub verifier: Arc<JwtTokenVerifier>,
    pub connection_manager: Arc<ConnectionManager>,
    pub client: reqwest::Client,
    _cancellation_token: CancellationToken,
}

impl TestTunnelServer {
    pub async fn start(
        allow_duplicate_connections: bool,
        kiosk_response_timeout: Duration,
    ) -> eyre::Result<Self> {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse()?,
            jwt_secret: SecretString::from("test-secret"),
            kiosk_response_timeout,
            allow_duplicate_connections,
            ws_max_message_size: 1024 * 1024,
            status_sweep_interval: Duration::from_secs(60),
            max_wait_time_shutdown: Duration::from_secs(5),
        };
        let registry: RegistryService = Arc::new(MemoryRegistry::new());
        let verifier = Arc::new(JwtTokenVerifier::new(&config.jwt_secret));
        // a per-test recorder so the suites don't fight over the global one
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let cancellation_token = CancellationToken::new();

        let builder = TunnelServerBuilder::init(
            &config,
            Arc::clone(&registry),
            verifier.clone(),
            metrics_handle,
            cancellation_token.clone(),
        );
        let connection_manager = builder.connection_manager();
        let (router, _status_sweeper) = builder.build();

        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        let addr = listener.local_addr()?;
        tokio::spawn({
            let cancellation_token = cancellation_token.clone();
            async move {
                let _ = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
                    .await;
            }
        });

        Ok(Self {
            addr,
            registry,
            verifier,
            connection_manager,
            client: reqwest::Client::new(),
            _cancellation_token: cancellation_token,
        })
    }

    /// Registers a kiosk and returns its credential.
    pub async fn create_kiosk(&self, id: &str) -> eyre::Result<String> {
        let kiosk = KioskId::from(id);
        let token = self.verifier.issue(&kiosk, Duration::from_secs(3600))?;
        self.registry.create_kiosk(&kiosk, "", &token).await?;
        Ok(token)
    }

    /// Opens a kiosk socket with the given credential.
    pub async fn connect_kiosk(&self, token: &str) -> eyre::Result<KioskSocket> {
        let url = format!("ws://{}/ws?token={token}", self.addr);
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(ws)
    }

    /// Blocks until the server holds a live connection for the kiosk.
    pub async fn wait_until_connected(&self, id: &str) -> eyre::Result<()> {
        let kiosk = KioskId::from(id);
        tokio::time::timeout(TEST_TIMEOUT, async {
            while !self.connection_manager.is_connected(&kiosk) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        Ok(())
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// POSTs to `/send` addressed at `kiosk_id` and returns the JSON body.
    pub async fn send(&self, kiosk_id: &str, body: Value) -> eyre::Result<(u16, Value)> {
        let response = self
            .client
            .post(self.url("/send"))
            .header("Header-Kiosk-Id", kiosk_id)
            .header("Header-Operation-Type", "payment")
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.json().await?;
        Ok((status, body))
    }
}

/// Answers every tunnel frame via `reply`, a function from the parsed
/// request to the reply body (the `request_id` is merged in automatically
/// when the reply body does not carry one).
pub fn spawn_kiosk_replier(
    mut ws: KioskSocket,
    reply: impl Fn(&TunnelRequest) -> Value + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Ok(message)) = ws.next().await {
            match message {
                tungstenite::Message::Text(frame) => {
                    let request: TunnelRequest =
                        serde_json::from_str(frame.as_str()).expect("server sends valid envelopes");
                    let mut body = reply(&request);
                    let object = body.as_object_mut().expect("reply is an object");
                    object
                        .entry("request_id")
                        .or_insert_with(|| serde_json::json!(request.request_id));
                    let serialized = serde_json::to_string(&body).expect("reply serializes");
                    if ws
                        .send(tungstenite::Message::text(serialized))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                tungstenite::Message::Close(_) => break,
                _ => {}
            }
        }
    })
}
