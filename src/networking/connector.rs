use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::sleep;
use tracing::{error, event, info, warn, Level};
use url::Url;

use crate::codec::{Codec, JsonRpcCodec};
use crate::config::ConnectorConfig;
use crate::error::Error;
use crate::keypair::Signer;
use crate::message::{Message, MessageBody};
use crate::networking::backoff::Backoff;
use crate::networking::connection::ConnectionWrapper;
use crate::networking::handshake::{AuthHeader, Challenge};
use crate::networking::ws_client::{ConnectionInitiator, WebSocketClient};
use crate::time::unix_seconds;

/// Business logic on the node side of the gateway sessions.
#[async_trait]
pub trait GatewayConnectorHandler: Send + Sync {
    async fn start(&self) -> crate::Result<()>;

    async fn close(&self) -> crate::Result<()>;

    /// Receives every validated message, in arrival order per gateway.
    async fn handle_gateway_message(&self, gateway_id: &str, msg: Message);
}

/// Signs the node's auth header and answers gateway challenges.
pub struct NodeAuthenticator {
    signer: Arc<dyn Signer>,
    don_id: String,
    url_to_id: HashMap<String, String>,
    min_challenge_len: usize,
    timestamp_tolerance_sec: u32,
}

impl NodeAuthenticator {
    pub fn new(config: &ConnectorConfig, signer: Arc<dyn Signer>) -> crate::Result<Self> {
        let mut url_to_id = HashMap::new();
        for gateway in config.gateways.iter() {
            let url = Url::parse(&gateway.url)?;
            url_to_id.insert(String::from(url.as_str()), gateway.id.clone());
        }
        Ok(NodeAuthenticator {
            signer,
            don_id: config.don_id.clone(),
            url_to_id,
            min_challenge_len: config.auth_min_challenge_len,
            timestamp_tolerance_sec: config.auth_timestamp_tolerance_sec,
        })
    }

    pub fn challenge_response_at(
        &self,
        url: &Url,
        challenge: &[u8],
        now: u32,
    ) -> crate::Result<Vec<u8>> {
        let elems = Challenge::deserialize(challenge)?;
        if elems.challenge_bytes.len() < self.min_challenge_len {
            return Err(Error::Handshake(format!(
                "challenge of {} bytes is shorter than {}",
                elems.challenge_bytes.len(),
                self.min_challenge_len
            )));
        }
        let skew = if elems.timestamp > now {
            elems.timestamp - now
        } else {
            now - elems.timestamp
        };
        if skew > self.timestamp_tolerance_sec {
            return Err(Error::Handshake(format!(
                "challenge timestamp {} is {}s away from now",
                elems.timestamp, skew
            )));
        }
        let expected_id = self
            .url_to_id
            .get(url.as_str())
            .ok_or_else(|| Error::Handshake(format!("no gateway configured for {}", url)))?;
        if &elems.gateway_id != expected_id {
            return Err(Error::Handshake(format!(
                "challenge from {} but {} serves {}",
                elems.gateway_id, url, expected_id
            )));
        }
        Ok(self.signer.sign(challenge)?.to_vec())
    }
}

impl ConnectionInitiator for NodeAuthenticator {
    fn new_auth_header(&self, url: &Url) -> crate::Result<Vec<u8>> {
        AuthHeader::new(unix_seconds(), &self.don_id, url.as_str())
            .serialize_with_sig(self.signer.as_ref())
    }

    fn challenge_response(&self, url: &Url, challenge: &[u8]) -> crate::Result<Vec<u8>> {
        self.challenge_response_at(url, challenge, unix_seconds())
    }
}

struct GatewayState {
    id: String,
    url: Url,
    conn: Arc<ConnectionWrapper>,
    connections: AtomicU64,
    backoff: Mutex<Backoff>,
}

/// Keeps one authenticated session open to every configured gateway and routes
/// traffic between those sessions and a [`GatewayConnectorHandler`].
///
/// Each gateway gets a read loop and a reconnect loop. Both stop when the connector
/// is closed; until then connection failures are retried with backoff.
pub struct GatewayConnector {
    config: ConnectorConfig,
    codec: Box<dyn Codec>,
    signer: Arc<dyn Signer>,
    handler: Arc<dyn GatewayConnectorHandler>,
    ws_client: WebSocketClient,
    gateways: HashMap<String, Arc<GatewayState>>,
    /// Dropped on close; every loop holds a subscription.
    notify_shutdown: Mutex<Option<broadcast::Sender<()>>>,
    /// Every loop holds a clone; `recv` returns `None` once all loops have exited.
    shutdown_complete_tx: Mutex<Option<mpsc::Sender<()>>>,
    shutdown_complete_rx: Mutex<mpsc::Receiver<()>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl GatewayConnector {
    pub fn new(
        config: ConnectorConfig,
        signer: Arc<dyn Signer>,
        handler: Arc<dyn GatewayConnectorHandler>,
    ) -> crate::Result<Arc<Self>> {
        config.validate()?;
        let backoff = Backoff::new(&config.backoff)?;
        let authenticator = NodeAuthenticator::new(&config, signer.clone())?;
        let ws_client = WebSocketClient::new(&config.ws_client, Arc::new(authenticator));

        let mut gateways = HashMap::new();
        for gateway in config.gateways.iter() {
            gateways.insert(
                gateway.id.clone(),
                Arc::new(GatewayState {
                    id: gateway.id.clone(),
                    url: Url::parse(&gateway.url)?,
                    conn: ConnectionWrapper::new(&gateway.id),
                    connections: AtomicU64::new(0),
                    backoff: Mutex::new(backoff.clone()),
                }),
            );
        }

        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        Ok(Arc::new(GatewayConnector {
            config,
            codec: Box::new(JsonRpcCodec),
            signer,
            handler,
            ws_client,
            gateways,
            notify_shutdown: Mutex::new(Some(notify_shutdown)),
            shutdown_complete_tx: Mutex::new(Some(shutdown_complete_tx)),
            shutdown_complete_rx: Mutex::new(shutdown_complete_rx),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    /// Starts the handler, then the read and reconnect loops of every gateway.
    pub async fn start(self: &Arc<Self>) -> crate::Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Config(String::from(
                "connector can only be started once",
            )));
        }
        self.handler.start().await?;

        let notify_shutdown = self.notify_shutdown.lock().await;
        let shutdown_complete_tx = self.shutdown_complete_tx.lock().await;
        if let (Some(notify_shutdown), Some(shutdown_complete_tx)) =
            (notify_shutdown.as_ref(), shutdown_complete_tx.as_ref())
        {
            for gateway in self.gateways.values() {
                tokio::spawn(self.clone().read_loop(
                    gateway.clone(),
                    notify_shutdown.subscribe(),
                    shutdown_complete_tx.clone(),
                ));
                tokio::spawn(self.clone().reconnect_loop(
                    gateway.clone(),
                    notify_shutdown.subscribe(),
                    shutdown_complete_tx.clone(),
                ));
            }
        }
        event!(
            Level::INFO,
            "connector for DON {} started with {} gateways",
            self.config.don_id,
            self.gateways.len()
        );
        Ok(())
    }

    async fn read_loop(
        self: Arc<Self>,
        gateway: Arc<GatewayState>,
        mut shutdown: broadcast::Receiver<()>,
        _shutdown_complete: mpsc::Sender<()>,
    ) {
        loop {
            let frame = tokio::select! {
                _ = shutdown.recv() => return,
                frame = gateway.conn.read() => frame,
            };
            let data = match frame {
                Some(data) => data,
                None => return,
            };
            let mut msg = match self.codec.decode_request(&data) {
                Ok(msg) => msg,
                Err(err) => {
                    error!("failed to decode message from gateway {}: {}", gateway.id, err);
                    continue;
                }
            };
            if let Err(err) = msg.validate() {
                error!("invalid message from gateway {}: {}", gateway.id, err);
                continue;
            }
            self.handler.handle_gateway_message(&gateway.id, msg).await;
        }
    }

    async fn reconnect_loop(
        self: Arc<Self>,
        gateway: Arc<GatewayState>,
        mut shutdown: broadcast::Receiver<()>,
        _shutdown_complete: mpsc::Sender<()>,
    ) {
        loop {
            let connected = tokio::select! {
                _ = shutdown.recv() => return,
                connected = self.ws_client.connect(&gateway.url) => connected,
            };
            match connected {
                Ok(stream) => {
                    gateway.connections.fetch_add(1, Ordering::SeqCst);
                    gateway.backoff.lock().await.reset();
                    info!("connected to gateway {} at {}", gateway.id, gateway.url);
                    let closed = gateway.conn.reset(stream).await;
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = closed => {
                            warn!("connection to gateway {} closed, reconnecting", gateway.id);
                        }
                    }
                }
                Err(err) => {
                    let delay = gateway.backoff.lock().await.next_delay();
                    error!(
                        "failed to connect to gateway {} at {}: {}; retrying in {:?}",
                        gateway.id, gateway.url, err, delay
                    );
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Writes `msg` to the gateway's live connection. Nothing is queued while disconnected.
    pub async fn send_to_gateway(&self, gateway_id: &str, msg: &Message) -> crate::Result<()> {
        let gateway = self
            .gateways
            .get(gateway_id)
            .ok_or_else(|| Error::UnknownGateway(String::from(gateway_id)))?;
        let data = self.codec.encode_response(msg)?;
        gateway.conn.write(data).await
    }

    /// Signs `body` as this node and sends it.
    pub async fn sign_and_send_to_gateway(
        &self,
        gateway_id: &str,
        body: MessageBody,
    ) -> crate::Result<()> {
        let mut msg = Message::new(body);
        msg.body.sender = self.config.node_address.to_lowercase();
        msg.sign_with(self.signer.as_ref())?;
        self.send_to_gateway(gateway_id, &msg).await
    }

    pub fn gateway_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.gateways.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn don_id(&self) -> &str {
        &self.config.don_id
    }

    pub fn node_address(&self) -> &str {
        &self.config.node_address
    }

    pub async fn is_connected(&self, gateway_id: &str) -> bool {
        match self.gateways.get(gateway_id) {
            Some(gateway) => gateway.conn.is_connected().await,
            None => false,
        }
    }

    /// How many sessions to `gateway_id` have been established so far.
    pub fn connection_count(&self, gateway_id: &str) -> u64 {
        self.gateways
            .get(gateway_id)
            .map(|gateway| gateway.connections.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Failed dials since the last established session to `gateway_id`.
    pub async fn backoff_attempt(&self, gateway_id: &str) -> Option<u32> {
        match self.gateways.get(gateway_id) {
            Some(gateway) => Some(gateway.backoff.lock().await.attempt()),
            None => None,
        }
    }

    /// Stops every loop, closes every connection, then closes the handler. Idempotent.
    pub async fn close(&self) -> crate::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("closing connector for DON {}", self.config.don_id);
        drop(self.notify_shutdown.lock().await.take());
        drop(self.shutdown_complete_tx.lock().await.take());
        for gateway in self.gateways.values() {
            gateway.conn.close().await;
        }
        let _ = self.shutdown_complete_rx.lock().await.recv().await;
        for gateway in self.gateways.values() {
            // a loop may have swapped a fresh connection in while shutting down
            gateway.conn.close().await;
        }
        if self.started.load(Ordering::SeqCst) {
            self.handler.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonRpcCodec;
    use crate::config::tests::connector_config;
    use crate::config::BackoffConfig;
    use crate::crypto::extract_signer;
    use crate::keypair::Keypair;
    use crate::test_utilities::eventually;
    use crate::test_utilities::make_signed_message;
    use crate::test_utilities::mocks::{MockGateway, RecordingGatewayHandler};
    use std::time::Duration;

    fn node_config(keypair: &Keypair, gateways: Vec<(&str, &str)>) -> ConnectorConfig {
        let mut config = connector_config(gateways);
        config.node_address = keypair.address();
        config.backoff = BackoffConfig {
            min_millis: 10,
            max_millis: 100,
            jitter: false,
        };
        config
    }

    fn make_connector(
        keypair: &Keypair,
        gateways: Vec<(&str, &str)>,
    ) -> (Arc<GatewayConnector>, Arc<RecordingGatewayHandler>) {
        let handler = Arc::new(RecordingGatewayHandler::default());
        let connector = GatewayConnector::new(
            node_config(keypair, gateways),
            Arc::new(keypair.clone()),
            handler.clone(),
        )
        .unwrap();
        (connector, handler)
    }

    async fn wait_connected(connector: &GatewayConnector, gateway_id: &str) {
        assert!(
            eventually(Duration::from_secs(5), || connector.is_connected(gateway_id)).await,
            "never connected to {}",
            gateway_id
        );
    }

    #[test]
    fn constructor_rejects_bad_config_test() {
        let keypair = Keypair::new();
        let mut empty_don = node_config(&keypair, vec![]);
        empty_don.don_id = String::new();
        let mut bad_address = node_config(&keypair, vec![]);
        bad_address.node_address = String::from("not-an-address");
        let invalid = vec![
            empty_don,
            bad_address,
            node_config(&keypair, vec![("g", "ws://localhost:1"), ("g", "ws://localhost:2")]),
            node_config(&keypair, vec![("a", "ws://localhost:1"), ("b", "ws://localhost:1")]),
        ];
        for config in invalid {
            let result = GatewayConnector::new(
                config,
                Arc::new(keypair.clone()),
                Arc::new(RecordingGatewayHandler::default()),
            );
            assert!(matches!(result, Err(Error::Config(_))));
        }
    }

    #[test]
    fn challenge_response_test() {
        let keypair = Keypair::new();
        let config = node_config(&keypair, vec![("gateway_1", "ws://localhost:8081/node")]);
        let authenticator = NodeAuthenticator::new(&config, Arc::new(keypair.clone())).unwrap();
        let url = Url::parse("ws://localhost:8081/node").unwrap();
        let now = 1_700_000_000;

        let challenge = Challenge::new(now, "gateway_1", vec![7; 16]).serialize();
        let response = authenticator
            .challenge_response_at(&url, &challenge, now + 3)
            .unwrap();
        assert_eq!(
            extract_signer(&response, &challenge).unwrap(),
            keypair.address_bytes()
        );

        let rejected = vec![
            Challenge::new(now, "gateway_1", vec![7; 9]).serialize(),
            Challenge::new(now - 11, "gateway_1", vec![7; 16]).serialize(),
            Challenge::new(now + 11, "gateway_1", vec![7; 16]).serialize(),
            Challenge::new(now, "gateway_2", vec![7; 16]).serialize(),
            vec![1, 2, 3],
        ];
        for challenge in rejected.iter() {
            assert!(matches!(
                authenticator.challenge_response_at(&url, challenge, now),
                Err(Error::Handshake(_))
            ));
        }

        let unknown = Url::parse("ws://elsewhere:1/node").unwrap();
        assert!(authenticator
            .challenge_response_at(&unknown, &challenge, now)
            .is_err());
    }

    #[tokio::test]
    async fn authenticates_with_gateway_test() {
        let keypair = Keypair::new();
        let mut gateway = MockGateway::start("gateway_1").await;
        let (connector, handler) = make_connector(&keypair, vec![("gateway_1", gateway.url.as_str())]);
        connector.start().await.unwrap();
        assert!(handler.started.load(Ordering::SeqCst));

        let session = gateway.next_session().await;
        assert_eq!(session.auth_header.don_id, "don-1");
        assert_eq!(session.auth_header.gateway_url, gateway.url);
        assert!(session.auth_header.timestamp.abs_diff(unix_seconds()) <= 5);
        assert_eq!(session.auth_signer, keypair.address_bytes());
        assert_eq!(session.challenge_signer, keypair.address_bytes());

        connector.close().await.unwrap();
        assert!(handler.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn refuses_challenge_for_another_gateway_test() {
        let keypair = Keypair::new();
        let mut gateway = MockGateway::start("impostor").await;
        let (connector, _handler) = make_connector(&keypair, vec![("gateway_1", gateway.url.as_str())]);
        connector.start().await.unwrap();

        assert!(gateway.no_session_within(Duration::from_millis(300)).await);
        assert!(!connector.is_connected("gateway_1").await);
        assert_eq!(connector.connection_count("gateway_1"), 0);
        connector.close().await.unwrap();
    }

    #[tokio::test]
    async fn dispatches_valid_messages_in_order_test() {
        let keypair = Keypair::new();
        let user = Keypair::new();
        let mut gateway = MockGateway::start("gateway_1").await;
        let (connector, handler) = make_connector(&keypair, vec![("gateway_1", gateway.url.as_str())]);
        connector.start().await.unwrap();
        let mut session = gateway.next_session().await;

        let codec = JsonRpcCodec;
        let mut forged = make_signed_message(&user, "forged", "compute", r#"{"a":1}"#);
        forged.body.sender = Keypair::new().address();

        session.send(b"not json".to_vec()).await;
        session.send(codec.encode_request(&forged).unwrap()).await;
        for id in ["1", "2"].iter() {
            let msg = make_signed_message(&user, id, "compute", r#"{"a":1}"#);
            session.send(codec.encode_request(&msg).unwrap()).await;
        }

        let (gateway_id, first) = handler.next_message().await;
        assert_eq!(gateway_id, "gateway_1");
        assert_eq!(first.body.message_id, "1");
        assert_eq!(first.body.sender, user.address());
        let (_, second) = handler.next_message().await;
        assert_eq!(second.body.message_id, "2");

        connector.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_to_gateway_test() {
        let keypair = Keypair::new();
        let mut gateway = MockGateway::start("gateway_1").await;
        let (connector, _handler) = make_connector(&keypair, vec![("gateway_1", gateway.url.as_str())]);

        let reply = make_signed_message(&keypair, "7", "compute", r#"{"ok":true}"#);
        assert!(matches!(
            connector.send_to_gateway("gateway_1", &reply).await,
            Err(Error::NotConnected(_))
        ));
        assert!(matches!(
            connector.send_to_gateway("nope", &reply).await,
            Err(Error::UnknownGateway(_))
        ));

        connector.start().await.unwrap();
        let mut session = gateway.next_session().await;
        wait_connected(&connector, "gateway_1").await;

        connector.send_to_gateway("gateway_1", &reply).await.unwrap();
        let received = JsonRpcCodec.decode_response(&session.recv().await).unwrap();
        assert_eq!(received, reply);

        connector
            .sign_and_send_to_gateway("gateway_1", reply.body.clone())
            .await
            .unwrap();
        let mut signed = JsonRpcCodec.decode_response(&session.recv().await).unwrap();
        signed.validate().unwrap();
        assert_eq!(signed.body.sender, keypair.address());

        connector.close().await.unwrap();
        assert!(connector.send_to_gateway("gateway_1", &reply).await.is_err());
    }

    #[tokio::test]
    async fn reconnects_after_drop_test() {
        let keypair = Keypair::new();
        let mut gateway = MockGateway::start("gateway_1").await;
        let (connector, handler) = make_connector(&keypair, vec![("gateway_1", gateway.url.as_str())]);
        connector.start().await.unwrap();

        let first = gateway.next_session().await;
        wait_connected(&connector, "gateway_1").await;
        drop(first);

        let mut second = gateway.next_session().await;
        assert!(
            eventually(Duration::from_secs(5), || {
                let connector = connector.clone();
                async move {
                    connector.connection_count("gateway_1") == 2
                        && connector.is_connected("gateway_1").await
                }
            })
            .await
        );

        let msg = make_signed_message(&Keypair::new(), "after-reconnect", "compute", "{}");
        second.send(JsonRpcCodec.encode_request(&msg).unwrap()).await;
        assert_eq!(handler.next_message().await.1.body.message_id, "after-reconnect");

        connector.close().await.unwrap();
    }

    #[tokio::test]
    async fn keeps_retrying_unreachable_gateway_test() {
        let keypair = Keypair::new();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}/node", listener.local_addr().unwrap());
        drop(listener);

        let (connector, _handler) = make_connector(&keypair, vec![("gateway_1", url.as_str())]);
        connector.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.connection_count("gateway_1"), 0);
        connector.close().await.unwrap();
    }

    #[tokio::test]
    async fn backoff_resets_once_gateway_comes_up_test() {
        let keypair = Keypair::new();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let url = format!("ws://{}/node", addr);

        let (connector, _handler) = make_connector(&keypair, vec![("gateway_1", url.as_str())]);
        assert_eq!(connector.backoff_attempt("gateway_1").await, Some(0));
        assert_eq!(connector.backoff_attempt("nope").await, None);
        connector.start().await.unwrap();
        assert!(
            eventually(Duration::from_secs(5), || {
                let connector = connector.clone();
                async move { connector.backoff_attempt("gateway_1").await >= Some(3) }
            })
            .await
        );

        let mut gateway = MockGateway::start_at(&addr, "gateway_1").await;
        let first = gateway.next_session().await;
        wait_connected(&connector, "gateway_1").await;
        assert_eq!(connector.backoff_attempt("gateway_1").await, Some(0));

        // a dropped session is redialled without waiting out a delay
        drop(first);
        let _second = gateway.next_session().await;
        assert_eq!(connector.backoff_attempt("gateway_1").await, Some(0));

        connector.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_test() {
        let keypair = Keypair::new();
        let gateway = MockGateway::start("gateway_1").await;
        let (connector, handler) = make_connector(&keypair, vec![("gateway_1", gateway.url.as_str())]);
        assert_eq!(connector.gateway_ids(), vec![String::from("gateway_1")]);
        assert_eq!(connector.don_id(), "don-1");

        connector.start().await.unwrap();
        assert!(connector.start().await.is_err());
        connector.close().await.unwrap();
        connector.close().await.unwrap();
        assert!(handler.closed.load(Ordering::SeqCst));
        assert!(!connector.is_connected("gateway_1").await);
    }
}
