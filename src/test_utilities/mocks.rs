use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use crate::crypto::{extract_signer, generate_random_bytes, GatewayAddress};
use crate::handler::Don;
use crate::message::Message;
use crate::networking::connector::GatewayConnectorHandler;
use crate::networking::handshake::{AuthHeader, Challenge};
use crate::networking::ws_client::CHALLENGE_HEADER;
use crate::time::unix_seconds;

/// One node session accepted by a [`MockGateway`], after the challenge exchange.
pub struct MockGatewaySession {
    pub auth_header: AuthHeader,
    pub auth_signer: GatewayAddress,
    pub challenge_signer: GatewayAddress,
    pub stream: WebSocketStream<TcpStream>,
}

impl MockGatewaySession {
    pub async fn send(&mut self, data: Vec<u8>) {
        futures::SinkExt::send(&mut self.stream, WsMessage::Binary(data))
            .await
            .unwrap();
    }

    /// Next data frame from the node.
    pub async fn recv(&mut self) -> Vec<u8> {
        loop {
            match timeout(Duration::from_secs(5), self.stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap()
            {
                WsMessage::Binary(data) => return data,
                WsMessage::Text(text) => return text.into_bytes(),
                _ => continue,
            }
        }
    }
}

/// A gateway endpoint on localhost that issues challenges in the name of `gateway_id`.
pub struct MockGateway {
    pub url: String,
    sessions: mpsc::UnboundedReceiver<MockGatewaySession>,
    accept_task: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start(gateway_id: &str) -> MockGateway {
        MockGateway::start_at("127.0.0.1:0", gateway_id).await
    }

    /// Like `start`, on a fixed address such as one a node is already dialling.
    pub async fn start_at(addr: &str, gateway_id: &str) -> MockGateway {
        let listener = TcpListener::bind(addr).await.unwrap();
        let url = format!("ws://{}/node", listener.local_addr().unwrap());
        let (sessions_tx, sessions) = mpsc::unbounded_channel();
        let gateway_id = String::from(gateway_id);

        let accept_task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let sessions_tx = sessions_tx.clone();
                let gateway_id = gateway_id.clone();
                tokio::spawn(async move {
                    if let Some(session) = MockGateway::handshake(tcp, &gateway_id).await {
                        let _ = sessions_tx.send(session);
                    }
                });
            }
        });

        MockGateway {
            url,
            sessions,
            accept_task,
        }
    }

    async fn handshake(tcp: TcpStream, gateway_id: &str) -> Option<MockGatewaySession> {
        let challenge = Challenge::new(unix_seconds(), gateway_id, generate_random_bytes(32)).serialize();
        let mut auth_header_value: Option<HeaderValue> = None;
        let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            auth_header_value = request.headers().get(AUTHORIZATION).cloned();
            response.headers_mut().insert(
                CHALLENGE_HEADER,
                HeaderValue::from_str(&base64::encode(&challenge)).unwrap(),
            );
            Ok(response)
        };
        let mut stream = accept_hdr_async(tcp, callback).await.ok()?;

        let auth_bytes = base64::decode(auth_header_value?.as_bytes()).ok()?;
        let (auth_header, auth_signer) = AuthHeader::deserialize_with_signer(&auth_bytes).ok()?;

        let challenge_response = match timeout(Duration::from_secs(5), stream.next()).await {
            Ok(Some(Ok(WsMessage::Binary(data)))) => data,
            _ => return None,
        };
        let challenge_signer = extract_signer(&challenge_response, &challenge).ok()?;

        Some(MockGatewaySession {
            auth_header,
            auth_signer,
            challenge_signer,
            stream,
        })
    }

    pub async fn next_session(&mut self) -> MockGatewaySession {
        timeout(Duration::from_secs(5), self.sessions.recv())
            .await
            .unwrap()
            .unwrap()
    }

    /// True if no node completes a handshake within `wait`.
    pub async fn no_session_within(&mut self, wait: Duration) -> bool {
        timeout(wait, self.sessions.recv()).await.is_err()
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Collects every message the connector hands over.
pub struct RecordingGatewayHandler {
    messages_tx: mpsc::UnboundedSender<(String, Message)>,
    messages_rx: Mutex<mpsc::UnboundedReceiver<(String, Message)>>,
    pub started: AtomicBool,
    pub closed: AtomicBool,
}

impl Default for RecordingGatewayHandler {
    fn default() -> Self {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        RecordingGatewayHandler {
            messages_tx,
            messages_rx: Mutex::new(messages_rx),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

impl RecordingGatewayHandler {
    pub async fn next_message(&self) -> (String, Message) {
        timeout(Duration::from_secs(5), self.messages_rx.lock().await.recv())
            .await
            .unwrap()
            .unwrap()
    }
}

#[async_trait]
impl GatewayConnectorHandler for RecordingGatewayHandler {
    async fn start(&self) -> crate::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> crate::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_gateway_message(&self, gateway_id: &str, msg: Message) {
        let _ = self.messages_tx.send((String::from(gateway_id), msg));
    }
}

/// A DON whose members are only ever written to.
#[derive(Default)]
pub struct RecordingDon {
    sent: Mutex<Vec<(String, Message)>>,
}

impl RecordingDon {
    pub async fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Don for RecordingDon {
    async fn send_to_node(&self, node_address: &str, msg: &Message) -> crate::Result<()> {
        self.sent
            .lock()
            .await
            .push((String::from(node_address), msg.clone()));
        Ok(())
    }
}
