use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{event, Level};
use url::Url;

use crate::config::WsClientConfig;
use crate::error::Error;

/// Header names are case-insensitive; `http` stores them lowercased.
pub const CHALLENGE_HEADER: &str = "challenge";

pub type GatewayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The node's half of the authenticated upgrade.
pub trait ConnectionInitiator: Send + Sync {
    /// Signed claim placed (base64 encoded) in the `Authorization` header.
    fn new_auth_header(&self, url: &Url) -> crate::Result<Vec<u8>>;

    /// Answer to the gateway's `Challenge` header, sent as the first frame.
    fn challenge_response(&self, url: &Url, challenge: &[u8]) -> crate::Result<Vec<u8>>;
}

pub struct WebSocketClient {
    initiator: Arc<dyn ConnectionInitiator>,
    handshake_timeout: Duration,
}

impl WebSocketClient {
    pub fn new(config: &WsClientConfig, initiator: Arc<dyn ConnectionInitiator>) -> Self {
        WebSocketClient {
            initiator,
            handshake_timeout: Duration::from_millis(config.handshake_timeout_millis),
        }
    }

    /// Dials `url` and completes the challenge exchange.
    pub async fn connect(&self, url: &Url) -> crate::Result<GatewayStream> {
        let auth_header = self.initiator.new_auth_header(url)?;
        let mut request = url.as_str().into_client_request()?;
        let header_value = HeaderValue::from_str(&base64::encode(&auth_header))
            .map_err(|err| Error::Handshake(err.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, header_value);

        let (mut stream, response) = timeout(self.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| Error::Timeout(format!("handshake with {}", url)))??;

        let challenge = match response.headers().get(CHALLENGE_HEADER) {
            Some(challenge) => base64::decode(challenge.as_bytes())?,
            None => {
                let _ = SinkExt::close(&mut stream).await;
                return Err(Error::Handshake(format!("{} sent no challenge", url)));
            }
        };
        let reply = match self.initiator.challenge_response(url, &challenge) {
            Ok(reply) => reply,
            Err(err) => {
                let _ = SinkExt::close(&mut stream).await;
                return Err(err);
            }
        };
        stream.send(WsMessage::Binary(reply)).await?;
        event!(Level::DEBUG, "completed handshake with {}", url);
        Ok(stream)
    }
}
