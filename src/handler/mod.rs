/*!
Contracts between the relay transport and the business logic bound to one DON.

A [`Handler`] receives user messages together with a single-shot callback and node
messages tagged with the node's address. Handlers reach DON members through the
[`Don`] capability. Concrete capability logic lives outside this crate;
[`first_response::FirstResponseHandler`] is a generic fan-out handler usable as a base.
*/
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::codec::ErrorCode;
use crate::error::Error;
use crate::message::Message;

pub mod first_response;

/// The one result a user request ever produces.
#[derive(Debug, Clone, PartialEq)]
pub struct UserCallbackPayload {
    pub msg: Message,
    pub err_code: ErrorCode,
    pub err_msg: String,
}

impl UserCallbackPayload {
    pub fn success(msg: Message) -> Self {
        UserCallbackPayload {
            msg,
            err_code: ErrorCode::NoError,
            err_msg: String::new(),
        }
    }

    pub fn error(msg: Message, err_code: ErrorCode, err_msg: impl Into<String>) -> Self {
        UserCallbackPayload {
            msg,
            err_code,
            err_msg: err_msg.into(),
        }
    }
}

pub type UserCallback = oneshot::Sender<UserCallbackPayload>;

#[async_trait]
pub trait Handler: Send + Sync {
    /// Takes ownership of `callback` and sends exactly one payload on it.
    async fn handle_user_message(&self, msg: Message, callback: UserCallback) -> crate::Result<()>;

    /// May be called concurrently for any mix of nodes.
    async fn handle_node_message(&self, msg: Message, node_address: &str) -> crate::Result<()>;

    async fn start(&self) -> crate::Result<()>;

    async fn close(&self) -> crate::Result<()>;
}

#[async_trait]
pub trait Don: Send + Sync {
    async fn send_to_node(&self, node_address: &str, msg: &Message) -> crate::Result<()>;
}

/// Waits for a handler's callback, giving up after `deadline`.
///
/// Giving up only abandons this wait; the request stays in flight until the handler
/// resolves it.
pub async fn wait_for_callback(
    callback: oneshot::Receiver<UserCallbackPayload>,
    deadline: Duration,
) -> crate::Result<UserCallbackPayload> {
    match timeout(deadline, callback).await {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(_)) => Err(Error::Handler(String::from(
            "callback dropped without a response",
        ))),
        Err(_) => Err(Error::Timeout(format!(
            "no response within {}ms",
            deadline.as_millis()
        ))),
    }
}
