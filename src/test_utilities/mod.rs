pub mod mocks;

use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::keypair::Keypair;
use crate::message::{Message, MessageBody, Payload};

/// Polls `condition` every few milliseconds until it holds or `deadline` passes.
pub async fn eventually<F, Fut>(deadline: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let give_up = Instant::now() + deadline;
    while Instant::now() < give_up {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition().await
}

pub fn make_signed_message(keypair: &Keypair, message_id: &str, method: &str, payload: &str) -> Message {
    let mut msg = Message::new(MessageBody {
        message_id: String::from(message_id),
        method: String::from(method),
        don_id: String::from("don-1"),
        payload: Payload::from(payload),
        ..MessageBody::default()
    });
    // only fails on a malformed key, which a Keypair can't hold
    msg.sign(keypair).unwrap();
    msg
}
