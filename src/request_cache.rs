use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::codec::ErrorCode;
use crate::error::Error;
use crate::handler::UserCallbackPayload;
use crate::message::Message;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RequestCacheConfig {
    pub timeout_millis: u64,
    pub max_size: usize,
}

/// What a response processor decided after folding in one more response.
pub enum Aggregation<T> {
    /// Enough responses arrived; deliver this and forget the request.
    Done(UserCallbackPayload),
    /// Keep waiting with the updated state.
    Pending(T),
}

/// Requests are registered under `{sender, message_id}` and responses are looked up
/// under `{receiver, message_id}`: a responder addresses the original sender.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GlobalId {
    address: String,
    message_id: String,
}

impl GlobalId {
    fn of_request(request: &Message) -> Self {
        GlobalId {
            address: request.body.sender.to_lowercase(),
            message_id: request.body.message_id.clone(),
        }
    }

    fn of_response(response: &Message) -> Self {
        GlobalId {
            address: response.body.receiver.to_lowercase(),
            message_id: response.body.message_id.clone(),
        }
    }
}

struct PendingRequest<T> {
    state: Mutex<T>,
    callback: Mutex<Option<oneshot::Sender<UserCallbackPayload>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

type Entries<T> = Arc<Mutex<HashMap<GlobalId, Arc<PendingRequest<T>>>>>;

/// Correlates outbound requests with the node responses that trickle back for them.
///
/// The cache-wide lock only guards inserts and removals. Each entry has its own lock
/// around the caller's aggregation state, so slow processing of one request never
/// blocks another. Every entry is removed exactly once, by aggregation or by timeout,
/// and only the remover delivers to the callback.
pub struct RequestCache<T> {
    entries: Entries<T>,
    timeout: Duration,
    max_cache_size: usize,
}

impl<T: Send + 'static> RequestCache<T> {
    pub fn new(timeout: Duration, max_cache_size: usize) -> Self {
        RequestCache {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            max_cache_size,
        }
    }

    pub fn from_config(config: &RequestCacheConfig) -> crate::Result<Self> {
        if config.timeout_millis == 0 || config.max_size == 0 {
            return Err(Error::Config(String::from(
                "request cache timeout and max size must be positive",
            )));
        }
        Ok(RequestCache::new(
            Duration::from_millis(config.timeout_millis),
            config.max_size,
        ))
    }

    /// Registers `request` and arms its timeout. The callback receives exactly one payload.
    pub async fn new_request(
        &self,
        request: Message,
        callback: oneshot::Sender<UserCallbackPayload>,
        initial_state: T,
    ) -> crate::Result<()> {
        let key = GlobalId::of_request(&request);
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&key) {
            return Err(Error::DuplicateRequest(request.body.message_id));
        }
        if entries.len() >= self.max_cache_size {
            return Err(Error::CacheFull(self.max_cache_size));
        }

        // the timer is armed before the entry is visible, so whoever removes it can abort it
        let timer = tokio::spawn(expire(
            self.entries.clone(),
            key.clone(),
            self.timeout,
            request,
        ));
        entries.insert(
            key,
            Arc::new(PendingRequest {
                state: Mutex::new(initial_state),
                callback: Mutex::new(Some(callback)),
                timer: Mutex::new(Some(timer)),
            }),
        );
        Ok(())
    }

    /// Folds `response` into its request's state via `process`.
    ///
    /// An error from `process` is returned as-is and leaves the stored state untouched.
    pub async fn process_response<F>(&self, response: &Message, process: F) -> crate::Result<()>
    where
        F: FnOnce(&Message, &T) -> crate::Result<Aggregation<T>>,
    {
        let key = GlobalId::of_response(response);
        let entry = self
            .entries
            .lock()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::RequestNotFound(response.body.message_id.clone()))?;

        let mut state = entry.state.lock().await;
        // a racing response may have completed the request while we waited
        let current = self
            .entries
            .lock()
            .await
            .get(&key)
            .map_or(false, |current| Arc::ptr_eq(current, &entry));
        if !current {
            return Err(Error::RequestNotFound(response.body.message_id.clone()));
        }
        match process(response, &state)? {
            Aggregation::Done(payload) => {
                if delete_and_send_once(&self.entries, &key, payload).await {
                    if let Some(timer) = entry.timer.lock().await.take() {
                        timer.abort();
                    }
                }
            }
            Aggregation::Pending(new_state) => *state = new_state,
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn expire<T>(entries: Entries<T>, key: GlobalId, timeout: Duration, request: Message) {
    sleep(timeout).await;
    let message_id = key.message_id.clone();
    let payload = UserCallbackPayload {
        msg: request,
        err_code: ErrorCode::RequestTimeoutError,
        err_msg: String::from("timeout"),
    };
    if delete_and_send_once(&entries, &key, payload).await {
        debug!("request {} timed out", message_id);
    }
}

async fn delete_and_send_once<T>(
    entries: &Entries<T>,
    key: &GlobalId,
    payload: UserCallbackPayload,
) -> bool {
    let removed = entries.lock().await.remove(key);
    match removed {
        Some(entry) => {
            if let Some(callback) = entry.callback.lock().await.take() {
                if callback.send(payload).is_err() {
                    debug!("callback receiver for {} already dropped", key.message_id);
                }
            }
            true
        }
        None => false,
    }
}
