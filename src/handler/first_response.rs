use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::codec::ErrorCode;
use crate::config::DonConfig;
use crate::error::Error;
use crate::handler::{Don, Handler, UserCallback, UserCallbackPayload};
use crate::message::Message;
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::request_cache::{Aggregation, RequestCache, RequestCacheConfig};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FirstResponseConfig {
    pub request_cache: RequestCacheConfig,
    pub node_rate_limiter: RateLimiterConfig,
    /// Distinct member responses needed before the user is answered.
    #[serde(default = "default_responses_required")]
    pub responses_required: usize,
}

fn default_responses_required() -> usize {
    1
}

/// Fans every user request out to all DON members and answers the user with the
/// N-th distinct member response (the first, by default).
pub struct FirstResponseHandler {
    don_config: DonConfig,
    don: Arc<dyn Don>,
    cache: RequestCache<HashSet<String>>,
    node_rate_limiter: RateLimiter,
    responses_required: usize,
}

impl FirstResponseHandler {
    pub fn new(
        config: &FirstResponseConfig,
        don_config: DonConfig,
        don: Arc<dyn Don>,
    ) -> crate::Result<Self> {
        don_config.validate()?;
        if config.responses_required == 0 || config.responses_required > don_config.members.len() {
            return Err(Error::Config(format!(
                "responses_required must be within 1..={}",
                don_config.members.len()
            )));
        }
        Ok(FirstResponseHandler {
            cache: RequestCache::from_config(&config.request_cache)?,
            node_rate_limiter: RateLimiter::new(&config.node_rate_limiter)?,
            responses_required: config.responses_required,
            don_config,
            don,
        })
    }

    pub async fn pending_requests(&self) -> usize {
        self.cache.len().await
    }
}

#[async_trait]
impl Handler for FirstResponseHandler {
    async fn handle_user_message(&self, msg: Message, callback: UserCallback) -> crate::Result<()> {
        if msg.body.don_id != self.don_config.don_id {
            let err_msg = format!("unsupported DON id {}", msg.body.don_id);
            let _ = callback.send(UserCallbackPayload::error(
                msg,
                ErrorCode::UnsupportedDonIdError,
                err_msg.clone(),
            ));
            return Err(Error::Handler(err_msg));
        }

        // the cache consumes its callback, so keep the user's to report a rejected request
        let (cache_tx, cache_rx) = oneshot::channel();
        if let Err(err) = self
            .cache
            .new_request(msg.clone(), cache_tx, HashSet::new())
            .await
        {
            let _ = callback.send(UserCallbackPayload::error(
                msg,
                ErrorCode::InternalHandlerError,
                err.to_string(),
            ));
            return Err(err);
        }
        tokio::spawn(async move {
            if let Ok(payload) = cache_rx.await {
                let _ = callback.send(payload);
            }
        });

        for member in self.don_config.members.iter() {
            if let Err(err) = self.don.send_to_node(&member.address, &msg).await {
                error!("failed to send {} to {}: {}", msg.body.message_id, member.name, err);
            }
        }
        Ok(())
    }

    async fn handle_node_message(&self, msg: Message, node_address: &str) -> crate::Result<()> {
        let member = self
            .don_config
            .member(node_address)
            .ok_or_else(|| Error::Handler(format!("{} is not a member of the DON", node_address)))?;
        if !self.node_rate_limiter.allow(node_address) {
            warn!("dropping response from {}", member.name);
            return Err(Error::Handler(format!("rate limit exceeded for {}", member.name)));
        }

        let node = node_address.to_lowercase();
        let responses_required = self.responses_required;
        self.cache
            .process_response(&msg, move |response, responded| {
                let mut responded = responded.clone();
                responded.insert(node);
                if responded.len() >= responses_required {
                    Ok(Aggregation::Done(UserCallbackPayload::success(response.clone())))
                } else {
                    Ok(Aggregation::Pending(responded))
                }
            })
            .await
    }

    async fn start(&self) -> crate::Result<()> {
        info!("starting first-response handler for DON {}", self.don_config.don_id);
        Ok(())
    }

    async fn close(&self) -> crate::Result<()> {
        info!("closing first-response handler for DON {}", self.don_config.don_id);
        Ok(())
    }
}
