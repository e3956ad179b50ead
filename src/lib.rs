/*!
# DON Gateway

Message relay between users and Decentralized Oracle Networks (DONs). Users and DON nodes never talk to each other directly; a gateway routes signed messages between them, and neither side has to trust the gateway because every message is signed by its author.

This crate contains both ends of that protocol:

* the signed [`message::Message`] envelope and its [`codec`] onto JSON-RPC 2.0,
* the node side: a [`networking::connector::GatewayConnector`] that keeps authenticated WebSocket sessions to every gateway of the node's DON,
* the gateway side building blocks for handlers: [`request_cache::RequestCache`] to fold many node responses into one user answer, [`rate_limiter::RateLimiter`], and the [`handler::Handler`] and [`handler::Don`] contracts.

# Usage

```bash
don_gateway --config config --private_key <hex>
gatewaycli keygen
```

*/
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handler;
pub mod keypair;
pub mod message;
pub mod networking;
pub mod rate_limiter;
pub mod request_cache;
pub mod signals;
pub mod time;

#[cfg(test)]
pub mod test_utilities;
mod test_setup;

pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
