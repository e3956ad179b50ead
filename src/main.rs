/*!
# DON Gateway Node

Connects a node to every gateway of its DON and answers each request with an echo of its payload, signed by the node.

## Example Usage

```bash
don_gateway --config config --private_key ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80
```

The private key may also be set as `private_key` in the config file, or through a `DON_GATEWAY`-prefixed environment variable.

## Dev

To run from source:

```bash
cargo run -- --help
RUST_LOG=debug cargo run -- --config config
```
*/

use std::sync::Arc;

use async_trait::async_trait;
use clap::{App, Arg};
use tokio::sync::mpsc;
use tracing::{error, event, info, Level};

use don_gateway::config::{NodeSettings, DEFAULT_CONFIG_NAME};
use don_gateway::keypair::Keypair;
use don_gateway::message::{Message, MessageBody};
use don_gateway::networking::connector::{GatewayConnector, GatewayConnectorHandler};
use don_gateway::signals::signal_for_shutdown;
use don_gateway::Error;

struct EchoHandler {
    replies: mpsc::UnboundedSender<(String, MessageBody)>,
}

#[async_trait]
impl GatewayConnectorHandler for EchoHandler {
    async fn start(&self) -> don_gateway::Result<()> {
        info!("echo handler started");
        Ok(())
    }

    async fn close(&self) -> don_gateway::Result<()> {
        info!("echo handler closed");
        Ok(())
    }

    async fn handle_gateway_message(&self, gateway_id: &str, msg: Message) {
        info!(
            "{} from {} via {}",
            msg.body.method, msg.body.sender, gateway_id
        );
        let mut reply = msg.body;
        reply.receiver = reply.sender.clone();
        if self.replies.send((String::from(gateway_id), reply)).is_err() {
            error!("reply channel closed, dropping reply");
        }
    }
}

#[tokio::main]
pub async fn main() -> don_gateway::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = App::new("DON Gateway Node")
        .about("Connects a DON node to its gateways")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("config file name"),
        )
        .arg(
            Arg::with_name("private_key")
                .short("k")
                .long("private_key")
                .takes_value(true)
                .help("hex encoded node private key"),
        )
        .get_matches();

    let config_name = matches.value_of("config").unwrap_or(DEFAULT_CONFIG_NAME);
    let settings = NodeSettings::load(config_name)?;

    let keypair = match matches
        .value_of("private_key")
        .or_else(|| settings.private_key.as_deref())
    {
        Some(secret) => Keypair::from_secret_hex(secret)?,
        None => return Err(Error::Config(String::from("no private key configured"))),
    };
    if !keypair
        .address()
        .eq_ignore_ascii_case(&settings.connector.node_address)
    {
        return Err(Error::Config(format!(
            "private key belongs to {}, not {}",
            keypair.address(),
            settings.connector.node_address
        )));
    }

    let (replies_tx, mut replies_rx) = mpsc::unbounded_channel();
    let connector = GatewayConnector::new(
        settings.connector,
        Arc::new(keypair),
        Arc::new(EchoHandler {
            replies: replies_tx,
        }),
    )?;
    connector.start().await?;

    let reply_connector = connector.clone();
    let reply_task = tokio::spawn(async move {
        while let Some((gateway_id, body)) = replies_rx.recv().await {
            if let Err(err) = reply_connector
                .sign_and_send_to_gateway(&gateway_id, body)
                .await
            {
                error!("failed to reply via {}: {}", gateway_id, err);
            }
        }
    });

    signal_for_shutdown().await?;
    event!(Level::INFO, "Shutting down!");
    reply_task.abort();
    connector.close().await
}
