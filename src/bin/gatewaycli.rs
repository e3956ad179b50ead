/*!
# DON Gateway Command Line Interface

Key and message helpers for node operators and for testing gateways by hand.

## Usage

```bash
gatewaycli help [subcommand]
```

## Available subcommands

**keygen**

generates a fresh keypair

**print**

prints the address belonging to a private key

**sign**

builds, signs and prints a JSON-RPC request

**verify**

decodes a JSON-RPC request from a file and checks its signature

## Example

```bash
gatewaycli sign --private_key <hex> --id 1 --method compute --don_id example_don --payload '{"x":1}' > req.json
gatewaycli verify --filename req.json
```

## Dev

To run from source:

```bash
cargo run --bin gatewaycli -- keygen
```
*/
use std::fs;

use clap::{App, Arg, ArgMatches};
use don_gateway::{
    codec::{Codec, JsonRpcCodec},
    keypair::Keypair,
    message::{Message, MessageBody, Payload},
    Error,
};

fn required<'a>(matches: &'a ArgMatches, name: &str) -> don_gateway::Result<&'a str> {
    matches
        .value_of(name)
        .ok_or_else(|| Error::Config(format!("missing --{}", name)))
}

fn private_key_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("private_key")
        .short("k")
        .long("private_key")
        .required(true)
        .takes_value(true)
        .help("hex encoded private key")
}

pub fn main() -> don_gateway::Result<()> {
    let command_matches = App::new("DON Gateway Command Line Interface")
        .about("Generate keys and sign or verify gateway messages")
        .subcommand(App::new("keygen").about("generates a keypair"))
        .subcommand(
            App::new("print")
                .about("prints the address of a private key")
                .arg(private_key_arg()),
        )
        .subcommand(
            App::new("sign")
                .about("signs a message and prints it as a JSON-RPC request")
                .arg(private_key_arg())
                .arg(
                    Arg::with_name("id")
                        .long("id")
                        .required(true)
                        .takes_value(true)
                        .help("message id"),
                )
                .arg(
                    Arg::with_name("method")
                        .short("m")
                        .long("method")
                        .required(true)
                        .takes_value(true)
                        .help("handler method"),
                )
                .arg(
                    Arg::with_name("don_id")
                        .short("d")
                        .long("don_id")
                        .required(true)
                        .takes_value(true)
                        .help("target DON"),
                )
                .arg(
                    Arg::with_name("payload")
                        .short("p")
                        .long("payload")
                        .takes_value(true)
                        .help("JSON payload"),
                )
                .arg(
                    Arg::with_name("receiver")
                        .short("r")
                        .long("receiver")
                        .takes_value(true)
                        .help("receiver address"),
                ),
        )
        .subcommand(
            App::new("verify")
                .about("validates a JSON-RPC request read from a file")
                .arg(
                    Arg::with_name("filename")
                        .short("f")
                        .long("filename")
                        .required(true)
                        .takes_value(true)
                        .help("file holding the request"),
                ),
        )
        .get_matches();

    if command_matches.subcommand_matches("keygen").is_some() {
        let keypair = Keypair::new();
        println!("address     : {}", keypair.address());
        println!("private key : {}", keypair.secret_hex());
    }
    if let Some(matches) = command_matches.subcommand_matches("print") {
        let keypair = Keypair::from_secret_hex(required(matches, "private_key")?)?;
        println!("{}", keypair);
    }
    if let Some(matches) = command_matches.subcommand_matches("sign") {
        let keypair = Keypair::from_secret_hex(required(matches, "private_key")?)?;
        let payload = match matches.value_of("payload") {
            Some(json) => {
                serde_json::from_str::<serde_json::Value>(json)?;
                Payload::from(json)
            }
            None => Payload::default(),
        };
        let mut msg = Message::new(MessageBody {
            message_id: String::from(required(matches, "id")?),
            method: String::from(required(matches, "method")?),
            don_id: String::from(required(matches, "don_id")?),
            receiver: String::from(matches.value_of("receiver").unwrap_or_default()),
            payload,
            ..MessageBody::default()
        });
        msg.sign(&keypair)?;
        msg.validate()?;
        let request = JsonRpcCodec.encode_request(&msg)?;
        println!("{}", String::from_utf8_lossy(&request));
    }
    if let Some(matches) = command_matches.subcommand_matches("verify") {
        let data = fs::read(required(matches, "filename")?)?;
        let mut msg = JsonRpcCodec.decode_request(&data)?;
        msg.validate()?;
        println!("valid message {} from {}", msg.body.message_id, msg.body.sender);
    }
    Ok(())
}
