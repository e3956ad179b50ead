/*!

# Gateway Networking

## Introduction

A node keeps one long-lived WebSocket session open to every gateway of its DON. The node always dials out; gateways never connect to nodes. Messages flow both ways over the same session.

Every frame carries one JSON-RPC 2.0 envelope. Gateways send requests:

```json
{"jsonrpc":"2.0","id":"<messageId>","method":"<method>","params":{"signature":"0x...","body":{...}}}
```

and nodes answer with responses whose `result` embeds the node's signed message:

```json
{"jsonrpc":"2.0","id":"<messageId>","result":{"signature":"0x...","body":{...}}}
```

## Handshake

The WebSocket upgrade request carries an `Authorization` header: the base64 encoding of

```bytes
0-3       timestamp (big-endian u32, unix seconds)
4-67      DON id, zero padded
68-195    gateway URL, zero padded
196-260   node signature over bytes 0-195
```

The gateway answers the upgrade with a base64 `Challenge` header:

```bytes
0-3       timestamp (big-endian u32, unix seconds)
4-131     gateway id, zero padded
132..     random bytes
```

The node refuses challenges with fewer random bytes than `auth_min_challenge_len`, with a timestamp more than `auth_timestamp_tolerance_sec` from its own clock, or naming a gateway other than the one configured for the URL. Otherwise it signs the whole challenge and sends the 65-byte signature as the first binary frame. The gateway recovers the node address from both signatures.

## Sessions

Each gateway gets a [`connection::ConnectionWrapper`] and two tasks. The reconnect loop dials, swaps the new socket into the wrapper, waits for it to close and dials again, backing off exponentially after failed dials. The read loop decodes and validates every inbound frame and hands it to the [`connector::GatewayConnectorHandler`]. Frames that fail to decode or validate are logged and skipped.

Writes go straight to the live socket. While a gateway is disconnected `send_to_gateway` fails with `NotConnected`; nothing is queued.

*/
pub mod backoff;
pub mod connection;
pub mod connector;
pub mod handshake;
pub mod ws_client;
