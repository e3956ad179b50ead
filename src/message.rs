/*!
# Gateway Messages

The `Message` is the unit exchanged between users, gateways and nodes. It carries a
`MessageBody` and a recoverable ECDSA signature over the body's canonical encoding:

```bytes
0-127       MessageId (zero padded/truncated)
128-191     Method (zero padded/truncated)
192-255     DonId (zero padded/truncated)
256..       Payload (raw)
```

Fixed-width fields keep two different bodies from sharing a byte sequence by shifting
bytes across a field boundary.
*/
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::crypto::{
    address_to_hex, align_bytes, extract_signer, signature_from_hex, signature_to_hex,
    GatewayAddress, ADDRESS_LEN, SIGNATURE_LEN,
};
use crate::error::Error;
use crate::keypair::{Keypair, Signer};

pub const MESSAGE_SIGNATURE_LEN: usize = SIGNATURE_LEN;
pub const MESSAGE_SIGNATURE_HEX_ENCODED_LEN: usize = 2 + 2 * MESSAGE_SIGNATURE_LEN;
pub const MESSAGE_ID_MAX_LEN: usize = 128;
pub const MESSAGE_METHOD_MAX_LEN: usize = 64;
pub const MESSAGE_DON_ID_MAX_LEN: usize = 64;
pub const MESSAGE_RECEIVER_LEN: usize = 2 + 2 * ADDRESS_LEN;

/// Application-defined bytes carried verbatim as embedded JSON on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Payload(bytes)
    }

    pub fn from_json<T: Serialize>(value: &T) -> crate::Result<Self> {
        Ok(Payload(serde_json::to_vec(value)?))
    }

    pub fn parse<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_slice(&self.0)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Payload {
    fn from(raw_json: &str) -> Self {
        Payload(raw_json.as_bytes().to_vec())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_empty() {
            return serializer.serialize_none();
        }
        let raw: &RawValue =
            serde_json::from_slice(&self.0).map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Ok(Payload(raw.get().as_bytes().to_vec()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MessageBody {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub don_id: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub payload: Payload,
    /// Filled in from the signature by `Message::validate`; never trusted as sent.
    #[serde(default)]
    pub sender: String,
}

impl MessageBody {
    /// The byte sequence that gets hashed and signed.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut vbytes: Vec<u8> = Vec::with_capacity(
            MESSAGE_ID_MAX_LEN + MESSAGE_METHOD_MAX_LEN + MESSAGE_DON_ID_MAX_LEN + self.payload.0.len(),
        );
        vbytes.extend(align_bytes(&self.message_id, MESSAGE_ID_MAX_LEN));
        vbytes.extend(align_bytes(&self.method, MESSAGE_METHOD_MAX_LEN));
        vbytes.extend(align_bytes(&self.don_id, MESSAGE_DON_ID_MAX_LEN));
        vbytes.extend(&self.payload.0);
        vbytes
    }

    fn check_lengths(&self) -> crate::Result<()> {
        if self.message_id.is_empty() || self.message_id.len() > MESSAGE_ID_MAX_LEN {
            return Err(Error::InvalidMessage(String::from("invalid message ID length")));
        }
        if self.method.is_empty() || self.method.len() > MESSAGE_METHOD_MAX_LEN {
            return Err(Error::InvalidMessage(String::from("invalid method name length")));
        }
        if self.don_id.is_empty() || self.don_id.len() > MESSAGE_DON_ID_MAX_LEN {
            return Err(Error::InvalidMessage(String::from("invalid DON ID length")));
        }
        if !self.receiver.is_empty() && self.receiver.len() != MESSAGE_RECEIVER_LEN {
            return Err(Error::InvalidMessage(String::from("invalid receiver length")));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Message {
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub body: MessageBody,
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Message {
            signature: String::new(),
            body,
        }
    }

    /// Checks the body limits, then recovers the signer and either pins it into an empty
    /// `sender` or rejects a `sender` that disagrees with it.
    pub fn validate(&mut self) -> crate::Result<()> {
        self.body.check_lengths()?;
        if self.signature.len() != MESSAGE_SIGNATURE_HEX_ENCODED_LEN {
            return Err(Error::InvalidMessage(String::from(
                "invalid hex-encoded signature length",
            )));
        }
        let signer = self.validate_signature()?;
        if !self.body.sender.is_empty() && !self.body.sender.eq_ignore_ascii_case(&signer) {
            return Err(Error::SenderMismatch {
                sender: self.body.sender.clone(),
                signer,
            });
        }
        self.body.sender = signer;
        Ok(())
    }

    /// Signs the body with `keypair` and records the keypair's address as the sender.
    pub fn sign(&mut self, keypair: &Keypair) -> crate::Result<()> {
        self.sign_with(keypair)?;
        self.body.sender = keypair.address();
        Ok(())
    }

    /// Signs the body with any `Signer`; `sender` is left for `validate` to fill.
    pub fn sign_with(&mut self, signer: &dyn Signer) -> crate::Result<()> {
        let signature = signer.sign(&self.body.canonical_bytes())?;
        self.signature = signature_to_hex(&signature);
        Ok(())
    }

    /// Recovers the signing address from the signature. Does not look at `sender`.
    pub fn extract_signer(&self) -> crate::Result<GatewayAddress> {
        let signature = signature_from_hex(&self.signature)?;
        if signature.len() != MESSAGE_SIGNATURE_LEN {
            return Err(Error::Signature(format!(
                "signature is {} bytes, expected {}",
                signature.len(),
                MESSAGE_SIGNATURE_LEN
            )));
        }
        extract_signer(&signature, &self.body.canonical_bytes())
    }

    /// Like `extract_signer` but returns the address in its hex form.
    pub fn validate_signature(&self) -> crate::Result<String> {
        Ok(address_to_hex(&self.extract_signer()?))
    }
}
