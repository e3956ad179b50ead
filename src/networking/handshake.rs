use std::convert::TryInto;

use crate::crypto::{align_bytes, aligned_bytes_to_string, extract_signer, GatewayAddress, SIGNATURE_LEN};
use crate::error::Error;
use crate::keypair::Signer;
use crate::message::MESSAGE_DON_ID_MAX_LEN;

pub const HANDSHAKE_TIMESTAMP_LEN: usize = 4;
pub const HANDSHAKE_GATEWAY_URL_LEN: usize = 128;
pub const HANDSHAKE_GATEWAY_ID_LEN: usize = 128;
pub const HANDSHAKE_AUTH_HEADER_LEN: usize =
    HANDSHAKE_TIMESTAMP_LEN + MESSAGE_DON_ID_MAX_LEN + HANDSHAKE_GATEWAY_URL_LEN;
pub const HANDSHAKE_SIGNED_AUTH_HEADER_LEN: usize = HANDSHAKE_AUTH_HEADER_LEN + SIGNATURE_LEN;
pub const HANDSHAKE_CHALLENGE_MIN_LEN: usize = HANDSHAKE_TIMESTAMP_LEN + HANDSHAKE_GATEWAY_ID_LEN;

/// The node's claim sent in the `Authorization` upgrade header:
///
/// ```bytes
/// 0-3       timestamp (big-endian u32, unix seconds)
/// 4-67      DON id, zero padded
/// 68-195    gateway URL, zero padded
/// 196-260   signature over bytes 0-195
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AuthHeader {
    pub timestamp: u32,
    pub don_id: String,
    pub gateway_url: String,
}

impl AuthHeader {
    pub fn new(timestamp: u32, don_id: &str, gateway_url: &str) -> Self {
        AuthHeader {
            timestamp,
            don_id: String::from(don_id),
            gateway_url: String::from(gateway_url),
        }
    }

    pub fn serialize_raw(&self) -> Vec<u8> {
        let mut vbytes: Vec<u8> = Vec::with_capacity(HANDSHAKE_AUTH_HEADER_LEN);
        vbytes.extend(&self.timestamp.to_be_bytes());
        vbytes.extend(align_bytes(&self.don_id, MESSAGE_DON_ID_MAX_LEN));
        vbytes.extend(align_bytes(&self.gateway_url, HANDSHAKE_GATEWAY_URL_LEN));
        vbytes
    }

    pub fn serialize_with_sig(&self, signer: &dyn Signer) -> crate::Result<Vec<u8>> {
        let mut vbytes = self.serialize_raw();
        let signature = signer.sign(&vbytes)?;
        vbytes.extend(&signature);
        Ok(vbytes)
    }

    pub fn deserialize(bytes: &[u8]) -> crate::Result<AuthHeader> {
        if bytes.len() != HANDSHAKE_AUTH_HEADER_LEN {
            return Err(Error::Handshake(format!(
                "auth header is {} bytes, expected {}",
                bytes.len(),
                HANDSHAKE_AUTH_HEADER_LEN
            )));
        }
        let url_start = HANDSHAKE_TIMESTAMP_LEN + MESSAGE_DON_ID_MAX_LEN;
        Ok(AuthHeader {
            timestamp: read_timestamp(bytes)?,
            don_id: aligned_bytes_to_string(&bytes[HANDSHAKE_TIMESTAMP_LEN..url_start]),
            gateway_url: aligned_bytes_to_string(&bytes[url_start..]),
        })
    }

    /// Splits a signed header and recovers who signed it.
    pub fn deserialize_with_signer(bytes: &[u8]) -> crate::Result<(AuthHeader, GatewayAddress)> {
        if bytes.len() != HANDSHAKE_SIGNED_AUTH_HEADER_LEN {
            return Err(Error::Handshake(format!(
                "signed auth header is {} bytes, expected {}",
                bytes.len(),
                HANDSHAKE_SIGNED_AUTH_HEADER_LEN
            )));
        }
        let (raw, signature) = bytes.split_at(HANDSHAKE_AUTH_HEADER_LEN);
        let signer = extract_signer(signature, raw)?;
        Ok((AuthHeader::deserialize(raw)?, signer))
    }
}

/// The gateway's nonce, returned base64 encoded in the `Challenge` response header:
///
/// ```bytes
/// 0-3       timestamp (big-endian u32, unix seconds)
/// 4-131     gateway id, zero padded
/// 132..     random challenge bytes
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    pub timestamp: u32,
    pub gateway_id: String,
    pub challenge_bytes: Vec<u8>,
}

impl Challenge {
    pub fn new(timestamp: u32, gateway_id: &str, challenge_bytes: Vec<u8>) -> Self {
        Challenge {
            timestamp,
            gateway_id: String::from(gateway_id),
            challenge_bytes,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut vbytes: Vec<u8> =
            Vec::with_capacity(HANDSHAKE_CHALLENGE_MIN_LEN + self.challenge_bytes.len());
        vbytes.extend(&self.timestamp.to_be_bytes());
        vbytes.extend(align_bytes(&self.gateway_id, HANDSHAKE_GATEWAY_ID_LEN));
        vbytes.extend(&self.challenge_bytes);
        vbytes
    }

    pub fn deserialize(bytes: &[u8]) -> crate::Result<Challenge> {
        if bytes.len() < HANDSHAKE_CHALLENGE_MIN_LEN {
            return Err(Error::Handshake(format!(
                "challenge is {} bytes, expected at least {}",
                bytes.len(),
                HANDSHAKE_CHALLENGE_MIN_LEN
            )));
        }
        Ok(Challenge {
            timestamp: read_timestamp(bytes)?,
            gateway_id: aligned_bytes_to_string(
                &bytes[HANDSHAKE_TIMESTAMP_LEN..HANDSHAKE_CHALLENGE_MIN_LEN],
            ),
            challenge_bytes: bytes[HANDSHAKE_CHALLENGE_MIN_LEN..].to_vec(),
        })
    }
}

fn read_timestamp(bytes: &[u8]) -> crate::Result<u32> {
    let timestamp: [u8; HANDSHAKE_TIMESTAMP_LEN] = bytes[..HANDSHAKE_TIMESTAMP_LEN]
        .try_into()
        .map_err(|_| Error::Handshake(String::from("truncated timestamp")))?;
    Ok(u32::from_be_bytes(timestamp))
}
