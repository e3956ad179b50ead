use std::convert::TryInto;

use rand::RngCore;
use secp256k1::recovery::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey, SECP256K1};
use tiny_keccak::{Hasher, Keccak};

use crate::error::Error;

pub type GatewayHash = [u8; 32];
pub type GatewayAddress = [u8; 20];
pub type GatewaySignature = [u8; 65];

pub const SIGNATURE_LEN: usize = 65;
pub const ADDRESS_LEN: usize = 20;

const ETH_SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

pub(crate) fn secp() -> &'static Secp256k1<All> {
    SECP256K1
}

/// Keccak-256 hash of the input bytes.
pub fn keccak256(data: &[u8]) -> GatewayHash {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut out);
    out
}

/// Wraps a digest in the Ethereum personal-message envelope and hashes it again.
pub fn eth_signed_message_hash(digest: &GatewayHash) -> GatewayHash {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(ETH_SIGNED_MESSAGE_PREFIX);
    hasher.update(digest);
    hasher.finalize(&mut out);
    out
}

fn signing_message(data: &[u8]) -> crate::Result<Message> {
    let digest = eth_signed_message_hash(&keccak256(data));
    Ok(Message::from_slice(&digest)?)
}

/// Hash and sign `data`, returning `r ‖ s ‖ v` with `v` in {27, 28}.
pub fn sign_data(secret_key: &SecretKey, data: &[u8]) -> crate::Result<GatewaySignature> {
    let msg = signing_message(data)?;
    let (recovery_id, compact) = secp()
        .sign_recoverable(&msg, secret_key)
        .serialize_compact();
    let mut signature = [0u8; SIGNATURE_LEN];
    signature[..64].copy_from_slice(&compact);
    signature[64] = recovery_id.to_i32() as u8 + 27;
    Ok(signature)
}

/// Recover the address that produced `signature` over `data`.
pub fn extract_signer(signature: &[u8], data: &[u8]) -> crate::Result<GatewayAddress> {
    if signature.len() != SIGNATURE_LEN {
        return Err(Error::Signature(format!(
            "invalid signature length {}, expected {}",
            signature.len(),
            SIGNATURE_LEN
        )));
    }
    let mut v = signature[64];
    if v >= 27 {
        v -= 27;
    }
    let recovery_id = RecoveryId::from_i32(v as i32)?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)?;
    let public_key = secp().recover(&signing_message(data)?, &recoverable)?;
    Ok(public_key_to_address(&public_key))
}

pub fn public_key_to_address(public_key: &PublicKey) -> GatewayAddress {
    let hash = keccak256(&public_key.serialize_uncompressed()[1..]);
    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Lowercase `0x`-prefixed hex form of an address.
pub fn address_to_hex(address: &GatewayAddress) -> String {
    format!("0x{}", hex::encode(address))
}

pub fn address_from_hex(address: &str) -> crate::Result<GatewayAddress> {
    let stripped = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| Error::InvalidMessage(format!("address {} lacks 0x prefix", address)))?;
    let bytes = hex::decode(stripped)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidMessage(format!("address {} is not 20 bytes", address)))
}

pub fn signature_to_hex(signature: &GatewaySignature) -> String {
    format!("0x{}", hex::encode(signature))
}

pub fn signature_from_hex(signature: &str) -> crate::Result<Vec<u8>> {
    let stripped = signature.strip_prefix("0x").unwrap_or(signature);
    Ok(hex::decode(stripped)?)
}

/// Copy `value` into a zero-filled buffer of exactly `len` bytes, truncating if longer.
pub fn align_bytes(value: &str, len: usize) -> Vec<u8> {
    let mut aligned = vec![0u8; len];
    let bytes = value.as_bytes();
    let n = bytes.len().min(len);
    aligned[..n].copy_from_slice(&bytes[..n]);
    aligned
}

/// Inverse of `align_bytes`: drops the zero padding.
pub fn aligned_bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

pub fn generate_keys() -> (PublicKey, SecretKey) {
    let mut rng = rand::thread_rng();
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        // rejects zero and values above the curve order, vanishingly rare
        if let Ok(secret_key) = SecretKey::from_slice(&bytes) {
            let public_key = PublicKey::from_secret_key(secp(), &secret_key);
            return (public_key, secret_key);
        }
    }
}

pub fn generate_random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
