use crate::crypto::{
    address_to_hex, generate_keys, public_key_to_address, secp, sign_data, GatewayAddress,
    GatewaySignature,
};
use secp256k1::{PublicKey, SecretKey};
use std::fmt;

/// Anything able to produce a recoverable signature over arbitrary bytes.
///
/// The connector only ever needs this capability, so a node may keep its key in an
/// external keystore and hand the connector a thin adapter.
pub trait Signer: Send + Sync {
    fn sign(&self, data: &[u8]) -> crate::Result<GatewaySignature>;
}

/// An secp256k1 keypair for signing messages and handshakes
#[derive(Debug, PartialEq, Clone)]
pub struct Keypair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Keypair {
    /// Create and return a keypair with a randomly generated private key.
    pub fn new() -> Keypair {
        let (public_key, secret_key) = generate_keys();
        Keypair {
            secret_key,
            public_key,
        }
    }

    /// Create and return a keypair with the given u8 array as the private key
    pub fn from_secret_slice(slice: &[u8]) -> crate::Result<Keypair> {
        let secret_key = SecretKey::from_slice(slice)?;
        let public_key = PublicKey::from_secret_key(secp(), &secret_key);

        Ok(Keypair {
            secret_key,
            public_key,
        })
    }

    /// Create and return a keypair with the given hex string (optionally 0x-prefixed) as the private key
    pub fn from_secret_hex(secret_hex: &str) -> crate::Result<Keypair> {
        let secret_hex = secret_hex.strip_prefix("0x").unwrap_or(secret_hex);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(secret_hex, &mut bytes as &mut [u8])?;
        Keypair::from_secret_slice(&bytes)
    }

    /// Get the 20-byte address derived from the public key
    pub fn address_bytes(&self) -> GatewayAddress {
        public_key_to_address(&self.public_key)
    }

    /// Get the address in lowercase 0x-prefixed hex
    pub fn address(&self) -> String {
        address_to_hex(&self.address_bytes())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(&self.secret_key[..])
    }

    /// Hash and sign message bytes
    pub fn sign_data(&self, data: &[u8]) -> crate::Result<GatewaySignature> {
        sign_data(&self.secret_key, data)
    }
}

impl Default for Keypair {
    fn default() -> Self {
        Keypair::new()
    }
}

impl Signer for Keypair {
    fn sign(&self, data: &[u8]) -> crate::Result<GatewaySignature> {
        self.sign_data(data)
    }
}

impl fmt::Display for Keypair {
    /// formats a Keypair without leaking the secret
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address:{} pubkey:{}", self.address(), self.public_key)
    }
}
