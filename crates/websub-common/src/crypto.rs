//! Content hashing and delivery signatures

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Crypto error
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// Unknown hash algorithm name
    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// HMAC key rejected by the mac implementation
    #[error("Invalid signature key")]
    InvalidKey,
}

/// Hash algorithms accepted for topic content hashing and delivery signing.
///
/// Stored by name on topic and subscription rows; the wire format of the
/// delivery signature header is `<name>=<hex>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlg {
    /// SHA-1, kept for subscribers that still request it
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    #[default]
    Sha512,
}

impl HashAlg {
    /// All supported algorithms, for validation messages
    pub const ALL: &'static [HashAlg] = &[
        HashAlg::Sha1,
        HashAlg::Sha256,
        HashAlg::Sha384,
        HashAlg::Sha512,
    ];

    /// The lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlg::Sha1 => "sha1",
            HashAlg::Sha256 => "sha256",
            HashAlg::Sha384 => "sha384",
            HashAlg::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlg {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashAlg::Sha1),
            "sha256" => Ok(HashAlg::Sha256),
            "sha384" => Ok(HashAlg::Sha384),
            "sha512" => Ok(HashAlg::Sha512),
            other => Err(Error::UnsupportedAlgorithm(other.to_owned())),
        }
    }
}

/// Hex digest of `body` under `alg`.
///
/// Deterministic: the same body and algorithm always produce the same hash,
/// which is what topic change detection relies on.
pub fn content_hash(alg: HashAlg, body: &[u8]) -> String {
    match alg {
        HashAlg::Sha1 => hex::encode(Sha1::digest(body)),
        HashAlg::Sha256 => hex::encode(Sha256::digest(body)),
        HashAlg::Sha384 => hex::encode(Sha384::digest(body)),
        HashAlg::Sha512 => hex::encode(Sha512::digest(body)),
    }
}

fn hmac_hex<M: Mac + hmac::digest::KeyInit>(secret: &[u8], body: &[u8]) -> Result<String, Error> {
    let mut mac = <M as Mac>::new_from_slice(secret).map_err(|_| Error::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `X-Hub-Signature` header value: `<algo>=<lowercase hex hmac>`.
pub fn signature_header(alg: HashAlg, secret: &[u8], body: &[u8]) -> Result<String, Error> {
    let mac = match alg {
        HashAlg::Sha1 => hmac_hex::<Hmac<Sha1>>(secret, body)?,
        HashAlg::Sha256 => hmac_hex::<Hmac<Sha256>>(secret, body)?,
        HashAlg::Sha384 => hmac_hex::<Hmac<Sha384>>(secret, body)?,
        HashAlg::Sha512 => hmac_hex::<Hmac<Sha512>>(secret, body)?,
    };

    Ok(format!("{}={}", alg.as_str(), mac))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = content_hash(HashAlg::Sha512, b"hello world");
        let b = content_hash(HashAlg::Sha512, b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
    }

    #[test]
    fn hash_differs_by_algorithm() {
        let body = b"payload";
        assert_ne!(
            content_hash(HashAlg::Sha256, body),
            content_hash(HashAlg::Sha512, body)
        );
        assert_eq!(content_hash(HashAlg::Sha256, body).len(), 64);
        assert_eq!(content_hash(HashAlg::Sha1, body).len(), 40);
    }

    #[test]
    fn round_trip_names() {
        for alg in HashAlg::ALL {
            assert_eq!(Ok(*alg), alg.as_str().parse());
        }
        assert!("md5".parse::<HashAlg>().is_err());
    }

    #[test]
    fn signature_header_format() {
        // RFC 4231 test case 2 (sha256 of "what do ya want for nothing?"
        // keyed with "Jefe")
        let header = signature_header(HashAlg::Sha256, b"Jefe", b"what do ya want for nothing?")
            .expect("sign");
        assert_eq!(
            header,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signature_uses_subscription_algorithm() {
        let h1 = signature_header(HashAlg::Sha1, b"secret", b"body").expect("sign");
        let h512 = signature_header(HashAlg::Sha512, b"secret", b"body").expect("sign");
        assert!(h1.starts_with("sha1="));
        assert!(h512.starts_with("sha512="));
        assert_eq!(h512.len(), "sha512=".len() + 128);
    }
}
