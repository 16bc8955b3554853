//! Content signatures for PubSubHubbub deliveries
//!
//! A hub signs every content distribution with the subscription secret:
//! `X-Hub-Signature: sha1=<hex(HMAC-SHA1(secret, body))>`.
//! WebSub hubs may also use `sha256=`, `sha384=` or `sha512=`.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::AppError;

/// Name of the delivery signature header
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// HMAC digest used for a content signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Digest length in bytes
    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

/// Parsed `X-Hub-Signature` header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSignature {
    pub algorithm: SignatureAlgorithm,
    pub digest: Vec<u8>,
}

/// Parse `<algorithm>=<hex digest>`.
///
/// Returns `None` for unknown algorithms, bad hex, or a digest of the
/// wrong length.
pub fn parse_signature_header(header: &str) -> Option<HubSignature> {
    let (prefix, hex_digest) = header.trim().split_once('=')?;
    let algorithm = SignatureAlgorithm::from_prefix(prefix.trim())?;
    let digest = hex::decode(hex_digest.trim()).ok()?;

    if digest.len() != algorithm.output_len() {
        return None;
    }

    Some(HubSignature { algorithm, digest })
}

fn hmac_digest<M>(secret: &[u8], body: &[u8]) -> Result<Vec<u8>, AppError>
where
    M: Mac + hmac::digest::KeyInit,
{
    let mut mac = <M as Mac>::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid HMAC key: {}", e)))?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hmac_verify<M>(secret: &[u8], body: &[u8], digest: &[u8]) -> bool
where
    M: Mac + hmac::digest::KeyInit,
{
    let Ok(mut mac) = <M as Mac>::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(digest).is_ok()
}

/// Compute the header value a hub would send for `body`
pub fn sign_content(
    secret: &str,
    body: &[u8],
    algorithm: SignatureAlgorithm,
) -> Result<String, AppError> {
    let digest = match algorithm {
        SignatureAlgorithm::Sha1 => hmac_digest::<Hmac<Sha1>>(secret.as_bytes(), body)?,
        SignatureAlgorithm::Sha256 => hmac_digest::<Hmac<Sha256>>(secret.as_bytes(), body)?,
        SignatureAlgorithm::Sha384 => hmac_digest::<Hmac<Sha384>>(secret.as_bytes(), body)?,
        SignatureAlgorithm::Sha512 => hmac_digest::<Hmac<Sha512>>(secret.as_bytes(), body)?,
    };

    Ok(format!("{}={}", algorithm.prefix(), hex::encode(digest)))
}

/// Verify a delivery signature header against `body`.
///
/// The digest comparison is constant-time. A missing or malformed header
/// never verifies.
pub fn verify_content_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(signature) = header.and_then(parse_signature_header) else {
        return false;
    };

    let secret = secret.as_bytes();
    match signature.algorithm {
        SignatureAlgorithm::Sha1 => hmac_verify::<Hmac<Sha1>>(secret, body, &signature.digest),
        SignatureAlgorithm::Sha256 => {
            hmac_verify::<Hmac<Sha256>>(secret, body, &signature.digest)
        }
        SignatureAlgorithm::Sha384 => {
            hmac_verify::<Hmac<Sha384>>(secret, body, &signature.digest)
        }
        SignatureAlgorithm::Sha512 => {
            hmac_verify::<Hmac<Sha512>>(secret, body, &signature.digest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_content_matches_known_hmac_sha1_vector() {
        // RFC 2202 test case 2
        let header = sign_content(
            "Jefe",
            b"what do ya want for nothing?",
            SignatureAlgorithm::Sha1,
        )
        .unwrap();
        assert_eq!(header, "sha1=effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[test]
    fn verify_accepts_correct_signature() {
        let header = sign_content("s3cr3t", b"hello", SignatureAlgorithm::Sha1).unwrap();
        assert!(verify_content_signature("s3cr3t", b"hello", Some(&header)));
    }

    #[test]
    fn verify_accepts_uppercase_hex() {
        let header = sign_content("s3cr3t", b"hello", SignatureAlgorithm::Sha1).unwrap();
        let (prefix, digest) = header.split_once('=').unwrap();
        let upper = format!("{}={}", prefix, digest.to_ascii_uppercase());
        assert!(verify_content_signature("s3cr3t", b"hello", Some(&upper)));
    }

    #[test]
    fn verify_accepts_websub_sha256() {
        let header = sign_content("s3cr3t", b"hello", SignatureAlgorithm::Sha256).unwrap();
        assert!(header.starts_with("sha256="));
        assert!(verify_content_signature("s3cr3t", b"hello", Some(&header)));
    }

    #[test]
    fn verify_rejects_zero_digest() {
        let header = format!("sha1={}", "0".repeat(40));
        assert!(!verify_content_signature("s3cr3t", b"hello", Some(&header)));
    }

    #[test]
    fn verify_rejects_missing_and_malformed_headers() {
        assert!(!verify_content_signature("s3cr3t", b"hello", None));
        assert!(!verify_content_signature("s3cr3t", b"hello", Some("")));
        assert!(!verify_content_signature("s3cr3t", b"hello", Some("sha1")));
        assert!(!verify_content_signature("s3cr3t", b"hello", Some("sha1=zz")));
        assert!(!verify_content_signature("s3cr3t", b"hello", Some("md5=00")));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let header = sign_content("other", b"hello", SignatureAlgorithm::Sha1).unwrap();
        assert!(!verify_content_signature("s3cr3t", b"hello", Some(&header)));
    }

    #[test]
    fn any_single_bit_flip_in_body_fails() {
        let body = b"hello".to_vec();
        let header = sign_content("s3cr3t", &body, SignatureAlgorithm::Sha1).unwrap();

        for byte in 0..body.len() {
            for bit in 0..8 {
                let mut mutated = body.clone();
                mutated[byte] ^= 1 << bit;
                assert!(!verify_content_signature("s3cr3t", &mutated, Some(&header)));
            }
        }
    }

    #[test]
    fn any_single_bit_flip_in_signature_fails() {
        let header = sign_content("s3cr3t", b"hello", SignatureAlgorithm::Sha1).unwrap();
        let parsed = parse_signature_header(&header).unwrap();

        for byte in 0..parsed.digest.len() {
            for bit in 0..8 {
                let mut digest = parsed.digest.clone();
                digest[byte] ^= 1 << bit;
                let mutated = format!("sha1={}", hex::encode(digest));
                assert!(!verify_content_signature("s3cr3t", b"hello", Some(&mutated)));
            }
        }
    }
}
