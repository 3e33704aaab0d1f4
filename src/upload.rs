//! # Upload URL Signing
//!
//! Pre-signed PUT URLs for tenant configuration bundles. The signature is an
//! HMAC-SHA256 over the method, object path and expiry, hex encoded into the
//! query string. The object store recomputes it and enforces the expiry.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("signing key is invalid")]
    InvalidKey,
    #[error("object store URL {0} cannot hold object keys")]
    InvalidBaseUrl(String),
    #[error("upload URL has expired")]
    Expired,
    #[error("upload URL signature is missing or malformed")]
    Malformed,
    #[error("upload URL signature does not match")]
    Mismatch,
}

/// Produces time-limited upload URLs for object keys.
pub trait UploadUrlSigner: Send + Sync {
    fn presign_put(&self, key: &str, expires_in: chrono::Duration) -> Result<Url, SigningError>;
}

/// HMAC-SHA256 signer bound to one bucket endpoint.
#[derive(Clone)]
pub struct HmacUploadSigner {
    bucket_url: Url,
    key: Vec<u8>,
}

impl std::fmt::Debug for HmacUploadSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacUploadSigner")
            .field("bucket_url", &self.bucket_url.as_str())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl HmacUploadSigner {
    pub fn new(bucket_url: Url, key: impl Into<Vec<u8>>) -> Self {
        Self {
            bucket_url,
            key: key.into(),
        }
    }

    fn signature(&self, path: &str, expires_at: i64) -> Result<Vec<u8>, SigningError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| SigningError::InvalidKey)?;
        mac.update(b"PUT\n");
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires_at.to_string().as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn presign_at(
        &self,
        key: &str,
        expires_in: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Url, SigningError> {
        let mut url = self.bucket_url.clone();
        url.path_segments_mut()
            .map_err(|_| SigningError::InvalidBaseUrl(self.bucket_url.to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));

        let expires_at = (now + expires_in).timestamp();
        let signature = hex::encode(self.signature(url.path(), expires_at)?);
        url.query_pairs_mut()
            .append_pair("expires", &expires_at.to_string())
            .append_pair("signature", &signature);
        Ok(url)
    }

    /// Checks a URL produced by this signer against `now`.
    pub fn verify(&self, url: &Url, now: DateTime<Utc>) -> Result<(), SigningError> {
        let mut expires_at = None;
        let mut provided = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "expires" => expires_at = value.parse::<i64>().ok(),
                "signature" => provided = hex::decode(value.as_bytes()).ok(),
                _ => {}
            }
        }
        let (Some(expires_at), Some(provided)) = (expires_at, provided) else {
            return Err(SigningError::Malformed);
        };

        if now.timestamp() > expires_at {
            return Err(SigningError::Expired);
        }

        let expected = self.signature(url.path(), expires_at)?;
        if subtle::ConstantTimeEq::ct_eq(expected.as_slice(), provided.as_slice()).into() {
            Ok(())
        } else {
            Err(SigningError::Mismatch)
        }
    }
}

impl UploadUrlSigner for HmacUploadSigner {
    fn presign_put(&self, key: &str, expires_in: chrono::Duration) -> Result<Url, SigningError> {
        self.presign_at(key, expires_in, Utc::now())
    }
}

/// Object key of the configuration bundle uploaded for an onboarding request.
pub fn bundle_key(onboarding_id: &uuid::Uuid) -> String {
    format!("temp/{onboarding_id}.zip")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> HmacUploadSigner {
        HmacUploadSigner::new(
            Url::parse("https://artifacts.example.com/bucket/").unwrap(),
            "test-signing-key",
        )
    }

    #[test]
    fn presigned_url_carries_key_and_expiry() {
        let now = Utc::now();
        let url = signer()
            .presign_at("temp/abc.zip", chrono::Duration::minutes(15), now)
            .unwrap();

        assert_eq!(url.path(), "/bucket/temp/abc.zip");
        let expires = url
            .query_pairs()
            .find(|(name, _)| name == "expires")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        assert_eq!(expires, (now + chrono::Duration::minutes(15)).timestamp().to_string());
    }

    #[test]
    fn verify_accepts_fresh_urls_and_rejects_expired_ones() {
        let signer = signer();
        let now = Utc::now();
        let url = signer
            .presign_at("temp/abc.zip", chrono::Duration::minutes(15), now)
            .unwrap();

        assert_eq!(signer.verify(&url, now + chrono::Duration::minutes(14)), Ok(()));
        assert_eq!(
            signer.verify(&url, now + chrono::Duration::minutes(16)),
            Err(SigningError::Expired)
        );
    }

    #[test]
    fn verify_rejects_tampered_paths_and_foreign_keys() {
        let signer = signer();
        let now = Utc::now();
        let url = signer
            .presign_at("temp/abc.zip", chrono::Duration::minutes(15), now)
            .unwrap();

        let mut tampered = url.clone();
        tampered.set_path("/bucket/temp/other.zip");
        assert_eq!(signer.verify(&tampered, now), Err(SigningError::Mismatch));

        let other = HmacUploadSigner::new(
            Url::parse("https://artifacts.example.com/bucket/").unwrap(),
            "another-key",
        );
        assert_eq!(other.verify(&url, now), Err(SigningError::Mismatch));

        let mut stripped = url.clone();
        stripped.set_query(None);
        assert_eq!(signer.verify(&stripped, now), Err(SigningError::Malformed));
    }

    #[test]
    fn bundle_key_is_under_temp() {
        let id = uuid::Uuid::nil();
        assert_eq!(bundle_key(&id), "temp/00000000-0000-0000-0000-000000000000.zip");
    }
}
