//! # Object Store
//!
//! Reads and writes tenant artifacts in the bucket behind the object store
//! endpoint: uploaded configuration bundles and the service discovery file
//! application stacks load at startup.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;
use uuid::Uuid;

use crate::clients::ClientError;

/// Server-side copy source header understood by S3-compatible stores.
const COPY_SOURCE_HEADER: &str = "x-amz-copy-source";

/// Where a tenant's configuration bundle lives once the tenant is provisioned.
pub fn tenant_bundle_key(tenant_id: Uuid) -> String {
    format!("tenants/{tenant_id}/config.zip")
}

/// Environment file listing the tenant's private service endpoints.
pub fn service_discovery_key(tenant_id: Uuid) -> String {
    format!("tenants/{tenant_id}/ServiceDiscovery.env")
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, ClientError>;

    /// Copies `from` to `to` inside the bucket.
    async fn copy(&self, from: &str, to: &str) -> Result<(), ClientError>;

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), ClientError>;
}

/// Object store client speaking the S3 REST dialect.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    bucket_url: Url,
}

impl HttpObjectStore {
    pub fn new(client: Client, bucket_url: Url) -> Self {
        Self { client, bucket_url }
    }

    fn object_url(&self, key: &str) -> Result<Url, ClientError> {
        let mut url = self.bucket_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Transport(format!("{} cannot hold object keys", self.bucket_url)))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }

    async fn check(key: &str, response: reqwest::Response) -> Result<(), ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(key, status = status.as_u16(), "Object store call failed");
        Err(ClientError::Http {
            endpoint: key.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, ClientError> {
        let response = self.client.head(self.object_url(key)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(key, response).await?;
        Ok(true)
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), ClientError> {
        let source = self.object_url(from)?;
        let response = self
            .client
            .put(self.object_url(to)?)
            .header(COPY_SOURCE_HEADER, source.path())
            .send()
            .await?;
        Self::check(to, response).await
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .put(self.object_url(key)?)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        Self::check(key, response).await
    }
}
