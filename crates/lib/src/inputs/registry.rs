//! Upstream image registries.
//!
//! The resolver only talks to registries through [`RegistryClient`]. The
//! bundled [`HttpRegistryClient`] speaks a small HTTP protocol whose bodies are
//! protobuf-encoded [`SourceImage`]s:
//!
//! ```text
//! GET {base}/v1/images/{owner}/{name}/versions/{version}
//! GET {base}/v1/images/{owner}/{name}/refs/{reference}
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::image::{ImageError, SourceImage};

/// Errors reported by a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("image {owner}/{name}@{version} not found")]
  NotFound {
    owner: String,
    name: String,
    version: String,
  },

  #[error("registry request to {url} failed: {message}")]
  Transport { url: String, message: String },

  #[error("registry returned HTTP {status} for {url}")]
  Status { url: String, status: u16 },

  #[error("registry returned an undecodable image: {0}")]
  Decode(#[from] ImageError),

  #[error("no registry is configured; add a `registry` section to resolve {owner}/{name}")]
  NotConfigured { owner: String, name: String },
}

/// Access to an upstream package registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
  /// Fetch the image published under an exact version.
  async fn get_image(&self, owner: &str, name: &str, version: &str) -> Result<SourceImage, RegistryError>;

  /// Fetch the image a floating reference currently points at.
  ///
  /// The returned image carries the exact version the reference resolved to.
  async fn latest_image(&self, owner: &str, name: &str, reference: &str) -> Result<SourceImage, RegistryError>;
}

/// Registry client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
  base_url: String,
  token: Option<String>,
  client: reqwest::Client,
}

impl HttpRegistryClient {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into().trim_end_matches('/').to_string(),
      token: None,
      client: reqwest::Client::new(),
    }
  }

  /// Send `token` as a bearer token with every request.
  pub fn with_token(mut self, token: impl Into<String>) -> Self {
    self.token = Some(token.into());
    self
  }

  fn version_url(&self, owner: &str, name: &str, version: &str) -> String {
    format!("{}/v1/images/{owner}/{name}/versions/{version}", self.base_url)
  }

  fn reference_url(&self, owner: &str, name: &str, reference: &str) -> String {
    format!("{}/v1/images/{owner}/{name}/refs/{reference}", self.base_url)
  }

  async fn fetch(&self, url: String, owner: &str, name: &str, version: &str) -> Result<SourceImage, RegistryError> {
    debug!(url = %url, "fetching image");

    let mut request = self.client.get(&url).header("accept", "application/x-protobuf");
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| RegistryError::Transport {
      url: url.clone(),
      message: e.to_string(),
    })?;

    match response.status() {
      StatusCode::NOT_FOUND => {
        return Err(RegistryError::NotFound {
          owner: owner.to_string(),
          name: name.to_string(),
          version: version.to_string(),
        });
      }
      status if !status.is_success() => {
        return Err(RegistryError::Status {
          url,
          status: status.as_u16(),
        });
      }
      _ => {}
    }

    let bytes = response.bytes().await.map_err(|e| RegistryError::Transport {
      url: url.clone(),
      message: e.to_string(),
    })?;

    Ok(SourceImage::from_bytes(&bytes)?)
  }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
  async fn get_image(&self, owner: &str, name: &str, version: &str) -> Result<SourceImage, RegistryError> {
    let url = self.version_url(owner, name, version);
    self.fetch(url, owner, name, version).await
  }

  async fn latest_image(&self, owner: &str, name: &str, reference: &str) -> Result<SourceImage, RegistryError> {
    let url = self.reference_url(owner, name, reference);
    self.fetch(url, owner, name, reference).await
  }
}

/// Client used when the repository configures no registry.
///
/// Every request fails, so repositories without registry dependencies work
/// without any registry settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRegistry;

#[async_trait]
impl RegistryClient for UnconfiguredRegistry {
  async fn get_image(&self, owner: &str, name: &str, _version: &str) -> Result<SourceImage, RegistryError> {
    Err(RegistryError::NotConfigured {
      owner: owner.to_string(),
      name: name.to_string(),
    })
  }

  async fn latest_image(&self, owner: &str, name: &str, _reference: &str) -> Result<SourceImage, RegistryError> {
    Err(RegistryError::NotConfigured {
      owner: owner.to_string(),
      name: name.to_string(),
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn urls_follow_the_image_layout() {
    let client = HttpRegistryClient::new("https://registry.example.com/");

    assert_eq!(
      client.version_url("acme", "types", "v3"),
      "https://registry.example.com/v1/images/acme/types/versions/v3"
    );
    assert_eq!(
      client.reference_url("acme", "types", "main"),
      "https://registry.example.com/v1/images/acme/types/refs/main"
    );
  }

  #[tokio::test]
  async fn unreachable_registry_is_a_transport_error() {
    let client = HttpRegistryClient::new("http://127.0.0.1:9").with_token("secret");

    let result = client.get_image("acme", "types", "v3").await;

    assert!(matches!(result, Err(RegistryError::Transport { .. })));
  }

  #[tokio::test]
  async fn fake_registry_resolves_references() {
    let registry = testutil::FakeRegistry::new();
    registry.publish("acme", "types", "v3", SourceImage::named("acme/types"));
    registry.tag("acme", "types", "main", "v3");

    let image = registry.latest_image("acme", "types", "main").await.unwrap();

    assert_eq!(image.version.as_deref(), Some("v3"));
    assert_eq!(registry.calls(), 1);
  }

  #[tokio::test]
  async fn unconfigured_registry_names_the_dependency() {
    let err = UnconfiguredRegistry.get_image("acme", "types", "v3").await.unwrap_err();

    assert!(matches!(err, RegistryError::NotConfigured { .. }));
    assert!(err.to_string().contains("acme/types"));
  }
}
