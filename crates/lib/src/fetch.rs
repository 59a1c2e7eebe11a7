//! Download of build resources with checksum verification and caching.

use md5::Md5;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::cache::{Cache, CacheError};
use crate::spec::ResourceDescriptor;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("request for {url} failed: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  /// The server answered with something other than 200 or 304.
  #[error("bad response from {url}: {status}")]
  BadResponse { url: String, status: u16 },

  #[error("unsupported hash type '{hash_type}' (try md5 or sha1)")]
  BadHashType { hash_type: String },

  /// The body did not match the expected digest. The bytes are kept for inspection.
  #[error("hash mismatch: expected {expected}, got {actual}")]
  BadHash {
    bytes: Vec<u8>,
    expected: String,
    actual: String,
  },

  #[error(transparent)]
  Cache(#[from] CacheError),
}

/// Cache key for an effective resource URL.
pub fn cache_key(effective_url: &str) -> String {
  url::form_urlencoded::byte_serialize(effective_url.as_bytes()).collect()
}

/// Recovers the URL a cache key was made from.
pub fn url_from_key(key: &str) -> String {
  url::form_urlencoded::parse(key.as_bytes())
    .map(|(name, _)| name.into_owned())
    .next()
    .unwrap_or_default()
}

/// Lowercase hex digest of `bytes` using `hash_type`.
pub fn digest(hash_type: &str, bytes: &[u8]) -> Result<String, FetchError> {
  match hash_type {
    "md5" => Ok(hex::encode(Md5::digest(bytes))),
    "sha1" => Ok(hex::encode(Sha1::digest(bytes))),
    other => Err(FetchError::BadHashType {
      hash_type: other.to_string(),
    }),
  }
}

/// Cache-first resource downloader.
#[derive(Debug, Clone)]
pub struct Fetcher<C> {
  cache: C,
  client: reqwest::Client,
}

impl<C: Cache> Fetcher<C> {
  pub fn new(cache: C) -> Self {
    Self {
      cache,
      client: reqwest::Client::new(),
    }
  }

  pub fn cache(&self) -> &C {
    &self.cache
  }

  /// Returns the bytes for `descriptor`, downloading them on a cache miss.
  ///
  /// Cached bytes are trusted without re-hashing. Downloaded bytes are
  /// cached only once their digest matches.
  pub async fn fetch(&self, descriptor: &ResourceDescriptor, effective_url: &str) -> Result<Vec<u8>, FetchError> {
    let key = cache_key(effective_url);

    match self.cache.get(&key).await {
      Ok(bytes) => {
        debug!(url = %effective_url, "resource cache hit");
        return Ok(bytes);
      }
      Err(CacheError::NoSuchKey { .. }) => {}
      Err(e) => return Err(e.into()),
    }

    info!(url = %effective_url, "downloading resource");
    let response = self
      .client
      .get(effective_url)
      .send()
      .await
      .map_err(|source| FetchError::Request {
        url: effective_url.to_string(),
        source,
      })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::NOT_MODIFIED {
      error!(url = %effective_url, code = status.as_u16(), "bad response");
      return Err(FetchError::BadResponse {
        url: effective_url.to_string(),
        status: status.as_u16(),
      });
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|source| FetchError::Request {
        url: effective_url.to_string(),
        source,
      })?
      .to_vec();

    let actual = digest(&descriptor.hash_type, &bytes)?;
    if actual != descriptor.hash {
      error!(url = %effective_url, provided = %descriptor.hash, actual = %actual, "resource hash did not match");
      return Err(FetchError::BadHash {
        bytes,
        expected: descriptor.hash.clone(),
        actual,
      });
    }

    self.cache.set(&key, &bytes).await?;
    info!(url = %effective_url, size = bytes.len(), "resource cached");
    Ok(bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::FsCache;
  use tempfile::TempDir;

  const BODY: &[u8] = b"hello world";
  const BODY_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";
  const BODY_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

  fn descriptor(hash_type: &str, hash: &str) -> ResourceDescriptor {
    ResourceDescriptor {
      url: String::new(),
      hash_type: hash_type.to_string(),
      hash: hash.to_string(),
      unpack: false,
    }
  }

  fn fetcher(temp: &TempDir) -> Fetcher<FsCache> {
    Fetcher::new(FsCache::new(temp.path()).unwrap())
  }

  #[test]
  fn cache_key_escapes_the_url() {
    assert_eq!(
      cache_key("http://example.com/a b.tgz"),
      "http%3A%2F%2Fexample.com%2Fa+b.tgz"
    );
    assert_eq!(url_from_key("http%3A%2F%2Fexample.com%2Fa+b.tgz"), "http://example.com/a b.tgz");
  }

  #[test]
  fn digests_known_values() {
    assert_eq!(digest("sha1", BODY).unwrap(), BODY_SHA1);
    assert_eq!(digest("md5", BODY).unwrap(), BODY_MD5);
    assert!(matches!(digest("sha256", BODY), Err(FetchError::BadHashType { .. })));
  }

  #[tokio::test]
  async fn verified_download_is_cached() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/dist/source.tgz")
      .with_status(200)
      .with_body(BODY)
      .expect(1)
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let fetcher = fetcher(&temp);
    let url = format!("{}/dist/source.tgz", server.url());

    let bytes = fetcher.fetch(&descriptor("sha1", BODY_SHA1), &url).await.unwrap();
    assert_eq!(bytes, BODY);
    assert_eq!(fetcher.cache().get(&cache_key(&url)).await.unwrap(), BODY);

    // Second fetch is served from the cache.
    let again = fetcher.fetch(&descriptor("sha1", BODY_SHA1), &url).await.unwrap();
    assert_eq!(again, BODY);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn md5_is_supported() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/a").with_body(BODY).create_async().await;

    let temp = TempDir::new().unwrap();
    let url = format!("{}/a", server.url());
    let bytes = fetcher(&temp).fetch(&descriptor("md5", BODY_MD5), &url).await.unwrap();
    assert_eq!(bytes, BODY);
  }

  #[tokio::test]
  async fn mismatch_keeps_bytes_and_skips_cache() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/a").with_body(BODY).create_async().await;

    let temp = TempDir::new().unwrap();
    let fetcher = fetcher(&temp);
    let url = format!("{}/a", server.url());

    let err = fetcher.fetch(&descriptor("sha1", "deadbeef"), &url).await.unwrap_err();
    match err {
      FetchError::BadHash { bytes, expected, actual } => {
        assert_eq!(bytes, BODY);
        assert_eq!(expected, "deadbeef");
        assert_eq!(actual, BODY_SHA1);
      }
      other => panic!("expected BadHash, got {other:?}"),
    }
    assert!(fetcher.cache().keys().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn unknown_hash_type_fails() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/a").with_body(BODY).create_async().await;

    let temp = TempDir::new().unwrap();
    let url = format!("{}/a", server.url());
    let err = fetcher(&temp).fetch(&descriptor("crc32", "x"), &url).await.unwrap_err();
    assert!(matches!(err, FetchError::BadHashType { ref hash_type } if hash_type == "crc32"));
  }

  #[tokio::test]
  async fn not_found_is_a_bad_response() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/missing").with_status(404).create_async().await;

    let temp = TempDir::new().unwrap();
    let url = format!("{}/missing", server.url());
    let err = fetcher(&temp).fetch(&descriptor("sha1", BODY_SHA1), &url).await.unwrap_err();
    assert!(matches!(err, FetchError::BadResponse { status: 404, .. }));
  }

  #[tokio::test]
  async fn cache_hit_needs_no_network() {
    let temp = TempDir::new().unwrap();
    let fetcher = fetcher(&temp);
    let url = "http://127.0.0.1:9/unreachable.tgz";
    fetcher.cache().set(&cache_key(url), b"cached").await.unwrap();

    let bytes = fetcher.fetch(&descriptor("sha1", BODY_SHA1), url).await.unwrap();
    assert_eq!(bytes, b"cached");
  }
}
