// Copyright 2018-2024 the kachery authors. MIT license.

use std::path::Path;
use std::path::PathBuf;

use crate::cache::resolve_cache_root;
use crate::cache::LocalHashCache;
use crate::config::Config;
use crate::config::ConfigOverride;
use crate::digest::Algorithm;
use crate::env::Env;
use crate::env::RealEnv;
use crate::error::KacheryError;
use crate::error::Result;
use crate::error::TransportError;
use crate::manifest::read_file_system_dir;
use crate::manifest::Manifest;
use crate::manifest::ManifestNode;
use crate::transport::interpret_check;
use crate::transport::retry_get_json;
use crate::transport::CheckOutcome;
use crate::transport::CheckResponse;
use crate::transport::HttpClient;
use crate::transport::RemoteEndpoint;
use crate::url::ContentUrl;

/// Metadata about a stored object, returned by [`get_file_info`].
#[derive(Debug, Clone)]
pub struct FileInfo {
  pub path: PathBuf,
  pub size: u64,
  pub algorithm: Algorithm,
  pub hex: String,
}

/// Ties together the local cache, the process config, and an optional
/// remote transport. A `KacheryClient` is cheap to construct; it holds no
/// connection state beyond what [`HttpClient`] implementations keep.
pub struct KacheryClient<E: Env, H: HttpClient> {
  env: E,
  http: Option<H>,
}

impl<E: Env> KacheryClient<E, NullHttpClient> {
  /// A client with no remote transport; a lookup that misses the local
  /// cache is treated as absent rather than as an error.
  pub fn local_only(env: E) -> Self {
    Self { env, http: None }
  }
}

impl<E: Env, H: HttpClient> KacheryClient<E, H> {
  pub fn new(env: E, http: H) -> Self {
    Self {
      env,
      http: Some(http),
    }
  }

  fn cache(&self, _config: &Config) -> Result<LocalHashCache<E>> {
    let root = resolve_cache_root(None).map_err(KacheryError::from)?;
    Ok(LocalHashCache::new(root, self.env.clone()))
  }

  fn endpoint(&self, config: &Config) -> Result<RemoteEndpoint> {
    RemoteEndpoint::from_config(config).map_err(KacheryError::from)
  }

  /// Resolves a content URL to a local file path, downloading from the
  /// remote store if configured to do so and the content is not already
  /// cached. Returns `Ok(None)` for any miss: not cached locally and either
  /// remote access is disabled or the remote reports the content absent.
  pub fn load_file(
    &self,
    url: &str,
    overrides: &ConfigOverride,
  ) -> Result<Option<PathBuf>> {
    let config = overrides.resolve();
    let content_url: ContentUrl = url.parse().map_err(KacheryError::from)?;
    let cache = self.cache(&config)?;

    match &content_url {
      ContentUrl::File { digest, .. } => {
        self.ensure_local(&cache, &config, digest.algorithm, &digest.hex)
      }
      ContentUrl::Dir {
        digest, sub_path, ..
      } => {
        let Some(manifest_path) =
          self.ensure_local(&cache, &config, digest.algorithm, &digest.hex)?
        else {
          return Ok(None);
        };
        let bytes = self
          .env
          .read_file_bytes(&manifest_path)?
          .ok_or_else(|| KacheryError::Other("manifest vanished after fetch".to_string()))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
          .map_err(|e| KacheryError::Other(format!("corrupt manifest: {e}")))?;
        let Some(node) = manifest.resolve(sub_path) else {
          return Ok(None);
        };
        match node {
          ManifestNode::File(entry) => {
            let hex = entry
              .hex_for(digest.algorithm)
              .ok_or_else(|| {
                KacheryError::Other(format!(
                  "entry has no {} digest recorded",
                  digest.algorithm
                ))
              })?
              .to_string();
            self.ensure_local(&cache, &config, digest.algorithm, &hex)
          }
          ManifestNode::Dir(_) => Err(KacheryError::Other(format!(
            "{url} refers to a directory, not a file"
          ))),
        }
      }
    }
  }

  pub fn load_text(&self, url: &str, overrides: &ConfigOverride) -> Result<Option<String>> {
    let Some(path) = self.load_file(url, overrides)? else {
      return Ok(None);
    };
    let bytes = self
      .env
      .read_file_bytes(&path)?
      .ok_or_else(|| KacheryError::Other(format!("file vanished: {}", path.display())))?;
    let text = String::from_utf8(bytes).map_err(|e| KacheryError::Other(e.to_string()))?;
    Ok(Some(text))
  }

  pub fn load_object(
    &self,
    url: &str,
    overrides: &ConfigOverride,
  ) -> Result<Option<serde_json::Value>> {
    let Some(text) = self.load_text(url, overrides)? else {
      return Ok(None);
    };
    let value = serde_json::from_str(&text).map_err(|e| KacheryError::Other(e.to_string()))?;
    Ok(Some(value))
  }

  /// Finds or downloads the content at `(algorithm, hex)`, consulting the
  /// remote store only if not already cached locally and the resolved
  /// config permits remote access. A miss at every stage (no remote
  /// access, no transport attached, or the remote's check reporting the
  /// content absent) is `Ok(None)`, never an error.
  fn ensure_local(
    &self,
    cache: &LocalHashCache<E>,
    config: &Config,
    algorithm: Algorithm,
    hex: &str,
  ) -> Result<Option<PathBuf>> {
    if let Some(path) = cache.find(algorithm, hex) {
      return Ok(Some(path));
    }
    if !config.use_remote {
      return Ok(None);
    }
    let Some(http) = self.http.as_ref() else {
      return Ok(None);
    };
    let endpoint = self.endpoint(config)?;
    let check_url = endpoint.check_url(algorithm.as_str(), hex);
    let response = retry_get_json(|| http.get_json(&check_url)).map_err(KacheryError::from)?;
    let check: CheckResponse =
      serde_json::from_value(response).map_err(|e| KacheryError::Other(e.to_string()))?;
    let size = match interpret_check(check) {
      CheckOutcome::NotFound => return Ok(None),
      CheckOutcome::Found { size: None } => {
        return Err(KacheryError::Other(format!(
          "remote check for {algorithm} {hex} did not report a size"
        )))
      }
      CheckOutcome::Found { size: Some(size) } => size,
    };

    let download_url = endpoint.download_url(algorithm.as_str(), hex);
    let bytes = http.get_bytes(&download_url).map_err(KacheryError::from)?;
    let path = cache
      .store_verified_download(algorithm, hex, size, &bytes)
      .map_err(KacheryError::from)?;
    Ok(Some(path))
  }

  /// Hashes and ingests `path` into the local cache, optionally uploading
  /// it to the configured remote store. Returns the resulting content URL.
  pub fn store_file(
    &self,
    path: &Path,
    overrides: &ConfigOverride,
  ) -> Result<String> {
    let config = overrides.resolve();
    let cache = self.cache(&config)?;
    let (hex, cached_path) = cache
      .store_local_file(path, config.algorithm)
      .map_err(KacheryError::from)?;

    if config.use_remote {
      if let Some(http) = &self.http {
        self.upload_if_needed(http, &config, &cached_path, config.algorithm, &hex)?;
      }
    }

    let basename = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned());
    Ok(ContentUrl::File {
      digest: crate::digest::Digest::new(config.algorithm, hex).map_err(KacheryError::from)?,
      basename,
    }
    .to_string())
  }

  pub fn store_text(&self, text: &str, overrides: &ConfigOverride) -> Result<String> {
    self.store_bytes(text.as_bytes(), overrides)
  }

  pub fn store_object(
    &self,
    value: &serde_json::Value,
    overrides: &ConfigOverride,
  ) -> Result<String> {
    let text = serde_json::to_string(value).map_err(|e| KacheryError::Other(e.to_string()))?;
    self.store_bytes(text.as_bytes(), overrides)
  }

  fn store_bytes(&self, bytes: &[u8], overrides: &ConfigOverride) -> Result<String> {
    let config = overrides.resolve();
    let cache = self.cache(&config)?;
    let digest = crate::digest::Digest::of_bytes(config.algorithm, bytes);
    let path = cache
      .store_bytes_with_known_hash(config.algorithm, &digest.hex, bytes)
      .map_err(KacheryError::from)?;
    if config.use_remote {
      if let Some(http) = &self.http {
        self.upload_if_needed(http, &config, &path, config.algorithm, &digest.hex)?;
      }
    }
    Ok(ContentUrl::File {
      digest,
      basename: None,
    }
    .to_string())
  }

  /// Checks whether the remote store already holds this content before
  /// uploading; a mismatched remote size is a hard error rather than an
  /// overwrite, since two different files should never share a digest.
  fn upload_if_needed(
    &self,
    http: &H,
    config: &Config,
    local_path: &Path,
    algorithm: Algorithm,
    hex: &str,
  ) -> Result<()> {
    let endpoint = self.endpoint(config)?;
    let local_size = self
      .env
      .stat(local_path)?
      .map(|(size, _)| size)
      .unwrap_or_default();

    let check_url = endpoint.check_url(algorithm.as_str(), hex);
    let response = retry_get_json(|| http.get_json(&check_url)).map_err(KacheryError::from)?;
    let check: CheckResponse =
      serde_json::from_value(response).map_err(|e| KacheryError::Other(e.to_string()))?;

    match interpret_check(check) {
      CheckOutcome::Found { size: Some(remote_size) } if remote_size != local_size => {
        Err(KacheryError::Transport(TransportError::RemoteSizeConflict {
          remote_size,
          local_size,
        }))
      }
      CheckOutcome::Found { .. } => Ok(()),
      CheckOutcome::NotFound => {
        let bytes = self
          .env
          .read_file_bytes(local_path)?
          .ok_or_else(|| KacheryError::Other("local object vanished before upload".to_string()))?;
        let upload_url = endpoint.upload_url(algorithm.as_str(), hex);
        http.post_bytes(&upload_url, &bytes).map_err(KacheryError::from)
      }
    }
  }

  /// Hashes every file under `path`, builds its manifest, optionally
  /// storing each file (and the manifest itself) into the cache/remote,
  /// and returns the resulting `sha1dir://` (or `md5dir://`) URL.
  pub fn store_dir(&self, path: &Path, overrides: &ConfigOverride) -> Result<String> {
    let config = overrides.resolve();
    let cache = self.cache(&config)?;
    let manifest = read_file_system_dir(&self.env, path, config.algorithm).map_err(KacheryError::from)?;
    let digest = manifest.digest(config.algorithm);
    let manifest_path = cache
      .store_bytes_with_known_hash(config.algorithm, &digest.hex, &manifest.canonical_json())
      .map_err(KacheryError::from)?;

    if config.use_remote {
      if let Some(http) = &self.http {
        self.upload_if_needed(http, &config, &manifest_path, config.algorithm, &digest.hex)?;
      }
    }

    let label = path.file_name().map(|n| n.to_string_lossy().into_owned());
    Ok(ContentUrl::Dir {
      digest,
      label,
      sub_path: Vec::new(),
    }
    .to_string())
  }

  /// Reads back the manifest for a `sha1dir://`/`md5dir://` URL, walking
  /// its sub-path. When `recursive` is false, every subdirectory of the
  /// resolved level is flattened to an empty mapping.
  pub fn read_dir(
    &self,
    url: &str,
    recursive: bool,
    overrides: &ConfigOverride,
  ) -> Result<Option<Manifest>> {
    let config = overrides.resolve();
    let content_url: ContentUrl = url.parse().map_err(KacheryError::from)?;
    let ContentUrl::Dir { digest, sub_path, .. } = content_url else {
      return Err(KacheryError::Other(format!("{url} is not a directory url")));
    };
    let cache = self.cache(&config)?;
    let Some(manifest_path) =
      self.ensure_local(&cache, &config, digest.algorithm, &digest.hex)?
    else {
      return Ok(None);
    };
    let bytes = self
      .env
      .read_file_bytes(&manifest_path)?
      .ok_or_else(|| KacheryError::Other("manifest vanished after fetch".to_string()))?;
    let manifest: Manifest = serde_json::from_slice(&bytes)
      .map_err(|e| KacheryError::Other(format!("corrupt manifest: {e}")))?;
    let Some(node) = manifest.resolve(&sub_path) else {
      return Ok(None);
    };
    let resolved = match node {
      ManifestNode::Dir(dir) => dir.clone(),
      ManifestNode::File(_) => {
        return Err(KacheryError::Other(format!(
          "{url} refers to a file, not a directory"
        )))
      }
    };
    Ok(Some(if recursive { resolved } else { resolved.shallow() }))
  }

  pub fn get_file_info(&self, url: &str, overrides: &ConfigOverride) -> Result<Option<FileInfo>> {
    let Some(path) = self.load_file(url, overrides)? else {
      return Ok(None);
    };
    let content_url: ContentUrl = url.parse().map_err(KacheryError::from)?;
    let size = self
      .env
      .stat(&path)?
      .map(|(size, _)| size)
      .unwrap_or_default();
    Ok(Some(FileInfo {
      path,
      size,
      algorithm: content_url.algorithm(),
      hex: content_url.digest().hex.clone(),
    }))
  }
}

/// A placeholder [`HttpClient`] used by [`KacheryClient::local_only`];
/// every call fails since there is nothing to dispatch to.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHttpClient;

impl HttpClient for NullHttpClient {
  fn get_json(&self, _url: &str) -> std::result::Result<serde_json::Value, TransportError> {
    Err(TransportError::MissingConfig("url"))
  }

  fn get_bytes(&self, _url: &str) -> std::result::Result<Vec<u8>, TransportError> {
    Err(TransportError::MissingConfig("url"))
  }

  fn post_bytes(&self, _url: &str, _body: &[u8]) -> std::result::Result<(), TransportError> {
    Err(TransportError::MissingConfig("url"))
  }
}

/// Builds a client wired to the real filesystem and, when the `remote`
/// feature is enabled, the real HTTP transport.
#[cfg(feature = "remote")]
pub fn default_client() -> KacheryClient<RealEnv, crate::transport::reqwest_client::ReqwestHttpClient>
{
  KacheryClient::new(RealEnv, crate::transport::reqwest_client::ReqwestHttpClient::new())
}

#[cfg(not(feature = "remote"))]
pub fn default_client() -> KacheryClient<RealEnv, NullHttpClient> {
  KacheryClient::local_only(RealEnv)
}

pub fn load_file(url: &str) -> Result<Option<PathBuf>> {
  default_client().load_file(url, &ConfigOverride::default())
}

pub fn load_text(url: &str) -> Result<Option<String>> {
  default_client().load_text(url, &ConfigOverride::default())
}

pub fn store_file(path: &Path) -> Result<String> {
  default_client().store_file(path, &ConfigOverride::default())
}

pub fn store_text(text: &str) -> Result<String> {
  default_client().store_text(text, &ConfigOverride::default())
}

pub fn store_dir(path: &Path) -> Result<String> {
  default_client().store_dir(path, &ConfigOverride::default())
}

pub fn read_dir(url: &str, recursive: bool) -> Result<Option<Manifest>> {
  default_client().read_dir(url, recursive, &ConfigOverride::default())
}

pub fn load_object(url: &str) -> Result<Option<serde_json::Value>> {
  default_client().load_object(url, &ConfigOverride::default())
}

pub fn store_object(value: &serde_json::Value) -> Result<String> {
  default_client().store_object(value, &ConfigOverride::default())
}

pub fn get_file_info(url: &str) -> Result<Option<FileInfo>> {
  default_client().get_file_info(url, &ConfigOverride::default())
}
