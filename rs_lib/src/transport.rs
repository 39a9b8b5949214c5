// Copyright 2018-2024 the kachery authors. MIT license.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use sha1::Digest as _;

use crate::config::Config;
use crate::error::TransportError;

const RETRY_DELAYS_MS: [u64; 2] = [200, 500];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedAction {
  Check,
  Download,
  Upload,
}

impl SignedAction {
  fn as_str(&self) -> &'static str {
    match self {
      SignedAction::Check => "check",
      SignedAction::Download => "download",
      SignedAction::Upload => "upload",
    }
  }
}

/// Computes the signature for a check/download/upload request: the SHA-1
/// hex digest of the canonical (sorted-key, compact) JSON encoding of
/// `{algorithm, hash, name, password}`.
pub fn sign_request(
  algorithm: &str,
  hex: &str,
  action: SignedAction,
  password: Option<&str>,
) -> String {
  let mut fields = BTreeMap::new();
  fields.insert("algorithm", algorithm.to_string());
  fields.insert("hash", hex.to_string());
  fields.insert("name", action.as_str().to_string());
  fields.insert("password", password.unwrap_or_default().to_string());
  let json =
    serde_json::to_vec(&fields).expect("signature payload serialization cannot fail");
  let mut hasher = sha1::Sha1::new();
  hasher.update(&json);
  let digest = hasher.finalize();
  let mut hex_out = String::with_capacity(40);
  for byte in digest {
    use std::fmt::Write;
    write!(hex_out, "{byte:02x}").unwrap();
  }
  hex_out
}

/// A handle for building the three signed-URL endpoints this protocol
/// exposes, bound to a remote base URL / channel / password triple.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
  pub base_url: String,
  pub channel: Option<String>,
  pub password: Option<String>,
}

impl RemoteEndpoint {
  pub fn from_config(config: &Config) -> Result<Self, TransportError> {
    let base_url = config
      .url
      .clone()
      .ok_or(TransportError::MissingConfig("url"))?;
    Ok(Self {
      base_url,
      channel: config.channel.clone(),
      password: config.password.clone(),
    })
  }

  fn build_url(&self, verb: &str, algorithm: &str, hex: &str, action: SignedAction) -> String {
    let signature = sign_request(algorithm, hex, action, self.password.as_deref());
    let mut url = format!(
      "{}/{}/{}/{}?",
      self.base_url.trim_end_matches('/'),
      verb,
      algorithm,
      hex,
    );
    if let Some(channel) = &self.channel {
      url.push_str("channel=");
      url.push_str(channel);
      url.push('&');
    }
    url.push_str("signature=");
    url.push_str(&signature);
    url
  }

  pub fn check_url(&self, algorithm: &str, hex: &str) -> String {
    self.build_url("check", algorithm, hex, SignedAction::Check)
  }

  pub fn download_url(&self, algorithm: &str, hex: &str) -> String {
    self.build_url("get", algorithm, hex, SignedAction::Download)
  }

  pub fn upload_url(&self, algorithm: &str, hex: &str) -> String {
    self.build_url("set", algorithm, hex, SignedAction::Upload)
  }
}

#[derive(Debug, Deserialize)]
pub struct CheckResponse {
  #[serde(default = "default_success")]
  pub success: bool,
  #[serde(default)]
  pub error: Option<String>,
  #[serde(default)]
  pub found: bool,
  #[serde(default)]
  pub size: Option<u64>,
}

fn default_success() -> bool {
  true
}

/// What a check response means for the caller, folding the "success=false"
/// case into "not found" per the protocol's error-handling rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
  Found { size: Option<u64> },
  NotFound,
}

pub fn interpret_check(check: CheckResponse) -> CheckOutcome {
  if !check.success {
    log::warn!(
      "remote check failed: {}",
      check.error.as_deref().unwrap_or("unknown error")
    );
    return CheckOutcome::NotFound;
  }
  if check.found {
    CheckOutcome::Found { size: check.size }
  } else {
    CheckOutcome::NotFound
  }
}

/// Abstracts the HTTP calls the orchestrator needs, so tests can supply a
/// fake transport without a network.
pub trait HttpClient: Send + Sync {
  fn get_json(&self, url: &str) -> Result<serde_json::Value, TransportError>;
  fn get_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError>;
  fn post_bytes(&self, url: &str, body: &[u8]) -> Result<(), TransportError>;
}

/// Retries `f` up to `RETRY_DELAYS_MS.len()` additional times on failure,
/// sleeping the configured delay between attempts. Only ever used for GET
/// JSON calls; uploads are never retried (a partial upload must not be
/// silently repeated).
pub fn retry_get_json<F>(mut f: F) -> Result<serde_json::Value, TransportError>
where
  F: FnMut() -> Result<serde_json::Value, TransportError>,
{
  let mut last_err = None;
  for delay_ms in std::iter::once(0).chain(RETRY_DELAYS_MS) {
    if delay_ms > 0 {
      std::thread::sleep(Duration::from_millis(delay_ms));
    }
    match f() {
      Ok(value) => return Ok(value),
      Err(err) => last_err = Some(err),
    }
  }
  Err(last_err.unwrap())
}

#[cfg(feature = "remote")]
pub mod reqwest_client {
  use super::*;

  /// The production [`HttpClient`], backed by a blocking `reqwest` client.
  /// Wire-level request/response logging is enabled when the
  /// `HTTP_VERBOSE` environment variable is set, mirroring the original
  /// tool's verbose mode.
  #[derive(Debug)]
  pub struct ReqwestHttpClient {
    client: reqwest::blocking::Client,
    verbose: bool,
  }

  impl ReqwestHttpClient {
    pub fn new() -> Self {
      Self {
        client: reqwest::blocking::Client::new(),
        verbose: std::env::var("HTTP_VERBOSE").is_ok(),
      }
    }

    fn log_request(&self, method: &str, url: &str) {
      if self.verbose {
        log::debug!("HTTP {method} {url}");
      }
    }
  }

  impl Default for ReqwestHttpClient {
    fn default() -> Self {
      Self::new()
    }
  }

  impl HttpClient for ReqwestHttpClient {
    fn get_json(&self, url: &str) -> Result<serde_json::Value, TransportError> {
      self.log_request("GET", url);
      let response = self.client.get(url).send()?;
      let value = response
        .json()
        .map_err(|_| TransportError::BadJson { url: url.to_string() })?;
      Ok(value)
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
      self.log_request("GET", url);
      let response = self.client.get(url).send()?.error_for_status()?;
      Ok(response.bytes()?.to_vec())
    }

    fn post_bytes(&self, url: &str, body: &[u8]) -> Result<(), TransportError> {
      self.log_request("POST", url);
      let response = self
        .client
        .post(url)
        .body(body.to_vec())
        .send()?;
      if !response.status().is_success() {
        return Err(TransportError::UploadFailed(format!(
          "server returned {}",
          response.status()
        )));
      }
      Ok(())
    }
  }
}
