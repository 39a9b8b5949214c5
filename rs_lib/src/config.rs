// Copyright 2018-2024 the kachery authors. MIT license.

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::digest::Algorithm;

/// Process-wide defaults for remote access and hashing, seeded once from
/// the environment. Individual calls may layer overrides on top without
/// mutating this global state.
#[derive(Debug, Clone)]
pub struct Config {
  pub url: Option<String>,
  pub channel: Option<String>,
  pub password: Option<String>,
  pub algorithm: Algorithm,
  pub use_remote: bool,
  pub use_remote_only: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      url: None,
      channel: None,
      password: None,
      algorithm: Algorithm::Sha1,
      use_remote: true,
      use_remote_only: false,
    }
  }
}

fn non_empty_env(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
  fn from_env() -> Self {
    let mut config = Self::default();
    config.url = non_empty_env("KACHERY_URL");
    config.channel = non_empty_env("KACHERY_CHANNEL");
    config.password = non_empty_env("KACHERY_PASSWORD");
    if config.url.is_none() {
      config.use_remote = false;
    }
    config
  }
}

static GLOBAL_CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::from_env()));

/// Returns a snapshot of the current process-wide configuration.
pub fn get_config() -> Config {
  GLOBAL_CONFIG.read().clone()
}

/// Replaces fields of the process-wide configuration. Only `Some` fields in
/// `patch` take effect; the rest of the config is left untouched.
pub struct ConfigPatch {
  pub url: Option<String>,
  pub channel: Option<String>,
  pub password: Option<String>,
  pub algorithm: Option<Algorithm>,
  pub use_remote: Option<bool>,
  pub use_remote_only: Option<bool>,
}

impl Default for ConfigPatch {
  fn default() -> Self {
    Self {
      url: None,
      channel: None,
      password: None,
      algorithm: None,
      use_remote: None,
      use_remote_only: None,
    }
  }
}

pub fn set_config(patch: ConfigPatch) {
  let mut config = GLOBAL_CONFIG.write();
  if let Some(url) = patch.url {
    config.url = Some(url);
  }
  if let Some(channel) = patch.channel {
    config.channel = Some(channel);
  }
  if let Some(password) = patch.password {
    config.password = Some(password);
  }
  if let Some(algorithm) = patch.algorithm {
    config.algorithm = algorithm;
  }
  if let Some(use_remote) = patch.use_remote {
    config.use_remote = use_remote;
  }
  if let Some(use_remote_only) = patch.use_remote_only {
    config.use_remote_only = use_remote_only;
  }
}

/// Merges a per-call override on top of a base config, without touching
/// process-wide state. Mirrors the original's keyword-argument override
/// semantics: an override of `None` means "use the ambient value".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverride {
  pub url: Option<String>,
  pub channel: Option<String>,
  pub password: Option<String>,
  pub algorithm: Option<Algorithm>,
  pub use_remote: Option<bool>,
  pub use_remote_only: Option<bool>,
}

impl ConfigOverride {
  pub fn resolve(&self) -> Config {
    let mut config = get_config();
    if let Some(url) = &self.url {
      config.url = Some(url.clone());
    }
    if let Some(channel) = &self.channel {
      config.channel = Some(channel.clone());
    }
    if let Some(password) = &self.password {
      config.password = Some(password.clone());
    }
    if let Some(algorithm) = self.algorithm {
      config.algorithm = algorithm;
    }
    if let Some(use_remote) = self.use_remote {
      config.use_remote = use_remote;
    }
    if let Some(use_remote_only) = self.use_remote_only {
      config.use_remote_only = use_remote_only;
    }
    config
  }
}
