// Copyright 2018-2024 the kachery authors. MIT license.

use thiserror::Error;

use crate::digest::Algorithm;

/// Failure to parse a content URL or a git-annex link target.
#[derive(Debug, Error)]
pub enum ParseError {
  #[error("unknown content URL scheme: {0}")]
  UnknownScheme(String),
  #[error("content URL is missing a hash segment: {0}")]
  MissingHash(String),
  #[error("invalid {algorithm} hash (expected {expected} hex chars, got {actual}): {hex}")]
  InvalidHashLength {
    algorithm: Algorithm,
    expected: usize,
    actual: usize,
    hex: String,
  },
  #[error("invalid hash, contains non-hex characters: {0}")]
  InvalidHashChars(String),
  #[error("path segment contains a slash: {0}")]
  SlashInSubPathComponent(String),
  #[error("unrecognized git-annex key code (only MD5E is supported): {0}")]
  UnsupportedGitAnnexCode(String),
  #[error("malformed git-annex link target: {0}")]
  MalformedGitAnnexLink(String),
}

/// Failure reading or writing the local content-addressed cache.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error("could not determine the cache root directory; set an explicit root or KACHERY_URL-independent cache dir")]
  NoCacheRoot,
  #[error(
    "integrity check failed: expected {algorithm} {expected}, computed {actual}"
  )]
  ChecksumMismatch {
    algorithm: Algorithm,
    expected: String,
    actual: String,
  },
  #[error("size mismatch: expected {expected} bytes, got {actual} bytes")]
  SizeMismatch { expected: u64, actual: u64 },
}

/// Failure to complete a remote transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("missing `{0}` in config; it is required to talk to a remote server")]
  MissingConfig(&'static str),
  #[error("remote reports the object already exists with a different size ({remote_size} bytes locally is {local_size} bytes)")]
  RemoteSizeConflict { remote_size: u64, local_size: u64 },
  #[error("upload failed: {0}")]
  UploadFailed(String),
  #[error("unexpected response decoding json from {url}")]
  BadJson { url: String },
  #[cfg(feature = "remote")]
  #[error(transparent)]
  Http(#[from] reqwest::Error),
  #[error(transparent)]
  Cache(#[from] CacheError),
}

/// Top-level error for all fallible public operations.
#[derive(Debug, Error)]
pub enum KacheryError {
  #[error(transparent)]
  Parse(#[from] ParseError),
  #[error(transparent)]
  Cache(#[from] CacheError),
  #[error(transparent)]
  Transport(#[from] TransportError),
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error("{0}")]
  Other(String),
}

pub type Result<T> = std::result::Result<T, KacheryError>;
