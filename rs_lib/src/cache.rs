// Copyright 2018-2024 the kachery authors. MIT license.

use std::path::Path;
use std::path::PathBuf;

use crate::digest::compute_file_hash;
use crate::digest::Algorithm;
use crate::env::Env;
use crate::error::CacheError;

/// Resolves the root directory of the local content-addressed cache.
///
/// Resolution order: an explicit override, then the `KACHERY_CACHE_DIR`
/// environment variable, then `<OS cache dir>/kachery`. Returns
/// [`CacheError::NoCacheRoot`] if none of these can be determined (e.g. no
/// home directory on a headless, env-stripped process).
pub fn resolve_cache_root(
  explicit: Option<&Path>,
) -> Result<PathBuf, CacheError> {
  if let Some(explicit) = explicit {
    return Ok(explicit.to_path_buf());
  }
  if let Ok(dir) = std::env::var("KACHERY_CACHE_DIR") {
    if !dir.is_empty() {
      return Ok(PathBuf::from(dir));
    }
  }
  dirs::cache_dir()
    .map(|dir| dir.join("kachery"))
    .ok_or(CacheError::NoCacheRoot)
}

/// Two-level-sharded path of a content object under a cache root:
/// `<root>/<algorithm>/<h[0:2]>/<h[2:4]>/<hex>`.
pub fn shard_path(root: &Path, algorithm: Algorithm, hex: &str) -> PathBuf {
  root
    .join(algorithm.as_str())
    .join(&hex[0..2])
    .join(&hex[2..4])
    .join(hex)
}

/// The local content-addressed cache: finds, ingests, and verifies files
/// by digest under a sharded directory tree.
#[derive(Debug, Clone)]
pub struct LocalHashCache<E: Env> {
  root: PathBuf,
  env: E,
}

impl<E: Env> LocalHashCache<E> {
  pub fn new(root: PathBuf, env: E) -> Self {
    Self { root, env }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn object_path(&self, algorithm: Algorithm, hex: &str) -> PathBuf {
    shard_path(&self.root, algorithm, hex)
  }

  /// Returns the cached path for `(algorithm, hex)` if a matching object is
  /// already present.
  pub fn find(&self, algorithm: Algorithm, hex: &str) -> Option<PathBuf> {
    let path = self.object_path(algorithm, hex);
    if self.env.is_file(&path) {
      Some(path)
    } else {
      None
    }
  }

  /// Hashes `source_path` and, if the file is not already cached under
  /// that digest, atomically ingests a copy into the cache. Returns the
  /// digest and the path within the cache. Races between concurrent
  /// callers ingesting the same content are resolved by
  /// [`Env::atomic_copy_into_place`]: the loser simply observes the
  /// winner's file.
  pub fn store_local_file(
    &self,
    source_path: &Path,
    algorithm: Algorithm,
  ) -> Result<(String, PathBuf), CacheError> {
    let hex = compute_file_hash(&self.env, source_path, algorithm)?;
    let dest = self.object_path(algorithm, &hex);
    if !self.env.is_file(&dest) {
      self.env.atomic_copy_into_place(source_path, &dest)?;
    }
    Ok((hex, dest))
  }

  /// Ingests `bytes` known to have digest `hex` under `algorithm`. Used
  /// when content arrives already hashed, e.g. from a remote download.
  pub fn store_bytes_with_known_hash(
    &self,
    algorithm: Algorithm,
    hex: &str,
    bytes: &[u8],
  ) -> Result<PathBuf, CacheError> {
    let dest = self.object_path(algorithm, hex);
    if !self.env.is_file(&dest) {
      self.env.atomic_write_file(&dest, bytes)?;
    }
    Ok(dest)
  }

  /// Ingests a downloaded object after verifying it in memory: the byte
  /// count must match `expected_size` and the recomputed digest must match
  /// `hex`. The canonical path is never written to unless both checks
  /// pass, so a failed download never leaves a corrupt or truncated file
  /// at `object_path`.
  pub fn store_verified_download(
    &self,
    algorithm: Algorithm,
    hex: &str,
    expected_size: u64,
    bytes: &[u8],
  ) -> Result<PathBuf, CacheError> {
    let dest = self.object_path(algorithm, hex);
    if self.env.is_file(&dest) {
      return Ok(dest);
    }
    let actual_size = bytes.len() as u64;
    if actual_size != expected_size {
      return Err(CacheError::SizeMismatch {
        expected: expected_size,
        actual: actual_size,
      });
    }
    let actual_hex = crate::digest::Digest::of_bytes(algorithm, bytes).hex;
    if actual_hex != hex {
      return Err(CacheError::ChecksumMismatch {
        algorithm,
        expected: hex.to_string(),
        actual: actual_hex,
      });
    }
    self.env.atomic_write_file(&dest, bytes)?;
    Ok(dest)
  }

  /// Verifies that the file at `path` has the expected digest, recomputing
  /// it from content (the `.hash` sidecar memo is only ever trusted for a
  /// `(size, mtime)` match, never blindly).
  pub fn verify(
    &self,
    path: &Path,
    algorithm: Algorithm,
    expected_hex: &str,
  ) -> Result<(), CacheError> {
    let actual = compute_file_hash(&self.env, path, algorithm)?;
    if actual != expected_hex {
      return Err(CacheError::ChecksumMismatch {
        algorithm,
        expected: expected_hex.to_string(),
        actual,
      });
    }
    Ok(())
  }
}
