// Copyright 2018-2024 the kachery authors. MIT license.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use sha1::Digest as _;

use crate::env::Env;
use crate::error::ParseError;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A hash algorithm supported by the content-addressed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
  Sha1,
  Md5,
}

impl Algorithm {
  pub fn as_str(&self) -> &'static str {
    match self {
      Algorithm::Sha1 => "sha1",
      Algorithm::Md5 => "md5",
    }
  }

  /// Length of this algorithm's hex digest.
  pub fn hex_len(&self) -> usize {
    match self {
      Algorithm::Sha1 => 40,
      Algorithm::Md5 => 32,
    }
  }

  pub fn all() -> [Algorithm; 2] {
    [Algorithm::Sha1, Algorithm::Md5]
  }

  fn hash_bytes(&self, bytes: &[u8]) -> String {
    match self {
      Algorithm::Sha1 => {
        let mut hasher = sha1::Sha1::new();
        hasher.update(bytes);
        hex_encode(&hasher.finalize())
      }
      Algorithm::Md5 => {
        let digest = md5::Md5::new_with_prefix(bytes);
        hex_encode(&digest.finalize())
      }
    }
  }
}

impl fmt::Display for Algorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Algorithm {
  type Err = ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "sha1" => Ok(Algorithm::Sha1),
      "md5" => Ok(Algorithm::Md5),
      other => Err(ParseError::UnknownScheme(other.to_string())),
    }
  }
}

/// An immutable content identifier: an algorithm and its lowercase hex
/// digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
  pub algorithm: Algorithm,
  pub hex: String,
}

impl Digest {
  /// Validates `hex` against `algorithm`'s expected length and charset.
  pub fn new(algorithm: Algorithm, hex: impl Into<String>) -> Result<Self, ParseError> {
    let hex = hex.into();
    if hex.len() != algorithm.hex_len() {
      return Err(ParseError::InvalidHashLength {
        algorithm,
        expected: algorithm.hex_len(),
        actual: hex.len(),
        hex,
      });
    }
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
      return Err(ParseError::InvalidHashChars(hex));
    }
    Ok(Self {
      algorithm,
      hex: hex.to_ascii_lowercase(),
    })
  }

  pub fn of_bytes(algorithm: Algorithm, bytes: &[u8]) -> Self {
    Self {
      algorithm,
      hex: algorithm.hash_bytes(bytes),
    }
  }
}

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.algorithm, self.hex)
  }
}

fn hex_encode(bytes: &[u8]) -> String {
  let mut out = String::with_capacity(bytes.len() * 2);
  for byte in bytes {
    use std::fmt::Write;
    write!(out, "{byte:02x}").unwrap();
  }
  out
}

/// The sidecar written next to a cached or source file to memoise its
/// digest by `(size, mtime)`. Advisory only: a missing or stale memo never
/// produces a wrong answer, it just costs a re-hash.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct DigestMemo {
  size: u64,
  mtime_nanos: u128,
  hex: String,
}

fn memo_path(path: &Path) -> std::path::PathBuf {
  let mut os_string = path.as_os_str().to_owned();
  os_string.push(".hash");
  os_string.into()
}

fn mtime_nanos(time: SystemTime) -> u128 {
  time
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos())
    .unwrap_or(0)
}

/// Computes the digest of a local file under `algorithm`, consulting (and
/// refreshing) the `.hash` sidecar memo keyed by `(size, mtime)`.
pub fn compute_file_hash<E: Env>(
  env: &E,
  path: &Path,
  algorithm: Algorithm,
) -> std::io::Result<String> {
  let Some((size, mtime)) = env.stat(path)? else {
    return Err(std::io::Error::new(
      std::io::ErrorKind::NotFound,
      format!("no such file: {}", path.display()),
    ));
  };
  let mtime_nanos = mtime_nanos(mtime);
  let memo_path = memo_path(path);

  if let Some(memo) = read_memo(env, &memo_path)? {
    if memo.size == size && memo.mtime_nanos == mtime_nanos {
      return Ok(memo.hex);
    }
  }

  let hex = hash_file_contents(env, path, algorithm)?;

  let memo = DigestMemo {
    size,
    mtime_nanos,
    hex: hex.clone(),
  };
  // Writing the sidecar is an optimization; ignore failures (e.g. a
  // read-only cache root).
  if let Ok(bytes) = serde_json::to_vec(&memo) {
    let _ = env.atomic_write_file(&memo_path, &bytes);
  }

  Ok(hex)
}

fn read_memo<E: Env>(
  env: &E,
  memo_path: &Path,
) -> std::io::Result<Option<DigestMemo>> {
  let Some(bytes) = env.read_file_bytes(memo_path)? else {
    return Ok(None);
  };
  Ok(serde_json::from_slice(&bytes).ok())
}

fn hash_file_contents<E: Env>(
  env: &E,
  path: &Path,
  algorithm: Algorithm,
) -> std::io::Result<String> {
  let Some(mut reader) = env.open_read(path)? else {
    return Err(std::io::Error::new(
      std::io::ErrorKind::NotFound,
      format!("no such file: {}", path.display()),
    ));
  };
  let mut buf = [0u8; READ_CHUNK_SIZE];
  match algorithm {
    Algorithm::Sha1 => {
      let mut hasher = sha1::Sha1::new();
      loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
          break;
        }
        hasher.update(&buf[..n]);
      }
      Ok(hex_encode(&hasher.finalize()))
    }
    Algorithm::Md5 => {
      let mut hasher = md5::Md5::new();
      loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
          break;
        }
        hasher.update(&buf[..n]);
      }
      Ok(hex_encode(&hasher.finalize()))
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::env::InMemoryEnv;
  use std::path::PathBuf;

  #[test]
  fn hashes_known_strings() {
    assert_eq!(
      Digest::of_bytes(Algorithm::Sha1, b"hello").hex,
      "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
    );
    assert_eq!(
      Digest::of_bytes(Algorithm::Md5, b"hello").hex,
      "5d41402abc4b2a76b9719d911017c592"
    );
  }

  #[test]
  fn rejects_malformed_digests() {
    assert!(Digest::new(Algorithm::Sha1, "abc").is_err());
    assert!(Digest::new(Algorithm::Sha1, "z".repeat(40)).is_err());
    assert!(Digest::new(Algorithm::Sha1, "a".repeat(40)).is_ok());
  }

  #[test]
  fn memoizes_by_size_and_mtime() {
    let env = InMemoryEnv::new();
    let path = PathBuf::from("/src/file.txt");
    env.atomic_write_file(&path, b"hello").unwrap();

    let hex = compute_file_hash(&env, &path, Algorithm::Sha1).unwrap();
    assert_eq!(hex, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    assert!(env.is_file(&memo_path(&path)));

    // Recomputing immediately hits the memo and returns the same value.
    let memoized_hex = compute_file_hash(&env, &path, Algorithm::Sha1).unwrap();
    assert_eq!(memoized_hex, hex);

    // Advance the clock and rewrite: the memo is now stale and must be
    // recomputed.
    env.advance_clock(std::time::Duration::from_secs(1));
    env.atomic_write_file(&path, b"world").unwrap();
    let new_hex = compute_file_hash(&env, &path, Algorithm::Sha1).unwrap();
    assert_ne!(new_hex, hex);
  }
}
