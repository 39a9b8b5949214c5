// Copyright 2018-2024 the kachery authors. MIT license.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::digest::compute_file_hash;
use crate::digest::Algorithm;
use crate::digest::Digest;
use crate::env::Env;
use crate::error::CacheError;
use crate::git_annex::parse_git_annex_link;

/// A single file's metadata within a [`Manifest`].
///
/// Fields are declared in alphabetical order (`md5`, `sha1`, `size`)
/// because `serde_json` serializes struct fields in declaration order and
/// the canonical JSON form requires keys sorted for a stable digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFileEntry {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub md5: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sha1: Option<String>,
  pub size: u64,
}

impl ManifestFileEntry {
  pub fn hex_for(&self, algorithm: Algorithm) -> Option<&str> {
    match algorithm {
      Algorithm::Sha1 => self.sha1.as_deref(),
      Algorithm::Md5 => self.md5.as_deref(),
    }
  }
}

/// A directory-tree manifest: the recursive structure whose canonical JSON
/// serialization is itself content-addressed (see
/// [`Manifest::canonical_json`]). Fields are declared alphabetically
/// (`dirs`, `files`) for the same reason as [`ManifestFileEntry`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Manifest {
  #[serde(default)]
  pub dirs: BTreeMap<String, Manifest>,
  #[serde(default)]
  pub files: BTreeMap<String, ManifestFileEntry>,
}

impl Manifest {
  /// Serializes the manifest deterministically: `BTreeMap` already yields
  /// keys in sorted order, and `serde_json`'s default writer produces
  /// compact, separator-stable output, so two manifests with the same
  /// content always produce byte-identical JSON.
  pub fn canonical_json(&self) -> Vec<u8> {
    serde_json::to_vec(self).expect("Manifest serialization cannot fail")
  }

  pub fn digest(&self, algorithm: Algorithm) -> Digest {
    Digest::of_bytes(algorithm, &self.canonical_json())
  }

  /// Looks up a sub-path within this manifest tree, returning either the
  /// file entry or the nested manifest it resolves to.
  pub fn resolve(&self, sub_path: &[String]) -> Option<ManifestNode<'_>> {
    let Some((first, rest)) = sub_path.split_first() else {
      return Some(ManifestNode::Dir(self));
    };
    if rest.is_empty() {
      if let Some(file) = self.files.get(first) {
        return Some(ManifestNode::File(file));
      }
    }
    self.dirs.get(first)?.resolve(rest)
  }

  /// Flattens every subdirectory to an empty manifest while keeping this
  /// level's own files, for a non-recursive directory listing.
  pub fn shallow(&self) -> Manifest {
    Manifest {
      dirs: self
        .dirs
        .keys()
        .cloned()
        .map(|name| (name, Manifest::default()))
        .collect(),
      files: self.files.clone(),
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub enum ManifestNode<'a> {
  File(&'a ManifestFileEntry),
  Dir(&'a Manifest),
}

/// Recursively walks `path` on disk and builds the corresponding
/// [`Manifest`], hashing every regular file under `algorithm`. A file whose
/// directory entry is a git-annex symlink (`MD5E-s<size>--<hex>.<ext>`) has
/// its size and MD5 recovered directly from the link target instead of
/// being read, unless `algorithm` is SHA-1, in which case the link target
/// is followed and the file content is hashed normally.
pub fn read_file_system_dir<E: Env>(
  env: &E,
  path: &Path,
  algorithm: Algorithm,
) -> Result<Manifest, CacheError> {
  let Some(entries) = env.read_dir(path)? else {
    return Err(CacheError::Io(std::io::Error::new(
      std::io::ErrorKind::NotFound,
      format!("no such directory: {}", path.display()),
    )));
  };

  let mut manifest = Manifest::default();
  for entry in entries {
    let entry_path = path.join(&entry.name);

    if let Some(target) = &entry.symlink_target {
      if let Ok(info) = parse_git_annex_link(&target.to_string_lossy()) {
        if algorithm == Algorithm::Md5 {
          manifest.files.insert(
            entry.name,
            ManifestFileEntry {
              size: info.size,
              sha1: None,
              md5: Some(info.md5_hex),
            },
          );
          continue;
        }
      }
    }

    if entry.is_dir {
      let child = read_file_system_dir(env, &entry_path, algorithm)?;
      manifest.dirs.insert(entry.name, child);
    } else {
      let hex = compute_file_hash(env, &entry_path, algorithm)?;
      let size = env
        .stat(&entry_path)?
        .map(|(size, _)| size)
        .unwrap_or_default();
      let entry_value = match algorithm {
        Algorithm::Sha1 => ManifestFileEntry {
          size,
          sha1: Some(hex),
          md5: None,
        },
        Algorithm::Md5 => ManifestFileEntry {
          size,
          sha1: None,
          md5: Some(hex),
        },
      };
      manifest.files.insert(entry.name, entry_value);
    }
  }

  Ok(manifest)
}
