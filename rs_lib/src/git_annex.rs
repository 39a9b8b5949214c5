// Copyright 2018-2024 the kachery authors. MIT license.

use crate::error::ParseError;

/// Size and MD5 hex digest recovered from a git-annex symlink target,
/// without reading the pointed-to file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitAnnexLinkInfo {
  pub size: u64,
  pub md5_hex: String,
}

/// Parses a git-annex key filename of the form
/// `MD5E-s<size>--<hex>.<ext>` (the key may appear either as the whole
/// symlink target or as its final path component). Only the `MD5E`
/// backend is supported; any other backend code is reported via
/// [`ParseError::UnsupportedGitAnnexCode`].
pub fn parse_git_annex_link(target: &str) -> Result<GitAnnexLinkInfo, ParseError> {
  let file_name = target.rsplit('/').next().unwrap_or(target);

  let Some((code, rest)) = file_name.split_once('-') else {
    return Err(ParseError::MalformedGitAnnexLink(target.to_string()));
  };
  if code != "MD5E" {
    return Err(ParseError::UnsupportedGitAnnexCode(code.to_string()));
  }

  let rest = rest
    .strip_prefix('s')
    .ok_or_else(|| ParseError::MalformedGitAnnexLink(target.to_string()))?;
  let (size_str, rest) = rest
    .split_once("--")
    .ok_or_else(|| ParseError::MalformedGitAnnexLink(target.to_string()))?;
  let size: u64 = size_str
    .parse()
    .map_err(|_| ParseError::MalformedGitAnnexLink(target.to_string()))?;

  let hex = rest.split('.').next().unwrap_or(rest);
  if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
    return Err(ParseError::MalformedGitAnnexLink(target.to_string()));
  }

  Ok(GitAnnexLinkInfo {
    size,
    md5_hex: hex.to_ascii_lowercase(),
  })
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn parses_well_formed_link() {
    let info = parse_git_annex_link(
      "../../.git/annex/objects/ab/cd/MD5E-s5--5d41402abc4b2a76b9719d911017c592.txt/MD5E-s5--5d41402abc4b2a76b9719d911017c592.txt",
    )
    .unwrap();
    assert_eq!(
      info,
      GitAnnexLinkInfo {
        size: 5,
        md5_hex: "5d41402abc4b2a76b9719d911017c592".to_string(),
      }
    );
  }

  #[test]
  fn rejects_unsupported_backend() {
    let err =
      parse_git_annex_link("SHA256E-s5--abcd.txt").unwrap_err();
    assert!(matches!(err, ParseError::UnsupportedGitAnnexCode(code) if code == "SHA256E"));
  }

  #[test]
  fn rejects_malformed_target() {
    assert!(parse_git_annex_link("not-a-key-at-all").is_err());
  }
}
