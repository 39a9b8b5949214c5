// Copyright 2018-2024 the kachery authors. MIT license.

use std::fmt;
use std::str::FromStr;

use crate::digest::Algorithm;
use crate::digest::Digest;
use crate::error::ParseError;

/// A parsed `sha1://`/`sha1dir://`/`md5://`/`md5dir://` content URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUrl {
  File {
    digest: Digest,
    basename: Option<String>,
  },
  Dir {
    digest: Digest,
    label: Option<String>,
    sub_path: Vec<String>,
  },
}

impl ContentUrl {
  pub fn digest(&self) -> &Digest {
    match self {
      ContentUrl::File { digest, .. } => digest,
      ContentUrl::Dir { digest, .. } => digest,
    }
  }

  pub fn algorithm(&self) -> Algorithm {
    self.digest().algorithm
  }
}

fn split_scheme(s: &str) -> Result<(&str, &str), ParseError> {
  s.split_once("://")
    .ok_or_else(|| ParseError::UnknownScheme(s.to_string()))
}

fn scheme_algorithm(scheme: &str) -> Result<(Algorithm, bool), ParseError> {
  match scheme {
    "sha1" => Ok((Algorithm::Sha1, false)),
    "sha1dir" => Ok((Algorithm::Sha1, true)),
    "md5" => Ok((Algorithm::Md5, false)),
    "md5dir" => Ok((Algorithm::Md5, true)),
    other => Err(ParseError::UnknownScheme(other.to_string())),
  }
}

impl FromStr for ContentUrl {
  type Err = ParseError;

  /// Parses e.g. `sha1://<hash>[.<name>][/<subpath>]` or
  /// `sha1dir://<hash>[.<label>][/<subpath...>]`.
  ///
  /// The hash segment is everything up to the first `.`; anything after
  /// the first `.` in that segment is the basename/label, and anything
  /// after the first `/` is the sub-path.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (scheme, rest) = split_scheme(s)?;
    let (algorithm, is_dir) = scheme_algorithm(scheme)?;

    if rest.is_empty() {
      return Err(ParseError::MissingHash(s.to_string()));
    }

    let mut parts = rest.splitn(2, '/');
    let head = parts.next().unwrap_or_default();
    let remainder = parts.next();

    let (hex, label) = match head.split_once('.') {
      Some((hex, label)) => (hex, Some(label.to_string())),
      None => (head, None),
    };
    let digest = Digest::new(algorithm, hex)?;

    if is_dir {
      let sub_path = match remainder {
        Some(r) if !r.is_empty() => {
          r.split('/').map(|segment| segment.to_string()).collect()
        }
        _ => Vec::new(),
      };
      Ok(ContentUrl::Dir {
        digest,
        label,
        sub_path,
      })
    } else {
      // A file URL's cosmetic name can appear either as `<hash>.<name>`
      // (no slash) or as `<hash>/<name>` (a single trailing segment); the
      // slash form wins if, implausibly, both are present.
      let basename = match remainder {
        Some(r) if !r.is_empty() => {
          if r.contains('/') {
            return Err(ParseError::SlashInSubPathComponent(s.to_string()));
          }
          Some(r.to_string())
        }
        _ => label,
      };
      Ok(ContentUrl::File { digest, basename })
    }
  }
}

impl fmt::Display for ContentUrl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ContentUrl::File { digest, basename } => {
        write!(f, "{}://{}", digest.algorithm, digest.hex)?;
        if let Some(basename) = basename {
          write!(f, "/{basename}")?;
        }
        Ok(())
      }
      ContentUrl::Dir {
        digest,
        label,
        sub_path,
      } => {
        write!(f, "{}dir://{}", digest.algorithm, digest.hex)?;
        if let Some(label) = label {
          write!(f, ".{label}")?;
        }
        if !sub_path.is_empty() {
          write!(f, "/{}", sub_path.join("/"))?;
        }
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn parses_bare_file_url() {
    let url: ContentUrl =
      "sha1://aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d".parse().unwrap();
    assert_eq!(
      url,
      ContentUrl::File {
        digest: Digest::new(
          Algorithm::Sha1,
          "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        )
        .unwrap(),
        basename: None,
      }
    );
  }

  #[test]
  fn parses_file_url_with_basename() {
    let url: ContentUrl =
      "sha1://aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d/file.txt"
        .parse()
        .unwrap();
    match url {
      ContentUrl::File { basename, .. } => {
        assert_eq!(basename.as_deref(), Some("file.txt"));
      }
      _ => panic!("expected a File url"),
    }
  }

  #[test]
  fn round_trips_file_url_with_basename() {
    let original = "sha1://aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d/file.txt";
    let url: ContentUrl = original.parse().unwrap();
    assert_eq!(url.to_string(), original);
  }

  #[test]
  fn parses_dir_url_with_label_and_subpath() {
    let url: ContentUrl =
      "sha1dir://aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d.mydir/a/b.txt"
        .parse()
        .unwrap();
    assert_eq!(
      url,
      ContentUrl::Dir {
        digest: Digest::new(
          Algorithm::Sha1,
          "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        )
        .unwrap(),
        label: Some("mydir".to_string()),
        sub_path: vec!["a".to_string(), "b.txt".to_string()],
      }
    );
  }

  #[test]
  fn round_trips_through_display() {
    let original = "sha1dir://aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d.mydir/a/b.txt";
    let url: ContentUrl = original.parse().unwrap();
    assert_eq!(url.to_string(), original);
  }

  #[test]
  fn rejects_unknown_scheme() {
    assert!("ftp://foo".parse::<ContentUrl>().is_err());
  }

  #[test]
  fn rejects_missing_hash() {
    assert!("sha1://".parse::<ContentUrl>().is_err());
  }
}
