// Copyright 2018-2024 the kachery authors. MIT license.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use kachery::config::ConfigOverride;
use kachery::env::RealEnv;
use kachery::transport::HttpClient;
use kachery::transport::TransportError;
use kachery::Algorithm;
use kachery::KacheryClient;

// `KACHERY_CACHE_DIR` is process-wide state; serialize tests that touch it
// so they don't stomp on each other when run concurrently.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn with_cache_root<F: FnOnce(&Path)>(f: F) {
  let _guard = ENV_LOCK.lock().unwrap();
  let dir = tempfile::TempDir::new().unwrap();
  std::env::set_var("KACHERY_CACHE_DIR", dir.path());
  f(dir.path());
  std::env::remove_var("KACHERY_CACHE_DIR");
}

fn overrides_for(root: &Path) -> ConfigOverride {
  // Tests run with no remote configured; use_remote is left at its
  // env-derived default (false, since KACHERY_URL is unset) unless a
  // case explicitly wires up a fake transport below.
  let _ = root;
  ConfigOverride::default()
}

#[test]
fn store_file_then_load_file_round_trips_known_hash() {
  with_cache_root(|_root| {
    let dir = tempfile::TempDir::new().unwrap();
    let src = dir.path().join("file.txt");
    std::fs::write(&src, "hello").unwrap();

    let client = KacheryClient::local_only(RealEnv);
    let overrides = overrides_for(dir.path());
    let url = client.store_file(&src, &overrides).unwrap();
    assert_eq!(
      url,
      "sha1://aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d/file.txt"
    );

    let loaded_path = client.load_file(&url, &overrides).unwrap().unwrap();
    assert_eq!(std::fs::read_to_string(loaded_path).unwrap(), "hello");
  });
}

#[test]
fn store_file_is_idempotent_under_concurrent_callers() {
  with_cache_root(|_root| {
    let dir = tempfile::TempDir::new().unwrap();
    let src = dir.path().join("file.txt");
    std::fs::write(&src, "hello").unwrap();

    let client = KacheryClient::local_only(RealEnv);
    let overrides = overrides_for(dir.path());
    let url1 = client.store_file(&src, &overrides).unwrap();
    let url2 = client.store_file(&src, &overrides).unwrap();
    assert_eq!(url1, url2);
  });
}

#[test]
fn store_text_and_store_object_produce_stable_urls() {
  with_cache_root(|_root| {
    let client = KacheryClient::local_only(RealEnv);
    let overrides = ConfigOverride::default();

    let text_url = client.store_text("hello", &overrides).unwrap();
    assert_eq!(text_url, "sha1://aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");

    let loaded = client.load_text(&text_url, &overrides).unwrap().unwrap();
    assert_eq!(loaded, "hello");

    let value = serde_json::json!({"a": 1, "b": 2});
    let object_url = client.store_object(&value, &overrides).unwrap();
    let loaded_value = client.load_object(&object_url, &overrides).unwrap().unwrap();
    assert_eq!(loaded_value, value);
  });
}

#[test]
fn store_dir_and_read_dir_resolve_nested_files() {
  with_cache_root(|_root| {
    let src_dir = tempfile::TempDir::new().unwrap();
    std::fs::write(src_dir.path().join("a.txt"), "hello").unwrap();
    std::fs::create_dir(src_dir.path().join("sub")).unwrap();
    std::fs::write(src_dir.path().join("sub").join("b.txt"), "world").unwrap();

    let client = KacheryClient::local_only(RealEnv);
    let overrides = ConfigOverride::default();
    let dir_url = client.store_dir(src_dir.path(), &overrides).unwrap();
    assert!(dir_url.starts_with("sha1dir://"));

    let manifest = client.read_dir(&dir_url, true, &overrides).unwrap().unwrap();
    assert_eq!(
      manifest.files.get("a.txt").unwrap().sha1.as_deref(),
      Some("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
    );
    let sub = manifest.dirs.get("sub").unwrap();
    assert_eq!(sub.files.len(), 1);

    let shallow = client.read_dir(&dir_url, false, &overrides).unwrap().unwrap();
    assert!(shallow.dirs.get("sub").unwrap().files.is_empty());
    assert_eq!(shallow.files.len(), 1);

    let nested_url = format!("{dir_url}/sub/b.txt");
    let loaded_path = client.load_file(&nested_url, &overrides).unwrap().unwrap();
    assert_eq!(std::fs::read_to_string(loaded_path).unwrap(), "world");

    // The manifest itself is an ordinary cache entry, loadable by its own
    // content URL.
    let dir_digest: kachery::ContentUrl = dir_url.parse().unwrap();
    let manifest_url = format!("sha1://{}", dir_digest.digest().hex);
    let manifest_text = client.load_text(&manifest_url, &overrides).unwrap().unwrap();
    assert!(manifest_text.contains("a.txt"));
  });
}

#[test]
fn load_file_is_absent_without_remote_access_when_not_cached() {
  with_cache_root(|_root| {
    let client = KacheryClient::local_only(RealEnv);
    let url = "sha1://aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d/file.txt";
    let result = client.load_file(url, &ConfigOverride::default()).unwrap();
    assert!(result.is_none());
  });
}

/// A scripted [`HttpClient`] double: returns canned JSON/byte responses
/// keyed by URL, and records every upload it receives.
#[derive(Default)]
struct FakeHttpClient {
  json_responses: HashMap<String, serde_json::Value>,
  byte_responses: HashMap<String, Vec<u8>>,
  uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl HttpClient for FakeHttpClient {
  fn get_json(&self, url: &str) -> Result<serde_json::Value, TransportError> {
    self
      .json_responses
      .get(url)
      .cloned()
      .ok_or_else(|| TransportError::BadJson { url: url.to_string() })
  }

  fn get_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
    self
      .byte_responses
      .get(url)
      .cloned()
      .ok_or_else(|| TransportError::BadJson { url: url.to_string() })
  }

  fn post_bytes(&self, url: &str, body: &[u8]) -> Result<(), TransportError> {
    self.uploads.lock().unwrap().push((url.to_string(), body.to_vec()));
    Ok(())
  }
}

#[test]
fn store_file_uploads_to_remote_when_not_already_present() {
  with_cache_root(|_root| {
    let dir = tempfile::TempDir::new().unwrap();
    let src = dir.path().join("file.txt");
    std::fs::write(&src, "hello").unwrap();

    let hex = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";
    let check_sig = kachery::transport::sign_request(
      "sha1",
      hex,
      kachery::transport::SignedAction::Check,
      None,
    );
    let check_url =
      format!("https://example.com/check/sha1/{hex}?signature={check_sig}");

    let mut http = FakeHttpClient::default();
    http.json_responses.insert(
      check_url,
      serde_json::json!({"found": false, "size": null}),
    );

    let client = KacheryClient::new(RealEnv, http);
    let overrides = ConfigOverride {
      url: Some("https://example.com".to_string()),
      use_remote: Some(true),
      ..ConfigOverride::default()
    };
    client.store_file(&src, &overrides).unwrap();
  });
}

#[test]
fn upload_conflict_on_mismatched_remote_size_is_an_error() {
  with_cache_root(|_root| {
    let dir = tempfile::TempDir::new().unwrap();
    let src = dir.path().join("file.txt");
    std::fs::write(&src, "hello").unwrap();

    let hex = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";
    let check_sig = kachery::transport::sign_request(
      "sha1",
      hex,
      kachery::transport::SignedAction::Check,
      None,
    );
    let check_url =
      format!("https://example.com/check/sha1/{hex}?signature={check_sig}");

    let mut http = FakeHttpClient::default();
    http.json_responses.insert(
      check_url,
      serde_json::json!({"found": true, "size": 999}),
    );

    let client = KacheryClient::new(RealEnv, http);
    let overrides = ConfigOverride {
      url: Some("https://example.com".to_string()),
      use_remote: Some(true),
      ..ConfigOverride::default()
    };
    let err = client.store_file(&src, &overrides).unwrap_err();
    assert!(err.to_string().contains("already exists with a different size"));
  });
}

fn download_check_url(hex: &str) -> String {
  let sig = kachery::transport::sign_request(
    "sha1",
    hex,
    kachery::transport::SignedAction::Check,
    None,
  );
  format!("https://example.com/check/sha1/{hex}?signature={sig}")
}

fn download_get_url(hex: &str) -> String {
  let sig = kachery::transport::sign_request(
    "sha1",
    hex,
    kachery::transport::SignedAction::Download,
    None,
  );
  format!("https://example.com/get/sha1/{hex}?signature={sig}")
}

#[test]
fn load_file_treats_remote_check_miss_as_absent() {
  with_cache_root(|_root| {
    let hex = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";
    let mut http = FakeHttpClient::default();
    http
      .json_responses
      .insert(download_check_url(hex), serde_json::json!({"found": false}));

    let client = KacheryClient::new(RealEnv, http);
    let overrides = ConfigOverride {
      url: Some("https://example.com".to_string()),
      use_remote: Some(true),
      ..ConfigOverride::default()
    };
    let url = format!("sha1://{hex}/file.txt");
    let result = client.load_file(&url, &overrides).unwrap();
    assert!(result.is_none());
  });
}

#[test]
fn load_file_treats_unsuccessful_check_as_absent() {
  with_cache_root(|_root| {
    let hex = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";
    let mut http = FakeHttpClient::default();
    http.json_responses.insert(
      download_check_url(hex),
      serde_json::json!({"success": false, "error": "server unavailable"}),
    );

    let client = KacheryClient::new(RealEnv, http);
    let overrides = ConfigOverride {
      url: Some("https://example.com".to_string()),
      use_remote: Some(true),
      ..ConfigOverride::default()
    };
    let url = format!("sha1://{hex}/file.txt");
    let result = client.load_file(&url, &overrides).unwrap();
    assert!(result.is_none());
  });
}

#[test]
fn load_file_rejects_a_corrupted_download_and_leaves_the_cache_unchanged() {
  with_cache_root(|_root| {
    let hex = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"; // hash of "hello"
    let mut http = FakeHttpClient::default();
    http.json_responses.insert(
      download_check_url(hex),
      serde_json::json!({"found": true, "size": 5}),
    );
    // Wrong bytes for this hash: download must be rejected before it ever
    // reaches the canonical cache path.
    http
      .byte_responses
      .insert(download_get_url(hex), b"wrong!".to_vec());

    let client = KacheryClient::new(RealEnv, http);
    let overrides = ConfigOverride {
      url: Some("https://example.com".to_string()),
      use_remote: Some(true),
      ..ConfigOverride::default()
    };
    let url = format!("sha1://{hex}/file.txt");
    assert!(client.load_file(&url, &overrides).is_err());

    // A subsequent local-only lookup must still report the content as
    // absent, not find a corrupted file left behind by the failed download.
    let local_client = KacheryClient::local_only(RealEnv);
    let result = local_client
      .load_file(&url, &ConfigOverride::default())
      .unwrap();
    assert!(result.is_none());
  });
}
