//! Client library for a content-addressed file store.
//!
//! Content lives under `sha1://`/`sha1dir://` (or `md5`/`md5dir`) URLs built
//! from the hash of its bytes. [`client`] exposes the orchestrator
//! operations (`load_file`, `store_file`, `store_dir`, `read_dir`, ...)
//! backed by a local sharded cache ([`cache`]) and an optional remote HTTP
//! store ([`transport`]).

pub mod cache;
pub mod client;
pub mod config;
pub mod digest;
pub mod env;
pub mod error;
pub mod git_annex;
pub mod manifest;
pub mod transport;
pub mod url;

pub use client::default_client;
pub use client::get_file_info;
pub use client::load_file;
pub use client::load_object;
pub use client::load_text;
pub use client::read_dir;
pub use client::store_dir;
pub use client::store_file;
pub use client::store_object;
pub use client::store_text;
pub use client::FileInfo;
pub use client::KacheryClient;
pub use config::get_config;
pub use config::set_config;
pub use config::Config;
pub use config::ConfigOverride;
pub use config::ConfigPatch;
pub use digest::Algorithm;
pub use digest::Digest;
pub use env::Env;
pub use error::CacheError;
pub use error::KacheryError;
pub use error::ParseError;
pub use error::Result;
pub use error::TransportError;
pub use manifest::Manifest;
pub use manifest::ManifestFileEntry;
pub use url::ContentUrl;
