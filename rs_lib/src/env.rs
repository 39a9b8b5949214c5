// Copyright 2018-2024 the kachery authors. MIT license.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

/// Abstracts filesystem and clock access so the cache and digest engine can
/// be exercised against an in-memory filesystem in tests, without touching
/// disk or depending on wall-clock time.
pub trait Env: Send + Sync + std::fmt::Debug + Clone {
  /// Reads the whole file, or `None` if it does not exist.
  fn read_file_bytes(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>>;

  /// Opens the file for chunked reading, or `None` if it does not exist.
  fn open_read(
    &self,
    path: &Path,
  ) -> std::io::Result<Option<Box<dyn std::io::Read>>>;

  /// Writes `bytes` to `path` atomically: write to a temp sibling in the
  /// same directory, then rename over the final name. Creates parent
  /// directories as needed.
  fn atomic_write_file(
    &self,
    path: &Path,
    bytes: &[u8],
  ) -> std::io::Result<()>;

  /// Copies `src` to a temp sibling of `dest` (same directory as `dest`)
  /// and renames it into place. Returns `Ok(false)` without touching
  /// anything if `dest` already exists.
  fn atomic_copy_into_place(
    &self,
    src: &Path,
    dest: &Path,
  ) -> std::io::Result<bool>;

  fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
  fn is_file(&self, path: &Path) -> bool;
  fn remove_file(&self, path: &Path) -> std::io::Result<()>;

  /// `(size, mtime)` of the file, or `None` if it does not exist.
  fn stat(&self, path: &Path) -> std::io::Result<Option<(u64, SystemTime)>>;

  fn time_now(&self) -> SystemTime;

  /// Copies `src` to `dest`, overwriting `dest`. Used for `dest` arguments
  /// to `load_file`, which are ordinary (non-atomic) destination paths.
  fn copy_file(&self, src: &Path, dest: &Path) -> std::io::Result<()>;

  /// Lists the immediate children of a directory, or `None` if it does not
  /// exist. Used by the manifest builder to walk a directory tree.
  fn read_dir(&self, path: &Path) -> std::io::Result<Option<Vec<DirEntry>>>;
}

/// A single entry returned by [`Env::read_dir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
  pub name: String,
  pub is_dir: bool,
  /// The target of the entry, if it is a symlink (used to detect
  /// git-annex-managed files without reading their content).
  pub symlink_target: Option<PathBuf>,
}

/// The real filesystem and system clock.
#[derive(Debug, Clone, Default)]
pub struct RealEnv;

impl Env for RealEnv {
  fn read_file_bytes(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
      Ok(bytes) => Ok(Some(bytes)),
      Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err),
    }
  }

  fn open_read(
    &self,
    path: &Path,
  ) -> std::io::Result<Option<Box<dyn std::io::Read>>> {
    match std::fs::File::open(path) {
      Ok(file) => Ok(Some(Box::new(file))),
      Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err),
    }
  }

  fn atomic_write_file(
    &self,
    path: &Path,
    bytes: &[u8],
  ) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    self.create_dir_all(dir)?;
    let tmp_path = tmp_sibling(path);
    std::fs::write(&tmp_path, bytes)?;
    match std::fs::rename(&tmp_path, path) {
      Ok(()) => Ok(()),
      Err(err) => {
        let _ = std::fs::remove_file(&tmp_path);
        Err(err)
      }
    }
  }

  fn atomic_copy_into_place(
    &self,
    src: &Path,
    dest: &Path,
  ) -> std::io::Result<bool> {
    if self.is_file(dest) {
      return Ok(false);
    }
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    self.create_dir_all(dir)?;
    let tmp_path = tmp_sibling(dest);
    std::fs::copy(src, &tmp_path)?;
    match std::fs::rename(&tmp_path, dest) {
      Ok(()) => Ok(true),
      Err(_err) if dest.is_file() => {
        // Lost the race to another writer; their file is in place.
        let _ = std::fs::remove_file(&tmp_path);
        Ok(false)
      }
      Err(err) => {
        let _ = std::fs::remove_file(&tmp_path);
        Err(err)
      }
    }
  }

  fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
  }

  fn is_file(&self, path: &Path) -> bool {
    path.is_file()
  }

  fn remove_file(&self, path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)
  }

  fn stat(&self, path: &Path) -> std::io::Result<Option<(u64, SystemTime)>> {
    match std::fs::metadata(path) {
      Ok(metadata) => {
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Ok(Some((metadata.len(), modified)))
      }
      Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err),
    }
  }

  #[allow(clippy::disallowed_methods)]
  fn time_now(&self) -> SystemTime {
    SystemTime::now()
  }

  fn copy_file(&self, src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(dir) = dest.parent() {
      self.create_dir_all(dir)?;
    }
    std::fs::copy(src, dest).map(|_| ())
  }

  fn read_dir(&self, path: &Path) -> std::io::Result<Option<Vec<DirEntry>>> {
    let entries = match std::fs::read_dir(path) {
      Ok(entries) => entries,
      Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
      Err(err) => return Err(err),
    };
    let mut result = Vec::new();
    for entry in entries {
      let entry = entry?;
      let metadata = std::fs::symlink_metadata(entry.path())?;
      let symlink_target = if metadata.file_type().is_symlink() {
        std::fs::read_link(entry.path()).ok()
      } else {
        None
      };
      let is_dir = if symlink_target.is_some() {
        entry.path().is_dir()
      } else {
        metadata.is_dir()
      };
      result.push(DirEntry {
        name: entry.file_name().to_string_lossy().into_owned(),
        is_dir,
        symlink_target,
      });
    }
    Ok(Some(result))
  }
}

fn tmp_sibling(path: &Path) -> PathBuf {
  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  path.with_file_name(format!(
    ".{file_name}.{pid}.tmp",
    pid = std::process::id()
  ))
}

#[derive(Debug, Default)]
struct InMemoryFs {
  files: HashMap<PathBuf, (Vec<u8>, SystemTime)>,
}

/// A simple in-memory filesystem used to unit test the cache and digest
/// engine without hitting disk.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEnv {
  fs: std::sync::Arc<Mutex<InMemoryFs>>,
  clock: std::sync::Arc<Mutex<SystemTime>>,
}

impl InMemoryEnv {
  pub fn new() -> Self {
    Self {
      fs: std::sync::Arc::new(Mutex::new(InMemoryFs::default())),
      clock: std::sync::Arc::new(Mutex::new(SystemTime::UNIX_EPOCH)),
    }
  }

  /// Advances the fake clock; useful for exercising mtime-based memo
  /// invalidation deterministically.
  pub fn advance_clock(&self, duration: std::time::Duration) {
    let mut clock = self.clock.lock().unwrap();
    *clock += duration;
  }
}

impl Env for InMemoryEnv {
  fn read_file_bytes(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    Ok(
      self
        .fs
        .lock()
        .unwrap()
        .files
        .get(path)
        .map(|(b, _)| b.clone()),
    )
  }

  fn open_read(
    &self,
    path: &Path,
  ) -> std::io::Result<Option<Box<dyn std::io::Read>>> {
    let bytes = self.read_file_bytes(path)?;
    Ok(
      bytes
        .map(|b| Box::new(std::io::Cursor::new(b)) as Box<dyn std::io::Read>),
    )
  }

  fn atomic_write_file(
    &self,
    path: &Path,
    bytes: &[u8],
  ) -> std::io::Result<()> {
    let now = self.time_now();
    self
      .fs
      .lock()
      .unwrap()
      .files
      .insert(path.to_path_buf(), (bytes.to_vec(), now));
    Ok(())
  }

  fn atomic_copy_into_place(
    &self,
    src: &Path,
    dest: &Path,
  ) -> std::io::Result<bool> {
    let mut fs = self.fs.lock().unwrap();
    if fs.files.contains_key(dest) {
      return Ok(false);
    }
    let (bytes, _) = fs.files.get(src).cloned().ok_or_else(|| {
      std::io::Error::new(ErrorKind::NotFound, "no such file")
    })?;
    let now = *self.clock.lock().unwrap();
    fs.files.insert(dest.to_path_buf(), (bytes, now));
    Ok(true)
  }

  fn create_dir_all(&self, _path: &Path) -> std::io::Result<()> {
    Ok(())
  }

  fn is_file(&self, path: &Path) -> bool {
    self.fs.lock().unwrap().files.contains_key(path)
  }

  fn remove_file(&self, path: &Path) -> std::io::Result<()> {
    self.fs.lock().unwrap().files.remove(path);
    Ok(())
  }

  fn stat(&self, path: &Path) -> std::io::Result<Option<(u64, SystemTime)>> {
    Ok(
      self
        .fs
        .lock()
        .unwrap()
        .files
        .get(path)
        .map(|(b, mtime)| (b.len() as u64, *mtime)),
    )
  }

  fn time_now(&self) -> SystemTime {
    *self.clock.lock().unwrap()
  }

  fn copy_file(&self, src: &Path, dest: &Path) -> std::io::Result<()> {
    let mut fs = self.fs.lock().unwrap();
    let (bytes, _) = fs.files.get(src).cloned().ok_or_else(|| {
      std::io::Error::new(ErrorKind::NotFound, "no such file")
    })?;
    let now = *self.clock.lock().unwrap();
    fs.files.insert(dest.to_path_buf(), (bytes, now));
    Ok(())
  }

  fn read_dir(&self, path: &Path) -> std::io::Result<Option<Vec<DirEntry>>> {
    let fs = self.fs.lock().unwrap();
    let mut seen = std::collections::BTreeMap::new();
    let mut any_under_path = false;
    for key in fs.files.keys() {
      let Ok(relative) = key.strip_prefix(path) else {
        continue;
      };
      let mut components = relative.components();
      let Some(first) = components.next() else {
        continue;
      };
      any_under_path = true;
      let name = first.as_os_str().to_string_lossy().into_owned();
      let is_dir = components.next().is_some();
      seen
        .entry(name)
        .and_modify(|existing: &mut bool| *existing = *existing || is_dir)
        .or_insert(is_dir);
    }
    if !any_under_path {
      return Ok(None);
    }
    Ok(Some(
      seen
        .into_iter()
        .map(|(name, is_dir)| DirEntry {
          name,
          is_dir,
          symlink_target: None,
        })
        .collect(),
    ))
  }
}
