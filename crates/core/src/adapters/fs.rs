use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Standard files under the daemon data directory
pub fn logs_path(data_dir: &Path) -> PathBuf {
  data_dir.join("logs.jsonl")
}

pub fn tasks_path(data_dir: &Path) -> PathBuf {
  data_dir.join("tasks.json")
}

pub fn rules_path(data_dir: &Path) -> PathBuf {
  data_dir.join("rules.yaml")
}

pub fn lock_path(data_dir: &Path) -> PathBuf {
  data_dir.join("conductor.lock")
}

/// Ensure the data directory exists
pub fn ensure_layout(data_dir: &Path) -> io::Result<()> {
  fs::create_dir_all(data_dir)
}

/// Replace `path` with `bytes` so readers never observe a half-written file:
/// write a sibling temp file, fsync it, then rename over the target.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  fs::create_dir_all(dir)?;
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "file".to_string());
  let tmp = dir.join(format!(".{name}.tmp-{}", std::process::id()));

  let result = (|| {
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
  })();
  if result.is_err() {
    let _ = fs::remove_file(&tmp);
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn layout_paths() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    assert_eq!(logs_path(root), root.join("logs.jsonl"));
    assert_eq!(tasks_path(root), root.join("tasks.json"));
    assert_eq!(rules_path(root), root.join("rules.yaml"));
    assert_eq!(lock_path(root), root.join("conductor.lock"));
  }

  #[test]
  fn atomic_write_replaces_and_leaves_no_temp_files() {
    let td = tempfile::tempdir().unwrap();
    let target = td.path().join("nested").join("tasks.json");
    atomic_write(&target, b"first").unwrap();
    atomic_write(&target, b"second").unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "second");
    let entries: Vec<_> = fs::read_dir(target.parent().unwrap())
      .unwrap()
      .flatten()
      .map(|e| e.file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(entries, vec!["tasks.json".to_string()]);
  }
}
