use rand::{distributions::Alphanumeric, Rng};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn staging_path(target: &Path) -> PathBuf {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    target.with_file_name(format!(".{}.{}.staging", name, nonce))
}

#[cfg(unix)]
fn open_staging(path: &Path, mode: u32) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new().write(true).create_new(true).mode(mode).open(path)
}

#[cfg(not(unix))]
fn open_staging(path: &Path, _mode: u32) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Replaces `target` with `content` so readers see either the old or the
/// new file, never a partial one. The staging file is removed on failure.
pub fn atomic_write_text_file(target: impl AsRef<Path>, content: &str, mode: u32) -> io::Result<()> {
    let target = target.as_ref();
    if let Some(dir) = target.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let staging = staging_path(target);
    let written = open_staging(&staging, mode).and_then(|mut file| {
        file.write_all(content.as_bytes())?;
        file.sync_all()
    });
    match written.and_then(|_| fs::rename(&staging, target)) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&staging);
            Err(err)
        }
    }
}
