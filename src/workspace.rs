use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

pub const STDIN_FILE: &str = "input.txt";

/// Ephemeral directory owned by exactly one job.
///
/// The directory is removed by [`Workspace::destroy`] or, if that is never
/// reached (early return, panic), when the value is dropped.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    pub fn create(root: &Path, job_id: Uuid) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(job_id.to_string());
        // create_dir (not create_dir_all) so a collision is an error instead of a shared dir
        fs::create_dir(&path)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;

        tracing::debug!(path = %path.display(), "workspace created");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_file(&self, name: &str, content: &[u8], executable: bool) -> io::Result<PathBuf> {
        let file_name = Path::new(name)
            .file_name()
            .filter(|n| *n == name)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("invalid file name: {}", name))
            })?;

        let full_path = self.path.join(file_name);
        fs::write(&full_path, content)?;

        if executable {
            let mut permissions = fs::metadata(&full_path)?.permissions();
            permissions.set_mode(0o755);
            fs::set_permissions(&full_path, permissions)?;
        }

        Ok(full_path)
    }

    pub fn write_source(&self, name: &str, code: &str) -> io::Result<PathBuf> {
        self.write_file(name, code.as_bytes(), false)
    }

    pub fn write_stdin(&self, stdin: &str) -> io::Result<PathBuf> {
        self.write_file(STDIN_FILE, stdin.as_bytes(), false)
    }

    /// Removes the directory tree. Errors are logged and swallowed.
    pub async fn destroy(mut self) {
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || remove_tree(&path)).await;
        if let Err(e) = result {
            tracing::warn!("workspace cleanup task failed: {}", e);
            remove_tree(&self.path);
        }
        self.removed = true;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.removed {
            remove_tree(&self.path);
        }
    }
}

/// Best-effort recursive delete, used by guards and the shutdown sweep.
pub fn remove_tree(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "workspace removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "failed to remove workspace: {}", e),
    }
}

/// Removes directories left under `root` by a previous process that died
/// before it could clean up. Only called before any job is admitted.
pub fn purge_stale(root: &Path) -> io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }
    let mut purged = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let is_job_dir = entry.file_type()?.is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| Uuid::parse_str(name).is_ok());
        if is_job_dir {
            remove_tree(&entry.path());
            purged += 1;
        }
    }
    Ok(purged)
}
