use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::ExecError;

/// Entries never copied from the editor's folder into a session
const SKIPPED_DIRS: &[&str] = &["__pycache__", "venv", ".git"];

/// Working directory (and optional virtualenv) owned by one execution session.
///
/// The directory is removed when the last handle drops. Cancelling kills
/// whatever process is currently running inside it.
#[derive(Debug)]
pub struct ExecEnvironment {
    dir: TempDir,
    venv: Option<PathBuf>,
    cancel: watch::Sender<bool>,
}

impl ExecEnvironment {
    pub async fn provision(session_id: &str, interpreter: &str, use_venv: bool) -> Result<Self, ExecError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("pyenv_{session_id}_"))
            .tempdir()
            .map_err(|e| ExecError::EnvironmentFailure(format!("cannot create session directory: {e}")))?;

        let venv = if use_venv {
            let venv_path = dir.path().join("venv");
            let output = Command::new(interpreter)
                .arg("-m")
                .arg("venv")
                .arg(&venv_path)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| ExecError::EnvironmentFailure(format!("cannot start {interpreter}: {e}")))?;
            if !output.status.success() {
                return Err(ExecError::EnvironmentFailure(format!(
                    "virtualenv creation failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            Some(venv_path)
        } else {
            None
        };

        info!("Provisioned execution environment {} for session {}", dir.path().display(), session_id);
        let (cancel, _) = watch::channel(false);
        Ok(Self { dir, venv, cancel })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn has_venv(&self) -> bool {
        self.venv.is_some()
    }

    /// Interpreter to run scripts with: the venv's own, else `default`.
    pub fn interpreter(&self, default: &str) -> PathBuf {
        match &self.venv {
            Some(venv) => venv_bin(venv, "python"),
            None => PathBuf::from(default),
        }
    }

    pub fn pip(&self) -> Option<PathBuf> {
        self.venv.as_ref().map(|venv| venv_bin(venv, "pip"))
    }

    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Copy the editor's sibling files in. Failures are logged, never fatal.
    pub async fn seed_from(&self, source: &Path, script_name: &str) {
        let source = source.to_path_buf();
        let target = self.dir.path().to_path_buf();
        let script_name = script_name.to_string();
        let copied = tokio::task::spawn_blocking(move || seed_dir(&source, &target, &script_name)).await;
        match copied {
            Ok(Ok(n)) => debug!("Seeded {} entries into {}", n, self.dir.path().display()),
            Ok(Err(e)) => warn!("Failed to seed {}: {}", self.dir.path().display(), e),
            Err(e) => warn!("Seeding task failed: {}", e),
        }
    }

    pub async fn write_script(&self, file_name: &str, content: &str) -> Result<PathBuf, ExecError> {
        let path = self.dir.path().join(file_name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ExecError::EnvironmentFailure(format!("cannot write {file_name}: {e}")))?;
        Ok(path)
    }
}

/// A plain file name with no directory parts.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name.len() <= 255
}

fn venv_bin(venv: &Path, tool: &str) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join(format!("{tool}.exe"))
    } else {
        venv.join("bin").join(tool)
    }
}

fn seed_dir(source: &Path, target: &Path, script_name: &str) -> io::Result<usize> {
    let mut copied = 0;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let dest = target.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) || dest.exists() {
                continue;
            }
            copy_dir_all(&entry.path(), &dest)?;
        } else {
            if name == script_name {
                continue;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
        copied += 1;
    }
    Ok(copied)
}

fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
