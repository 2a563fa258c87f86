use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, warn};

use crate::models::CollabError;
use super::identity_service::Identity;

/// A file the identity may open, with the canonical key its room is stored under
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFile {
    pub key: String,
    pub fs_path: PathBuf,
}

/// Persistent storage and its access answers, as seen by the collaboration core.
///
/// The core only reads a file once, when its room is created; saving is the
/// editor's autosave against the file host.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// `None` when the file does not exist or the identity may not open it.
    async fn resolve_file(&self, identity: &Identity, requested: &str) -> Result<Option<ResolvedFile>, CollabError>;

    /// Current text of the file, `None` when it is missing or not UTF-8.
    async fn read_text(&self, file: &ResolvedFile) -> Result<Option<String>, CollabError>;

    /// Folder used to seed an execution session, if the identity can see it.
    async fn resolve_dir(&self, identity: &Identity, requested: &str) -> Option<PathBuf>;
}

/// Shares file written by the file host next to the user folders
pub const SHARES_FILE: &str = ".shares.json";

/// A file or folder of `owner` that `shared_with` may open
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Share {
    pub owner: String,
    pub shared_with: String,
    /// Path below the owner's root
    pub path: String,
    #[serde(default)]
    pub is_file: bool,
}

/// Files laid out as `<root>/<username>/<path>`.
///
/// A path missing from the caller's own folder is looked up in what other
/// users shared with them: a direct file share first, then the nearest shared
/// parent folder. Shared files resolve into the owner's folder, so every
/// collaborator lands in the same room.
///
/// The shares file is read on every lookup, so grants and revocations by the
/// file host apply to the next connection.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Current contents of the shares file. A missing file means no shares.
    async fn shares(&self) -> Vec<Share> {
        let shares_path = self.root.join(SHARES_FILE);
        match tokio::fs::read_to_string(&shares_path).await {
            Ok(text) => match serde_json::from_str::<Vec<Share>>(&text) {
                Ok(shares) => shares,
                Err(e) => {
                    error!("Failed to parse {}: {}", shares_path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                error!("Failed to read {}: {}", shares_path.display(), e);
                Vec::new()
            }
        }
    }

    fn user_root(&self, username: &str) -> Option<PathBuf> {
        let name = Path::new(username);
        match name.components().collect::<Vec<_>>().as_slice() {
            [Component::Normal(_)] => Some(self.root.join(name)),
            _ => None,
        }
    }

    /// Join a client supplied relative path below the user's root.
    fn safe_path(&self, username: &str, requested: &str) -> Option<PathBuf> {
        let mut path = self.user_root(username)?;
        for part in requested.split(['/', '\\']) {
            match part {
                "" | "." => continue,
                ".." => return None,
                _ => {}
            }
            match Path::new(part).components().next() {
                Some(Component::Normal(_)) => path.push(part),
                _ => return None,
            }
        }
        Some(path)
    }

    /// Resolve symlinks and make sure the result stays inside the user's root.
    async fn contained(&self, username: &str, path: &Path) -> Option<PathBuf> {
        let root = tokio::fs::canonicalize(self.user_root(username)?).await.ok()?;
        let canonical = tokio::fs::canonicalize(path).await.ok()?;
        if canonical.starts_with(&root) {
            Some(canonical)
        } else {
            warn!("Path {} escapes the root of {}", path.display(), username);
            None
        }
    }

    async fn file_in(&self, username: &str, requested: &str) -> Result<Option<ResolvedFile>, CollabError> {
        let Some(path) = self.safe_path(username, requested) else {
            debug!("Rejected path '{}' for {}", requested, username);
            return Ok(None);
        };
        let Some(canonical) = self.contained(username, &path).await else {
            return Ok(None);
        };
        match tokio::fs::metadata(&canonical).await {
            Ok(meta) if meta.is_file() => Ok(Some(ResolvedFile {
                key: canonical.to_string_lossy().into_owned(),
                fs_path: canonical,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CollabError::Storage(e.to_string())),
        }
    }

    async fn dir_in(&self, username: &str, requested: &str) -> Option<PathBuf> {
        let path = self.safe_path(username, requested)?;
        let canonical = self.contained(username, &path).await?;
        let meta = tokio::fs::metadata(&canonical).await.ok()?;
        if meta.is_dir() {
            Some(canonical)
        } else {
            canonical.parent().map(Path::to_path_buf)
        }
    }
}

/// Owners whose folder may hold `requested` for `username`, best match first.
fn share_owners(shares: &[Share], username: &str, requested: &str) -> Vec<String> {
    let requested = normalize(requested);
    let mut owners: Vec<(usize, &str)> = shares
        .iter()
        .filter(|s| s.shared_with == username)
        .filter_map(|s| {
            let shared = normalize(&s.path);
            if s.is_file {
                (shared == requested).then_some((usize::MAX, s.owner.as_str()))
            } else if shared.is_empty() || requested == shared || requested.starts_with(&format!("{shared}/")) {
                Some((shared.len(), s.owner.as_str()))
            } else {
                None
            }
        })
        .collect();
    owners.sort_by(|a, b| b.0.cmp(&a.0));
    owners.into_iter().map(|(_, owner)| owner.to_string()).collect()
}

fn normalize(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|p| !p.is_empty() && *p != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn resolve_file(&self, identity: &Identity, requested: &str) -> Result<Option<ResolvedFile>, CollabError> {
        if let Some(file) = self.file_in(&identity.username, requested).await? {
            return Ok(Some(file));
        }
        let shares = self.shares().await;
        for owner in share_owners(&shares, &identity.username, requested) {
            if let Some(file) = self.file_in(&owner, requested).await? {
                debug!("{} opens '{}' shared by {}", identity.username, requested, owner);
                return Ok(Some(file));
            }
        }
        Ok(None)
    }

    async fn read_text(&self, file: &ResolvedFile) -> Result<Option<String>, CollabError> {
        match tokio::fs::read(&file.fs_path).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Ok(Some(text)),
                Err(_) => {
                    warn!("{} is not valid UTF-8, room starts without content", file.key);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CollabError::Storage(e.to_string())),
        }
    }

    async fn resolve_dir(&self, identity: &Identity, requested: &str) -> Option<PathBuf> {
        if let Some(dir) = self.dir_in(&identity.username, requested).await {
            return Some(dir);
        }
        let shares = self.shares().await;
        for owner in share_owners(&shares, &identity.username, requested) {
            if let Some(dir) = self.dir_in(&owner, requested).await {
                return Some(dir);
            }
        }
        None
    }
}
