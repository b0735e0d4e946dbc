use std::fs::File;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::PoisonError;

use dodgeball_protocol::SourceIdentity;
use tracing::warn;

/// Persistence for the current source identity.
pub trait SourceStore: Send + Sync {
    fn load(&self) -> Option<SourceIdentity>;

    /// `None` clears the stored identity.
    fn save(&self, identity: Option<&SourceIdentity>);
}

#[derive(Debug, Default)]
pub struct MemorySourceStore {
    identity: Mutex<Option<SourceIdentity>>,
}

impl SourceStore for MemorySourceStore {
    fn load(&self) -> Option<SourceIdentity> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, identity: Option<&SourceIdentity>) {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = identity.cloned();
    }
}

/// JSON file store, readable only by the owner on unix.
#[derive(Debug, Clone)]
pub struct FileSourceStore {
    path: PathBuf,
}

impl FileSourceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceStore for FileSourceStore {
    fn load(&self) -> Option<SourceIdentity> {
        match try_read_identity(&self.path) {
            Ok(identity) => Some(identity),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "ignoring unreadable source identity"
                );
                None
            }
        }
    }

    fn save(&self, identity: Option<&SourceIdentity>) {
        let result = match identity {
            Some(identity) => write_identity(&self.path, identity),
            None => match std::fs::remove_file(&self.path) {
                Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
                _ => Ok(()),
            },
        };
        if let Err(err) = result {
            warn!(path = %self.path.display(), error = %err, "failed to persist source identity");
        }
    }
}

fn try_read_identity(path: &Path) -> std::io::Result<SourceIdentity> {
    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_identity(path: &Path, identity: &SourceIdentity) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json_data = serde_json::to_string_pretty(identity)?;
    let mut options = OpenOptions::new();
    options.truncate(true).write(true).create(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(json_data.as_bytes())?;
    file.flush()?;
    Ok(())
}
