//! Durable persistence of the operation queue and the in-flight item.
//!
//! A [`StateFile`] is parametrised by a directory and a file stem: the queue
//! lives in `<stem>`, the current in-flight item in `<stem>-current`. Writes
//! are whole-file replacements; the directory is created lazily on first
//! write. Reading an absent file yields an empty queue, so a fresh
//! repository and a drained rework look the same to the reader.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::queue::{Item, Queue};

/// Queue and current-item persistence under a state directory.
#[derive(Debug, Clone)]
pub struct StateFile {
    dir: PathBuf,
    stem: String,
}

impl StateFile {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
        }
    }

    #[must_use]
    pub fn queue_path(&self) -> PathBuf {
        self.dir.join(&self.stem)
    }

    #[must_use]
    pub fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}-current", self.stem))
    }

    /// Persist the queue. An empty queue clears the file instead.
    pub fn write_queue(&self, queue: &Queue) -> Result<()> {
        if queue.is_empty() {
            return self.clear_queue();
        }
        self.write(&self.queue_path(), &queue.marshal_text())
    }

    /// Persist the in-flight item. An item with an empty operation name
    /// clears the file instead.
    pub fn write_current(&self, item: &Item) -> Result<()> {
        if item.operation.is_empty() {
            return self.clear_current();
        }
        let mut text = item.marshal_text();
        text.push('\n');
        self.write(&self.current_path(), &text)
    }

    /// Read the persisted queue. Absent file means empty.
    pub fn read_queue(&self) -> Result<Queue> {
        let mut queue = Queue::new();
        if let Some(text) = self.read(&self.queue_path())? {
            queue.unmarshal_text(&text);
        }
        Ok(queue)
    }

    /// Read the in-flight item as a zero-or-one item queue. Absent or blank
    /// file means empty.
    pub fn read_current(&self) -> Result<Queue> {
        let mut queue = Queue::new();
        if let Some(text) = self.read(&self.current_path())? {
            if let Some(item) = Item::unmarshal_text(text.trim_end_matches('\n')) {
                queue.push(item);
            }
        }
        Ok(queue)
    }

    /// Remove the queue file. Idempotent.
    pub fn clear_queue(&self) -> Result<()> {
        remove_if_present(&self.queue_path())
    }

    /// Remove the current file. Idempotent.
    pub fn clear_current(&self) -> Result<()> {
        remove_if_present(&self.current_path())
    }

    fn write(&self, path: &Path, text: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        relax_permissions(&self.dir, 0o777);
        fs::write(path, text)?;
        relax_permissions(path, 0o666);
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Option<String>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match String::from_utf8(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(err) => Err(Error::Corrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// State files are shared between whoever runs kilt in the working copy, so
/// the directory and files are opened up past the umask where possible.
#[cfg(unix)]
fn relax_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn relax_permissions(_path: &Path, _mode: u32) {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
