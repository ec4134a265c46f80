//! Local object store.
//!
//! The engine talks to [`ObjectStore`]. [`FsObjectStore`] keeps one file per
//! object in a flat directory; in-progress objects live in `<id>.part` and are
//! renamed into place on commit.

mod writer;

pub use writer::{temp_path, ObjectWriter, TEMP_SUFFIX};

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;

use crate::error::DownloadError;
use crate::object::{ObjectId, ObjectStream};

pub type DynObjectStore = Arc<dyn ObjectStore>;

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// True if a committed copy exists.
    async fn contains(&self, object_id: &ObjectId) -> bool;

    /// Size and content of a committed object.
    async fn open(&self, object_id: &ObjectId) -> Result<(u64, ObjectStream)>;

    /// Up to `len` bytes at `offset`, read from the partial copy while it is
    /// being written and from the committed copy once it is in place. Empty
    /// past the end of the data.
    async fn read_range(&self, object_id: &ObjectId, offset: u64, len: usize) -> Result<Bytes>;

    /// Length of the uncommitted partial copy, if any.
    async fn partial_len(&self, object_id: &ObjectId) -> Option<u64>;

    /// Write a chunk of the partial copy at `offset`. Offset 0 starts a fresh copy.
    async fn write_chunk(&self, object_id: &ObjectId, offset: u64, chunk: Bytes) -> Result<()>;

    /// Make the partial copy the committed one.
    async fn commit(&self, object_id: &ObjectId) -> Result<()>;

    /// Drop the partial copy. No-op if there is none.
    async fn discard(&self, object_id: &ObjectId) -> Result<()>;

    async fn list_objects(&self) -> Result<Vec<ObjectId>>;

    async fn list_partial(&self) -> Result<Vec<ObjectId>>;

    /// Remove a committed object.
    async fn remove(&self, object_id: &ObjectId) -> Result<()>;
}

#[derive(Debug)]
pub struct FsObjectStore {
    dir: PathBuf,
    writers: Mutex<HashMap<ObjectId, ObjectWriter>>,
}

impl FsObjectStore {
    /// Use `dir` as the object directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create object directory {}", dir.display()))?;
        Ok(Self {
            dir,
            writers: Mutex::new(HashMap::new()),
        })
    }

    /// `$XDG_DATA_HOME/distnode/objects`
    pub fn default_dir() -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("distnode")?;
        Ok(xdg_dirs.get_data_home().join("objects"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn writers(&self) -> MutexGuard<'_, HashMap<ObjectId, ObjectWriter>> {
        self.writers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn object_path(&self, object_id: &ObjectId) -> Result<PathBuf> {
        if !object_id.is_path_safe() {
            anyhow::bail!("object id {object_id:?} is not usable as a file name");
        }
        Ok(self.dir.join(object_id.as_str()))
    }

    async fn list_names(&self, partial: bool) -> Result<Vec<ObjectId>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("list {}", self.dir.display()))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match (partial, name.strip_suffix(TEMP_SUFFIX)) {
                (true, Some(id)) => ids.push(ObjectId::from(id)),
                (false, None) => ids.push(ObjectId::from(name)),
                _ => {}
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(unix)]
fn read_at(file: &File, offset: u64, len: usize) -> Result<Bytes> {
    use std::os::unix::fs::FileExt;
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e).context("storage read_at failed"),
        }
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

#[cfg(not(unix))]
fn read_at(file: &File, offset: u64, len: usize) -> Result<Bytes> {
    use std::io::{Read, Seek, SeekFrom};
    let mut f = file.try_clone()?;
    f.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len);
    f.take(len as u64).read_to_end(&mut buf)?;
    Ok(Bytes::from(buf))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("storage task panicked")?
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn contains(&self, object_id: &ObjectId) -> bool {
        match self.object_path(object_id) {
            Ok(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn open(&self, object_id: &ObjectId) -> Result<(u64, ObjectStream)> {
        let path = self.object_path(object_id)?;
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        let size = file.metadata().await?.len();
        let stream = ReaderStream::new(file)
            .map_err(|e| DownloadError::Storage(e.to_string()))
            .boxed();
        Ok((size, stream))
    }

    async fn read_range(&self, object_id: &ObjectId, offset: u64, len: usize) -> Result<Bytes> {
        let final_path = self.object_path(object_id)?;
        blocking(move || {
            let tp = temp_path(&final_path);
            // The rename on commit is atomic: a missing temp file means the committed one is there.
            let file = match File::open(&tp) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => File::open(&final_path)
                    .with_context(|| format!("open {}", final_path.display()))?,
                Err(e) => return Err(e).with_context(|| format!("open {}", tp.display())),
            };
            read_at(&file, offset, len)
        })
        .await
    }

    async fn partial_len(&self, object_id: &ObjectId) -> Option<u64> {
        let path = temp_path(&self.object_path(object_id).ok()?);
        tokio::fs::metadata(path).await.ok().map(|m| m.len())
    }

    async fn write_chunk(&self, object_id: &ObjectId, offset: u64, chunk: Bytes) -> Result<()> {
        let existing = self.writers().get(object_id).cloned();
        let writer = match existing {
            Some(writer) => writer,
            None => {
                let tp = temp_path(&self.object_path(object_id)?);
                let writer = blocking(move || {
                    if offset == 0 {
                        ObjectWriter::create(&tp)
                    } else {
                        ObjectWriter::resume(&tp, offset)
                    }
                })
                .await?;
                self.writers()
                    .entry(object_id.clone())
                    .or_insert(writer)
                    .clone()
            }
        };
        blocking(move || writer.write_at(offset, &chunk)).await
    }

    async fn commit(&self, object_id: &ObjectId) -> Result<()> {
        let final_path = self.object_path(object_id)?;
        let existing = self.writers().remove(object_id);
        blocking(move || {
            let tp = temp_path(&final_path);
            let writer = match existing {
                Some(writer) => writer,
                // Nothing was written: an empty object, or a partial that was already complete.
                None if tp.exists() => ObjectWriter::resume(&tp, u64::MAX)?,
                None => ObjectWriter::create(&tp)?,
            };
            writer.sync()?;
            writer.finalize(&final_path)
        })
        .await
    }

    async fn discard(&self, object_id: &ObjectId) -> Result<()> {
        self.writers().remove(object_id);
        let tp = temp_path(&self.object_path(object_id)?);
        match tokio::fs::remove_file(&tp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", tp.display())),
        }
    }

    async fn list_objects(&self) -> Result<Vec<ObjectId>> {
        self.list_names(false).await
    }

    async fn list_partial(&self) -> Result<Vec<ObjectId>> {
        self.list_names(true).await
    }

    async fn remove(&self, object_id: &ObjectId) -> Result<()> {
        let path = self.object_path(object_id)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("remove {}", path.display()))
    }
}
