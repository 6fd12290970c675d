//! Advisory lock on an owner directory (fs2).
//!
//! Lock file: <root>/<owner>/LOCK. Запись и prune одного владельца идут под
//! эксклюзивной блокировкой; чтение и list блокировку не берут (файлы
//! публикуются атомарным rename). Снимается в Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::consts::OWNER_LOCK_FILE;

pub struct OwnerLock {
    file: File,
    path: PathBuf,
}

impl OwnerLock {
    /// Block until the exclusive lock on `dir` is held.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(OWNER_LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("lock_exclusive {}", path.display()))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OwnerLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
