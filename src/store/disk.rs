//! On-disk record store: one file per (owner, timestamp).
//!
//! Layout: <root>/<owner_dir>/<timestamp>.ivs
//! - owner_dir = owner как есть, если он из [A-Za-z0-9_-] и не длиннее 64,
//!   иначе "x" + hex(байты owner);
//! - запись: tmp + fsync + rename под эксклюзивной блокировкой каталога владельца;
//! - list/load блокировку не берут.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::lock::OwnerLock;
use super::record::{decode_record, encode_record, read_header, RecordHeader};
use crate::config::RecordCodec;
use crate::consts::RECORD_EXT;
use crate::error::{VaultError, VaultResult};
use crate::metrics;
use crate::snapshot::{IslandSnapshot, PersistedSnapshotRecord};

/// Synchronous record operations; cheap to clone into worker jobs.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    codec: RecordCodec,
}

pub fn owner_dir_name(owner: &str) -> String {
    let plain = !owner.is_empty()
        && owner.len() <= 64
        && owner
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if plain {
        owner.to_string()
    } else {
        let mut s = String::with_capacity(1 + owner.len() * 2);
        s.push('x');
        for b in owner.bytes() {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("{RECORD_EXT}.tmp"));
    {
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .with_context(|| format!("open {}", tmp.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all()
            .with_context(|| format!("fsync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    // fsync каталога best-effort (на части платформ не поддерживается)
    if let Some(dir) = path.parent() {
        if let Ok(d) = fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>, codec: RecordCodec) -> Self {
        Self {
            root: root.into(),
            codec,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn codec(&self) -> RecordCodec {
        self.codec
    }

    pub fn owner_dir(&self, owner: &str) -> PathBuf {
        self.root.join(owner_dir_name(owner))
    }

    pub fn record_path(&self, owner: &str, timestamp: u64) -> PathBuf {
        self.owner_dir(owner)
            .join(format!("{timestamp}.{RECORD_EXT}"))
    }

    fn save_inner(&self, owner: &str, timestamp: u64, snap: &IslandSnapshot) -> Result<PathBuf> {
        let dir = self.owner_dir(owner);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let bytes = encode_record(owner, timestamp, snap, self.codec)?;
        let _lock = OwnerLock::acquire(&dir)?;
        let path = self.record_path(owner, timestamp);
        write_atomic(&path, &bytes)?;
        metrics::record_saved(bytes.len());
        log::info!(
            "store: saved {} ({} bytes, codec={})",
            path.display(),
            bytes.len(),
            self.codec
        );
        Ok(path)
    }

    /// Закодировать и атомарно записать снимок.
    pub fn save(&self, owner: &str, timestamp: u64, snap: &IslandSnapshot) -> VaultResult<PathBuf> {
        self.save_inner(owner, timestamp, snap)
            .map_err(VaultError::from_anyhow)
    }

    fn load_inner(&self, owner: &str, timestamp: u64) -> Result<Option<PersistedSnapshotRecord>> {
        let path = self.record_path(owner, timestamp);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let rec = decode_record(&bytes).with_context(|| format!("decode {}", path.display()))?;
        if rec.owner != owner && !rec.owner.is_empty() {
            log::warn!(
                "store: {} belongs to '{}', requested '{}'",
                path.display(),
                rec.owner,
                owner
            );
        }
        Ok(Some(rec))
    }

    pub fn load(&self, owner: &str, timestamp: u64) -> VaultResult<Option<PersistedSnapshotRecord>> {
        self.load_inner(owner, timestamp)
            .map_err(VaultError::from_anyhow)
    }

    /// Только заголовок (для list/inspect без распаковки).
    pub fn header(&self, owner: &str, timestamp: u64) -> VaultResult<Option<(RecordHeader, u64)>> {
        let path = self.record_path(owner, timestamp);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let hdr = read_header(&bytes).map_err(VaultError::from_anyhow)?;
        Ok(Some((hdr, bytes.len() as u64)))
    }

    fn list_inner(&self, owner: &str) -> Result<Vec<u64>> {
        let dir = self.owner_dir(owner);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read_dir {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(ts) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                out.push(ts);
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Временные метки записей владельца по возрастанию.
    pub fn list(&self, owner: &str) -> VaultResult<Vec<u64>> {
        self.list_inner(owner).map_err(VaultError::from_anyhow)
    }

    /// Все владельцы (имена каталогов) в корне хранилища.
    pub fn owners(&self) -> VaultResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn prune_inner(&self, owner: &str, keep_last: usize) -> Result<Vec<u64>> {
        let dir = self.owner_dir(owner);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let _lock = OwnerLock::acquire(&dir)?;
        let all = self.list_inner(owner)?;
        if all.len() <= keep_last {
            return Ok(Vec::new());
        }
        let cut = all.len() - keep_last;
        let mut removed = Vec::with_capacity(cut);
        for ts in &all[..cut] {
            let path = self.record_path(owner, *ts);
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            removed.push(*ts);
        }
        metrics::record_pruned(removed.len());
        log::info!(
            "store: pruned {} records of '{}' (kept {})",
            removed.len(),
            owner,
            keep_last
        );
        Ok(removed)
    }

    /// Удалить все записи, кроме `keep_last` самых новых; вернуть удалённые метки.
    pub fn prune(&self, owner: &str, keep_last: usize) -> VaultResult<Vec<u64>> {
        self.prune_inner(owner, keep_last)
            .map_err(VaultError::from_anyhow)
    }

    fn delete_inner(&self, owner: &str, timestamp: u64) -> Result<bool> {
        let dir = self.owner_dir(owner);
        if !dir.exists() {
            return Ok(false);
        }
        let _lock = OwnerLock::acquire(&dir)?;
        let path = self.record_path(owner, timestamp);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        Ok(true)
    }

    pub fn delete(&self, owner: &str, timestamp: u64) -> VaultResult<bool> {
        self.delete_inner(owner, timestamp)
            .map_err(VaultError::from_anyhow)
    }
}
