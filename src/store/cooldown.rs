//! Per-owner cooldown of automatic snapshots.
//!
//! Формат: <root>/cooldowns.json
//! {
//!   "owners": { "<owner>": <last_auto_snapshot_ms>, ... }
//! }
//!
//! Замечания:
//! - claim() атомарен в процессе (Mutex): из параллельных вызовов в окне
//!   cooldown проходит ровно один; claim() трогает только память;
//! - persist() пишет файл через tmp+fsync+rename и вызывается с пула
//!   ввода-вывода; записи сериализуются, последняя несёт последнее состояние.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::consts::COOLDOWN_FILE;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CooldownFile {
    owners: BTreeMap<String, u64>,
}

#[derive(Debug)]
pub struct Cooldowns {
    path: PathBuf,
    state: Mutex<CooldownFile>,
    write: Mutex<()>,
}

fn load_file(path: &Path) -> Result<CooldownFile> {
    if !path.exists() {
        return Ok(CooldownFile::default());
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let f: CooldownFile = serde_json::from_slice(&bytes).context("parse cooldowns.json")?;
    Ok(f)
}

fn save_file(path: &Path, data: &CooldownFile) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut f = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp)
        .with_context(|| format!("open {}", tmp.display()))?;
    let bytes = serde_json::to_vec_pretty(data).context("serialize cooldowns.json")?;
    f.write_all(&bytes)
        .with_context(|| format!("write {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("fsync {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

impl Cooldowns {
    /// Загрузить реестр из `<root>/cooldowns.json`; битый файл даёт пустой реестр.
    pub fn open(root: &Path) -> Self {
        let path = root.join(COOLDOWN_FILE);
        let state = match load_file(&path) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("store: cooldowns ignored: {:#}", e);
                CooldownFile::default()
            }
        };
        Self {
            path,
            state: Mutex::new(state),
            write: Mutex::new(()),
        }
    }

    /// Занять окно: true, если с последнего автоснапшота прошло >= `cooldown_ms`
    /// (или его не было). Только память; на диск отметку кладёт `persist`.
    pub fn claim(&self, owner: &str, now_ms: u64, cooldown_ms: u64) -> bool {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&last) = st.owners.get(owner) {
            if now_ms < last.saturating_add(cooldown_ms) {
                return false;
            }
        }
        st.owners.insert(owner.to_string(), now_ms);
        true
    }

    /// Записать текущие отметки в cooldowns.json.
    pub fn persist(&self) -> Result<()> {
        let _w = self.write.lock().unwrap_or_else(|e| e.into_inner());
        let data = CooldownFile {
            owners: self
                .state
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .owners
                .clone(),
        };
        save_file(&self.path, &data)
    }

    pub fn last(&self, owner: &str) -> Option<u64> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .owners
            .get(owner)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_root(tag: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "iv-cooldown-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn claim_respects_window_and_survives_reopen() {
        let root = tmp_root("window");
        let c = Cooldowns::open(&root);
        assert!(c.claim("U1", 1_000, 500));
        assert!(!c.claim("U1", 1_400, 500));
        assert!(c.claim("U2", 1_400, 500));
        assert!(!root.join(COOLDOWN_FILE).exists(), "claim alone does not touch the disk");
        c.persist().unwrap();
        drop(c);

        let c = Cooldowns::open(&root);
        assert_eq!(c.last("U1"), Some(1_000));
        assert!(!c.claim("U1", 1_499, 500));
        assert!(c.claim("U1", 1_500, 500));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn persist_reports_write_failures() {
        let root = tmp_root("fail");
        let c = Cooldowns::open(&root.join("missing"));
        assert!(c.claim("U1", 1, 1));
        assert!(c.persist().is_err());
        let _ = fs::remove_dir_all(&root);
    }
}
