//! PersistenceManager: durable snapshot records, cooldown and retention.
//!
//! Синхронные операции (save/load/list/prune/delete) делегируются `RecordStore`.
//! Асинхронные (save_async/load_async/maybe_snapshot) выполняют I/O на `IoPool`
//! и возвращают результат на тиковый поток через `SchedulerHandle`.

pub mod cooldown;
pub mod disk;
pub mod lock;
pub mod pool;
pub mod record;

pub use cooldown::Cooldowns;
pub use disk::RecordStore;
pub use pool::IoPool;
pub use record::RecordHeader;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::capture::CapturePipeline;
use crate::config::VaultConfig;
use crate::error::VaultResult;
use crate::registry::VariantRegistry;
use crate::sched::{Promise, Scheduler};
use crate::snapshot::{IslandSnapshot, PersistedSnapshotRecord, Volume};

/// Wall clock in milliseconds (cooldown windows and automatic timestamps).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Hand-driven clock for tests and replays.
#[derive(Debug, Default, Clone)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_ms)))
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PersistenceManager {
    store: RecordStore,
    cooldowns: Arc<Cooldowns>,
    clock: Arc<dyn Clock>,
    pool: Arc<IoPool>,
    capture: CapturePipeline,
    cooldown_ms: u64,
    keep_last: usize,
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("root", &self.store.root())
            .field("codec", &self.store.codec())
            .field("keep_last", &self.keep_last)
            .finish()
    }
}

impl PersistenceManager {
    /// Открыть хранилище в `cfg.store_dir` (каталог создаётся) с реестром по умолчанию.
    pub fn open(cfg: &VaultConfig) -> VaultResult<Self> {
        Self::open_with(cfg, Arc::new(VariantRegistry::modern()), Arc::new(SystemClock))
    }

    pub fn open_with(
        cfg: &VaultConfig,
        registry: Arc<VariantRegistry>,
        clock: Arc<dyn Clock>,
    ) -> VaultResult<Self> {
        std::fs::create_dir_all(&cfg.store_dir)?;
        Ok(Self {
            store: RecordStore::new(cfg.store_dir.clone(), cfg.codec),
            cooldowns: Arc::new(Cooldowns::open(&cfg.store_dir)),
            clock,
            pool: Arc::new(IoPool::new(cfg.io_threads)?),
            capture: CapturePipeline::new(registry, cfg),
            cooldown_ms: cfg.snapshot_cooldown_ms,
            keep_last: cfg.keep_last,
        })
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn save(&self, owner: &str, timestamp: u64, snapshot: &IslandSnapshot) -> VaultResult<PathBuf> {
        self.store.save(owner, timestamp, snapshot)
    }

    pub fn load(&self, owner: &str, timestamp: u64) -> VaultResult<Option<PersistedSnapshotRecord>> {
        self.store.load(owner, timestamp)
    }

    pub fn list(&self, owner: &str) -> VaultResult<Vec<u64>> {
        self.store.list(owner)
    }

    pub fn prune(&self, owner: &str, keep_last: usize) -> VaultResult<Vec<u64>> {
        self.store.prune(owner, keep_last)
    }

    pub fn delete(&self, owner: &str, timestamp: u64) -> VaultResult<bool> {
        self.store.delete(owner, timestamp)
    }

    /// Запись на пуле; промис завершается на тиковом потоке.
    pub fn save_async(
        &self,
        sched: &Scheduler,
        owner: &str,
        timestamp: u64,
        snapshot: Arc<IslandSnapshot>,
    ) -> Promise<PathBuf> {
        let promise = Promise::new();
        let (store, handle, p) = (self.store.clone(), sched.handle(), promise.clone());
        let owner = owner.to_string();
        let submitted = self.pool.submit(move || {
            let res = store.save(&owner, timestamp, &snapshot);
            handle.post(move |_| {
                p.complete(res);
            });
        });
        if let Err(e) = submitted {
            promise.fail(e);
        }
        promise
    }

    pub fn load_async(
        &self,
        sched: &Scheduler,
        owner: &str,
        timestamp: u64,
    ) -> Promise<Option<Arc<PersistedSnapshotRecord>>> {
        let promise = Promise::new();
        let (store, handle, p) = (self.store.clone(), sched.handle(), promise.clone());
        let owner = owner.to_string();
        let submitted = self.pool.submit(move || {
            let res = store.load(&owner, timestamp).map(|r| r.map(Arc::new));
            if let Err(e) = &res {
                log::error!("store: load {}/{} failed: {}", owner, timestamp, e);
            }
            handle.post(move |_| {
                p.complete(res);
            });
        });
        if let Err(e) = submitted {
            promise.fail(e);
        }
        promise
    }

    /// Автоснапшот с cooldown: `None`, если окно владельца ещё не истекло.
    /// Иначе захват на тиковом потоке; отметка cooldown, запись и prune на
    /// пуле; результат (временная метка) снова на тиковом потоке.
    pub fn maybe_snapshot(
        &self,
        sched: &mut Scheduler,
        owner: &str,
        volume: Volume,
    ) -> Promise<Option<u64>> {
        let result = Promise::new();
        let now = self.clock.now_ms();
        if !self.cooldowns.claim(owner, now, self.cooldown_ms) {
            log::debug!("store: auto snapshot of '{}' skipped (cooldown)", owner);
            result.resolve(None);
            return result;
        }

        let cooldowns = self.cooldowns.clone();
        let persisted = self.pool.submit(move || {
            if let Err(e) = cooldowns.persist() {
                log::warn!("store: cooldowns not persisted: {:#}", e);
            }
        });
        if let Err(e) = persisted {
            log::warn!("store: cooldowns not persisted: {}", e);
        }

        let captured = self.capture.begin(sched, volume);
        let (store, pool, handle) = (self.store.clone(), self.pool.clone(), sched.handle());
        let (owner, keep, r) = (owner.to_string(), self.keep_last, result.clone());
        captured.on_complete(move |res| {
            let snap = match res {
                Ok(s) => s,
                Err(e) => {
                    log::error!("store: auto snapshot of '{}' failed: {}", owner, e);
                    r.fail(e);
                    return;
                }
            };
            let r2 = r.clone();
            let submitted = pool.submit(move || {
                let out = store
                    .save(&owner, now, &snap)
                    .and_then(|_| store.prune(&owner, keep))
                    .map(|_| Some(now));
                if let Err(e) = &out {
                    log::error!("store: auto snapshot of '{}' not persisted: {}", owner, e);
                }
                handle.post(move |_| {
                    r2.complete(out);
                });
            });
            if let Err(e) = submitted {
                r.fail(e);
            }
        });
        result
    }
}
