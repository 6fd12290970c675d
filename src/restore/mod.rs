//! RestorePipeline: IslandSnapshot → destination volume across scheduler ticks.
//!
//! Первый шаг собирает очередь удаления (живые объекты назначения, кроме
//! оператора) и курсор очистки по всем клеткам назначения. Дальше каждый шаг
//! обрабатывает не больше `batch` единиц по трём упорядоченным очередям:
//! удаление (объекты, затем клетки) → клетки снимка → свободные объекты.
//! Размер батча подстраивается под нагрузку хоста (`Throttle`).
//!
//! Ошибка отдельной клетки/объекта логируется и пропускается; промис падает
//! только при потере мира.

pub mod refs;
pub mod throttle;

pub use refs::{DeferredRef, IdTable};
pub use throttle::Throttle;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::VaultConfig;
use crate::consts::{MAX_CHAIN_DEPTH, OPERATOR_KIND};
use crate::error::{VaultError, VaultResult};
use crate::metrics;
use crate::registry::{PendingRef, VariantRegistry};
use crate::sched::{Promise, Scheduler, Task, TaskStatus, TickContext};
use crate::snapshot::{CellSnapshot, IslandSnapshot, ObjectSnapshot, Pos, Volume, VolumeCursor};
use crate::world::{ObjectId, World};

/// Progress observer: fraction of processed units in `[0, 1]`.
pub type ProgressFn = Box<dyn FnMut(f64)>;

#[derive(Clone, Debug)]
pub struct RestorePipeline {
    registry: Arc<VariantRegistry>,
    cfg: VaultConfig,
}

impl RestorePipeline {
    pub fn new(registry: Arc<VariantRegistry>, cfg: &VaultConfig) -> Self {
        Self {
            registry,
            cfg: cfg.clone(),
        }
    }

    /// Запланировать восстановление снимка в `dest`. Сдвиг = dest.min − origin.
    pub fn begin(
        &self,
        sched: &mut Scheduler,
        snapshot: Arc<IslandSnapshot>,
        dest: Volume,
        on_progress: Option<ProgressFn>,
    ) -> Promise<bool> {
        let promise = Promise::new();
        let job = RestoreJob::new(
            snapshot,
            dest,
            self.registry.clone(),
            &self.cfg,
            promise.clone(),
            on_progress,
        );
        sched.run_guarded(1, 1, promise.token(), job);
        promise
    }
}

/// Resumable restore state.
pub struct RestoreJob {
    snapshot: Arc<IslandSnapshot>,
    dest: Volume,
    shift: Pos,
    registry: Arc<VariantRegistry>,
    throttle: Throttle,
    attempts: u32,
    ids: IdTable,
    promise: Promise<bool>,
    on_progress: Option<ProgressFn>,
    started: bool,
    remove_queue: VecDeque<ObjectId>,
    clear_cursor: VolumeCursor,
    next_cell: usize,
    next_object: usize,
    total: u64,
    done: u64,
}

fn collect_ids(obj: &ObjectSnapshot, out: &mut Vec<u64>) {
    out.push(obj.capture_id());
    for p in obj.passengers() {
        collect_ids(p, out);
    }
    if let Some(v) = obj.vehicle() {
        collect_ids(v, out);
    }
}

impl RestoreJob {
    fn new(
        snapshot: Arc<IslandSnapshot>,
        dest: Volume,
        registry: Arc<VariantRegistry>,
        cfg: &VaultConfig,
        promise: Promise<bool>,
        on_progress: Option<ProgressFn>,
    ) -> Self {
        let mut expected = Vec::new();
        for o in snapshot.objects() {
            collect_ids(o, &mut expected);
        }
        for c in snapshot.cells() {
            for o in c.attached() {
                collect_ids(o, &mut expected);
            }
        }
        let shift = dest.min.sub(snapshot.origin());
        let clear_cursor = dest.cursor();
        Self {
            shift,
            registry,
            throttle: Throttle::from_config(cfg),
            attempts: cfg.deferred_ref_attempts,
            ids: IdTable::new(expected),
            promise,
            on_progress,
            started: false,
            remove_queue: VecDeque::new(),
            clear_cursor,
            next_cell: 0,
            next_object: 0,
            total: 0,
            done: 0,
            snapshot,
            dest,
        }
    }

    fn start(&mut self, world: &dyn World) {
        self.remove_queue = world
            .objects_in(&self.dest)
            .into_iter()
            .filter(|id| {
                world
                    .object(*id)
                    .map(|o| o.kind != OPERATOR_KIND)
                    .unwrap_or(false)
            })
            .collect();
        self.total = self.remove_queue.len() as u64
            + self.clear_cursor.total()
            + self.snapshot.cells().len() as u64
            + self.snapshot.objects().len() as u64;
        self.started = true;
        log::info!(
            "restore: into {} at {} ({} cells, {} objects, {} to remove)",
            self.dest.world,
            self.dest.min,
            self.snapshot.cells().len(),
            self.snapshot.objects().len(),
            self.remove_queue.len()
        );
    }

    fn is_exhausted(&self) -> bool {
        self.remove_queue.is_empty()
            && self.clear_cursor.is_done()
            && self.next_cell >= self.snapshot.cells().len()
            && self.next_object >= self.snapshot.objects().len()
    }

    /// Одна единица работы из очереди с наивысшим приоритетом.
    /// `false`, если все очереди пусты.
    fn step_one(&mut self, world: &mut dyn World, pending: &mut Vec<PendingRef>) -> bool {
        if let Some(id) = self.remove_queue.pop_front() {
            if let Err(e) = world.remove_object(id) {
                log::debug!("restore: remove {} skipped: {}", id.0, e);
            }
            return true;
        }
        if let Some(pos) = self.clear_cursor.next() {
            if world.cell(pos).is_some() {
                if let Err(e) = world.set_cell(pos, None) {
                    log::warn!("restore: clear {} failed: {}", pos, e);
                    metrics::record_unit_failure();
                }
            }
            return true;
        }
        let snapshot = self.snapshot.clone();
        if let Some(cell) = snapshot.cells().get(self.next_cell) {
            self.next_cell += 1;
            match self.restore_cell(world, cell, pending) {
                Ok(()) => metrics::record_cell_restored(),
                Err(e) => {
                    log::warn!("restore: cell {} skipped: {}", cell.pos(), e);
                    metrics::record_unit_failure();
                }
            }
            return true;
        }
        if let Some(obj) = snapshot.objects().get(self.next_object) {
            self.next_object += 1;
            if let Err(e) = self.spawn_tree(world, obj, 0, pending) {
                log::warn!("restore: object {} ({}) skipped: {}", obj.capture_id(), obj.kind(), e);
                metrics::record_unit_failure();
            }
            return true;
        }
        false
    }

    fn restore_cell(
        &self,
        world: &mut dyn World,
        cell: &CellSnapshot,
        pending: &mut Vec<PendingRef>,
    ) -> VaultResult<()> {
        let pos = cell.pos().add(self.shift);
        world.set_cell(pos, Some(cell.state()))?;
        if let Some(items) = cell.items() {
            if let Err(e) = world.set_container_items(pos, items) {
                log::warn!("restore: items at {} not applied: {}", pos, e);
            }
        }
        if let Some(aux) = cell.aux() {
            if let Err(e) = world.set_tile_data(pos, aux) {
                log::warn!("restore: tile data at {} not applied: {}", pos, e);
            }
        }
        for obj in cell.attached() {
            if let Err(e) = self.spawn_tree(world, obj, 0, pending) {
                log::warn!("restore: attached {} at {} skipped: {}", obj.kind(), pos, e);
                metrics::record_unit_failure();
            }
        }
        Ok(())
    }

    /// Заспавнить объект, его пассажиров и цепочку транспорта; смонтировать.
    fn spawn_tree(
        &self,
        world: &mut dyn World,
        obj: &ObjectSnapshot,
        depth: usize,
        pending: &mut Vec<PendingRef>,
    ) -> VaultResult<ObjectId> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(VaultError::invalid("object chain too deep"));
        }
        if !self.registry.supports_kind(obj.kind()) {
            return Err(VaultError::invalid(format!(
                "kind '{}' unsupported on host '{}'",
                obj.kind(),
                self.registry.host_version()
            )));
        }
        let id = world.spawn_object(obj.kind(), obj.position().shifted(self.shift))?;
        self.ids.insert(obj.capture_id(), id);
        pending.extend(self.registry.apply_attributes(world, id, obj));
        metrics::record_object_restored();

        for p in obj.passengers() {
            match self.spawn_tree(world, p, depth + 1, pending) {
                Ok(pid) => {
                    if let Err(e) = world.mount(id, pid) {
                        log::warn!("restore: mount {} on {} failed: {}", pid.0, id.0, e);
                    }
                }
                Err(e) => log::warn!("restore: passenger {} skipped: {}", p.kind(), e),
            }
        }
        if let Some(v) = obj.vehicle() {
            match self.spawn_tree(world, v, depth + 1, pending) {
                Ok(vid) => {
                    if let Err(e) = world.mount(vid, id) {
                        log::warn!("restore: mount {} on {} failed: {}", id.0, vid.0, e);
                    }
                }
                Err(e) => log::warn!("restore: vehicle {} skipped: {}", v.kind(), e),
            }
        }
        Ok(id)
    }

    fn report_progress(&mut self) {
        let frac = if self.total == 0 {
            1.0
        } else {
            (self.done as f64 / self.total as f64).clamp(0.0, 1.0)
        };
        if let Some(cb) = self.on_progress.as_mut() {
            cb(frac);
        }
    }
}

impl Task for RestoreJob {
    fn run(&mut self, cx: &mut TickContext<'_>) -> TaskStatus {
        if self.promise.is_done() {
            return TaskStatus::Done;
        }
        let batch = self.throttle.observe(cx.host.load());
        let mut pending = Vec::new();
        {
            let world = match cx.host.world_mut(&self.dest.world) {
                Some(w) => w,
                None => {
                    log::error!("restore: world '{}' is not available", self.dest.world);
                    self.promise
                        .fail(VaultError::MissingWorld(self.dest.world.clone()));
                    return TaskStatus::Done;
                }
            };
            if !self.started {
                self.start(&*world);
            }
            for _ in 0..batch {
                if !self.step_one(world, &mut pending) {
                    break;
                }
                self.done += 1;
            }

            // немедленная попытка; неразрешённые уходят в отложенные задачи
            pending.retain(|r| !DeferredRef::try_resolve(r, &self.ids, world));
        }
        for r in pending {
            let task = DeferredRef::new(self.dest.world.clone(), r, self.ids.clone(), self.attempts);
            // отмена восстановления снимает и отложенные ссылки
            cx.run_guarded(1, 1, self.promise.token(), task);
        }

        log::debug!(
            "restore: batch={} progress {}/{}",
            batch,
            self.done,
            self.total
        );
        self.report_progress();

        if self.is_exhausted() {
            log::info!(
                "restore: {} done ({} objects mapped)",
                self.dest.world,
                self.ids.len()
            );
            self.promise.resolve(true);
            TaskStatus::Done
        } else {
            TaskStatus::Continue
        }
    }
}
