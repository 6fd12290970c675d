//! CapturePipeline: volume → IslandSnapshot across scheduler ticks.
//!
//! Шаг 1 (один такт, без батчинга): все объекты объёма перечисляются разом и
//! классифицируются через реестр. Прикреплённые получают якорную клетку один
//! раз; пассажиры, чей транспорт внутри объёма, вкладываются в транспорт.
//! Шаги 2..: курсор обходит `cells_per_tick` координат за такт.
//! Захват только читает мир.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::VaultConfig;
use crate::consts::{MAX_CHAIN_DEPTH, OPERATOR_KIND};
use crate::error::VaultError;
use crate::metrics;
use crate::registry::VariantRegistry;
use crate::sched::{Promise, Scheduler, Task, TaskStatus, TickContext};
use crate::snapshot::{CellSnapshot, IslandSnapshot, ObjectSnapshot, Pos, Volume, VolumeCursor};
use crate::world::{LiveObject, ObjectId, World};

#[derive(Clone, Debug)]
pub struct CapturePipeline {
    registry: Arc<VariantRegistry>,
    cells_per_tick: usize,
}

impl CapturePipeline {
    pub fn new(registry: Arc<VariantRegistry>, cfg: &VaultConfig) -> Self {
        Self {
            registry,
            cells_per_tick: cfg.capture_cells_per_tick.max(1),
        }
    }

    /// Запланировать захват; первый шаг выполнится в следующем такте.
    pub fn begin(&self, sched: &mut Scheduler, volume: Volume) -> Promise<IslandSnapshot> {
        let promise = Promise::new();
        let job = CaptureJob::new(volume, self.registry.clone(), self.cells_per_tick, promise.clone());
        sched.run_guarded(1, 1, promise.token(), job);
        promise
    }
}

enum Phase {
    Objects,
    Cells,
}

/// Resumable capture state.
pub struct CaptureJob {
    volume: Volume,
    registry: Arc<VariantRegistry>,
    cells_per_tick: usize,
    promise: Promise<IslandSnapshot>,
    phase: Phase,
    cursor: VolumeCursor,
    attached: HashMap<Pos, Vec<ObjectSnapshot>>,
    free: Vec<ObjectSnapshot>,
    cells: Vec<CellSnapshot>,
}

impl CaptureJob {
    fn new(
        volume: Volume,
        registry: Arc<VariantRegistry>,
        cells_per_tick: usize,
        promise: Promise<IslandSnapshot>,
    ) -> Self {
        let cursor = volume.cursor();
        Self {
            volume,
            registry,
            cells_per_tick,
            promise,
            phase: Phase::Objects,
            cursor,
            attached: HashMap::new(),
            free: Vec::new(),
            cells: Vec::new(),
        }
    }

    fn enumerate_objects(&mut self, world: &dyn World) {
        let live: HashMap<ObjectId, LiveObject> = world
            .objects_in(&self.volume)
            .into_iter()
            .filter_map(|id| world.object(id))
            .filter(|o| o.kind != OPERATOR_KIND)
            .map(|o| (o.id, o))
            .collect();

        // стабильный порядок корней
        let mut ids: Vec<ObjectId> = live.keys().copied().collect();
        ids.sort();

        let mut n_attached = 0usize;
        for id in ids {
            let obj = &live[&id];
            if obj.vehicle.map(|v| live.contains_key(&v)).unwrap_or(false) {
                // будет вложен в свой транспорт
                continue;
            }
            let mut visiting = HashSet::new();
            let mut snap = match self.object_tree(world, &live, obj, 0, &mut visiting) {
                Some(s) => s,
                None => continue,
            };
            if let Some(vid) = obj.vehicle {
                if let Some(v) = self.vehicle_chain(world, vid, 0) {
                    snap = snap.with_vehicle(v);
                }
            }
            let anchor = if self.registry.is_attached(obj) {
                self.anchor_of(world, obj)
            } else {
                None
            };
            match anchor {
                Some(pos) => {
                    n_attached += 1;
                    self.attached.entry(pos).or_default().push(snap);
                }
                None => self.free.push(snap),
            }
        }
        metrics::record_objects_captured(live.len());
        log::debug!(
            "capture: {} objects in {:?} ({} attached, {} free roots)",
            live.len(),
            self.volume.world,
            n_attached,
            self.free.len()
        );
    }

    /// Клетка самого объекта, если непуста, иначе первый непустой сосед по грани
    /// внутри объёма.
    fn anchor_of(&self, world: &dyn World, obj: &LiveObject) -> Option<Pos> {
        let own = obj.position.cell();
        std::iter::once(own)
            .chain(own.face_neighbours())
            .find(|p| self.volume.contains(*p) && world.cell(*p).is_some())
    }

    fn object_tree(
        &self,
        world: &dyn World,
        live: &HashMap<ObjectId, LiveObject>,
        obj: &LiveObject,
        depth: usize,
        visiting: &mut HashSet<ObjectId>,
    ) -> Option<ObjectSnapshot> {
        if depth > MAX_CHAIN_DEPTH || !visiting.insert(obj.id) {
            log::warn!("capture: object chain at {} too deep or cyclic", obj.id.0);
            return None;
        }
        let attrs = self.registry.capture_attributes(&obj.kind, &obj.attributes);
        let snap = match ObjectSnapshot::new(obj.kind.clone(), obj.id.0, obj.position, attrs) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("capture: object {} skipped: {}", obj.id.0, e);
                metrics::record_unit_failure();
                return None;
            }
        };
        let passengers: Vec<ObjectSnapshot> = obj
            .passengers
            .iter()
            .filter_map(|p| live.get(p))
            .filter_map(|p| self.object_tree(world, live, p, depth + 1, visiting))
            .collect();
        Some(snap.with_passengers(passengers))
    }

    /// Транспорт вне объёма: сохраняется цепочка транспортов без их пассажиров.
    fn vehicle_chain(&self, world: &dyn World, id: ObjectId, depth: usize) -> Option<ObjectSnapshot> {
        if depth > MAX_CHAIN_DEPTH {
            return None;
        }
        let v = world.object(id)?;
        if v.kind == OPERATOR_KIND {
            return None;
        }
        let attrs = self.registry.capture_attributes(&v.kind, &v.attributes);
        let mut snap = ObjectSnapshot::new(v.kind.clone(), v.id.0, v.position, attrs).ok()?;
        if let Some(up) = v.vehicle.and_then(|u| self.vehicle_chain(world, u, depth + 1)) {
            snap = snap.with_vehicle(up);
        }
        Some(snap)
    }

    fn capture_cell(&mut self, world: &dyn World, pos: Pos) {
        let state = match world.cell(pos) {
            Some(s) => s,
            None => return,
        };
        let mut cell = match CellSnapshot::new(pos, state) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("capture: cell {} skipped: {}", pos, e);
                metrics::record_unit_failure();
                return;
            }
        };
        if let Some(items) = world.container_items(pos) {
            cell = cell.with_items(items);
        }
        if let Some(aux) = world.tile_data(pos) {
            cell = cell.with_aux(aux);
        }
        if let Some(att) = self.attached.remove(&pos) {
            cell = cell.with_attached(att);
        }
        metrics::record_cell_captured();
        self.cells.push(cell);
    }

    fn finish(&mut self) {
        // якорь мог опустеть между тактами: такие объекты становятся свободными
        let mut orphans: Vec<(Pos, Vec<ObjectSnapshot>)> = self.attached.drain().collect();
        orphans.sort_by_key(|(p, _)| *p);
        for (pos, objs) in orphans {
            log::debug!("capture: anchor {} emptied, {} objects freed", pos, objs.len());
            self.free.extend(objs);
        }
        let snap = IslandSnapshot::new(
            self.volume.min,
            self.volume.size(),
            std::mem::take(&mut self.cells),
            std::mem::take(&mut self.free),
        );
        log::info!(
            "capture: {} done ({} cells, {} free objects, {} attached)",
            self.volume.world,
            snap.cells().len(),
            snap.objects().len(),
            snap.attached_count()
        );
        self.promise.resolve(snap);
    }
}

impl Task for CaptureJob {
    fn run(&mut self, cx: &mut TickContext<'_>) -> TaskStatus {
        if self.promise.is_done() {
            return TaskStatus::Done;
        }
        let world = match cx.host.world_mut(&self.volume.world) {
            Some(w) => w,
            None => {
                log::error!("capture: world '{}' is not available", self.volume.world);
                self.promise
                    .fail(VaultError::MissingWorld(self.volume.world.clone()));
                return TaskStatus::Done;
            }
        };
        match self.phase {
            Phase::Objects => {
                self.enumerate_objects(&*world);
                self.phase = Phase::Cells;
                TaskStatus::Continue
            }
            Phase::Cells => {
                for _ in 0..self.cells_per_tick {
                    match self.cursor.next() {
                        Some(pos) => self.capture_cell(&*world, pos),
                        None => break,
                    }
                }
                if self.cursor.is_done() {
                    self.finish();
                    TaskStatus::Done
                } else {
                    TaskStatus::Continue
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{Compound, Tag};
    use crate::world::{MemoryHost, MemoryWorld};
    use crate::snapshot::Vec3;

    #[test]
    fn passengers_nest_under_vehicle_in_volume() {
        let mut w = MemoryWorld::new("w");
        w.put(Pos::new(0, 0, 0), "stone");
        let boat = w.add_object("boat", Vec3::new(0.5, 1.0, 0.5), Compound::new());
        let rider = w.add_object("zombie", Vec3::new(0.5, 1.2, 0.5), Compound::new());
        w.mount(boat, rider).unwrap();
        let op = w.add_object("player", Vec3::new(1.5, 1.0, 1.5), Compound::new());
        let _ = op;
        let mut host = MemoryHost::new().with_world(w);
        let mut sched = Scheduler::new();
        let cap = CapturePipeline::new(Arc::new(VariantRegistry::modern()), &VaultConfig::default());
        let p = cap.begin(&mut sched, Volume::new("w", Pos::new(0, 0, 0), Pos::new(2, 2, 2)));
        sched.run_until_idle(&mut host, 100);
        let snap = p.outcome().unwrap().unwrap();
        assert_eq!(snap.objects().len(), 1);
        assert_eq!(snap.objects()[0].kind(), "boat");
        assert_eq!(snap.objects()[0].passengers().len(), 1);
    }

    #[test]
    fn attached_kind_without_anchor_is_free() {
        let mut w = MemoryWorld::new("w");
        w.add_object("item_frame", Vec3::new(1.5, 1.5, 1.5), Compound::new());
        w.add_object(
            "armor_stand",
            Vec3::new(0.5, 0.0, 0.5),
            Compound::new().with("small", Tag::Bool(true)),
        );
        let mut host = MemoryHost::new().with_world(w);
        let mut sched = Scheduler::new();
        let cap = CapturePipeline::new(Arc::new(VariantRegistry::modern()), &VaultConfig::default());
        let p = cap.begin(&mut sched, Volume::new("w", Pos::new(0, 0, 0), Pos::new(2, 2, 2)));
        sched.run_until_idle(&mut host, 100);
        let snap = p.outcome().unwrap().unwrap();
        assert!(snap.cells().is_empty());
        assert_eq!(snap.objects().len(), 2);
    }

    #[test]
    fn missing_world_fails() {
        let mut host = MemoryHost::new();
        let mut sched = Scheduler::new();
        let cap = CapturePipeline::new(Arc::new(VariantRegistry::modern()), &VaultConfig::default());
        let p = cap.begin(&mut sched, Volume::new("nowhere", Pos::new(0, 0, 0), Pos::new(1, 1, 1)));
        sched.run_until_idle(&mut host, 10);
        assert_eq!(
            p.outcome(),
            Some(Err(VaultError::MissingWorld("nowhere".into())))
        );
    }
}
