//! Capture-id → live-id table and deferred reference resolution.
//!
//! Ссылки между объектами (поводок, цель агрессии, призыватель/владелец)
//! хранятся в снимке как capture id. При восстановлении таблица заполняется
//! по мере спавна; ссылка, которую нельзя разрешить сразу, становится задачей
//! `DeferredRef` с ограниченным числом попыток (раз в такт).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::metrics;
use crate::registry::{PendingRef, VariantRegistry};
use crate::sched::{Task, TaskStatus, TickContext};
use crate::world::{ObjectId, World};

#[derive(Debug, Default)]
struct Table {
    live: HashMap<u64, ObjectId>,
    spawned: HashSet<ObjectId>,
    expected: HashSet<u64>,
}

/// Shared incremental lookup table for one restore run.
#[derive(Debug, Clone, Default)]
pub struct IdTable(Arc<Mutex<Table>>);

impl IdTable {
    /// `expected`: все capture id, присутствующие в снимке.
    pub fn new(expected: impl IntoIterator<Item = u64>) -> Self {
        let t = Table {
            expected: expected.into_iter().collect(),
            ..Default::default()
        };
        Self(Arc::new(Mutex::new(t)))
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, capture_id: u64, live: ObjectId) {
        let mut t = self.lock();
        t.live.insert(capture_id, live);
        t.spawned.insert(live);
    }

    pub fn get(&self, capture_id: u64) -> Option<ObjectId> {
        self.lock().live.get(&capture_id).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Разрешить ссылку: сначала по таблице; если цель не из снимка и в мире
    /// жив объект с тем же идентификатором (и это не свежезаспавненный объект),
    /// ссылка указывает на него.
    pub fn resolve(&self, target: u64, world: &dyn World) -> Option<ObjectId> {
        let t = self.lock();
        if let Some(id) = t.live.get(&target) {
            return Some(*id);
        }
        let candidate = ObjectId(target);
        if t.expected.contains(&target) || t.spawned.contains(&candidate) {
            return None;
        }
        drop(t);
        world.object(candidate).map(|o| o.id)
    }
}

/// Bounded-retry resolution of one reference attribute.
pub struct DeferredRef {
    world: String,
    pending: PendingRef,
    ids: IdTable,
    attempts_left: u32,
}

impl DeferredRef {
    pub fn new(world: impl Into<String>, pending: PendingRef, ids: IdTable, attempts: u32) -> Self {
        Self {
            world: world.into(),
            pending,
            ids,
            attempts_left: attempts.max(1),
        }
    }

    /// Одна попытка. `true`, если ссылка записана.
    pub fn try_resolve(pending: &PendingRef, ids: &IdTable, world: &mut dyn World) -> bool {
        let live = match ids.resolve(pending.target, &*world) {
            Some(id) => id,
            None => return false,
        };
        match VariantRegistry::write_ref(world, pending, live) {
            Ok(()) => {
                metrics::record_deferred_resolved();
                true
            }
            Err(e) => {
                log::debug!(
                    "restore: ref {} -> {} not written yet: {}",
                    pending.key,
                    pending.target,
                    e
                );
                false
            }
        }
    }
}

impl Task for DeferredRef {
    fn run(&mut self, cx: &mut TickContext<'_>) -> TaskStatus {
        let world = match cx.host.world_mut(&self.world) {
            Some(w) => w,
            None => {
                log::warn!("restore: world '{}' gone, reference dropped", self.world);
                metrics::record_deferred_abandoned();
                return TaskStatus::Done;
            }
        };
        if world.object(self.pending.subject).is_none() {
            // субъект исчез, ссылаться некому
            return TaskStatus::Done;
        }
        if Self::try_resolve(&self.pending, &self.ids, world) {
            return TaskStatus::Done;
        }
        self.attempts_left -= 1;
        if self.attempts_left == 0 {
            log::warn!(
                "restore: reference {}={} of object {} abandoned",
                self.pending.key,
                self.pending.target,
                self.pending.subject.0
            );
            metrics::record_deferred_abandoned();
            return TaskStatus::Done;
        }
        TaskStatus::Continue
    }

    fn cancelled(&mut self, _cx: &mut TickContext<'_>) {
        log::debug!(
            "restore: reference {}={} dropped with its restore",
            self.pending.key,
            self.pending.target
        );
        metrics::record_deferred_abandoned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::Scheduler;
    use crate::snapshot::Vec3;
    use crate::tag::Compound;
    use crate::world::{MemoryHost, MemoryWorld};

    #[test]
    fn gives_up_after_budget() {
        let mut w = MemoryWorld::new("w");
        let wolf = w.add_object("wolf", Vec3::default(), Compound::new());
        let mut host = MemoryHost::new().with_world(w);
        let mut sched = Scheduler::new();
        let ids = IdTable::new([42]);
        let pending = PendingRef {
            subject: wolf,
            key: "owner".into(),
            target: 42,
        };
        let id = sched.run_repeating(1, 1, DeferredRef::new("w", pending, ids, 5));
        for _ in 0..4 {
            sched.tick(&mut host);
        }
        assert!(sched.is_active(id));
        sched.tick(&mut host);
        assert!(!sched.is_active(id));
        let obj = host.world("w").unwrap().object(wolf).unwrap();
        assert!(!obj.attributes.contains_key("owner"));
    }

    #[test]
    fn resolves_once_referent_registers() {
        let mut w = MemoryWorld::new("w");
        let wolf = w.add_object("wolf", Vec3::default(), Compound::new());
        let owner = w.add_object("villager", Vec3::default(), Compound::new());
        let mut host = MemoryHost::new().with_world(w);
        let mut sched = Scheduler::new();
        let ids = IdTable::new([7]);
        let pending = PendingRef {
            subject: wolf,
            key: "owner".into(),
            target: 7,
        };
        sched.run_repeating(1, 1, DeferredRef::new("w", pending, ids.clone(), 100));
        sched.tick(&mut host);
        ids.insert(7, owner);
        sched.run_until_idle(&mut host, 10);
        let obj = host.world("w").unwrap().object(wolf).unwrap();
        assert_eq!(obj.attributes.get_i64("owner"), Some(owner.0 as i64));
    }

    #[test]
    fn falls_back_to_live_object_outside_snapshot() {
        let mut w = MemoryWorld::new("w");
        let post = w.add_object("leash_knot", Vec3::default(), Compound::new());
        let ids = IdTable::new([1000]);
        assert_eq!(ids.resolve(post.0, &w), Some(post));
        // цель из снимка не подменяется посторонним объектом
        let ids = IdTable::new([post.0]);
        assert_eq!(ids.resolve(post.0, &w), None);
    }
}
