//! In-memory world and host.
//!
//! Complete implementation of the `World`/`Host` seams backed by hash maps.
//! Used by the test-suite and the CLI; also a reference for host adapters.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{Cue, Host, LiveObject, ObjectId, World};
use crate::codec::{CellState, ItemStack};
use crate::consts::TARGET_TPS;
use crate::error::{VaultError, VaultResult};
use crate::snapshot::{Pos, Vec3, Volume};
use crate::tag::{Compound, Tag};

#[derive(Debug, Default)]
pub struct MemoryWorld {
    name: String,
    cells: HashMap<Pos, CellState>,
    tiles: HashMap<Pos, Compound>,
    items: HashMap<Pos, BTreeMap<u16, ItemStack>>,
    objects: BTreeMap<ObjectId, LiveObject>,
    next_id: u64,
    failing_cells: HashSet<Pos>,
    writes: u64,
}

impl MemoryWorld {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: 1,
            ..Default::default()
        }
    }

    /// Start live ids at `first` (restore tests want ids that differ from capture ids).
    pub fn with_id_base(mut self, first: u64) -> Self {
        self.next_id = first.max(1);
        self
    }

    /// Put a cell directly (test/world-building helper).
    pub fn put(&mut self, pos: Pos, kind: &str) {
        self.cells.insert(pos, CellState::new(kind));
    }

    /// Insert an object and return its live id.
    pub fn add_object(&mut self, kind: &str, position: Vec3, attributes: Compound) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.insert(
            id,
            LiveObject {
                id,
                kind: kind.to_string(),
                position,
                attributes,
                vehicle: None,
                passengers: Vec::new(),
            },
        );
        id
    }

    /// Make every write to `pos` fail (simulates a broken tile).
    pub fn fail_writes_at(&mut self, pos: Pos) {
        self.failing_cells.insert(pos);
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn objects(&self) -> impl Iterator<Item = &LiveObject> {
        self.objects.values()
    }

    pub fn cells(&self) -> impl Iterator<Item = (&Pos, &CellState)> {
        self.cells.iter()
    }

    /// Number of world mutations performed so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    fn obj_mut(&mut self, id: ObjectId) -> VaultResult<&mut LiveObject> {
        self.objects
            .get_mut(&id)
            .ok_or_else(|| VaultError::invalid(format!("no object {}", id.0)))
    }

    fn check_writable(&self, pos: Pos) -> VaultResult<()> {
        if self.failing_cells.contains(&pos) {
            return Err(VaultError::invalid(format!("cell {pos} rejects writes")));
        }
        Ok(())
    }
}

impl World for MemoryWorld {
    fn name(&self) -> &str {
        &self.name
    }

    fn cell(&self, pos: Pos) -> Option<CellState> {
        self.cells.get(&pos).filter(|c| !c.is_empty()).cloned()
    }

    fn set_cell(&mut self, pos: Pos, state: Option<&CellState>) -> VaultResult<()> {
        self.check_writable(pos)?;
        self.writes += 1;
        match state {
            Some(s) if !s.is_empty() => {
                self.cells.insert(pos, s.clone());
            }
            _ => {
                self.cells.remove(&pos);
                self.tiles.remove(&pos);
                self.items.remove(&pos);
            }
        }
        Ok(())
    }

    fn tile_data(&self, pos: Pos) -> Option<Compound> {
        self.tiles.get(&pos).cloned()
    }

    fn set_tile_data(&mut self, pos: Pos, data: &Compound) -> VaultResult<()> {
        self.check_writable(pos)?;
        if !self.cells.contains_key(&pos) {
            return Err(VaultError::invalid(format!("no tile at {pos}")));
        }
        self.writes += 1;
        self.tiles.insert(pos, data.clone());
        Ok(())
    }

    fn container_items(&self, pos: Pos) -> Option<BTreeMap<u16, ItemStack>> {
        self.items.get(&pos).cloned()
    }

    fn set_container_items(
        &mut self,
        pos: Pos,
        items: &BTreeMap<u16, ItemStack>,
    ) -> VaultResult<()> {
        self.check_writable(pos)?;
        if !self.cells.contains_key(&pos) {
            return Err(VaultError::invalid(format!("no container at {pos}")));
        }
        self.writes += 1;
        self.items.insert(pos, items.clone());
        Ok(())
    }

    fn objects_in(&self, volume: &Volume) -> Vec<ObjectId> {
        self.objects
            .values()
            .filter(|o| volume.contains_point(&o.position))
            .map(|o| o.id)
            .collect()
    }

    fn object(&self, id: ObjectId) -> Option<LiveObject> {
        self.objects.get(&id).cloned()
    }

    fn spawn_object(&mut self, kind: &str, position: Vec3) -> VaultResult<ObjectId> {
        if kind.is_empty() {
            return Err(VaultError::invalid("cannot spawn object without kind"));
        }
        self.check_writable(position.cell())?;
        self.writes += 1;
        Ok(self.add_object(kind, position, Compound::new()))
    }

    fn set_object_attribute(&mut self, id: ObjectId, key: &str, value: Tag) -> VaultResult<()> {
        self.writes += 1;
        self.obj_mut(id)?.attributes.insert(key, value);
        Ok(())
    }

    fn mount(&mut self, vehicle: ObjectId, passenger: ObjectId) -> VaultResult<()> {
        if vehicle == passenger {
            return Err(VaultError::invalid("object cannot ride itself"));
        }
        if !self.objects.contains_key(&passenger) {
            return Err(VaultError::invalid(format!("no object {}", passenger.0)));
        }
        self.writes += 1;
        self.obj_mut(vehicle)?.passengers.push(passenger);
        self.obj_mut(passenger)?.vehicle = Some(vehicle);
        Ok(())
    }

    fn remove_object(&mut self, id: ObjectId) -> VaultResult<()> {
        let obj = self
            .objects
            .remove(&id)
            .ok_or_else(|| VaultError::invalid(format!("no object {}", id.0)))?;
        self.writes += 1;
        for p in obj.passengers {
            if let Some(o) = self.objects.get_mut(&p) {
                o.vehicle = None;
            }
        }
        if let Some(v) = obj.vehicle.and_then(|v| self.objects.get_mut(&v)) {
            v.passengers.retain(|p| *p != id);
        }
        Ok(())
    }
}

/// Host with any number of in-memory worlds, a settable load metric and a cue log.
#[derive(Debug)]
pub struct MemoryHost {
    worlds: HashMap<String, MemoryWorld>,
    load: f64,
    cues: Vec<Cue>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self {
            worlds: HashMap::new(),
            load: TARGET_TPS,
            cues: Vec::new(),
        }
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_world(mut self, world: MemoryWorld) -> Self {
        self.add_world(world);
        self
    }

    pub fn add_world(&mut self, world: MemoryWorld) {
        self.worlds.insert(world.name.clone(), world);
    }

    pub fn remove_world(&mut self, name: &str) -> Option<MemoryWorld> {
        self.worlds.remove(name)
    }

    pub fn world(&self, name: &str) -> Option<&MemoryWorld> {
        self.worlds.get(name)
    }

    pub fn memory_world_mut(&mut self, name: &str) -> Option<&mut MemoryWorld> {
        self.worlds.get_mut(name)
    }

    pub fn set_load(&mut self, tps: f64) {
        self.load = tps;
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }
}

impl Host for MemoryHost {
    fn world_mut(&mut self, name: &str) -> Option<&mut dyn World> {
        self.worlds.get_mut(name).map(|w| w as &mut dyn World)
    }

    fn load(&self) -> f64 {
        self.load
    }

    fn emit_cue(&mut self, cue: Cue) {
        self.cues.push(cue);
    }
}
