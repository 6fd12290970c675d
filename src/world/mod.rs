//! Host abstractions: the world accessors and the host capabilities the
//! pipelines depend on. Nothing here knows about a concrete host version.

pub mod capability;
pub mod memory;

pub use capability::{CapabilityProvider, LegacyCapabilities, ModernCapabilities};
pub use memory::{MemoryHost, MemoryWorld};

use std::collections::BTreeMap;

use crate::codec::{CellState, ItemStack};
use crate::consts::TARGET_TPS;
use crate::error::VaultResult;
use crate::snapshot::{Pos, Vec3, Volume};
use crate::tag::{Compound, Tag};

/// Live identifier of a dynamic object in a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// Read view of a live object.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveObject {
    pub id: ObjectId,
    pub kind: String,
    pub position: Vec3,
    pub attributes: Compound,
    pub vehicle: Option<ObjectId>,
    pub passengers: Vec<ObjectId>,
}

/// World accessors supplied by the host. Only the tick thread calls these.
pub trait World {
    fn name(&self) -> &str;

    /// `None` for an empty cell.
    fn cell(&self, pos: Pos) -> Option<CellState>;
    /// `None` clears the cell (also drops its tile data and items).
    fn set_cell(&mut self, pos: Pos, state: Option<&CellState>) -> VaultResult<()>;

    fn tile_data(&self, pos: Pos) -> Option<Compound>;
    fn set_tile_data(&mut self, pos: Pos, data: &Compound) -> VaultResult<()>;

    fn container_items(&self, pos: Pos) -> Option<BTreeMap<u16, ItemStack>>;
    fn set_container_items(&mut self, pos: Pos, items: &BTreeMap<u16, ItemStack>)
        -> VaultResult<()>;

    /// Objects whose position lies inside `volume`.
    fn objects_in(&self, volume: &Volume) -> Vec<ObjectId>;
    fn object(&self, id: ObjectId) -> Option<LiveObject>;
    fn spawn_object(&mut self, kind: &str, position: Vec3) -> VaultResult<ObjectId>;
    fn set_object_attribute(&mut self, id: ObjectId, key: &str, value: Tag) -> VaultResult<()>;
    fn mount(&mut self, vehicle: ObjectId, passenger: ObjectId) -> VaultResult<()>;
    fn remove_object(&mut self, id: ObjectId) -> VaultResult<()>;

    fn is_solid(&self, pos: Pos) -> bool {
        self.cell(pos).map(|c| !c.is_empty()).unwrap_or(false)
    }
}

/// Transient visual/audio cue emitted while pasting.
#[derive(Debug, Clone, PartialEq)]
pub enum Cue {
    CellPlaced { world: String, pos: Pos, kind: String },
    RevealStage { world: String, stage: usize, total: usize, y: i32 },
    Finale { world: String, pos: Vec3 },
}

/// The host platform as seen by the pipelines.
pub trait Host {
    fn world_mut(&mut self, name: &str) -> Option<&mut dyn World>;

    /// Recent throughput in ticks per second.
    fn load(&self) -> f64 {
        TARGET_TPS
    }

    fn emit_cue(&mut self, _cue: Cue) {}
}
