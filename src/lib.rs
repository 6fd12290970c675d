#![allow(non_snake_case)]

// Базовые модули
pub mod consts;
pub mod error;
pub mod metrics;
pub mod config;

// Данные: дерево тегов, кодеки, модель снимков
pub mod tag;      // src/tag/{mod,binary,json}.rs
pub mod codec;    // src/codec/{mod,item}.rs
pub mod snapshot; // src/snapshot/{mod,geom}.rs

// Хост: мир, возможности, эталонная in-memory реализация
pub mod world;    // src/world/{mod,capability,memory}.rs
pub mod registry; // src/registry/mod.rs

// Исполнение: тиковый планировщик, промисы
pub mod sched;    // src/sched/{mod,promise}.rs

// Пайплайны
pub mod capture;  // src/capture/mod.rs
pub mod restore;  // src/restore/{mod,throttle,refs}.rs
pub mod store;    // src/store/{mod,record,disk,lock,cooldown,pool}.rs
pub mod paste;    // src/paste/{mod,clipboard,reveal}.rs

// Удобные реэкспорты
pub use capture::CapturePipeline;
pub use config::{RecordCodec, VaultBuilder, VaultConfig};
pub use error::{VaultError, VaultResult};
pub use paste::{
    Clipboard, ClipboardSource, PasteEngine, PasteHandle, PasteMode, PasteRequest, PasteState,
};
pub use registry::VariantRegistry;
pub use restore::RestorePipeline;
pub use sched::{Promise, Scheduler, Task, TaskStatus, TickContext};
pub use snapshot::{
    CellSnapshot, IslandSnapshot, Location, ObjectSnapshot, PersistedSnapshotRecord, Pos, Vec3,
    Volume,
};
pub use store::{ManualClock, PersistenceManager, RecordStore, SystemClock};
pub use tag::{Compound, Tag};
pub use world::{Cue, Host, MemoryHost, MemoryWorld, World};
