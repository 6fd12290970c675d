//! snapshot: модель снапшота острова и её tag-кодек.
//!
//! Типы:
//! - CellSnapshot: одна непустая клетка (+ слоты контейнера, aux-данные тайла,
//!   прикреплённые к клетке объекты);
//! - ObjectSnapshot: динамический объект с атрибутами и цепочками vehicle/passengers;
//! - IslandSnapshot: агрегат (клетки + только свободные объекты), неизменяем после захвата;
//! - PersistedSnapshotRecord: то, что лежит на диске под ключом (owner, timestamp).
//!
//! Инварианты проверяются конструкторами (`CellSnapshot::new`, `ObjectSnapshot::new`),
//! а при декодировании тем же кодом, так что битая запись не даёт "невозможный" снапшот.

pub mod geom;

pub use geom::{Location, Pos, Vec3, Volume, VolumeCursor};

use std::collections::BTreeMap;

use crate::codec::item::{items_from_tag, items_to_tag};
use crate::codec::{expect_compound, field_opt, field_or, CellState, FromTag, ItemStack, ToTag};
use crate::consts::{MAX_CHAIN_DEPTH, OPERATOR_KIND, SNAPSHOT_SCHEMA_VERSION};
use crate::error::{VaultError, VaultResult};
use crate::tag::{Compound, Tag};

/// Ключи, занятые выделенными полями ObjectSnapshot; в attributes не дублируются.
pub const RESERVED_OBJECT_KEYS: [&str; 5] = ["kind", "id", "pos", "passengers", "vehicle"];

// ---------------------- CellSnapshot ----------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CellSnapshot {
    pos: Pos,
    state: CellState,
    items: Option<BTreeMap<u16, ItemStack>>,
    aux: Option<Compound>,
    attached: Vec<ObjectSnapshot>,
}

impl CellSnapshot {
    /// Создать снимок клетки. Пустая клетка или позиция вне мира дают ошибку.
    pub fn new(pos: Pos, state: CellState) -> VaultResult<Self> {
        if state.is_empty() {
            return Err(VaultError::invalid(format!(
                "cell {pos} has the empty sentinel type"
            )));
        }
        if !pos.in_legal_range() {
            return Err(VaultError::invalid(format!(
                "cell {pos} is outside the legal coordinate range"
            )));
        }
        Ok(Self {
            pos,
            state,
            items: None,
            aux: None,
            attached: Vec::new(),
        })
    }

    pub fn with_items(mut self, items: BTreeMap<u16, ItemStack>) -> Self {
        self.items = Some(items);
        self
    }

    pub fn with_aux(mut self, aux: Compound) -> Self {
        self.aux = (!aux.is_empty()).then_some(aux);
        self
    }

    pub fn with_attached(mut self, attached: Vec<ObjectSnapshot>) -> Self {
        self.attached = attached;
        self
    }

    pub fn pos(&self) -> Pos {
        self.pos
    }

    pub fn state(&self) -> &CellState {
        &self.state
    }

    pub fn kind(&self) -> &str {
        &self.state.kind
    }

    pub fn items(&self) -> Option<&BTreeMap<u16, ItemStack>> {
        self.items.as_ref()
    }

    pub fn aux(&self) -> Option<&Compound> {
        self.aux.as_ref()
    }

    pub fn attached(&self) -> &[ObjectSnapshot] {
        &self.attached
    }
}

impl ToTag for CellSnapshot {
    fn to_tag(&self) -> Tag {
        let mut c = Compound::with_capacity(6);
        c.insert("pos", pos_to_tag(self.pos));
        c.insert("kind", Tag::Text(self.state.kind.clone()));
        if !self.state.state.is_empty() {
            c.insert("state", Tag::Text(self.state.state.clone()));
        }
        if let Some(items) = &self.items {
            c.insert("items", items_to_tag(items));
        }
        if let Some(aux) = &self.aux {
            c.insert("aux", Tag::Compound(aux.clone()));
        }
        if !self.attached.is_empty() {
            c.insert("attached", self.attached.to_tag());
        }
        Tag::Compound(c)
    }
}

impl FromTag for CellSnapshot {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        let c = expect_compound(tag, "cell snapshot")?;
        let pos = c
            .get("pos")
            .and_then(pos_from_tag)
            .ok_or_else(|| VaultError::format("cell snapshot without readable 'pos'"))?;
        let state = CellState::with_state(
            field_or(c, "kind", String::new()),
            field_or(c, "state", String::new()),
        );
        let mut cell = CellSnapshot::new(pos, state)?;
        cell.items = c.get("items").and_then(|t| items_from_tag(t).ok());
        cell.aux = c.get_compound("aux").cloned();
        cell.attached = field_or(c, "attached", Vec::new());
        Ok(cell)
    }
}

// ---------------------- ObjectSnapshot ----------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSnapshot {
    kind: String,
    capture_id: u64,
    position: Vec3,
    attributes: Compound,
    passengers: Vec<ObjectSnapshot>,
    vehicle: Option<Box<ObjectSnapshot>>,
}

impl ObjectSnapshot {
    /// Создать снимок объекта. Оператор не снимается; зарезервированные ключи
    /// вырезаются из атрибутов.
    pub fn new(
        kind: impl Into<String>,
        capture_id: u64,
        position: Vec3,
        mut attributes: Compound,
    ) -> VaultResult<Self> {
        let kind = kind.into();
        if kind == OPERATOR_KIND {
            return Err(VaultError::invalid("operator objects are never captured"));
        }
        if kind.is_empty() {
            return Err(VaultError::invalid("object without kind"));
        }
        for k in RESERVED_OBJECT_KEYS {
            attributes.remove(k);
        }
        Ok(Self {
            kind,
            capture_id,
            position,
            attributes,
            passengers: Vec::new(),
            vehicle: None,
        })
    }

    pub fn with_passengers(mut self, passengers: Vec<ObjectSnapshot>) -> Self {
        self.passengers = passengers;
        self
    }

    pub fn with_vehicle(mut self, vehicle: ObjectSnapshot) -> Self {
        self.vehicle = Some(Box::new(vehicle));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn capture_id(&self) -> u64 {
        self.capture_id
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn attributes(&self) -> &Compound {
        &self.attributes
    }

    pub fn passengers(&self) -> &[ObjectSnapshot] {
        &self.passengers
    }

    pub fn vehicle(&self) -> Option<&ObjectSnapshot> {
        self.vehicle.as_deref()
    }

    /// Число объектов в дереве (сам объект + пассажиры + vehicle рекурсивно).
    pub fn chain_len(&self) -> usize {
        1 + self.passengers.iter().map(|p| p.chain_len()).sum::<usize>()
            + self.vehicle.as_ref().map(|v| v.chain_len()).unwrap_or(0)
    }

    /// Копия дерева, сдвинутая на `d` (объект, пассажиры, vehicle).
    pub fn shifted(&self, d: Pos) -> Self {
        Self {
            kind: self.kind.clone(),
            capture_id: self.capture_id,
            position: self.position.shifted(d),
            attributes: self.attributes.clone(),
            passengers: self.passengers.iter().map(|p| p.shifted(d)).collect(),
            vehicle: self.vehicle.as_ref().map(|v| Box::new(v.shifted(d))),
        }
    }

    /// Заменить подстроку в текстовых атрибутах всего дерева.
    pub fn replace_text(&mut self, from: &str, to: &str) -> usize {
        let mut n: usize = self
            .attributes
            .values_mut()
            .map(|t| t.replace_text(from, to))
            .sum();
        for p in &mut self.passengers {
            n += p.replace_text(from, to);
        }
        if let Some(v) = self.vehicle.as_mut() {
            n += v.replace_text(from, to);
        }
        n
    }

    fn from_tag_depth(tag: &Tag, depth: usize) -> VaultResult<Self> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(VaultError::format("object chain nested too deeply"));
        }
        let c = expect_compound(tag, "object snapshot")?;
        let position = c
            .get("pos")
            .and_then(vec3_from_tag)
            .ok_or_else(|| VaultError::format("object snapshot without readable 'pos'"))?;
        let mut obj = ObjectSnapshot::new(
            field_or(c, "kind", String::new()),
            field_or(c, "id", 0u64),
            position,
            c.get_compound("attrs").cloned().unwrap_or_default(),
        )?;
        if let Some(list) = c.get_list("passengers") {
            for p in list {
                // битый пассажир не роняет весь объект
                match Self::from_tag_depth(p, depth + 1) {
                    Ok(o) => obj.passengers.push(o),
                    Err(e) => log::debug!("snapshot: passenger skipped ({})", e),
                }
            }
        }
        if let Some(v) = c.get("vehicle") {
            if !matches!(v, Tag::Null) {
                obj.vehicle = Self::from_tag_depth(v, depth + 1).ok().map(Box::new);
            }
        }
        Ok(obj)
    }
}

impl ToTag for ObjectSnapshot {
    fn to_tag(&self) -> Tag {
        let mut c = Compound::with_capacity(6);
        c.insert("kind", Tag::Text(self.kind.clone()));
        c.insert("id", self.capture_id.to_tag());
        c.insert("pos", vec3_to_tag(self.position));
        c.insert("attrs", Tag::Compound(self.attributes.clone()));
        if !self.passengers.is_empty() {
            c.insert("passengers", self.passengers.to_tag());
        }
        if let Some(v) = &self.vehicle {
            c.insert("vehicle", v.to_tag());
        }
        Tag::Compound(c)
    }
}

impl FromTag for ObjectSnapshot {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        Self::from_tag_depth(tag, 0)
    }
}

// ---------------------- IslandSnapshot ----------------------

/// Захваченный остров. Неизменяем: API только на чтение.
#[derive(Debug, Clone, PartialEq)]
pub struct IslandSnapshot {
    origin: Pos,
    size: (u32, u32, u32),
    cells: Vec<CellSnapshot>,
    objects: Vec<ObjectSnapshot>,
}

impl IslandSnapshot {
    pub fn new(
        origin: Pos,
        size: (u32, u32, u32),
        cells: Vec<CellSnapshot>,
        objects: Vec<ObjectSnapshot>,
    ) -> Self {
        Self {
            origin,
            size,
            cells,
            objects,
        }
    }

    pub fn origin(&self) -> Pos {
        self.origin
    }

    pub fn size(&self) -> (u32, u32, u32) {
        self.size
    }

    pub fn cells(&self) -> &[CellSnapshot] {
        &self.cells
    }

    /// Только свободные (не прикреплённые к клеткам) объекты.
    pub fn objects(&self) -> &[ObjectSnapshot] {
        &self.objects
    }

    /// Все прикреплённые объекты во всех клетках.
    pub fn attached_count(&self) -> usize {
        self.cells.iter().map(|c| c.attached().len()).sum()
    }

    /// Объём в исходном мире.
    pub fn volume(&self, world: &str) -> Volume {
        Volume::sized(world, self.origin, self.size)
    }

    /// Декодирование с учётом версии схемы. v1 не хранил origin/size,
    /// выводим их из позиций клеток.
    pub fn from_tag_versioned(tag: &Tag, schema: u16) -> VaultResult<Self> {
        let c = expect_compound(tag, "island snapshot")?;
        let cells: Vec<CellSnapshot> = field_or(c, "cells", Vec::new());
        let objects: Vec<ObjectSnapshot> = field_or(c, "objects", Vec::new());

        let bounds = || {
            let mut it = cells.iter().map(|c| c.pos());
            let first = it.next().unwrap_or_default();
            it.fold((first, first), |(lo, hi), p| {
                (
                    Pos::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z)),
                    Pos::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z)),
                )
            })
        };

        let (origin, size) = if schema >= 2 {
            let origin = c.get("origin").and_then(pos_from_tag);
            let size = c
                .get("size")
                .and_then(Tag::as_i64_vec)
                .filter(|v| v.len() == 3)
                .map(|v| (v[0].max(1) as u32, v[1].max(1) as u32, v[2].max(1) as u32));
            match (origin, size) {
                (Some(o), Some(s)) => (o, s),
                _ => {
                    let (lo, hi) = bounds();
                    (lo, Volume::new("", lo, hi).size())
                }
            }
        } else {
            let (lo, hi) = bounds();
            (lo, Volume::new("", lo, hi).size())
        };

        Ok(Self {
            origin,
            size,
            cells,
            objects,
        })
    }
}

impl ToTag for IslandSnapshot {
    fn to_tag(&self) -> Tag {
        let (w, h, l) = self.size;
        Tag::Compound(
            Compound::with_capacity(4)
                .with("origin", pos_to_tag(self.origin))
                .with("size", Tag::IntArray(vec![w as i32, h as i32, l as i32]))
                .with("cells", self.cells.to_tag())
                .with("objects", self.objects.to_tag()),
        )
    }
}

impl FromTag for IslandSnapshot {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        Self::from_tag_versioned(tag, SNAPSHOT_SCHEMA_VERSION)
    }
}

// ---------------------- PersistedSnapshotRecord ----------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedSnapshotRecord {
    pub owner: String,
    pub timestamp: u64,
    pub schema_version: u16,
    pub snapshot: IslandSnapshot,
}

impl PersistedSnapshotRecord {
    pub fn new(owner: impl Into<String>, timestamp: u64, snapshot: IslandSnapshot) -> Self {
        Self {
            owner: owner.into(),
            timestamp,
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            snapshot,
        }
    }
}

/// Tag-форма записи без владения снимком (сохранение не клонирует остров).
pub fn record_tag(owner: &str, timestamp: u64, schema: u16, snapshot: &IslandSnapshot) -> Tag {
    Tag::Compound(
        Compound::with_capacity(4)
            .with("schema", Tag::Int(schema as i32))
            .with("owner", Tag::Text(owner.to_string()))
            .with("timestamp", timestamp.to_tag())
            .with("snapshot", snapshot.to_tag()),
    )
}

impl ToTag for PersistedSnapshotRecord {
    fn to_tag(&self) -> Tag {
        record_tag(&self.owner, self.timestamp, self.schema_version, &self.snapshot)
    }
}

impl FromTag for PersistedSnapshotRecord {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        let c = expect_compound(tag, "snapshot record")?;
        // Запись без поля schema считается v1.
        let schema: u16 = field_or(c, "schema", 1u16);
        let snap_tag = c
            .get("snapshot")
            .ok_or_else(|| VaultError::format("record without 'snapshot'"))?;
        Ok(Self {
            owner: field_or(c, "owner", String::new()),
            timestamp: field_or(c, "timestamp", 0u64),
            schema_version: schema,
            snapshot: IslandSnapshot::from_tag_versioned(snap_tag, schema)?,
        })
    }
}

// ---------------------- helpers ----------------------

pub fn pos_to_tag(p: Pos) -> Tag {
    Tag::IntArray(vec![p.x, p.y, p.z])
}

pub fn pos_from_tag(t: &Tag) -> Option<Pos> {
    let v = t.as_i64_vec()?;
    if v.len() != 3 {
        return None;
    }
    let c = |x: i64| crate::tag::saturate_i32(x);
    Some(Pos::new(c(v[0]), c(v[1]), c(v[2])))
}

pub fn vec3_to_tag(v: Vec3) -> Tag {
    Tag::List(vec![Tag::Double(v.x), Tag::Double(v.y), Tag::Double(v.z)])
}

pub fn vec3_from_tag(t: &Tag) -> Option<Vec3> {
    let l = t.as_list()?;
    if l.len() != 3 {
        return None;
    }
    Some(Vec3::new(l[0].as_f64()?, l[1].as_f64()?, l[2].as_f64()?))
}

/// Прочитать опциональную ссылку на объект (capture id) из атрибутов.
pub fn attr_ref(attrs: &Compound, key: &str) -> Option<u64> {
    field_opt::<u64>(attrs, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    fn zombie(id: u64) -> ObjectSnapshot {
        ObjectSnapshot::new(
            "zombie",
            id,
            Vec3::new(1.5, 64.0, 2.5),
            Compound::new()
                .with("health", Tag::Float(20.0))
                .with("pos", Tag::Int(1)),
        )
        .unwrap()
    }

    #[test]
    fn cell_invariants() {
        assert!(CellSnapshot::new(Pos::new(0, 0, 0), CellState::new("air")).is_err());
        assert!(CellSnapshot::new(Pos::new(0, 9999, 0), CellState::new("stone")).is_err());
        assert!(CellSnapshot::new(Pos::new(0, 0, 0), CellState::new("stone")).is_ok());
    }

    #[test]
    fn object_invariants() {
        assert!(ObjectSnapshot::new("player", 1, Vec3::default(), Compound::new()).is_err());
        // зарезервированный ключ вырезан
        assert!(!zombie(1).attributes().contains_key("pos"));
    }

    #[test]
    fn island_roundtrip_with_chains_and_attachments() {
        let frame = ObjectSnapshot::new("item_frame", 9, Vec3::new(0.5, 1.0, 0.5), Compound::new())
            .unwrap();
        let cell = CellSnapshot::new(Pos::new(0, 1, 0), CellState::with_state("chest", "facing=east"))
            .unwrap()
            .with_items(BTreeMap::from([(3u16, ItemStack::new("apple", 5))]))
            .with_aux(Compound::new().with("lock", Tag::Text("k".into())))
            .with_attached(vec![frame]);
        let horse = ObjectSnapshot::new("horse", 2, Vec3::new(3.0, 1.0, 3.0), Compound::new())
            .unwrap()
            .with_passengers(vec![zombie(3)]);
        let island = IslandSnapshot::new(Pos::new(0, 0, 0), (4, 4, 4), vec![cell], vec![horse]);

        let back: IslandSnapshot = decode(&encode(&island)).unwrap();
        assert_eq!(back, island);
        assert_eq!(back.objects()[0].chain_len(), 2);
    }

    #[test]
    fn v1_island_derives_origin_from_cells() {
        let cells = vec![
            CellSnapshot::new(Pos::new(5, 1, 5), CellState::new("stone")).unwrap(),
            CellSnapshot::new(Pos::new(7, 3, 6), CellState::new("dirt")).unwrap(),
        ];
        let tag = Tag::Compound(Compound::new().with("cells", cells.to_tag()));
        let island = IslandSnapshot::from_tag_versioned(&tag, 1).unwrap();
        assert_eq!(island.origin(), Pos::new(5, 1, 5));
        assert_eq!(island.size(), (3, 3, 2));
    }
}
