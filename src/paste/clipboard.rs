//! Clipboard: a relocatable template of cells and objects for pasting.
//!
//! Смещения клеток и позиции объектов хранятся относительно минимального угла
//! шаблона; `anchor` при вставке задаёт, куда ляжет этот угол.
//!
//! Байтовая форма (TagClipboardLoader) использует тот же tag-формат, что и у записей,
//! опционально в gzip:
//! {
//!   "size":    IntArray[w, h, l],
//!   "cells":   List[{ "off": IntArray[3], "kind", "state"?, "aux"?, "items"? }],
//!   "objects": List[ObjectSnapshot с относительными позициями],
//!   "output"?: IntArray[3],
//!   "marker"?: IntArray[3]
//! }

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::codec::{
    decode_bytes, encode_bytes, expect_compound, field_or, items_from_tag, items_to_tag, CellState,
    FromTag, ItemStack, ToTag,
};
use crate::error::{VaultError, VaultResult};
use crate::snapshot::{pos_from_tag, pos_to_tag, IslandSnapshot, ObjectSnapshot, Pos};
use crate::tag::{Compound, Tag};
use crate::world::{ObjectId, World};

/// One templated cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipCell {
    pub offset: Pos,
    pub state: CellState,
    pub aux: Option<Compound>,
    pub items: Option<BTreeMap<u16, ItemStack>>,
}

impl ClipCell {
    pub fn new(offset: Pos, state: CellState) -> Self {
        Self {
            offset,
            state,
            aux: None,
            items: None,
        }
    }

    /// Поставить клетку в мир по якорю. Ошибка мира пробрасывается вызывающему.
    pub fn place(&self, world: &mut dyn World, anchor: Pos) -> VaultResult<Pos> {
        let pos = anchor.add(self.offset);
        world.set_cell(pos, Some(&self.state))?;
        if let Some(aux) = &self.aux {
            world.set_tile_data(pos, aux)?;
        }
        if let Some(items) = &self.items {
            world.set_container_items(pos, items)?;
        }
        Ok(pos)
    }
}

/// Totals written by `apply_all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub cells: usize,
    pub objects: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clipboard {
    size: (u32, u32, u32),
    cells: Vec<ClipCell>,
    objects: Vec<ObjectSnapshot>,
    output: Option<Pos>,
    marker_anchor: Option<Pos>,
}

impl Clipboard {
    pub fn new(size: (u32, u32, u32)) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Пустые клетки (воздух) не хранятся: их нечего ставить.
    pub fn push_cell(&mut self, cell: ClipCell) {
        if cell.state.is_empty() {
            return;
        }
        self.cells.push(cell);
    }

    pub fn with_cell(mut self, offset: Pos, state: CellState) -> Self {
        self.push_cell(ClipCell::new(offset, state));
        self
    }

    /// Объект с позицией относительно угла шаблона.
    pub fn with_object(mut self, object: ObjectSnapshot) -> Self {
        self.objects.push(object);
        self
    }

    pub fn with_output(mut self, offset: Pos) -> Self {
        self.output = Some(offset);
        self
    }

    pub fn with_marker_anchor(mut self, offset: Pos) -> Self {
        self.marker_anchor = Some(offset);
        self
    }

    /// (width, height, length)
    pub fn dimensions(&self) -> (u32, u32, u32) {
        self.size
    }

    pub fn iter_cells(&self) -> impl Iterator<Item = &ClipCell> + '_ {
        self.cells.iter()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell_at(&self, i: usize) -> Option<&ClipCell> {
        self.cells.get(i)
    }

    pub fn objects(&self) -> &[ObjectSnapshot] {
        &self.objects
    }

    pub fn output(&self) -> Option<Pos> {
        self.output
    }

    pub fn marker_anchor(&self) -> Option<Pos> {
        self.marker_anchor
    }

    /// Заменить плейсхолдер во всех текстовых данных (aux клеток, атрибуты объектов).
    pub fn substitute(&mut self, from: &str, to: &str) -> usize {
        if from.is_empty() {
            return 0;
        }
        let mut n = 0;
        for c in &mut self.cells {
            if let Some(aux) = c.aux.as_mut() {
                n += aux.values_mut().map(|t| t.replace_text(from, to)).sum::<usize>();
            }
        }
        for o in &mut self.objects {
            n += o.replace_text(from, to);
        }
        n
    }

    /// Шаблон из снимка острова: смещения от его origin, прикреплённые объекты
    /// становятся обычными объектами шаблона.
    pub fn from_island(snap: &IslandSnapshot) -> Self {
        let origin = snap.origin();
        let back = Pos::new(0, 0, 0).sub(origin);
        let mut clip = Clipboard::new(snap.size());
        for c in snap.cells() {
            clip.push_cell(ClipCell {
                offset: c.pos().sub(origin),
                state: c.state().clone(),
                aux: c.aux().cloned(),
                items: c.items().cloned(),
            });
            clip.objects.extend(c.attached().iter().map(|o| o.shifted(back)));
        }
        clip.objects
            .extend(snap.objects().iter().map(|o| o.shifted(back)));
        clip
    }

    /// Породить объекты шаблона (с пассажирами и vehicle) относительно якоря.
    pub fn spawn_objects(&self, world: &mut dyn World, anchor: Pos) -> ApplyStats {
        let mut st = ApplyStats::default();
        for o in &self.objects {
            match spawn_tree(world, &o.shifted(anchor)) {
                Ok((_, n)) => st.objects += n,
                Err(e) => {
                    log::warn!("paste: object '{}' not spawned: {}", o.kind(), e);
                    st.failed += 1;
                }
            }
        }
        st
    }

    /// Применить все клетки и объекты за один шаг.
    pub fn apply_all(&self, world: &mut dyn World, anchor: Pos) -> VaultResult<ApplyStats> {
        let mut st = ApplyStats::default();
        for c in &self.cells {
            match c.place(world, anchor) {
                Ok(_) => st.cells += 1,
                Err(e) => {
                    log::warn!("paste: cell at {} skipped: {}", anchor.add(c.offset), e);
                    st.failed += 1;
                }
            }
        }
        if st.cells == 0 && !self.cells.is_empty() {
            return Err(VaultError::invalid(format!(
                "no cell of the clipboard could be placed at {anchor}"
            )));
        }
        let o = self.spawn_objects(world, anchor);
        st.objects = o.objects;
        st.failed += o.failed;
        Ok(st)
    }
}

/// Дерево объектов целиком или ничего: при отказе уже созданные убираются.
fn spawn_tree(world: &mut dyn World, o: &ObjectSnapshot) -> VaultResult<(ObjectId, usize)> {
    let mut spawned = Vec::new();
    match spawn_chain(world, o, &mut spawned) {
        Ok(id) => Ok((id, spawned.len())),
        Err(e) => {
            for id in spawned.into_iter().rev() {
                if let Err(re) = world.remove_object(id) {
                    log::debug!("paste: rollback of object {} failed: {}", id.0, re);
                }
            }
            Err(e)
        }
    }
}

fn spawn_chain(
    world: &mut dyn World,
    o: &ObjectSnapshot,
    spawned: &mut Vec<ObjectId>,
) -> VaultResult<ObjectId> {
    let id = spawn_one(world, o)?;
    spawned.push(id);
    for p in o.passengers() {
        let pid = spawn_chain(world, p, spawned)?;
        world.mount(id, pid)?;
    }
    if let Some(v) = o.vehicle() {
        let vid = spawn_chain(world, v, spawned)?;
        world.mount(vid, id)?;
    }
    Ok(id)
}

fn spawn_one(world: &mut dyn World, o: &ObjectSnapshot) -> VaultResult<ObjectId> {
    let id = world.spawn_object(o.kind(), o.position())?;
    for (k, v) in o.attributes().iter() {
        if let Err(e) = world.set_object_attribute(id, k, v.clone()) {
            log::debug!("paste: attribute '{}' of '{}' dropped: {}", k, o.kind(), e);
        }
    }
    Ok(id)
}

impl ToTag for ClipCell {
    fn to_tag(&self) -> Tag {
        let mut c = Compound::with_capacity(5);
        c.insert("off", pos_to_tag(self.offset));
        c.insert("kind", Tag::Text(self.state.kind.clone()));
        if !self.state.state.is_empty() {
            c.insert("state", Tag::Text(self.state.state.clone()));
        }
        if let Some(aux) = &self.aux {
            c.insert("aux", Tag::Compound(aux.clone()));
        }
        if let Some(items) = &self.items {
            c.insert("items", items_to_tag(items));
        }
        Tag::Compound(c)
    }
}

impl FromTag for ClipCell {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        let c = expect_compound(tag, "clipboard cell")?;
        let offset = c
            .get("off")
            .and_then(pos_from_tag)
            .ok_or_else(|| VaultError::format("clipboard cell without 'off'"))?;
        let state = CellState::with_state(
            field_or(c, "kind", String::new()),
            field_or(c, "state", String::new()),
        );
        if state.is_empty() {
            return Err(VaultError::format(format!("empty clipboard cell at {offset}")));
        }
        Ok(Self {
            offset,
            state,
            aux: c.get_compound("aux").cloned(),
            items: c.get("items").and_then(|t| items_from_tag(t).ok()),
        })
    }
}

impl ToTag for Clipboard {
    fn to_tag(&self) -> Tag {
        let (w, h, l) = self.size;
        let mut c = Compound::with_capacity(5);
        c.insert("size", Tag::IntArray(vec![w as i32, h as i32, l as i32]));
        c.insert("cells", self.cells.to_tag());
        c.insert("objects", self.objects.to_tag());
        if let Some(p) = self.output {
            c.insert("output", pos_to_tag(p));
        }
        if let Some(p) = self.marker_anchor {
            c.insert("marker", pos_to_tag(p));
        }
        Tag::Compound(c)
    }
}

impl FromTag for Clipboard {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        let c = expect_compound(tag, "clipboard")?;
        let size = c
            .get("size")
            .and_then(pos_from_tag)
            .filter(|p| p.x >= 0 && p.y >= 0 && p.z >= 0)
            .ok_or_else(|| VaultError::format("clipboard without readable 'size'"))?;
        let mut clip = Clipboard::new((size.x as u32, size.y as u32, size.z as u32));
        for t in c.get_list("cells").unwrap_or(&[]) {
            match ClipCell::from_tag(t) {
                Ok(cell) => clip.push_cell(cell),
                Err(e) => log::debug!("paste: clipboard cell skipped ({})", e),
            }
        }
        for t in c.get_list("objects").unwrap_or(&[]) {
            match ObjectSnapshot::from_tag(t) {
                Ok(o) => clip.objects.push(o),
                Err(e) => log::debug!("paste: clipboard object skipped ({})", e),
            }
        }
        clip.output = c.get("output").and_then(pos_from_tag);
        clip.marker_anchor = c.get("marker").and_then(pos_from_tag);
        Ok(clip)
    }
}

// ---------------------- loading ----------------------

/// External clipboard source (files on disk, schematic libraries, ...).
pub trait ClipboardLoader: Send + Sync {
    fn load(&self, path: &Path) -> VaultResult<Clipboard>;
}

/// Clipboards stored in the crate's own tag byte form, plain or gzip.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagClipboardLoader;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

impl TagClipboardLoader {
    fn load_inner(path: &Path) -> Result<Clipboard> {
        let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let bytes = if raw.starts_with(&GZIP_MAGIC) {
            let mut out = Vec::new();
            GzDecoder::new(&raw[..])
                .read_to_end(&mut out)
                .with_context(|| format!("gunzip {}", path.display()))?;
            out
        } else {
            raw
        };
        Ok(decode_bytes::<Clipboard>(&bytes)?)
    }

    /// Записать шаблон (gzip), tmp + rename.
    pub fn save(path: &Path, clip: &Clipboard) -> VaultResult<()> {
        Self::save_inner(path, clip).map_err(VaultError::from_anyhow)
    }

    fn save_inner(path: &Path, clip: &Clipboard) -> Result<()> {
        let bytes = encode_bytes(clip)?;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&bytes)?;
        let packed = enc.finish().context("gzip clipboard")?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &packed).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

impl ClipboardLoader for TagClipboardLoader {
    fn load(&self, path: &Path) -> VaultResult<Clipboard> {
        Self::load_inner(path).map_err(VaultError::from_anyhow)
    }
}

/// Разобранные шаблоны по пути. Делится между сессиями; сами шаблоны не
/// мутируются (подстановка идёт по копии).
pub struct ClipboardCache {
    loader: Arc<dyn ClipboardLoader>,
    entries: Mutex<HashMap<PathBuf, Arc<Clipboard>>>,
}

impl std::fmt::Debug for ClipboardCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl ClipboardCache {
    pub fn new(loader: Arc<dyn ClipboardLoader>) -> Self {
        Self {
            loader,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_load(&self, path: &Path) -> VaultResult<Arc<Clipboard>> {
        if let Some(c) = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
        {
            return Ok(c.clone());
        }
        // разбор вне блокировки: параллельная загрузка того же пути безвредна
        let clip = Arc::new(self.loader.load(path)?);
        log::debug!(
            "paste: clipboard {} loaded ({} cells)",
            path.display(),
            clip.cell_count()
        );
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), clip.clone());
        Ok(clip)
    }

    pub fn invalidate(&self, path: &Path) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path)
            .is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Vec3;
    use crate::world::MemoryWorld;

    fn sample() -> Clipboard {
        let mut cell = ClipCell::new(Pos::new(1, 0, 0), CellState::new("sign"));
        cell.aux = Some(Compound::new().with("text", Tag::Text("hello {owner}".into())));
        let mut clip = Clipboard::new((2, 1, 1)).with_cell(Pos::new(0, 0, 0), CellState::new("stone"));
        clip.push_cell(cell);
        clip.with_object(
            ObjectSnapshot::new(
                "zombie",
                7,
                Vec3::new(0.5, 1.0, 0.5),
                Compound::new().with("custom_name", Tag::Text("{owner}'s pet".into())),
            )
            .unwrap(),
        )
        .with_output(Pos::new(0, 1, 0))
    }

    #[test]
    fn empty_cells_are_not_stored() {
        let mut clip = Clipboard::new((3, 1, 1))
            .with_cell(Pos::new(0, 0, 0), CellState::new("stone"))
            .with_cell(Pos::new(1, 0, 0), CellState::new("air"));
        clip.push_cell(ClipCell::new(Pos::new(2, 0, 0), CellState::new("")));
        assert_eq!(clip.cell_count(), 1);
        assert_eq!(clip.cell_at(0).unwrap().state.kind, "stone");
    }

    #[test]
    fn failed_passenger_rolls_back_the_whole_tree() {
        let boat = ObjectSnapshot::new("boat", 1, Vec3::new(0.5, 0.0, 0.5), Compound::new())
            .unwrap()
            .with_passengers(vec![
                ObjectSnapshot::new("cat", 2, Vec3::new(0.5, 0.0, 0.5), Compound::new()).unwrap(),
                ObjectSnapshot::new("cat", 3, Vec3::new(2.5, 0.0, 2.5), Compound::new()).unwrap(),
            ]);
        let clip = Clipboard::new((3, 1, 3))
            .with_cell(Pos::new(0, 0, 0), CellState::new("stone"))
            .with_object(boat);

        let mut w = MemoryWorld::new("w");
        w.fail_writes_at(Pos::new(12, 64, 12));
        let st = clip.spawn_objects(&mut w, Pos::new(10, 64, 10));
        assert_eq!(st, ApplyStats { cells: 0, objects: 0, failed: 1 });
        assert_eq!(w.object_count(), 0);
    }

    #[test]
    fn apply_all_places_relative_to_anchor() {
        let mut w = MemoryWorld::new("w");
        let st = sample().apply_all(&mut w, Pos::new(10, 64, 10)).unwrap();
        assert_eq!(st, ApplyStats { cells: 2, objects: 1, failed: 0 });
        assert_eq!(w.cell(Pos::new(10, 64, 10)).unwrap().kind, "stone");
        assert_eq!(w.cell(Pos::new(11, 64, 10)).unwrap().kind, "sign");
        let o = w.objects().next().unwrap();
        assert_eq!(o.position, Vec3::new(10.5, 65.0, 10.5));
    }

    #[test]
    fn substitution_touches_a_copy_only() {
        let base = Arc::new(sample());
        let mut copy = (*base).clone();
        assert_eq!(copy.substitute("{owner}", "Alex"), 2);
        assert_eq!(
            copy.cells[1].aux.as_ref().unwrap().get_str("text"),
            Some("hello Alex")
        );
        assert_eq!(
            base.cells[1].aux.as_ref().unwrap().get_str("text"),
            Some("hello {owner}")
        );
    }

    #[test]
    fn cache_loads_once_from_tag_file() {
        let dir = std::env::temp_dir().join(format!("iv-clip-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("house.ivc");
        TagClipboardLoader::save(&path, &sample()).unwrap();

        let cache = ClipboardCache::new(Arc::new(TagClipboardLoader));
        let a = cache.get_or_load(&path).unwrap();
        let b = cache.get_or_load(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, sample());

        // после invalidate файл перечитывается
        assert!(cache.invalidate(&path));
        assert!(!cache.invalidate(&path));
        let c = cache.get_or_load(&path).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        let _ = fs::remove_dir_all(&dir);
    }
}
