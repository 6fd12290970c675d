//! Variant registry: one record per object kind.
//!
//! Каждая запись объявляет способ прикрепления (attachment) и схему атрибутов.
//! Захват и применение атрибутов идут поиском по таблице, без каскадов `if kind == ...`.
//! Таблица фильтруется через `CapabilityProvider`, так что пайплайны не знают
//! о версии хоста.
//!
//! Политика для атрибутов:
//! - объявленный атрибут с неподходящим типом отбрасывается (debug-лог);
//! - атрибут, не поддерживаемый хостом, отбрасывается;
//! - необъявленные ключи сохраняются как есть (forward compatibility).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::VaultResult;
use crate::snapshot::{attr_ref, ObjectSnapshot};
use crate::tag::{Compound, Tag};
use crate::world::{CapabilityProvider, LiveObject, ModernCapabilities, ObjectId, World};

/// Как объект связан с клетками.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// Свободный объект (мобы, транспорт, предметы).
    Free,
    /// Висит на грани клетки (рамки, картины, узлы поводков).
    Hanging,
    /// Объект, имитирующий клетку.
    CellMimic,
    /// Стойка: прикреплена, только если маленькая и видимая.
    Stand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Bool,
    Int,
    Float,
    Text,
    Compound,
    List,
    /// Ссылка на другой объект (capture id).
    Ref,
}

impl AttrKind {
    /// Допускает ли тип значение (ширина целых и float/int не важны).
    pub fn admits(self, tag: &Tag) -> bool {
        match self {
            AttrKind::Bool => tag.as_bool().is_some(),
            AttrKind::Int | AttrKind::Ref => matches!(
                tag,
                Tag::Byte(_) | Tag::Short(_) | Tag::Int(_) | Tag::Long(_)
            ),
            AttrKind::Float => tag.as_f64().is_some(),
            AttrKind::Text => matches!(tag, Tag::Text(_)),
            AttrKind::Compound => matches!(tag, Tag::Compound(_)),
            AttrKind::List => matches!(tag, Tag::List(_)),
        }
    }
}

/// Attribute schema entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrSpec {
    pub name: String,
    pub kind: AttrKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KindSpec {
    pub kind: String,
    pub attachment: Attachment,
    pub attrs: Vec<AttrSpec>,
}

impl KindSpec {
    pub fn new(kind: &str, attachment: Attachment, attrs: &[(&str, AttrKind)]) -> Self {
        let mut all: Vec<AttrSpec> = Vec::with_capacity(COMMON_ATTRS.len() + attrs.len());
        // видовые объявления перекрывают общие
        for (n, k) in attrs.iter().chain(COMMON_ATTRS.iter()) {
            if !all.iter().any(|a| a.name == *n) {
                all.push(AttrSpec {
                    name: n.to_string(),
                    kind: *k,
                });
            }
        }
        Self {
            kind: kind.to_string(),
            attachment,
            attrs: all,
        }
    }

    /// Open schema for kinds the registry does not know: common attributes only,
    /// everything else preserved.
    pub fn open(kind: &str) -> Self {
        Self::new(kind, Attachment::Free, &[])
    }

    pub fn attr(&self, name: &str) -> Option<&AttrSpec> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Прикреплён ли конкретный экземпляр к клетке.
    pub fn is_attached(&self, attrs: &Compound) -> bool {
        match self.attachment {
            Attachment::Free => false,
            Attachment::Hanging | Attachment::CellMimic => true,
            Attachment::Stand => {
                attrs.get_bool("small").unwrap_or(false) && !attrs.get_bool("invisible").unwrap_or(false)
            }
        }
    }
}

const COMMON_ATTRS: &[(&str, AttrKind)] = &[
    ("custom_name", AttrKind::Text),
    ("rotation", AttrKind::List),
    ("silent", AttrKind::Bool),
    ("glowing", AttrKind::Bool),
    ("health", AttrKind::Float),
    ("equipment", AttrKind::Compound),
    ("leash_holder", AttrKind::Ref),
];

fn builtin_kinds() -> Vec<KindSpec> {
    use AttrKind::*;
    use Attachment::*;
    vec![
        // hanging
        KindSpec::new("item_frame", Hanging, &[("facing", Int), ("item", Compound), ("item_rotation", Int)]),
        KindSpec::new("glow_item_frame", Hanging, &[("facing", Int), ("item", Compound), ("item_rotation", Int)]),
        KindSpec::new("painting", Hanging, &[("facing", Int), ("motive", Text)]),
        KindSpec::new("leash_knot", Hanging, &[]),
        // cell mimics
        KindSpec::new("falling_block", CellMimic, &[("state", Compound), ("time", Int)]),
        KindSpec::new("block_display", CellMimic, &[("state", Compound), ("display_transform", List)]),
        KindSpec::new("shulker", CellMimic, &[("color", Int), ("peek", Int), ("attach_face", Int)]),
        // stands
        KindSpec::new(
            "armor_stand",
            Stand,
            &[("small", Bool), ("invisible", Bool), ("arms", Bool), ("pose", Compound)],
        ),
        // free
        KindSpec::new("zombie", Free, &[("baby", Bool), ("anger_target", Ref)]),
        KindSpec::new("skeleton", Free, &[("anger_target", Ref)]),
        KindSpec::new("wolf", Free, &[("owner", Ref), ("sitting", Bool), ("anger_target", Ref), ("collar", Int)]),
        KindSpec::new("cat", Free, &[("owner", Ref), ("sitting", Bool), ("variant", Text)]),
        KindSpec::new("horse", Free, &[("owner", Ref), ("tame", Bool), ("variant", Int), ("saddle", Compound)]),
        KindSpec::new("villager", Free, &[("profession", Text), ("level", Int), ("offers", List)]),
        KindSpec::new("iron_golem", Free, &[("player_created", Bool), ("anger_target", Ref)]),
        KindSpec::new("vex", Free, &[("summoner", Ref), ("life_ticks", Int)]),
        KindSpec::new("evoker_fangs", Free, &[("summoner", Ref), ("warmup", Int)]),
        KindSpec::new("boat", Free, &[("wood", Text)]),
        KindSpec::new("minecart", Free, &[("display_state", Compound)]),
        KindSpec::new("chest_minecart", Free, &[("items", Compound)]),
        KindSpec::new("item", Free, &[("item", Compound), ("age", Int), ("pickup_delay", Int)]),
    ]
}

/// Table of kind specs filtered by a capability provider.
pub struct VariantRegistry {
    kinds: HashMap<String, KindSpec>,
    caps: Arc<dyn CapabilityProvider>,
}

impl std::fmt::Debug for VariantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantRegistry")
            .field("host", &self.caps.host_version())
            .field("kinds", &self.kinds.len())
            .finish()
    }
}

/// Reference attribute waiting to be resolved on a live object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRef {
    pub subject: ObjectId,
    pub key: String,
    pub target: u64,
}

impl VariantRegistry {
    pub fn new(caps: Arc<dyn CapabilityProvider>) -> Self {
        let mut reg = Self {
            kinds: HashMap::new(),
            caps,
        };
        for spec in builtin_kinds() {
            reg.register(spec);
        }
        reg
    }

    pub fn modern() -> Self {
        Self::new(Arc::new(ModernCapabilities))
    }

    /// Зарегистрировать (или заменить) запись; неподдерживаемые хостом атрибуты
    /// вычищаются сразу, вид без поддержки хоста не регистрируется.
    pub fn register(&mut self, mut spec: KindSpec) -> bool {
        if !self.caps.supports_kind(&spec.kind) {
            log::debug!(
                "registry: kind '{}' unsupported on host '{}'",
                spec.kind,
                self.caps.host_version()
            );
            return false;
        }
        let caps = &self.caps;
        let kind = spec.kind.clone();
        spec.attrs.retain(|a| caps.supports_attribute(&kind, &a.name));
        self.kinds.insert(spec.kind.clone(), spec);
        true
    }

    pub fn host_version(&self) -> &str {
        self.caps.host_version()
    }

    pub fn supports_kind(&self, kind: &str) -> bool {
        self.caps.supports_kind(kind)
    }

    pub fn spec(&self, kind: &str) -> Option<&KindSpec> {
        self.kinds.get(kind)
    }

    /// Spec for a kind, or an open schema when the kind is unknown.
    pub fn spec_or_open(&self, kind: &str) -> KindSpec {
        self.kinds
            .get(kind)
            .cloned()
            .unwrap_or_else(|| KindSpec::open(kind))
    }

    pub fn is_attached(&self, obj: &LiveObject) -> bool {
        self.kinds
            .get(&obj.kind)
            .map(|s| s.is_attached(&obj.attributes))
            .unwrap_or(false)
    }

    /// Отфильтровать живые атрибуты объекта по схеме вида.
    pub fn capture_attributes(&self, kind: &str, live: &Compound) -> Compound {
        let spec = self.spec_or_open(kind);
        let mut out = Compound::with_capacity(live.len());
        for (key, value) in live.iter() {
            match spec.attr(key) {
                Some(a) if !a.kind.admits(value) => {
                    log::debug!("registry: {kind}.{key} dropped ({} is not {:?})", value.type_name(), a.kind);
                }
                Some(_) => {
                    out.insert(key, value.clone());
                }
                None if self.caps.supports_attribute(kind, key) => {
                    out.insert(key, value.clone());
                }
                None => {}
            }
        }
        out
    }

    /// Применить атрибуты снимка к живому объекту. Ссылочные атрибуты не пишутся,
    /// а возвращаются вызывающему для разрешения через таблицу идентификаторов.
    /// Ошибка одного атрибута логируется и не прерывает остальные.
    pub fn apply_attributes(
        &self,
        world: &mut dyn World,
        id: ObjectId,
        snap: &ObjectSnapshot,
    ) -> Vec<PendingRef> {
        let spec = self.spec_or_open(snap.kind());
        let mut pending = Vec::new();
        for (key, value) in snap.attributes().iter() {
            let declared = spec.attr(key);
            if let Some(a) = declared {
                if a.kind == AttrKind::Ref {
                    if let Some(target) = attr_ref(snap.attributes(), key) {
                        pending.push(PendingRef {
                            subject: id,
                            key: key.to_string(),
                            target,
                        });
                    }
                    continue;
                }
            } else if !self.caps.supports_attribute(snap.kind(), key) {
                continue;
            }
            if let Err(e) = world.set_object_attribute(id, key, value.clone()) {
                log::warn!("registry: {}.{} not applied: {}", snap.kind(), key, e);
            }
        }
        pending
    }

    /// Записать разрешённую ссылку как живой идентификатор.
    pub fn write_ref(world: &mut dyn World, r: &PendingRef, live: ObjectId) -> VaultResult<()> {
        world.set_object_attribute(r.subject, &r.key, Tag::Long(live.0 as i64))
    }
}

impl Default for VariantRegistry {
    fn default() -> Self {
        Self::modern()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::LegacyCapabilities;

    fn live(kind: &str, attrs: Compound) -> LiveObject {
        LiveObject {
            id: ObjectId(1),
            kind: kind.into(),
            position: crate::snapshot::Vec3::default(),
            attributes: attrs,
            vehicle: None,
            passengers: vec![],
        }
    }

    #[test]
    fn stand_attachment_depends_on_size_and_visibility() {
        let reg = VariantRegistry::modern();
        let small = Compound::new().with("small", Tag::Bool(true));
        assert!(reg.is_attached(&live("armor_stand", small.clone())));
        assert!(!reg.is_attached(&live(
            "armor_stand",
            small.with("invisible", Tag::Bool(true))
        )));
        assert!(!reg.is_attached(&live("armor_stand", Compound::new())));
        assert!(reg.is_attached(&live("item_frame", Compound::new())));
        assert!(!reg.is_attached(&live("zombie", Compound::new())));
        assert!(!reg.is_attached(&live("unknown_thing", Compound::new())));
    }

    #[test]
    fn legacy_host_filters_kinds_and_attrs() {
        let reg = VariantRegistry::new(Arc::new(LegacyCapabilities));
        assert!(reg.spec("glow_item_frame").is_none());
        assert!(reg.spec("item_frame").is_some());
        let attrs = Compound::new()
            .with("glowing", Tag::Bool(true))
            .with("health", Tag::Float(4.0));
        let out = reg.capture_attributes("zombie", &attrs);
        assert!(!out.contains_key("glowing"));
        assert!(out.contains_key("health"));
    }

    #[test]
    fn mistyped_declared_attr_is_dropped_unknown_kept() {
        let reg = VariantRegistry::modern();
        let attrs = Compound::new()
            .with("health", Tag::Text("lots".into()))
            .with("mod_data", Tag::Int(3));
        let out = reg.capture_attributes("zombie", &attrs);
        assert!(!out.contains_key("health"));
        assert_eq!(out.get_i64("mod_data"), Some(3));
    }
}
