//! Доменные формы TagCodec: состояние клетки и стек предметов.

use std::collections::BTreeMap;

use super::{expect_compound, field_opt, field_or, FromTag, ToTag};
use crate::consts::EMPTY_CELL;
use crate::error::VaultResult;
use crate::tag::{Compound, Tag};

/// Тип клетки + строковое состояние ("facing=north,half=top").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellState {
    pub kind: String,
    pub state: String,
}

impl CellState {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            state: String::new(),
        }
    }

    pub fn with_state(kind: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            state: state.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() || self.kind == EMPTY_CELL
    }

    /// Значение свойства из строки состояния.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.state.split(',').find_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            (k.trim() == key).then(|| v.trim())
        })
    }
}

impl ToTag for CellState {
    fn to_tag(&self) -> Tag {
        let mut c = Compound::with_capacity(2).with("kind", Tag::Text(self.kind.clone()));
        if !self.state.is_empty() {
            c.insert("state", Tag::Text(self.state.clone()));
        }
        Tag::Compound(c)
    }
}

impl FromTag for CellState {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        let c = expect_compound(tag, "cell state")?;
        Ok(Self {
            kind: field_or(c, "kind", EMPTY_CELL.to_string()),
            state: field_or(c, "state", String::new()),
        })
    }
}

const ITEM_KNOWN_KEYS: [&str; 6] = ["id", "count", "damage", "name", "lore", "enchants"];

/// Стек предметов (содержимое слота контейнера или экипировки).
/// Неизвестные поля сохраняются в `extra` и пишутся обратно при encode.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemStack {
    pub kind: String,
    pub count: u8,
    pub damage: i32,
    pub name: Option<String>,
    pub lore: Vec<String>,
    pub enchantments: BTreeMap<String, i16>,
    pub extra: Compound,
}

impl ItemStack {
    pub fn new(kind: impl Into<String>, count: u8) -> Self {
        Self {
            kind: kind.into(),
            count,
            damage: 0,
            name: None,
            lore: Vec::new(),
            enchantments: BTreeMap::new(),
            extra: Compound::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn enchant(mut self, ench: impl Into<String>, level: i16) -> Self {
        self.enchantments.insert(ench.into(), level);
        self
    }
}

impl ToTag for ItemStack {
    fn to_tag(&self) -> Tag {
        let mut c = Compound::with_capacity(ITEM_KNOWN_KEYS.len() + self.extra.len());
        c.insert("id", Tag::Text(self.kind.clone()));
        // Short: Byte не вмещает стеки 128..=255; старые записи с Byte читаются так же
        c.insert("count", self.count.to_tag());
        if self.damage != 0 {
            c.insert("damage", Tag::Int(self.damage));
        }
        if let Some(n) = &self.name {
            c.insert("name", Tag::Text(n.clone()));
        }
        if !self.lore.is_empty() {
            c.insert("lore", self.lore.to_tag());
        }
        if !self.enchantments.is_empty() {
            c.insert("enchants", self.enchantments.to_tag());
        }
        for (k, v) in self.extra.iter() {
            if !c.contains_key(k) {
                c.insert(k, v.clone());
            }
        }
        Tag::Compound(c)
    }
}

impl FromTag for ItemStack {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        let c = expect_compound(tag, "item stack")?;
        let extra: Compound = c
            .iter()
            .filter(|(k, _)| !ITEM_KNOWN_KEYS.contains(k))
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Ok(Self {
            kind: field_or(c, "id", String::new()),
            count: field_or(c, "count", 1u8),
            damage: field_or(c, "damage", 0i32),
            name: field_opt(c, "name"),
            lore: field_or(c, "lore", Vec::new()),
            enchantments: field_or(c, "enchants", BTreeMap::new()),
            extra,
        })
    }
}

/// Слоты контейнера: slot -> stack. В Tag ключи хранятся десятичными строками.
pub fn items_to_tag(items: &BTreeMap<u16, ItemStack>) -> Tag {
    let mut c = Compound::with_capacity(items.len());
    for (slot, it) in items {
        c.insert(slot.to_string(), it.to_tag());
    }
    Tag::Compound(c)
}

pub fn items_from_tag(tag: &Tag) -> VaultResult<BTreeMap<u16, ItemStack>> {
    let c = expect_compound(tag, "container items")?;
    let mut out = BTreeMap::new();
    for (k, v) in c.iter() {
        let Ok(slot) = k.parse::<u16>() else {
            log::debug!("codec: non-numeric slot '{}' skipped", k);
            continue;
        };
        match ItemStack::from_tag(v) {
            Ok(it) => {
                out.insert(slot, it);
            }
            Err(e) => log::debug!("codec: slot {} skipped ({})", slot, e),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_roundtrip_preserves_unknown_keys() {
        let mut tag = ItemStack::new("diamond_sword", 1)
            .named("Blade")
            .enchant("sharpness", 5)
            .to_tag();
        tag.as_compound_mut()
            .unwrap()
            .insert("future_field", Tag::Long(42));

        let it = ItemStack::from_tag(&tag).unwrap();
        assert_eq!(it.extra.get_i64("future_field"), Some(42));
        assert_eq!(it.to_tag(), tag);
    }

    #[test]
    fn large_stack_count_survives_roundtrip() {
        let mut items = BTreeMap::new();
        items.insert(0u16, ItemStack::new("arrow", 200));
        items.insert(1u16, ItemStack::new("arrow", u8::MAX));
        let back = items_from_tag(&items_to_tag(&items)).unwrap();
        assert_eq!(back[&0].count, 200);
        assert_eq!(back[&1].count, 255);

        // записи со старой шириной (Byte) читаются как раньше
        let legacy = Tag::Compound(
            Compound::new()
                .with("id", Tag::Text("arrow".into()))
                .with("count", Tag::Byte(64)),
        );
        assert_eq!(ItemStack::from_tag(&legacy).unwrap().count, 64);
    }

    #[test]
    fn item_missing_fields_take_defaults() {
        let it = ItemStack::from_tag(&Tag::Compound(
            Compound::new().with("id", Tag::Text("stone".into())),
        ))
        .unwrap();
        assert_eq!(it.count, 1);
        assert_eq!(it.damage, 0);
        assert!(it.name.is_none());
    }

    #[test]
    fn cell_state_property_lookup() {
        let s = CellState::with_state("oak_stairs", "facing=north, half=bottom");
        assert_eq!(s.property("half"), Some("bottom"));
        assert_eq!(s.property("shape"), None);
        assert!(CellState::new("air").is_empty());
    }

    #[test]
    fn non_compound_item_is_format_error() {
        assert!(ItemStack::from_tag(&Tag::Int(3)).is_err());
    }
}
