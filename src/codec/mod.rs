//! codec: TagCodec, нативные значения <-> Tag <-> байты.
//!
//! Правила:
//! - encode детерминирован и тотален: примитивы отображаются 1:1 в соответствующий
//!   вариант Tag, Vec -> List, BTreeMap<String,_> -> Compound, Option::None -> Null;
//!   неподдерживаемые значения идут через TextFallback (текстовое представление).
//! - decode толерантен: ширина целых приводится к запрошенной (saturating),
//!   float принимает любые числа; отсутствующее/битое поле в структуре оставляет
//!   значение по умолчанию (см. field_or). FormatError возникает, только если
//!   структура нечитаема целиком (например, вместо компаунда пришёл текст).

pub mod item;

pub use item::{items_from_tag, items_to_tag, CellState, ItemStack};

use log::debug;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::error::{VaultError, VaultResult};
use crate::tag::{self, Compound, Tag};

/// Нативное значение -> Tag.
pub trait ToTag {
    fn to_tag(&self) -> Tag;
}

/// Tag -> нативное значение.
pub trait FromTag: Sized {
    fn from_tag(tag: &Tag) -> VaultResult<Self>;
}

pub fn encode<T: ToTag + ?Sized>(value: &T) -> Tag {
    value.to_tag()
}

pub fn decode<T: FromTag>(tag: &Tag) -> VaultResult<T> {
    T::from_tag(tag)
}

/// Нативное значение -> байтовая форма.
pub fn encode_bytes<T: ToTag + ?Sized>(value: &T) -> VaultResult<Vec<u8>> {
    tag::to_bytes(&value.to_tag())
}

/// Байтовая форма -> нативное значение.
pub fn decode_bytes<T: FromTag>(bytes: &[u8]) -> VaultResult<T> {
    T::from_tag(&tag::from_bytes(bytes)?)
}

/// Требовать компаунд на верхнем уровне (единственный "структурный" отказ).
pub fn expect_compound<'a>(tag: &'a Tag, what: &str) -> VaultResult<&'a Compound> {
    tag.as_compound().ok_or_else(|| {
        VaultError::format(format!("{what}: expected compound, got {}", tag.type_name()))
    })
}

/// Прочитать поле структуры; отсутствие или несовпадение типа -> default.
pub fn field_or<T: FromTag>(c: &Compound, key: &str, default: T) -> T {
    match c.get(key) {
        None => default,
        Some(t) => match T::from_tag(t) {
            Ok(v) => v,
            Err(e) => {
                debug!("codec: field '{}' ignored ({}), default kept", key, e);
                default
            }
        },
    }
}

/// Как field_or, но None если поля нет или оно нечитаемо.
pub fn field_opt<T: FromTag>(c: &Compound, key: &str) -> Option<T> {
    match c.get(key) {
        None | Some(Tag::Null) => None,
        Some(t) => match T::from_tag(t) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("codec: field '{}' ignored ({})", key, e);
                None
            }
        },
    }
}

/// Обёртка для значений без собственного отображения: кодируется текстом.
pub struct TextFallback<T: Display>(pub T);

impl<T: Display> ToTag for TextFallback<T> {
    fn to_tag(&self) -> Tag {
        Tag::Text(self.0.to_string())
    }
}

fn mismatch(want: &str, got: &Tag) -> VaultError {
    VaultError::format(format!("expected {want}, got {}", got.type_name()))
}

// ---------- примитивы ----------

impl ToTag for Tag {
    fn to_tag(&self) -> Tag {
        self.clone()
    }
}

impl FromTag for Tag {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        Ok(tag.clone())
    }
}

impl ToTag for Compound {
    fn to_tag(&self) -> Tag {
        Tag::Compound(self.clone())
    }
}

impl FromTag for Compound {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        expect_compound(tag, "compound").cloned()
    }
}

impl ToTag for bool {
    fn to_tag(&self) -> Tag {
        Tag::Bool(*self)
    }
}

impl FromTag for bool {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        tag.as_bool().ok_or_else(|| mismatch("bool", tag))
    }
}

macro_rules! int_codec {
    ($t:ty, $variant:ident) => {
        impl ToTag for $t {
            fn to_tag(&self) -> Tag {
                Tag::$variant(*self as _)
            }
        }

        impl FromTag for $t {
            fn from_tag(tag: &Tag) -> VaultResult<Self> {
                let v = tag.as_i64().ok_or_else(|| mismatch(stringify!($t), tag))?;
                Ok(v.clamp(<$t>::MIN as i64, <$t>::MAX as i64) as $t)
            }
        }
    };
}

int_codec!(i8, Byte);
int_codec!(i16, Short);
int_codec!(i32, Int);
int_codec!(i64, Long);
// беззнаковые уходят в ближайший знаковый вариант, вмещающий весь диапазон
int_codec!(u8, Short);
int_codec!(u16, Int);
int_codec!(u32, Long);

impl ToTag for u64 {
    fn to_tag(&self) -> Tag {
        // Битовая реинтерпретация: u64 ids переживают round-trip без потерь.
        Tag::Long(*self as i64)
    }
}

impl FromTag for u64 {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        match tag {
            Tag::Long(v) => Ok(*v as u64),
            _ => {
                let v = tag.as_i64().ok_or_else(|| mismatch("u64", tag))?;
                Ok(v.max(0) as u64)
            }
        }
    }
}

impl ToTag for f32 {
    fn to_tag(&self) -> Tag {
        Tag::Float(*self)
    }
}

impl FromTag for f32 {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        tag.as_f64().map(|v| v as f32).ok_or_else(|| mismatch("f32", tag))
    }
}

impl ToTag for f64 {
    fn to_tag(&self) -> Tag {
        Tag::Double(*self)
    }
}

impl FromTag for f64 {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        tag.as_f64().ok_or_else(|| mismatch("f64", tag))
    }
}

impl ToTag for str {
    fn to_tag(&self) -> Tag {
        Tag::Text(self.to_string())
    }
}

impl ToTag for String {
    fn to_tag(&self) -> Tag {
        Tag::Text(self.clone())
    }
}

impl FromTag for String {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        match tag {
            Tag::Text(s) => Ok(s.clone()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl ToTag for char {
    fn to_tag(&self) -> Tag {
        Tag::Text(self.to_string())
    }
}

impl FromTag for char {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        let s = String::from_tag(tag)?;
        let mut it = s.chars();
        match (it.next(), it.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(VaultError::format("expected single-char text")),
        }
    }
}

// ---------- контейнеры ----------

impl<T: ToTag> ToTag for Option<T> {
    fn to_tag(&self) -> Tag {
        match self {
            Some(v) => v.to_tag(),
            None => Tag::Null,
        }
    }
}

impl<T: FromTag> FromTag for Option<T> {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        match tag {
            Tag::Null => Ok(None),
            other => T::from_tag(other).map(Some),
        }
    }
}

impl<T: ToTag> ToTag for Vec<T> {
    fn to_tag(&self) -> Tag {
        Tag::List(self.iter().map(ToTag::to_tag).collect())
    }
}

impl<T: FromTag> FromTag for Vec<T> {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        let items = tag.as_list().ok_or_else(|| mismatch("list", tag))?;
        let mut out = Vec::with_capacity(items.len());
        for (i, it) in items.iter().enumerate() {
            match T::from_tag(it) {
                Ok(v) => out.push(v),
                Err(e) => debug!("codec: list element #{} skipped ({})", i, e),
            }
        }
        Ok(out)
    }
}

impl<T: ToTag> ToTag for BTreeMap<String, T> {
    fn to_tag(&self) -> Tag {
        let mut c = Compound::with_capacity(self.len());
        for (k, v) in self {
            c.insert(k.clone(), v.to_tag());
        }
        Tag::Compound(c)
    }
}

impl<T: FromTag> FromTag for BTreeMap<String, T> {
    fn from_tag(tag: &Tag) -> VaultResult<Self> {
        let c = expect_compound(tag, "map")?;
        let mut out = BTreeMap::new();
        for (k, v) in c.iter() {
            match T::from_tag(v) {
                Ok(x) => {
                    out.insert(k.to_string(), x);
                }
                Err(e) => debug!("codec: map entry '{}' skipped ({})", k, e),
            }
        }
        Ok(out)
    }
}
