//! tag: самоописываемое рекурсивное значение (TagDocument).
//!
//! Используется как универсальный формат обмена для атрибутов клеток/объектов.
//! Состав:
//! - Tag: tagged union примитивов, массивов, списков и компаундов;
//! - Compound: упорядоченная (по вставке) карта с уникальными ключами;
//! - binary: байтовая форма (LE, type-id + payload), защищённая от мусора на входе;
//! - json: "человеческое" представление для inspect (lossy).
//!
//! Политика неизвестных ключей: сохраняем (forward compatibility).

pub mod binary;
pub mod json;

pub use binary::{from_bytes, to_bytes};

use crate::consts::*;

/// Структурированный тег.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Text(String),
    ByteArray(Vec<i8>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    List(Vec<Tag>),
    Compound(Compound),
}

impl Tag {
    pub fn type_id(&self) -> u8 {
        match self {
            Tag::Null => TAG_NULL,
            Tag::Bool(_) => TAG_BOOL,
            Tag::Byte(_) => TAG_BYTE,
            Tag::Short(_) => TAG_SHORT,
            Tag::Int(_) => TAG_INT,
            Tag::Long(_) => TAG_LONG,
            Tag::Float(_) => TAG_FLOAT,
            Tag::Double(_) => TAG_DOUBLE,
            Tag::Text(_) => TAG_TEXT,
            Tag::ByteArray(_) => TAG_BYTE_ARRAY,
            Tag::IntArray(_) => TAG_INT_ARRAY,
            Tag::LongArray(_) => TAG_LONG_ARRAY,
            Tag::List(_) => TAG_LIST,
            Tag::Compound(_) => TAG_COMPOUND,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Tag::Null => "null",
            Tag::Bool(_) => "bool",
            Tag::Byte(_) => "byte",
            Tag::Short(_) => "short",
            Tag::Int(_) => "int",
            Tag::Long(_) => "long",
            Tag::Float(_) => "float",
            Tag::Double(_) => "double",
            Tag::Text(_) => "text",
            Tag::ByteArray(_) => "byte_array",
            Tag::IntArray(_) => "int_array",
            Tag::LongArray(_) => "long_array",
            Tag::List(_) => "list",
            Tag::Compound(_) => "compound",
        }
    }

    /// Любая целочисленная ширина (и bool) как i64.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Tag::Bool(b) => Some(b as i64),
            Tag::Byte(v) => Some(v as i64),
            Tag::Short(v) => Some(v as i64),
            Tag::Int(v) => Some(v as i64),
            Tag::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Числа любой ширины как f64.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Tag::Float(v) => Some(v as f64),
            Tag::Double(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Tag::Bool(b) => Some(b),
            _ => self.as_i64().map(|v| v != 0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Tag]> {
        match self {
            Tag::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Tag::Compound(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_compound_mut(&mut self) -> Option<&mut Compound> {
        match self {
            Tag::Compound(c) => Some(c),
            _ => None,
        }
    }

    /// Целочисленный массив любой ширины (включая List из целых) как Vec<i64>.
    pub fn as_i64_vec(&self) -> Option<Vec<i64>> {
        match self {
            Tag::ByteArray(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Tag::IntArray(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Tag::LongArray(v) => Some(v.clone()),
            Tag::List(v) => v.iter().map(Tag::as_i64).collect(),
            _ => None,
        }
    }

    /// Рекурсивно заменить подстроку во всех Text-значениях (плейсхолдеры при вставке).
    pub fn replace_text(&mut self, from: &str, to: &str) -> usize {
        match self {
            Tag::Text(s) if s.contains(from) => {
                *s = s.replace(from, to);
                1
            }
            Tag::List(items) => items.iter_mut().map(|t| t.replace_text(from, to)).sum(),
            Tag::Compound(c) => c.values_mut().map(|t| t.replace_text(from, to)).sum(),
            _ => 0,
        }
    }
}

impl From<Compound> for Tag {
    fn from(c: Compound) -> Self {
        Tag::Compound(c)
    }
}

/// Упорядоченная по вставке карта String -> Tag с уникальными ключами.
///
/// Компаунды в снапшотах небольшие (десятки ключей), поэтому линейный поиск
/// по Vec дешевле хэш-таблицы и сохраняет порядок без доп. структур.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compound {
    entries: Vec<(String, Tag)>,
}

impl Compound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    /// Вставить значение. Существующий ключ заменяется на месте (порядок сохраняется).
    /// Возвращает старое значение.
    pub fn insert(&mut self, key: impl Into<String>, value: Tag) -> Option<Tag> {
        let key = key.into();
        match self.position(&key) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Builder-вариант insert.
    pub fn with(mut self, key: impl Into<String>, value: Tag) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Tag> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Tag> {
        match self.position(key) {
            Some(i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Tag> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tag)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Tag> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    // ---- типизированные геттеры с коэрцией ----

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Tag::as_i64)
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get_i64(key).map(saturate_i32)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Tag::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Tag::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Tag::as_str)
    }

    pub fn get_compound(&self, key: &str) -> Option<&Compound> {
        self.get(key).and_then(Tag::as_compound)
    }

    pub fn get_list(&self, key: &str) -> Option<&[Tag]> {
        self.get(key).and_then(Tag::as_list)
    }
}

impl IntoIterator for Compound {
    type Item = (String, Tag);
    type IntoIter = std::vec::IntoIter<(String, Tag)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, Tag)> for Compound {
    fn from_iter<I: IntoIterator<Item = (String, Tag)>>(iter: I) -> Self {
        let mut c = Compound::new();
        for (k, v) in iter {
            c.insert(k, v);
        }
        c
    }
}

#[inline]
pub(crate) fn saturate_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}
