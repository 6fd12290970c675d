//! tag/binary: байтовая форма Tag.
//!
//! Layout (LE):
//!   value    := [type u8][payload]
//!   Null     := (пусто)
//!   Bool     := [u8 0|1]
//!   Byte..Double := фиксированная ширина
//!   Text     := [len u32][utf8]
//!   *Array   := [count u32][elements]
//!   List     := [count u32] { value }*          (списки гетерогенны)
//!   Compound := [count u32] { [klen u16][key utf8] value }*
//!
//! Декодер ограничивает глубину (TAG_MAX_DEPTH) и число элементов
//! (TAG_MAX_ELEMENTS); предварительная аллокация не превышает 4096 элементов,
//! так что испорченный счётчик не приводит к гигантской аллокации.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use super::{Compound, Tag};
use crate::consts::*;
use crate::error::{VaultError, VaultResult};

const PREALLOC_CAP: usize = 4096;

/// Закодировать тег в байты.
pub fn to_bytes(tag: &Tag) -> VaultResult<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    write_tag(&mut out, tag)?;
    Ok(out)
}

/// Декодировать тег из байтов. Хвостовой мусор считается ошибкой формата.
pub fn from_bytes(bytes: &[u8]) -> VaultResult<Tag> {
    let mut cur = Cursor::new(bytes);
    let tag = read_tag(&mut cur)?;
    if (cur.position() as usize) != bytes.len() {
        return Err(VaultError::format(format!(
            "trailing {} byte(s) after tag",
            bytes.len() - cur.position() as usize
        )));
    }
    Ok(tag)
}

/// Записать тег в произвольный writer.
pub fn write_tag<W: Write>(w: &mut W, tag: &Tag) -> VaultResult<()> {
    w.write_u8(tag.type_id())?;
    write_payload(w, tag)
}

/// Прочитать тег из произвольного reader'а.
pub fn read_tag<R: Read>(r: &mut R) -> VaultResult<Tag> {
    let ty = read_u8(r)?;
    read_payload(r, ty, 0)
}

fn write_len<W: Write>(w: &mut W, n: usize, what: &str) -> VaultResult<()> {
    if n > TAG_MAX_ELEMENTS {
        return Err(VaultError::format(format!(
            "{what} too large to encode: {n} elements (max {TAG_MAX_ELEMENTS})"
        )));
    }
    w.write_u32::<LittleEndian>(n as u32)?;
    Ok(())
}

fn write_payload<W: Write>(w: &mut W, tag: &Tag) -> VaultResult<()> {
    match tag {
        Tag::Null => {}
        Tag::Bool(b) => w.write_u8(*b as u8)?,
        Tag::Byte(v) => w.write_i8(*v)?,
        Tag::Short(v) => w.write_i16::<LittleEndian>(*v)?,
        Tag::Int(v) => w.write_i32::<LittleEndian>(*v)?,
        Tag::Long(v) => w.write_i64::<LittleEndian>(*v)?,
        Tag::Float(v) => w.write_f32::<LittleEndian>(*v)?,
        Tag::Double(v) => w.write_f64::<LittleEndian>(*v)?,
        Tag::Text(s) => {
            write_len(w, s.len(), "text")?;
            w.write_all(s.as_bytes())?;
        }
        Tag::ByteArray(v) => {
            write_len(w, v.len(), "byte array")?;
            for &b in v {
                w.write_i8(b)?;
            }
        }
        Tag::IntArray(v) => {
            write_len(w, v.len(), "int array")?;
            for &x in v {
                w.write_i32::<LittleEndian>(x)?;
            }
        }
        Tag::LongArray(v) => {
            write_len(w, v.len(), "long array")?;
            for &x in v {
                w.write_i64::<LittleEndian>(x)?;
            }
        }
        Tag::List(items) => {
            write_len(w, items.len(), "list")?;
            for it in items {
                write_tag(w, it)?;
            }
        }
        Tag::Compound(c) => {
            write_len(w, c.len(), "compound")?;
            for (k, v) in c.iter() {
                if k.len() > u16::MAX as usize {
                    return Err(VaultError::format(format!(
                        "compound key too long: {} bytes",
                        k.len()
                    )));
                }
                w.write_u16::<LittleEndian>(k.len() as u16)?;
                w.write_all(k.as_bytes())?;
                write_tag(w, v)?;
            }
        }
    }
    Ok(())
}

// ---------- decoding ----------

fn eof(e: std::io::Error) -> VaultError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        VaultError::format("unexpected end of tag data")
    } else {
        VaultError::from(e)
    }
}

fn read_u8<R: Read>(r: &mut R) -> VaultResult<u8> {
    r.read_u8().map_err(eof)
}

fn read_count<R: Read>(r: &mut R, what: &str) -> VaultResult<usize> {
    let n = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
    if n > TAG_MAX_ELEMENTS {
        return Err(VaultError::format(format!(
            "{what} length {n} exceeds limit {TAG_MAX_ELEMENTS}"
        )));
    }
    Ok(n)
}

fn read_utf8<R: Read>(r: &mut R, len: usize) -> VaultResult<String> {
    let mut buf = Vec::with_capacity(len.min(PREALLOC_CAP));
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(VaultError::format("unexpected end of tag data"));
    }
    String::from_utf8(buf).map_err(|_| VaultError::format("invalid utf-8 in tag string"))
}

fn read_payload<R: Read>(r: &mut R, ty: u8, depth: usize) -> VaultResult<Tag> {
    if depth > TAG_MAX_DEPTH {
        return Err(VaultError::format(format!(
            "tag nesting deeper than {TAG_MAX_DEPTH}"
        )));
    }
    let tag = match ty {
        TAG_NULL => Tag::Null,
        TAG_BOOL => match read_u8(r)? {
            0 => Tag::Bool(false),
            1 => Tag::Bool(true),
            other => return Err(VaultError::format(format!("bad bool byte {other}"))),
        },
        TAG_BYTE => Tag::Byte(r.read_i8().map_err(eof)?),
        TAG_SHORT => Tag::Short(r.read_i16::<LittleEndian>().map_err(eof)?),
        TAG_INT => Tag::Int(r.read_i32::<LittleEndian>().map_err(eof)?),
        TAG_LONG => Tag::Long(r.read_i64::<LittleEndian>().map_err(eof)?),
        TAG_FLOAT => Tag::Float(r.read_f32::<LittleEndian>().map_err(eof)?),
        TAG_DOUBLE => Tag::Double(r.read_f64::<LittleEndian>().map_err(eof)?),
        TAG_TEXT => {
            let n = read_count(r, "text")?;
            Tag::Text(read_utf8(r, n)?)
        }
        TAG_BYTE_ARRAY => {
            let n = read_count(r, "byte array")?;
            let mut v = Vec::with_capacity(n.min(PREALLOC_CAP));
            for _ in 0..n {
                v.push(r.read_i8().map_err(eof)?);
            }
            Tag::ByteArray(v)
        }
        TAG_INT_ARRAY => {
            let n = read_count(r, "int array")?;
            let mut v = Vec::with_capacity(n.min(PREALLOC_CAP));
            for _ in 0..n {
                v.push(r.read_i32::<LittleEndian>().map_err(eof)?);
            }
            Tag::IntArray(v)
        }
        TAG_LONG_ARRAY => {
            let n = read_count(r, "long array")?;
            let mut v = Vec::with_capacity(n.min(PREALLOC_CAP));
            for _ in 0..n {
                v.push(r.read_i64::<LittleEndian>().map_err(eof)?);
            }
            Tag::LongArray(v)
        }
        TAG_LIST => {
            let n = read_count(r, "list")?;
            let mut v = Vec::with_capacity(n.min(PREALLOC_CAP));
            for _ in 0..n {
                let ty = read_u8(r)?;
                v.push(read_payload(r, ty, depth + 1)?);
            }
            Tag::List(v)
        }
        TAG_COMPOUND => {
            let n = read_count(r, "compound")?;
            let mut c = Compound::with_capacity(n.min(PREALLOC_CAP));
            for _ in 0..n {
                let klen = r.read_u16::<LittleEndian>().map_err(eof)? as usize;
                let key = read_utf8(r, klen)?;
                let ty = read_u8(r)?;
                let val = read_payload(r, ty, depth + 1)?;
                // Дубликат ключа в потоке: последний выигрывает (инвариант уникальности сохраняется).
                c.insert(key, val);
            }
            Tag::Compound(c)
        }
        other => {
            return Err(VaultError::format(format!("unknown tag type id {other}")));
        }
    };
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_length_is_u32_and_key_length_is_u16() {
        let text = to_bytes(&Tag::Text("hi".into())).unwrap();
        assert_eq!(text.len(), 1 + 4 + 2);
        assert_eq!(&text[1..5], &2u32.to_le_bytes());
        assert_eq!(&text[5..], b"hi");

        let comp = to_bytes(&Tag::Compound(Compound::new().with("k", Tag::Null))).unwrap();
        assert_eq!(comp.len(), 1 + 4 + 2 + 1 + 1);
        assert_eq!(&comp[5..7], &1u16.to_le_bytes());
        assert_eq!(comp[7], b'k');
    }

    fn sample() -> Tag {
        Tag::Compound(
            Compound::new()
                .with("null", Tag::Null)
                .with("flag", Tag::Bool(true))
                .with("b", Tag::Byte(-1))
                .with("s", Tag::Short(300))
                .with("i", Tag::Int(-70_000))
                .with("l", Tag::Long(1 << 40))
                .with("f", Tag::Float(0.25))
                .with("d", Tag::Double(-1e300))
                .with("t", Tag::Text("héllo".into()))
                .with("ba", Tag::ByteArray(vec![1, -2, 3]))
                .with("ia", Tag::IntArray(vec![i32::MIN, 0, i32::MAX]))
                .with("la", Tag::LongArray(vec![-5, 5]))
                .with(
                    "list",
                    Tag::List(vec![Tag::Int(1), Tag::Text("mixed".into()), Tag::Null]),
                )
                .with("nested", Tag::Compound(Compound::new().with("x", Tag::Int(9)))),
        )
    }

    #[test]
    fn bytes_roundtrip_all_variants() {
        let t = sample();
        let bytes = to_bytes(&t).unwrap();
        assert_eq!(from_bytes(&bytes).unwrap(), t);
    }

    #[test]
    fn truncated_input_is_format_error() {
        let bytes = to_bytes(&sample()).unwrap();
        for cut in [0usize, 1, 5, bytes.len() / 2, bytes.len() - 1] {
            let err = from_bytes(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, VaultError::Format(_)), "cut={cut}: {err:?}");
        }
    }

    #[test]
    fn unknown_type_and_trailing_bytes_rejected() {
        assert!(matches!(from_bytes(&[99]), Err(VaultError::Format(_))));
        let mut bytes = to_bytes(&Tag::Int(1)).unwrap();
        bytes.push(0);
        assert!(matches!(from_bytes(&bytes), Err(VaultError::Format(_))));
    }

    #[test]
    fn hostile_length_does_not_allocate_or_panic() {
        // LIST с заявленными 16M элементами и пустым телом
        let mut bytes = vec![TAG_LIST];
        bytes.extend_from_slice(&(TAG_MAX_ELEMENTS as u32).to_le_bytes());
        assert!(matches!(from_bytes(&bytes), Err(VaultError::Format(_))));
    }

    #[test]
    fn excessive_depth_rejected() {
        let mut t = Tag::Null;
        for _ in 0..(TAG_MAX_DEPTH + 2) {
            t = Tag::List(vec![t]);
        }
        let bytes = to_bytes(&t).unwrap();
        assert!(matches!(from_bytes(&bytes), Err(VaultError::Format(_))));
    }
}
