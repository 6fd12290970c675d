//! Snapshot record file format.
//!
//! Layout (all little-endian):
//! [magic "IVSNAP01" 8][schema u16][codec u8][flags u8][timestamp u64]
//! [payload_len u32][crc32 u32][reserved u32] + payload
//!
//! - payload = tag-байты записи `{schema, owner, timestamp, snapshot}`, сжатые codec'ом;
//! - CRC32 (crc32fast) покрывает заголовок до поля crc + payload в том виде,
//!   в каком он лежит на диске;
//! - schema новее текущей → FormatError; v1 декодируется с выводом origin/size.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::codec::decode_bytes;
use crate::config::RecordCodec;
use crate::consts::{
    RECORD_HDR_SIZE, RECORD_MAGIC, RECORD_OFF_CODEC, RECORD_OFF_CRC32, RECORD_OFF_FLAGS,
    RECORD_OFF_LEN, RECORD_OFF_SCHEMA, RECORD_OFF_TIMESTAMP, SNAPSHOT_SCHEMA_MIN,
    SNAPSHOT_SCHEMA_VERSION,
};
use crate::error::VaultError;
use crate::snapshot::{record_tag, IslandSnapshot, PersistedSnapshotRecord};
use crate::tag;

/// Upper bound for a decompressed payload.
const MAX_PAYLOAD_DECODED: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub schema: u16,
    pub codec: RecordCodec,
    pub flags: u8,
    pub timestamp: u64,
    pub payload_len: u32,
    pub crc32: u32,
}

fn format_err(msg: impl Into<String>) -> anyhow::Error {
    VaultError::format(msg).into()
}

fn compress(codec: RecordCodec, raw: &[u8]) -> Result<Vec<u8>> {
    match codec {
        RecordCodec::None => Ok(raw.to_vec()),
        RecordCodec::Gzip => {
            let mut enc = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
            enc.write_all(raw).context("gzip encode")?;
            enc.finish().context("gzip finish")
        }
        RecordCodec::Zstd => zstd::stream::encode_all(raw, 3).context("zstd encode"),
    }
}

fn decompress(codec: RecordCodec, stored: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match codec {
        RecordCodec::None => return Ok(stored.to_vec()),
        RecordCodec::Gzip => {
            GzDecoder::new(stored)
                .take(MAX_PAYLOAD_DECODED + 1)
                .read_to_end(&mut out)
                .map_err(|e| format_err(format!("gzip payload: {e}")))?;
        }
        RecordCodec::Zstd => {
            let dec = zstd::stream::read::Decoder::new(stored).context("create zstd decoder")?;
            dec.take(MAX_PAYLOAD_DECODED + 1)
                .read_to_end(&mut out)
                .map_err(|e| format_err(format!("zstd payload: {e}")))?;
        }
    }
    if out.len() as u64 > MAX_PAYLOAD_DECODED {
        return Err(format_err("decompressed payload too large"));
    }
    Ok(out)
}

/// Закодировать запись в байты файла.
pub fn encode_record(
    owner: &str,
    timestamp: u64,
    snapshot: &IslandSnapshot,
    codec: RecordCodec,
) -> Result<Vec<u8>> {
    let tag = record_tag(owner, timestamp, SNAPSHOT_SCHEMA_VERSION, snapshot);
    let raw = tag::to_bytes(&tag).context("encode snapshot tag")?;
    let payload = compress(codec, &raw)?;
    if payload.len() > u32::MAX as usize {
        return Err(format_err("snapshot payload exceeds 4 GiB"));
    }

    let mut hdr = [0u8; RECORD_HDR_SIZE];
    hdr[..8].copy_from_slice(RECORD_MAGIC);
    LittleEndian::write_u16(&mut hdr[RECORD_OFF_SCHEMA..RECORD_OFF_SCHEMA + 2], SNAPSHOT_SCHEMA_VERSION);
    hdr[RECORD_OFF_CODEC] = codec.id();
    hdr[RECORD_OFF_FLAGS] = 0;
    LittleEndian::write_u64(&mut hdr[RECORD_OFF_TIMESTAMP..RECORD_OFF_TIMESTAMP + 8], timestamp);
    LittleEndian::write_u32(&mut hdr[RECORD_OFF_LEN..RECORD_OFF_LEN + 4], payload.len() as u32);

    let mut hasher = Crc32::new();
    hasher.update(&hdr[..RECORD_OFF_CRC32]);
    hasher.update(&payload);
    LittleEndian::write_u32(&mut hdr[RECORD_OFF_CRC32..RECORD_OFF_CRC32 + 4], hasher.finalize());

    let mut out = Vec::with_capacity(RECORD_HDR_SIZE + payload.len());
    out.extend_from_slice(&hdr);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Разобрать и проверить заголовок (магия, версия схемы, codec).
pub fn read_header(bytes: &[u8]) -> Result<RecordHeader> {
    if bytes.len() < RECORD_HDR_SIZE {
        return Err(format_err(format!("record too short ({} bytes)", bytes.len())));
    }
    if &bytes[..8] != RECORD_MAGIC {
        return Err(format_err("bad record magic"));
    }
    let schema = LittleEndian::read_u16(&bytes[RECORD_OFF_SCHEMA..RECORD_OFF_SCHEMA + 2]);
    if schema > SNAPSHOT_SCHEMA_VERSION {
        return Err(format_err(format!(
            "record schema {} is newer than supported {}",
            schema, SNAPSHOT_SCHEMA_VERSION
        )));
    }
    if schema < SNAPSHOT_SCHEMA_MIN {
        return Err(format_err(format!("record schema {} is not supported", schema)));
    }
    let codec = RecordCodec::from_id(bytes[RECORD_OFF_CODEC])
        .ok_or_else(|| format_err(format!("unknown codec id {}", bytes[RECORD_OFF_CODEC])))?;
    Ok(RecordHeader {
        schema,
        codec,
        flags: bytes[RECORD_OFF_FLAGS],
        timestamp: LittleEndian::read_u64(&bytes[RECORD_OFF_TIMESTAMP..RECORD_OFF_TIMESTAMP + 8]),
        payload_len: LittleEndian::read_u32(&bytes[RECORD_OFF_LEN..RECORD_OFF_LEN + 4]),
        crc32: LittleEndian::read_u32(&bytes[RECORD_OFF_CRC32..RECORD_OFF_CRC32 + 4]),
    })
}

/// Декодировать файл записи целиком.
pub fn decode_record(bytes: &[u8]) -> Result<PersistedSnapshotRecord> {
    let hdr = read_header(bytes)?;
    let end = RECORD_HDR_SIZE + hdr.payload_len as usize;
    if bytes.len() != end {
        return Err(format_err(format!(
            "record length mismatch: header says {}, file has {}",
            end,
            bytes.len()
        )));
    }
    let payload = &bytes[RECORD_HDR_SIZE..end];

    let mut hasher = Crc32::new();
    hasher.update(&bytes[..RECORD_OFF_CRC32]);
    hasher.update(payload);
    if hasher.finalize() != hdr.crc32 {
        return Err(format_err("record crc mismatch"));
    }

    let raw = decompress(hdr.codec, payload)?;
    let mut rec: PersistedSnapshotRecord = decode_bytes(&raw).map_err(anyhow::Error::from)?;
    if rec.schema_version != hdr.schema {
        log::debug!(
            "record: payload schema {} differs from header {}",
            rec.schema_version,
            hdr.schema
        );
    }
    if rec.timestamp == 0 {
        rec.timestamp = hdr.timestamp;
    }
    Ok(rec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CellState;
    use crate::snapshot::{CellSnapshot, Pos};

    fn island() -> IslandSnapshot {
        let cells = (0..20)
            .map(|i| CellSnapshot::new(Pos::new(i, 0, 0), CellState::new("stone")).unwrap())
            .collect();
        IslandSnapshot::new(Pos::new(0, 0, 0), (20, 1, 1), cells, vec![])
    }

    #[test]
    fn every_codec_decodes() {
        for codec in [RecordCodec::None, RecordCodec::Gzip, RecordCodec::Zstd] {
            let bytes = encode_record("U1", 1000, &island(), codec).unwrap();
            let rec = decode_record(&bytes).unwrap();
            assert_eq!(rec.owner, "U1");
            assert_eq!(rec.timestamp, 1000);
            assert_eq!(rec.snapshot, island());
        }
    }

    #[test]
    fn corruption_is_format_error() {
        let mut bytes = encode_record("U1", 1, &island(), RecordCodec::Gzip).unwrap();
        let n = bytes.len();
        bytes[n - 3] ^= 0xFF;
        let err = VaultError::from_anyhow(decode_record(&bytes).unwrap_err());
        assert!(matches!(err, VaultError::Format(_)), "{err:?}");
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut bytes = encode_record("U1", 1, &island(), RecordCodec::None).unwrap();
        LittleEndian::write_u16(&mut bytes[RECORD_OFF_SCHEMA..RECORD_OFF_SCHEMA + 2], SNAPSHOT_SCHEMA_VERSION + 1);
        let err = VaultError::from_anyhow(decode_record(&bytes).unwrap_err());
        assert!(matches!(err, VaultError::Format(_)));
    }
}
