//! Общие константы форматов (tag bytes, persisted records) и лимиты пайплайнов.

// -------- Tag byte form --------
pub const TAG_NULL: u8 = 0;
pub const TAG_BOOL: u8 = 1;
pub const TAG_BYTE: u8 = 2;
pub const TAG_SHORT: u8 = 3;
pub const TAG_INT: u8 = 4;
pub const TAG_LONG: u8 = 5;
pub const TAG_FLOAT: u8 = 6;
pub const TAG_DOUBLE: u8 = 7;
pub const TAG_TEXT: u8 = 8;
pub const TAG_BYTE_ARRAY: u8 = 9;
pub const TAG_INT_ARRAY: u8 = 10;
pub const TAG_LONG_ARRAY: u8 = 11;
pub const TAG_LIST: u8 = 12;
pub const TAG_COMPOUND: u8 = 13;

/// Максимальная глубина вложенности при декодировании (защита от stack overflow).
pub const TAG_MAX_DEPTH: usize = 512;
/// Максимальное число элементов в одном массиве/списке/компаунде.
pub const TAG_MAX_ELEMENTS: usize = 1 << 24;

// -------- Persisted records --------
pub const RECORD_MAGIC: &[u8; 8] = b"IVSNAP01";
pub const RECORD_EXT: &str = "ivs";
pub const COOLDOWN_FILE: &str = "cooldowns.json";
pub const OWNER_LOCK_FILE: &str = "LOCK";

// Header layout (32 bytes):
// [magic8][schema u16][codec u8][flags u8][timestamp u64][payload_len u32][crc32 u32][reserved u32]
pub const RECORD_HDR_SIZE: usize = 32;
pub const RECORD_OFF_SCHEMA: usize = 8;
pub const RECORD_OFF_CODEC: usize = 10;
pub const RECORD_OFF_FLAGS: usize = 11;
pub const RECORD_OFF_TIMESTAMP: usize = 12;
pub const RECORD_OFF_LEN: usize = 20;
pub const RECORD_OFF_CRC32: usize = 24;

/// Текущая версия схемы payload. v1 без origin/size у острова.
pub const SNAPSHOT_SCHEMA_VERSION: u16 = 2;
pub const SNAPSHOT_SCHEMA_MIN: u16 = 1;

pub const CODEC_NONE: u8 = 0;
pub const CODEC_GZIP: u8 = 1;
pub const CODEC_ZSTD: u8 = 2;

// -------- World --------
/// Граница легального диапазона координат по X/Z.
pub const COORD_LIMIT_XZ: i32 = 30_000_000;
pub const COORD_MIN_Y: i32 = -2048;
pub const COORD_MAX_Y: i32 = 2048;

/// "Пустая" клетка. Такие клетки никогда не попадают в снапшот.
pub const EMPTY_CELL: &str = "air";
/// Привилегированный вид объекта ("оператор"), который не захватывается и не удаляется.
pub const OPERATOR_KIND: &str = "player";

/// Ограничение глубины цепочек vehicle/passenger при захвате.
pub const MAX_CHAIN_DEPTH: usize = 16;

// -------- Pipelines --------
pub const DEFAULT_CAPTURE_CELLS_PER_TICK: usize = 4096;
pub const DEFAULT_BATCH_INITIAL: usize = 256;
pub const MIN_BATCH: usize = 16;
pub const MAX_BATCH: usize = 4096;
/// Целевой TPS хоста; метрика нагрузки сравнивается с водяными отметками.
pub const TARGET_TPS: f64 = 20.0;
pub const DEFAULT_LOAD_LOW_WATER: f64 = 15.0;
pub const DEFAULT_LOAD_HIGH_WATER: f64 = 19.5;
pub const DEFAULT_DEFERRED_REF_ATTEMPTS: u32 = 100;

// -------- Persistence --------
pub const DEFAULT_SNAPSHOT_COOLDOWN_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_KEEP_LAST: usize = 5;
pub const DEFAULT_IO_THREADS: usize = 2;

// -------- Paste --------
pub const DEFAULT_PASTE_CELLS_PER_TICK: usize = 40;
pub const DEFAULT_PASTE_TIMEOUT_TICKS: u64 = 20 * 60 * 5;
pub const DEFAULT_REVEAL_INTERVAL_TICKS: u64 = 10;
pub const DEFAULT_MARKER_RADIUS: i32 = 6;
pub const MAX_MARKER_CELLS: usize = 512;
/// Визуальный/звуковой cue на каждые N поставленных клеток.
pub const PASTE_CUE_EVERY: usize = 8;
