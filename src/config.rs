//! Centralized configuration and builder for IslandVault.
//!
//! - Все тюнинги пайплайнов и хранилища в одном месте вместо разбросанных env-чтений.
//! - VaultConfig::from_env() читает переменные `IV_*`.
//! - VaultBuilder собирает конфиг поверх env (или поверх чистого default).
//!
//! Defaults:
//! - codec = gzip (записи компактные, а распаковка дешёвая)
//! - batch 256 в диапазоне [16, 4096], пороги нагрузки 15.0 / 19.5 TPS
//! - cooldown автоснапшота 5 минут, хранить последние 5 записей

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::{
    CODEC_GZIP, CODEC_NONE, CODEC_ZSTD, DEFAULT_BATCH_INITIAL, DEFAULT_CAPTURE_CELLS_PER_TICK,
    DEFAULT_DEFERRED_REF_ATTEMPTS, DEFAULT_IO_THREADS, DEFAULT_KEEP_LAST, DEFAULT_LOAD_HIGH_WATER,
    DEFAULT_LOAD_LOW_WATER, DEFAULT_MARKER_RADIUS, DEFAULT_PASTE_CELLS_PER_TICK,
    DEFAULT_PASTE_TIMEOUT_TICKS, DEFAULT_REVEAL_INTERVAL_TICKS, DEFAULT_SNAPSHOT_COOLDOWN_MS,
    MAX_BATCH, MIN_BATCH,
};

/// Компрессия payload в файле записи.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordCodec {
    None,
    Gzip,
    Zstd,
}

impl RecordCodec {
    pub fn id(self) -> u8 {
        match self {
            RecordCodec::None => CODEC_NONE,
            RecordCodec::Gzip => CODEC_GZIP,
            RecordCodec::Zstd => CODEC_ZSTD,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            CODEC_NONE => Some(RecordCodec::None),
            CODEC_GZIP => Some(RecordCodec::Gzip),
            CODEC_ZSTD => Some(RecordCodec::Zstd),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "raw" | "0" => Some(RecordCodec::None),
            "gzip" | "gz" | "1" => Some(RecordCodec::Gzip),
            "zstd" | "zst" | "2" => Some(RecordCodec::Zstd),
            _ => None,
        }
    }
}

impl fmt::Display for RecordCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordCodec::None => "none",
            RecordCodec::Gzip => "gzip",
            RecordCodec::Zstd => "zstd",
        })
    }
}

/// Top-level configuration for the capture/restore/paste engine and the record store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Root directory of persisted records.
    /// Env: IV_STORE_DIR (default "./islandvault")
    pub store_dir: PathBuf,

    /// Env: IV_CODEC = none|gzip|zstd (default gzip)
    pub codec: RecordCodec,

    /// Coordinates visited per capture step.
    /// Env: IV_CAPTURE_CELLS_PER_TICK (default 4096)
    pub capture_cells_per_tick: usize,

    /// Restore batch: initial size and bounds.
    /// Env: IV_BATCH_INITIAL / IV_BATCH_MIN / IV_BATCH_MAX
    pub batch_initial: usize,
    pub batch_min: usize,
    pub batch_max: usize,

    /// Host load (TPS) below which the batch halves / above which it doubles.
    /// Env: IV_LOAD_LOW_WATER / IV_LOAD_HIGH_WATER
    pub load_low_water: f64,
    pub load_high_water: f64,

    /// Env: IV_DEFERRED_REF_ATTEMPTS (default 100)
    pub deferred_ref_attempts: u32,

    /// Env: IV_SNAPSHOT_COOLDOWN_MS (default 300000)
    pub snapshot_cooldown_ms: u64,

    /// Env: IV_KEEP_LAST (default 5)
    pub keep_last: usize,

    /// Env: IV_PASTE_CELLS_PER_TICK (default 40)
    pub paste_cells_per_tick: usize,

    /// Env: IV_PASTE_TIMEOUT_TICKS (default 6000)
    pub paste_timeout_ticks: u64,

    /// Env: IV_REVEAL_INTERVAL_TICKS (default 10)
    pub reveal_interval_ticks: u64,

    /// Env: IV_MARKER_RADIUS (default 6)
    pub marker_radius: i32,

    /// Cell kinds forming a reveal marker region.
    /// Env: IV_MARKER_KINDS = "a,b,c"
    pub marker_kinds: Vec<String>,

    /// Emit a cue for placed cells while pasting.
    /// Env: IV_PASTE_CUES = 0|1 (default 1)
    pub paste_cues: bool,

    /// Env: IV_IO_THREADS (default 2)
    pub io_threads: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("islandvault"),
            codec: RecordCodec::Gzip,
            capture_cells_per_tick: DEFAULT_CAPTURE_CELLS_PER_TICK,
            batch_initial: DEFAULT_BATCH_INITIAL,
            batch_min: MIN_BATCH,
            batch_max: MAX_BATCH,
            load_low_water: DEFAULT_LOAD_LOW_WATER,
            load_high_water: DEFAULT_LOAD_HIGH_WATER,
            deferred_ref_attempts: DEFAULT_DEFERRED_REF_ATTEMPTS,
            snapshot_cooldown_ms: DEFAULT_SNAPSHOT_COOLDOWN_MS,
            keep_last: DEFAULT_KEEP_LAST,
            paste_cells_per_tick: DEFAULT_PASTE_CELLS_PER_TICK,
            paste_timeout_ticks: DEFAULT_PASTE_TIMEOUT_TICKS,
            reveal_interval_ticks: DEFAULT_REVEAL_INTERVAL_TICKS,
            marker_radius: DEFAULT_MARKER_RADIUS,
            marker_kinds: vec!["beacon".to_string(), "reveal_marker".to_string()],
            paste_cues: true,
            io_threads: DEFAULT_IO_THREADS,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let v = std::env::var(name).ok()?;
    let s = v.trim().to_ascii_lowercase();
    Some(s == "1" || s == "true" || s == "on" || s == "yes")
}

fn env_num<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse::<T>().ok()
}

impl VaultConfig {
    /// Load configuration from `IV_*` environment variables on top of defaults.
    /// Нечитаемые значения молча игнорируются (остаётся default).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("IV_STORE_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.store_dir = PathBuf::from(s);
            }
        }
        if let Some(c) = std::env::var("IV_CODEC").ok().and_then(|v| RecordCodec::parse(&v)) {
            cfg.codec = c;
        }

        if let Some(n) = env_num("IV_CAPTURE_CELLS_PER_TICK") {
            cfg.capture_cells_per_tick = n;
        }
        if let Some(n) = env_num("IV_BATCH_INITIAL") {
            cfg.batch_initial = n;
        }
        if let Some(n) = env_num("IV_BATCH_MIN") {
            cfg.batch_min = n;
        }
        if let Some(n) = env_num("IV_BATCH_MAX") {
            cfg.batch_max = n;
        }
        if let Some(x) = env_num("IV_LOAD_LOW_WATER") {
            cfg.load_low_water = x;
        }
        if let Some(x) = env_num("IV_LOAD_HIGH_WATER") {
            cfg.load_high_water = x;
        }
        if let Some(n) = env_num("IV_DEFERRED_REF_ATTEMPTS") {
            cfg.deferred_ref_attempts = n;
        }

        if let Some(n) = env_num("IV_SNAPSHOT_COOLDOWN_MS") {
            cfg.snapshot_cooldown_ms = n;
        }
        if let Some(n) = env_num("IV_KEEP_LAST") {
            cfg.keep_last = n;
        }

        if let Some(n) = env_num("IV_PASTE_CELLS_PER_TICK") {
            cfg.paste_cells_per_tick = n;
        }
        if let Some(n) = env_num("IV_PASTE_TIMEOUT_TICKS") {
            cfg.paste_timeout_ticks = n;
        }
        if let Some(n) = env_num("IV_REVEAL_INTERVAL_TICKS") {
            cfg.reveal_interval_ticks = n;
        }
        if let Some(n) = env_num("IV_MARKER_RADIUS") {
            cfg.marker_radius = n;
        }
        if let Ok(v) = std::env::var("IV_MARKER_KINDS") {
            let kinds: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !kinds.is_empty() {
                cfg.marker_kinds = kinds;
            }
        }
        if let Some(on) = env_flag("IV_PASTE_CUES") {
            cfg.paste_cues = on;
        }
        if let Some(n) = env_num("IV_IO_THREADS") {
            cfg.io_threads = n;
        }

        cfg.normalized()
    }

    /// Привести взаимозависимые поля в согласованное состояние
    /// (min <= initial <= max, хотя бы один поток, ненулевые шаги).
    pub fn normalized(mut self) -> Self {
        self.batch_min = self.batch_min.max(1);
        self.batch_max = self.batch_max.max(self.batch_min);
        self.batch_initial = self.batch_initial.clamp(self.batch_min, self.batch_max);
        if self.load_high_water < self.load_low_water {
            std::mem::swap(&mut self.load_high_water, &mut self.load_low_water);
        }
        self.capture_cells_per_tick = self.capture_cells_per_tick.max(1);
        self.paste_cells_per_tick = self.paste_cells_per_tick.max(1);
        self.paste_timeout_ticks = self.paste_timeout_ticks.max(1);
        self.reveal_interval_ticks = self.reveal_interval_ticks.max(1);
        self.marker_radius = self.marker_radius.max(0);
        self.io_threads = self.io_threads.max(1);
        self
    }

    // Fluent setters.

    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    pub fn with_codec(mut self, codec: RecordCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_capture_cells_per_tick(mut self, n: usize) -> Self {
        self.capture_cells_per_tick = n;
        self
    }

    pub fn with_batch(mut self, initial: usize, min: usize, max: usize) -> Self {
        self.batch_initial = initial;
        self.batch_min = min;
        self.batch_max = max;
        self
    }

    pub fn with_load_water(mut self, low: f64, high: f64) -> Self {
        self.load_low_water = low;
        self.load_high_water = high;
        self
    }

    pub fn with_deferred_ref_attempts(mut self, n: u32) -> Self {
        self.deferred_ref_attempts = n;
        self
    }

    pub fn with_snapshot_cooldown_ms(mut self, ms: u64) -> Self {
        self.snapshot_cooldown_ms = ms;
        self
    }

    pub fn with_keep_last(mut self, n: usize) -> Self {
        self.keep_last = n;
        self
    }

    pub fn with_paste_cells_per_tick(mut self, n: usize) -> Self {
        self.paste_cells_per_tick = n;
        self
    }

    pub fn with_paste_timeout_ticks(mut self, ticks: u64) -> Self {
        self.paste_timeout_ticks = ticks;
        self
    }

    pub fn with_reveal_interval_ticks(mut self, ticks: u64) -> Self {
        self.reveal_interval_ticks = ticks;
        self
    }

    pub fn with_marker(mut self, radius: i32, kinds: &[&str]) -> Self {
        self.marker_radius = radius;
        self.marker_kinds = kinds.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_paste_cues(mut self, on: bool) -> Self {
        self.paste_cues = on;
        self
    }

    pub fn with_io_threads(mut self, n: usize) -> Self {
        self.io_threads = n;
        self
    }

    pub fn is_marker_kind(&self, kind: &str) -> bool {
        self.marker_kinds.iter().any(|k| k == kind)
    }
}

impl fmt::Display for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "store_dir               = {}", self.store_dir.display())?;
        writeln!(f, "codec                   = {}", self.codec)?;
        writeln!(f, "capture_cells_per_tick  = {}", self.capture_cells_per_tick)?;
        writeln!(
            f,
            "batch                   = {} [{}..={}]",
            self.batch_initial, self.batch_min, self.batch_max
        )?;
        writeln!(
            f,
            "load_water              = {:.1} / {:.1}",
            self.load_low_water, self.load_high_water
        )?;
        writeln!(f, "deferred_ref_attempts   = {}", self.deferred_ref_attempts)?;
        writeln!(f, "snapshot_cooldown_ms    = {}", self.snapshot_cooldown_ms)?;
        writeln!(f, "keep_last               = {}", self.keep_last)?;
        writeln!(f, "paste_cells_per_tick    = {}", self.paste_cells_per_tick)?;
        writeln!(f, "paste_timeout_ticks     = {}", self.paste_timeout_ticks)?;
        writeln!(f, "reveal_interval_ticks   = {}", self.reveal_interval_ticks)?;
        writeln!(
            f,
            "marker                  = r{} {}",
            self.marker_radius,
            self.marker_kinds.join(",")
        )?;
        writeln!(f, "paste_cues              = {}", self.paste_cues)?;
        write!(f, "io_threads              = {}", self.io_threads)
    }
}

/// Builder producing a VaultConfig.
#[derive(Clone, Debug)]
pub struct VaultBuilder {
    cfg: VaultConfig,
}

impl Default for VaultBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: VaultConfig::from_env(),
        }
    }
}

impl VaultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: VaultConfig::default(),
        }
    }

    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cfg.store_dir = dir.into();
        self
    }

    pub fn codec(mut self, codec: RecordCodec) -> Self {
        self.cfg.codec = codec;
        self
    }

    pub fn batch(mut self, initial: usize, min: usize, max: usize) -> Self {
        self.cfg = self.cfg.with_batch(initial, min, max);
        self
    }

    pub fn load_water(mut self, low: f64, high: f64) -> Self {
        self.cfg = self.cfg.with_load_water(low, high);
        self
    }

    pub fn snapshot_cooldown_ms(mut self, ms: u64) -> Self {
        self.cfg.snapshot_cooldown_ms = ms;
        self
    }

    pub fn keep_last(mut self, n: usize) -> Self {
        self.cfg.keep_last = n;
        self
    }

    pub fn paste_timeout_ticks(mut self, ticks: u64) -> Self {
        self.cfg.paste_timeout_ticks = ticks;
        self
    }

    pub fn io_threads(mut self, n: usize) -> Self {
        self.cfg.io_threads = n;
        self
    }

    /// Finish the builder and obtain the (normalized) configuration.
    pub fn build(self) -> VaultConfig {
        self.cfg.normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_orders_batch_bounds() {
        let c = VaultConfig::default().with_batch(5000, 64, 32).normalized();
        assert_eq!(c.batch_min, 64);
        assert_eq!(c.batch_max, 64);
        assert_eq!(c.batch_initial, 64);
    }

    #[test]
    fn codec_ids_roundtrip() {
        for c in [RecordCodec::None, RecordCodec::Gzip, RecordCodec::Zstd] {
            assert_eq!(RecordCodec::from_id(c.id()), Some(c));
            assert_eq!(RecordCodec::parse(&c.to_string()), Some(c));
        }
        assert_eq!(RecordCodec::from_id(9), None);
    }
}
