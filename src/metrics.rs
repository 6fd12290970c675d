//! Lightweight global metrics for IslandVault.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Capture
//! - Restore (+ отложенные ссылки)
//! - Store (записи, prune)
//! - Paste

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Capture -----
static CAPTURE_CELLS: AtomicU64 = AtomicU64::new(0);
static CAPTURE_OBJECTS: AtomicU64 = AtomicU64::new(0);

// ----- Restore -----
static RESTORE_CELLS: AtomicU64 = AtomicU64::new(0);
static RESTORE_OBJECTS: AtomicU64 = AtomicU64::new(0);
static UNIT_FAILURES: AtomicU64 = AtomicU64::new(0);
static DEFERRED_RESOLVED: AtomicU64 = AtomicU64::new(0);
static DEFERRED_ABANDONED: AtomicU64 = AtomicU64::new(0);

// ----- Store -----
static RECORDS_SAVED: AtomicU64 = AtomicU64::new(0);
static RECORDS_PRUNED: AtomicU64 = AtomicU64::new(0);
static RECORD_BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);

// ----- Paste -----
static PASTE_CELLS_PLACED: AtomicU64 = AtomicU64::new(0);
static PASTE_COMPLETED: AtomicU64 = AtomicU64::new(0);
static PASTE_FAILED: AtomicU64 = AtomicU64::new(0);
static PASTE_CANCELLED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Capture
    pub cells_captured: u64,
    pub objects_captured: u64,

    // Restore
    pub cells_restored: u64,
    pub objects_restored: u64,
    pub unit_failures: u64,
    pub deferred_refs_resolved: u64,
    pub deferred_refs_abandoned: u64,

    // Store
    pub records_saved: u64,
    pub records_pruned: u64,
    pub record_bytes_written: u64,

    // Paste
    pub paste_cells_placed: u64,
    pub paste_sessions_completed: u64,
    pub paste_sessions_failed: u64,
    pub paste_sessions_cancelled: u64,
}

impl MetricsSnapshot {
    /// Средний размер записи на диске.
    pub fn avg_record_bytes(&self) -> f64 {
        if self.records_saved == 0 {
            0.0
        } else {
            self.record_bytes_written as f64 / self.records_saved as f64
        }
    }

    pub fn deferred_success_ratio(&self) -> f64 {
        let total = self.deferred_refs_resolved + self.deferred_refs_abandoned;
        if total == 0 {
            0.0
        } else {
            self.deferred_refs_resolved as f64 / total as f64
        }
    }
}

// ----- Recorders (Capture) -----
pub fn record_cell_captured() {
    CAPTURE_CELLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_objects_captured(n: usize) {
    CAPTURE_OBJECTS.fetch_add(n as u64, Ordering::Relaxed);
}

// ----- Recorders (Restore) -----
pub fn record_cell_restored() {
    RESTORE_CELLS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_object_restored() {
    RESTORE_OBJECTS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_unit_failure() {
    UNIT_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn record_deferred_resolved() {
    DEFERRED_RESOLVED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_deferred_abandoned() {
    DEFERRED_ABANDONED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Store) -----
pub fn record_saved(bytes: usize) {
    RECORDS_SAVED.fetch_add(1, Ordering::Relaxed);
    RECORD_BYTES_WRITTEN.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub fn record_pruned(n: usize) {
    RECORDS_PRUNED.fetch_add(n as u64, Ordering::Relaxed);
}

// ----- Recorders (Paste) -----
pub fn record_paste_cells(n: usize) {
    PASTE_CELLS_PLACED.fetch_add(n as u64, Ordering::Relaxed);
}
pub fn record_paste_completed() {
    PASTE_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_paste_failed() {
    PASTE_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_paste_cancelled() {
    PASTE_CANCELLED.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        cells_captured: CAPTURE_CELLS.load(Ordering::Relaxed),
        objects_captured: CAPTURE_OBJECTS.load(Ordering::Relaxed),

        cells_restored: RESTORE_CELLS.load(Ordering::Relaxed),
        objects_restored: RESTORE_OBJECTS.load(Ordering::Relaxed),
        unit_failures: UNIT_FAILURES.load(Ordering::Relaxed),
        deferred_refs_resolved: DEFERRED_RESOLVED.load(Ordering::Relaxed),
        deferred_refs_abandoned: DEFERRED_ABANDONED.load(Ordering::Relaxed),

        records_saved: RECORDS_SAVED.load(Ordering::Relaxed),
        records_pruned: RECORDS_PRUNED.load(Ordering::Relaxed),
        record_bytes_written: RECORD_BYTES_WRITTEN.load(Ordering::Relaxed),

        paste_cells_placed: PASTE_CELLS_PLACED.load(Ordering::Relaxed),
        paste_sessions_completed: PASTE_COMPLETED.load(Ordering::Relaxed),
        paste_sessions_failed: PASTE_FAILED.load(Ordering::Relaxed),
        paste_sessions_cancelled: PASTE_CANCELLED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    CAPTURE_CELLS.store(0, Ordering::Relaxed);
    CAPTURE_OBJECTS.store(0, Ordering::Relaxed);

    RESTORE_CELLS.store(0, Ordering::Relaxed);
    RESTORE_OBJECTS.store(0, Ordering::Relaxed);
    UNIT_FAILURES.store(0, Ordering::Relaxed);
    DEFERRED_RESOLVED.store(0, Ordering::Relaxed);
    DEFERRED_ABANDONED.store(0, Ordering::Relaxed);

    RECORDS_SAVED.store(0, Ordering::Relaxed);
    RECORDS_PRUNED.store(0, Ordering::Relaxed);
    RECORD_BYTES_WRITTEN.store(0, Ordering::Relaxed);

    PASTE_CELLS_PLACED.store(0, Ordering::Relaxed);
    PASTE_COMPLETED.store(0, Ordering::Relaxed);
    PASTE_FAILED.store(0, Ordering::Relaxed);
    PASTE_CANCELLED.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ratios_handle_empty_counters() {
        let m = MetricsSnapshot::default();
        assert_eq!(m.avg_record_bytes(), 0.0);
        assert_eq!(m.deferred_success_ratio(), 0.0);

        let m = MetricsSnapshot {
            records_saved: 4,
            record_bytes_written: 1000,
            deferred_refs_resolved: 3,
            deferred_refs_abandoned: 1,
            ..Default::default()
        };
        assert_eq!(m.avg_record_bytes(), 250.0);
        assert_eq!(m.deferred_success_ratio(), 0.75);
    }

    #[test]
    fn recorders_only_grow_the_counters() {
        // счётчики общие для всех тестов процесса: сравниваем только прирост
        let before = snapshot();
        record_saved(128);
        record_pruned(2);
        record_paste_cells(5);
        let after = snapshot();
        assert!(after.records_saved >= before.records_saved + 1);
        assert!(after.record_bytes_written >= before.record_bytes_written + 128);
        assert!(after.records_pruned >= before.records_pruned + 2);
        assert!(after.paste_cells_placed >= before.paste_cells_placed + 5);
    }
}
