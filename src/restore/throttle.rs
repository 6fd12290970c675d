//! Adaptive batch size driven by the host load metric.
//!
//! Нагрузка ниже low-water → батч делится пополам (не ниже min),
//! выше high-water → удваивается (не выше max). Между порогами без изменений.

use crate::config::VaultConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Throttle {
    batch: usize,
    min: usize,
    max: usize,
    low_water: f64,
    high_water: f64,
}

impl Throttle {
    pub fn new(initial: usize, min: usize, max: usize, low_water: f64, high_water: f64) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            batch: initial.clamp(min, max),
            min,
            max,
            low_water,
            high_water,
        }
    }

    pub fn from_config(cfg: &VaultConfig) -> Self {
        Self::new(
            cfg.batch_initial,
            cfg.batch_min,
            cfg.batch_max,
            cfg.load_low_water,
            cfg.load_high_water,
        )
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Учесть очередной замер нагрузки (TPS) и вернуть новый размер батча.
    pub fn observe(&mut self, load: f64) -> usize {
        if load < self.low_water {
            self.batch = (self.batch / 2).max(self.min);
        } else if load > self.high_water {
            self.batch = self.batch.saturating_mul(2).min(self.max);
        }
        self.batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{MAX_BATCH, MIN_BATCH};

    #[test]
    fn sustained_low_load_only_shrinks_to_floor() {
        let mut t = Throttle::from_config(&VaultConfig::default());
        let mut prev = t.batch();
        for _ in 0..64 {
            let b = t.observe(5.0);
            assert!(b <= prev);
            assert!(b >= MIN_BATCH);
            prev = b;
        }
        assert_eq!(t.batch(), MIN_BATCH);
    }

    #[test]
    fn sustained_high_load_only_grows_to_ceiling() {
        let mut t = Throttle::from_config(&VaultConfig::default());
        let mut prev = t.batch();
        for _ in 0..64 {
            let b = t.observe(20.0);
            assert!(b >= prev);
            assert!(b <= MAX_BATCH);
            prev = b;
        }
        assert_eq!(t.batch(), MAX_BATCH);
    }

    #[test]
    fn between_water_marks_is_stable() {
        let mut t = Throttle::new(100, 16, 4096, 15.0, 19.5);
        assert_eq!(t.observe(17.0), 100);
        assert_eq!(t.observe(15.0), 100);
        assert_eq!(t.observe(19.5), 100);
    }
}
