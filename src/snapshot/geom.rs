//! Координаты, объёмы и курсор обхода объёма.

use std::fmt;

use crate::consts::{COORD_LIMIT_XZ, COORD_MAX_Y, COORD_MIN_Y};

/// Целочисленная позиция клетки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Pos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.z.saturating_add(dz),
        )
    }

    pub fn add(self, d: Pos) -> Self {
        self.offset(d.x, d.y, d.z)
    }

    pub fn sub(self, d: Pos) -> Self {
        self.offset(d.x.saturating_neg(), d.y.saturating_neg(), d.z.saturating_neg())
    }

    /// Позиция в легальном диапазоне мира.
    pub fn in_legal_range(&self) -> bool {
        self.x.abs() <= COORD_LIMIT_XZ
            && self.z.abs() <= COORD_LIMIT_XZ
            && (COORD_MIN_Y..=COORD_MAX_Y).contains(&self.y)
    }

    /// Шесть соседей по граням в фиксированном порядке (используется для якорения).
    pub fn face_neighbours(self) -> [Pos; 6] {
        [
            self.offset(0, -1, 0),
            self.offset(0, 1, 0),
            self.offset(0, 0, -1),
            self.offset(0, 0, 1),
            self.offset(-1, 0, 0),
            self.offset(1, 0, 0),
        ]
    }

    pub fn center(self) -> Vec3 {
        Vec3::new(self.x as f64 + 0.5, self.y as f64, self.z as f64 + 0.5)
    }

    pub fn chebyshev(self, other: Pos) -> i32 {
        let dx = (self.x - other.x).abs();
        let dy = (self.y - other.y).abs();
        let dz = (self.z - other.z).abs();
        dx.max(dy).max(dz)
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Вещественная позиция объекта.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Клетка, в которой находится точка.
    pub fn cell(&self) -> Pos {
        Pos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }

    pub fn shifted(&self, d: Pos) -> Self {
        Self::new(self.x + d.x as f64, self.y + d.y as f64, self.z + d.z as f64)
    }
}

/// Мир + позиция (результат вставки, точки вывода).
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub world: String,
    pub pos: Vec3,
}

impl Location {
    pub fn new(world: impl Into<String>, pos: Vec3) -> Self {
        Self {
            world: world.into(),
            pos,
        }
    }
}

/// Осевой ограничивающий объём в одном мире (границы включительно).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Volume {
    pub world: String,
    pub min: Pos,
    pub max: Pos,
}

impl Volume {
    /// Нормализует углы (min <= max по каждой оси).
    pub fn new(world: impl Into<String>, a: Pos, b: Pos) -> Self {
        Self {
            world: world.into(),
            min: Pos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Pos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Объём заданного размера от угла `origin`.
    pub fn sized(world: impl Into<String>, origin: Pos, size: (u32, u32, u32)) -> Self {
        let (w, h, l) = size;
        let far = origin.offset(
            w.max(1) as i32 - 1,
            h.max(1) as i32 - 1,
            l.max(1) as i32 - 1,
        );
        Self::new(world, origin, far)
    }

    pub fn size(&self) -> (u32, u32, u32) {
        (
            (self.max.x as i64 - self.min.x as i64 + 1) as u32,
            (self.max.y as i64 - self.min.y as i64 + 1) as u32,
            (self.max.z as i64 - self.min.z as i64 + 1) as u32,
        )
    }

    /// Число клеток в объёме.
    pub fn len(&self) -> u64 {
        let (w, h, l) = self.size();
        w as u64 * h as u64 * l as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, p: Pos) -> bool {
        (self.min.x..=self.max.x).contains(&p.x)
            && (self.min.y..=self.max.y).contains(&p.y)
            && (self.min.z..=self.max.z).contains(&p.z)
    }

    /// Точка объекта внутри объёма (клетки рассматриваются как единичные кубы).
    pub fn contains_point(&self, v: &Vec3) -> bool {
        v.x >= self.min.x as f64
            && v.x < self.max.x as f64 + 1.0
            && v.y >= self.min.y as f64
            && v.y < self.max.y as f64 + 1.0
            && v.z >= self.min.z as f64
            && v.z < self.max.z as f64 + 1.0
    }

    pub fn cursor(&self) -> VolumeCursor {
        VolumeCursor::new(self)
    }
}

/// Возобновляемый курсор по всем клеткам объёма (порядок: y, затем z, затем x).
///
/// Хранит только текущую позицию; состояние живёт в объекте, а не в замыкании
/// планировщика, и продвигается внешним драйвером через `next()`.
#[derive(Debug, Clone)]
pub struct VolumeCursor {
    min: Pos,
    max: Pos,
    next: Option<Pos>,
    visited: u64,
    total: u64,
}

impl VolumeCursor {
    pub fn new(v: &Volume) -> Self {
        Self {
            min: v.min,
            max: v.max,
            next: Some(v.min),
            visited: 0,
            total: v.len(),
        }
    }

    pub fn visited(&self) -> u64 {
        self.visited
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_done(&self) -> bool {
        self.next.is_none()
    }
}

impl Iterator for VolumeCursor {
    type Item = Pos;

    fn next(&mut self) -> Option<Pos> {
        let cur = self.next?;
        let mut n = cur;
        if n.x < self.max.x {
            n.x += 1;
            self.next = Some(n);
        } else if n.z < self.max.z {
            n.x = self.min.x;
            n.z += 1;
            self.next = Some(n);
        } else if n.y < self.max.y {
            n.x = self.min.x;
            n.z = self.min.z;
            n.y += 1;
            self.next = Some(n);
        } else {
            self.next = None;
        }
        self.visited += 1;
        Some(cur)
    }
}
