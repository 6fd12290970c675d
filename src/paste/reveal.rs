//! Marker region search, staged reveal and safe-spot lookup.
//!
//! Маркерная область: BFS от якоря по кубу Чебышёва радиуса `radius` до первой
//! клетки маркерного вида, затем заливка по граням через маркерные клетки
//! (в том же кубе), не больше `max_cells` клеток.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::codec::CellState;
use crate::snapshot::{Pos, Vec3};
use crate::world::World;

fn is_marker(world: &dyn World, p: Pos, kinds: &[String]) -> Option<CellState> {
    world
        .cell(p)
        .filter(|c| kinds.iter().any(|k| *k == c.kind))
}

/// Связная маркерная область вокруг `start`. Пусто, если маркера в радиусе нет.
pub fn find_marker_region(
    world: &dyn World,
    start: Pos,
    radius: i32,
    kinds: &[String],
    max_cells: usize,
) -> Vec<(Pos, CellState)> {
    if kinds.is_empty() || max_cells == 0 || radius < 0 {
        return Vec::new();
    }

    // 1) ближайший маркер
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);
    let mut seed = None;
    while let Some(p) = queue.pop_front() {
        if let Some(state) = is_marker(world, p, kinds) {
            seed = Some((p, state));
            break;
        }
        for n in p.face_neighbours() {
            if n.chebyshev(start) <= radius && seen.insert(n) {
                queue.push_back(n);
            }
        }
    }
    let Some(seed) = seed else {
        return Vec::new();
    };

    // 2) заливка
    let mut region = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(seed.0);
    queue.push_back(seed);
    while let Some((p, state)) = queue.pop_front() {
        region.push((p, state));
        if region.len() >= max_cells {
            log::debug!("paste: marker region at {} truncated to {}", start, max_cells);
            break;
        }
        for n in p.face_neighbours() {
            if n.chebyshev(start) > radius || !seen.insert(n) {
                continue;
            }
            if let Some(s) = is_marker(world, n, kinds) {
                queue.push_back((n, s));
            }
        }
    }
    region
}

/// One reveal step: all region cells on one y level.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealStage {
    pub y: i32,
    pub cells: Vec<(Pos, CellState)>,
}

/// Разбить область на стадии снизу вверх.
pub fn stages(region: &[(Pos, CellState)]) -> Vec<RevealStage> {
    let mut by_y: BTreeMap<i32, Vec<(Pos, CellState)>> = BTreeMap::new();
    for (p, s) in region {
        by_y.entry(p.y).or_default().push((*p, s.clone()));
    }
    by_y.into_iter()
        .map(|(y, mut cells)| {
            cells.sort_by_key(|(p, _)| (p.x, p.z));
            RevealStage { y, cells }
        })
        .collect()
}

/// Безопасная точка: твёрдый пол и две свободные клетки над ним.
///
/// Колонки обходятся квадратными кольцами от `center`, в каждой колонке сверху
/// вниз от `top` до `bottom` включительно (берётся самая высокая точка).
pub fn find_safe_spot(
    world: &dyn World,
    center: Pos,
    reach: i32,
    bottom: i32,
    top: i32,
) -> Option<Vec3> {
    for r in 0..=reach.max(0) {
        for dx in -r..=r {
            for dz in -r..=r {
                if dx.abs() != r && dz.abs() != r {
                    continue;
                }
                let (x, z) = (center.x + dx, center.z + dz);
                for y in (bottom..=top).rev() {
                    let p = Pos::new(x, y, z);
                    if world.is_solid(p.offset(0, -1, 0))
                        && !world.is_solid(p)
                        && !world.is_solid(p.offset(0, 1, 0))
                    {
                        return Some(p.center());
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::MemoryWorld;

    fn kinds() -> Vec<String> {
        vec!["beacon".to_string()]
    }

    #[test]
    fn region_is_connected_and_bounded() {
        let mut w = MemoryWorld::new("w");
        for y in 0..3 {
            w.put(Pos::new(2, y, 0), "beacon");
        }
        // не связан с основной областью
        w.put(Pos::new(5, 0, 5), "beacon");
        w.put(Pos::new(0, 0, 0), "stone");

        let region = find_marker_region(&w, Pos::new(0, 0, 0), 6, &kinds(), 512);
        let mut got: Vec<Pos> = region.iter().map(|(p, _)| *p).collect();
        got.sort();
        assert_eq!(got, vec![Pos::new(2, 0, 0), Pos::new(2, 1, 0), Pos::new(2, 2, 0)]);

        let capped = find_marker_region(&w, Pos::new(0, 0, 0), 6, &kinds(), 2);
        assert_eq!(capped.len(), 2);
        assert!(find_marker_region(&w, Pos::new(0, 0, 0), 1, &kinds(), 512).is_empty());
    }

    #[test]
    fn stages_go_bottom_up() {
        let region = vec![
            (Pos::new(0, 5, 0), CellState::new("beacon")),
            (Pos::new(0, 3, 0), CellState::new("beacon")),
            (Pos::new(1, 3, 0), CellState::new("beacon")),
        ];
        let st = stages(&region);
        assert_eq!(st.iter().map(|s| s.y).collect::<Vec<_>>(), vec![3, 5]);
        assert_eq!(st[0].cells.len(), 2);
    }

    #[test]
    fn safe_spot_needs_floor_and_headroom() {
        let mut w = MemoryWorld::new("w");
        w.put(Pos::new(0, 0, 0), "stone");
        w.put(Pos::new(0, 2, 0), "stone"); // низкий потолок над центром
        w.put(Pos::new(1, 0, 0), "stone");
        let spot = find_safe_spot(&w, Pos::new(0, 1, 0), 2, 0, 4).unwrap();
        // над центром: пол (0,2,0), свободно (0,3,0) и (0,4,0)
        assert_eq!(spot, Vec3::new(0.5, 3.0, 0.5));
        assert!(find_safe_spot(&w, Pos::new(0, 1, 0), 2, 1, 1).is_some());
        assert!(find_safe_spot(&MemoryWorld::new("e"), Pos::new(0, 1, 0), 2, 0, 4).is_none());
    }
}
