use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use IslandVault::codec::ItemStack;
use IslandVault::config::VaultConfig;
use IslandVault::registry::VariantRegistry;
use IslandVault::snapshot::{IslandSnapshot, ObjectSnapshot};
use IslandVault::tag::{Compound, Tag};
use IslandVault::world::{MemoryHost, MemoryWorld, World};
use IslandVault::{CapturePipeline, Pos, Scheduler, Vec3, Volume};

/// Остров 3x3x3 в (0,64,0): 5 клеток, зомби и кошка свободны, рамка висит на
/// камне, оператор и объект за границей не попадают в снимок.
fn island() -> MemoryWorld {
    let mut w = MemoryWorld::new("w");
    w.put(Pos::new(0, 64, 0), "stone");
    w.put(Pos::new(1, 64, 0), "stone");
    w.put(Pos::new(2, 64, 0), "stone");
    w.put(Pos::new(1, 64, 1), "stone");
    w.put(Pos::new(1, 65, 1), "chest");
    let mut items = BTreeMap::new();
    items.insert(0u16, ItemStack::new("diamond", 3));
    w.set_container_items(Pos::new(1, 65, 1), &items).unwrap();
    // вне объёма
    w.put(Pos::new(5, 64, 5), "stone");

    w.add_object("zombie", Vec3::new(0.5, 65.0, 0.5), Compound::new());
    w.add_object(
        "cat",
        Vec3::new(2.5, 65.0, 2.5),
        Compound::new().with("custom_name", Tag::Text("Tom".into())),
    );
    w.add_object(
        "item_frame",
        Vec3::new(1.5, 64.5, 1.5),
        Compound::new().with("facing", Tag::Int(1)),
    );
    w.add_object("player", Vec3::new(1.5, 66.0, 1.5), Compound::new());
    w.add_object("zombie", Vec3::new(9.5, 65.0, 9.5), Compound::new());
    w
}

fn capture(world: MemoryWorld, cells_per_tick: usize) -> Result<IslandSnapshot> {
    let cfg = VaultConfig::default().with_capture_cells_per_tick(cells_per_tick);
    let pipeline = CapturePipeline::new(Arc::new(VariantRegistry::modern()), &cfg);
    let mut host = MemoryHost::new().with_world(world);
    let mut sched = Scheduler::new();
    let p = pipeline.begin(
        &mut sched,
        Volume::new("w", Pos::new(0, 64, 0), Pos::new(2, 66, 2)),
    );
    sched.run_until_idle(&mut host, 1_000);
    Ok(p.outcome().expect("capture finished")?)
}

fn all_ids(o: &ObjectSnapshot, out: &mut Vec<u64>) {
    out.push(o.capture_id());
    for p in o.passengers() {
        all_ids(p, out);
    }
}

#[test]
fn three_cubed_island_counts() -> Result<()> {
    let snap = capture(island(), 4)?;
    assert_eq!(snap.origin(), Pos::new(0, 64, 0));
    assert_eq!(snap.size(), (3, 3, 3));
    assert_eq!(snap.cells().len(), 5, "only non-empty cells inside the volume");
    assert_eq!(snap.objects().len(), 2, "zombie and cat are free");
    assert_eq!(snap.attached_count(), 1, "item frame hangs on the stone");

    let mut kinds: Vec<&str> = snap.objects().iter().map(|o| o.kind()).collect();
    kinds.sort();
    assert_eq!(kinds, vec!["cat", "zombie"]);

    let chest = snap
        .cells()
        .iter()
        .find(|c| c.kind() == "chest")
        .expect("chest captured");
    assert_eq!(chest.items().unwrap()[&0].kind, "diamond");
    Ok(())
}

#[test]
fn attached_objects_are_captured_exactly_once() -> Result<()> {
    // разный размер шага курсора не меняет классификацию
    for step in [1, 7, 4096] {
        let snap = capture(island(), step)?;
        let holder: Vec<_> = snap
            .cells()
            .iter()
            .filter(|c| !c.attached().is_empty())
            .collect();
        assert_eq!(holder.len(), 1);
        assert_eq!(holder[0].pos(), Pos::new(1, 64, 1));
        assert_eq!(holder[0].attached()[0].kind(), "item_frame");
        assert!(snap.objects().iter().all(|o| o.kind() != "item_frame"));

        let mut ids = Vec::new();
        for o in snap.objects() {
            all_ids(o, &mut ids);
        }
        for c in snap.cells() {
            for o in c.attached() {
                all_ids(o, &mut ids);
            }
        }
        let unique: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len(), "capture ids must be unique");
        assert_eq!(ids.len(), 3);
    }
    Ok(())
}

#[test]
fn frame_without_a_holder_becomes_free() -> Result<()> {
    let mut w = MemoryWorld::new("w");
    w.put(Pos::new(0, 64, 0), "stone");
    w.add_object("painting", Vec3::new(2.5, 66.5, 2.5), Compound::new());
    let snap = capture(w, 16)?;
    assert_eq!(snap.attached_count(), 0);
    assert_eq!(snap.objects().len(), 1);
    assert_eq!(snap.objects()[0].kind(), "painting");
    Ok(())
}

#[test]
fn missing_world_fails_the_capture() {
    let cfg = VaultConfig::default();
    let pipeline = CapturePipeline::new(Arc::new(VariantRegistry::modern()), &cfg);
    let mut host = MemoryHost::new();
    let mut sched = Scheduler::new();
    let p = pipeline.begin(&mut sched, Volume::new("nowhere", Pos::new(0, 0, 0), Pos::new(1, 1, 1)));
    sched.run_until_idle(&mut host, 10);
    assert!(matches!(
        p.outcome(),
        Some(Err(IslandVault::VaultError::MissingWorld(_)))
    ));
    assert!(sched.is_idle());
}
