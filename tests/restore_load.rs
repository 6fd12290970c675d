use anyhow::Result;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use IslandVault::codec::CellState;
use IslandVault::config::VaultConfig;
use IslandVault::registry::VariantRegistry;
use IslandVault::snapshot::{CellSnapshot, IslandSnapshot, ObjectSnapshot};
use IslandVault::tag::{Compound, Tag};
use IslandVault::world::{MemoryHost, MemoryWorld, ObjectId, World};
use IslandVault::{Pos, RestorePipeline, Scheduler, Vec3, VaultError, Volume};

/// Плита 8x1x5 и две кошки над ней.
fn slab_snapshot() -> Result<IslandSnapshot> {
    let mut cells = Vec::new();
    for x in 0..8 {
        for z in 0..5 {
            cells.push(CellSnapshot::new(Pos::new(x, 0, z), CellState::new("stone"))?);
        }
    }
    let objects = vec![
        ObjectSnapshot::new("cat", 1, Vec3::new(1.5, 1.0, 1.5), Compound::new())?,
        ObjectSnapshot::new("cat", 2, Vec3::new(6.5, 1.0, 3.5), Compound::new())?,
    ];
    Ok(IslandSnapshot::new(Pos::new(0, 0, 0), (8, 1, 5), cells, objects))
}

/// Восстановить при заданной нагрузке; вернуть все замеры прогресса.
fn restore_at_load(load: f64) -> Result<Vec<f64>> {
    let cfg = VaultConfig::default().with_batch(8, 2, 64);
    let mut host = MemoryHost::new().with_world(MemoryWorld::new("dest"));
    host.set_load(load);
    let mut sched = Scheduler::new();

    let snap = Arc::new(slab_snapshot()?);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let pipeline = RestorePipeline::new(Arc::new(VariantRegistry::modern()), &cfg);
    let done = pipeline.begin(
        &mut sched,
        snap.clone(),
        Volume::sized("dest", Pos::new(0, 10, 0), snap.size()),
        Some(Box::new(move |f| sink.borrow_mut().push(f))),
    );
    sched.run_until_idle(&mut host, 10_000);
    assert_eq!(done.outcome(), Some(Ok(true)));

    let w = host.world("dest").unwrap();
    assert_eq!(w.cell_count(), 40);
    assert_eq!(w.object_count(), 2);
    assert_eq!(w.cell(Pos::new(7, 10, 4)).unwrap().kind, "stone");

    let out = seen.borrow().clone();
    Ok(out)
}

#[test]
fn batch_size_follows_host_load() -> Result<()> {
    let busy = restore_at_load(5.0)?;
    let idle = restore_at_load(20.0)?;

    for seen in [&busy, &idle] {
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress is monotonic");
        assert_eq!(seen.last().copied(), Some(1.0));
    }
    // 82 единицы: под нагрузкой батч падает до 2, без нагрузки растёт до 64
    assert!(busy.len() >= 30, "busy host took {} steps", busy.len());
    assert!(idle.len() <= 4, "idle host took {} steps", idle.len());
    Ok(())
}

#[test]
fn unresolvable_reference_is_abandoned_after_the_attempt_budget() -> Result<()> {
    let wolf = ObjectSnapshot::new(
        "wolf",
        1,
        Vec3::new(0.5, 1.0, 0.5),
        Compound::new().with("owner", Tag::Long(99)),
    )?;
    let floor = CellSnapshot::new(Pos::new(0, 0, 0), CellState::new("grass"))?;
    let snap = Arc::new(IslandSnapshot::new(Pos::new(0, 0, 0), (1, 2, 1), vec![floor], vec![wolf]));

    let cfg = VaultConfig::default().with_deferred_ref_attempts(3);
    let mut host = MemoryHost::new().with_world(MemoryWorld::new("dest").with_id_base(1_000));
    let mut sched = Scheduler::new();
    let pipeline = RestorePipeline::new(Arc::new(VariantRegistry::modern()), &cfg);
    let done = pipeline.begin(
        &mut sched,
        snap.clone(),
        Volume::sized("dest", Pos::new(0, 0, 0), snap.size()),
        None,
    );
    let ticks = sched.run_until_idle(&mut host, 1_000);
    assert_eq!(done.outcome(), Some(Ok(true)));
    assert!(ticks <= 10, "deferred reference kept retrying for {ticks} ticks");

    let w = host.world("dest").unwrap();
    let wolf = w.objects().find(|o| o.kind == "wolf").expect("wolf restored");
    assert!(wolf.attributes.get("owner").is_none());
    Ok(())
}

#[test]
fn losing_the_destination_world_fails_the_restore() -> Result<()> {
    let cfg = VaultConfig::default().with_batch(2, 2, 2);
    let mut host = MemoryHost::new().with_world(MemoryWorld::new("dest"));
    host.memory_world_mut("dest")
        .unwrap()
        .put(Pos::new(3, 0, 3), "gravel");
    let mut sched = Scheduler::new();

    let snap = Arc::new(slab_snapshot()?);
    let pipeline = RestorePipeline::new(Arc::new(VariantRegistry::modern()), &cfg);
    let done = pipeline.begin(
        &mut sched,
        snap.clone(),
        Volume::sized("dest", Pos::new(0, 0, 0), snap.size()),
        None,
    );
    for _ in 0..3 {
        sched.tick(&mut host);
    }
    assert!(!done.is_done());

    let gone = host.remove_world("dest").expect("world existed");
    assert!(gone.cell_count() < 40);
    sched.run_until_idle(&mut host, 100);
    assert_eq!(
        done.outcome(),
        Some(Err(VaultError::MissingWorld("dest".into())))
    );
    assert!(sched.is_idle());
    Ok(())
}

#[test]
fn cancelled_restore_drops_its_pending_references() -> Result<()> {
    // волк ссылается на объект 900, которого пока нет ни в снимке, ни в мире
    let wolf = ObjectSnapshot::new(
        "wolf",
        1,
        Vec3::new(0.5, 1.0, 0.5),
        Compound::new().with("owner", Tag::Long(900)),
    )?;
    let cat = ObjectSnapshot::new("cat", 2, Vec3::new(0.5, 1.0, 0.5), Compound::new())?;
    let floor = CellSnapshot::new(Pos::new(0, 0, 0), CellState::new("grass"))?;
    let snap = Arc::new(IslandSnapshot::new(
        Pos::new(0, 0, 0),
        (1, 2, 1),
        vec![floor],
        vec![wolf, cat],
    ));

    let cfg = VaultConfig::default()
        .with_batch(1, 1, 1)
        .with_deferred_ref_attempts(50);
    let mut host = MemoryHost::new().with_world(MemoryWorld::new("dest").with_id_base(899));
    let mut sched = Scheduler::new();
    let pipeline = RestorePipeline::new(Arc::new(VariantRegistry::modern()), &cfg);
    let done = pipeline.begin(
        &mut sched,
        snap.clone(),
        Volume::sized("dest", Pos::new(0, 0, 0), snap.size()),
        None,
    );

    let mut ticks = 0;
    while host.world("dest").unwrap().objects().all(|o| o.kind != "wolf") {
        sched.tick(&mut host);
        ticks += 1;
        assert!(ticks < 20, "wolf never spawned");
    }
    assert!(!done.is_done(), "cat is still queued");
    assert!(done.cancel());
    assert_eq!(done.outcome(), Some(Err(VaultError::Cancelled)));

    // цель появляется уже после отмены
    let late = host
        .memory_world_mut("dest")
        .unwrap()
        .add_object("villager", Vec3::new(0.5, 1.0, 0.5), Compound::new());
    assert_eq!(late, ObjectId(900));
    for _ in 0..5 {
        sched.tick(&mut host);
    }

    let w = host.world("dest").unwrap();
    let wolf = w.objects().find(|o| o.kind == "wolf").expect("wolf restored");
    assert!(wolf.attributes.get("owner").is_none(), "no writes after cancel");
    assert!(w.objects().all(|o| o.kind != "cat"));
    assert!(sched.is_idle());
    Ok(())
}
