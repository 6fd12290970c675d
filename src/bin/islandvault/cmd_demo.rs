use anyhow::{anyhow, Result};
use std::sync::Arc;

use IslandVault::capture::CapturePipeline;
use IslandVault::config::VaultConfig;
use IslandVault::metrics;
use IslandVault::registry::VariantRegistry;
use IslandVault::restore::RestorePipeline;
use IslandVault::sched::Scheduler;
use IslandVault::snapshot::{Pos, Vec3, Volume};
use IslandVault::store::PersistenceManager;
use IslandVault::tag::{Compound, Tag};
use IslandVault::world::{MemoryHost, MemoryWorld, World};

use crate::util::now_ms;

/// Небольшой остров: платформа 5x5, сундук, кошка в лодке и рамка на стене.
fn demo_world() -> Result<MemoryWorld> {
    let mut w = MemoryWorld::new("demo");
    for x in 0..5 {
        for z in 0..5 {
            w.put(Pos::new(x, 64, z), "grass");
        }
    }
    w.put(Pos::new(2, 65, 4), "chest");
    w.put(Pos::new(0, 65, 0), "oak_log");
    w.put(Pos::new(0, 66, 0), "oak_log");

    let boat = w.add_object("boat", Vec3::new(2.5, 65.0, 2.5), Compound::new());
    let rider = w.add_object(
        "cat",
        Vec3::new(2.5, 65.5, 2.5),
        Compound::new().with("custom_name", Tag::Text("Biscuit".into())),
    );
    // посадка кошки в лодку
    w.mount(boat, rider)?;
    w.add_object(
        "item_frame",
        Vec3::new(0.5, 66.5, 1.0),
        Compound::new().with("facing", Tag::Int(2)),
    );
    Ok(w)
}

/// Захват демо-острова, запись, чтение обратно и восстановление в соседний мир.
pub fn exec(cfg: &VaultConfig, owner: String, ts: Option<u64>) -> Result<()> {
    metrics::reset();
    let registry = Arc::new(VariantRegistry::modern());
    let mut host = MemoryHost::new()
        .with_world(demo_world()?)
        .with_world(MemoryWorld::new("copy").with_id_base(10_000));
    let mut sched = Scheduler::new();

    let volume = Volume::new("demo", Pos::new(0, 64, 0), Pos::new(4, 67, 4));
    let capture = CapturePipeline::new(registry.clone(), cfg);
    let promise = capture.begin(&mut sched, volume);
    sched.run_until_idle(&mut host, 1_000);

    let snap = promise
        .outcome()
        .ok_or_else(|| anyhow!("capture did not finish"))??;
    let mgr = PersistenceManager::open(cfg)?;
    let ts = ts.unwrap_or_else(now_ms);
    let path = mgr.save(&owner, ts, &snap)?;
    println!(
        "captured {} cells, {} free objects, {} attached -> {}",
        snap.cells().len(),
        snap.objects().len(),
        snap.attached_count(),
        path.display()
    );

    let rec = mgr
        .load(&owner, ts)?
        .ok_or_else(|| anyhow!("record {owner}/{ts} vanished after save"))?;
    let dest = Volume::sized("copy", Pos::new(100, 64, 100), rec.snapshot.size());
    let restore = RestorePipeline::new(registry, cfg);
    let done = restore.begin(&mut sched, Arc::new(rec.snapshot), dest, None);
    sched.run_until_idle(&mut host, 10_000);
    done.outcome()
        .ok_or_else(|| anyhow!("restore did not finish"))??;

    let m = metrics::snapshot();
    println!(
        "restored {} cells, {} objects; {} unit failures; refs resolved {:.0}%; avg record {:.0} bytes",
        m.cells_restored,
        m.objects_restored,
        m.unit_failures,
        m.deferred_success_ratio() * 100.0,
        m.avg_record_bytes()
    );
    Ok(())
}
