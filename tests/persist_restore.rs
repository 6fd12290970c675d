use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use IslandVault::codec::ItemStack;
use IslandVault::config::{RecordCodec, VaultConfig};
use IslandVault::registry::VariantRegistry;
use IslandVault::snapshot::IslandSnapshot;
use IslandVault::tag::{Compound, Tag};
use IslandVault::world::{MemoryHost, MemoryWorld, World};
use IslandVault::{
    CapturePipeline, PersistenceManager, Pos, RestorePipeline, Scheduler, Vec3, VaultError, Volume,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("ivtest-persist-{prefix}-{pid}-{t}-{id}"))
}

fn source_world() -> MemoryWorld {
    let mut w = MemoryWorld::new("src");
    for x in 0..3 {
        for z in 0..3 {
            w.put(Pos::new(x, 64, z), "grass");
        }
    }
    w.put(Pos::new(1, 65, 1), "chest");
    let mut items = BTreeMap::new();
    items.insert(4u16, ItemStack::new("bread", 16).named("Lunch"));
    items.insert(5u16, ItemStack::new("arrow", 200));
    w.set_container_items(Pos::new(1, 65, 1), &items).unwrap();
    w.put(Pos::new(0, 65, 2), "sign");
    w.set_tile_data(
        Pos::new(0, 65, 2),
        &Compound::new().with("text", Tag::Text("home".into())),
    )
    .unwrap();

    // волк раньше кошки: ссылка owner разрешается отложенно
    let wolf = w.add_object("wolf", Vec3::new(0.5, 65.0, 0.5), Compound::new());
    let cat = w.add_object(
        "cat",
        Vec3::new(2.5, 65.0, 0.5),
        Compound::new().with("custom_name", Tag::Text("Tom".into())),
    );
    w.set_object_attribute(wolf, "owner", Tag::Long(cat.0 as i64)).unwrap();
    w.add_object(
        "item_frame",
        Vec3::new(2.5, 64.5, 2.5),
        Compound::new().with("facing", Tag::Int(1)),
    );
    w
}

fn capture(host: &mut MemoryHost, cfg: &VaultConfig, volume: Volume) -> Result<IslandSnapshot> {
    let pipeline = CapturePipeline::new(Arc::new(VariantRegistry::modern()), cfg);
    let mut sched = Scheduler::new();
    let p = pipeline.begin(&mut sched, volume);
    sched.run_until_idle(host, 1_000);
    Ok(p.outcome().expect("capture finished")?)
}

#[test]
fn capture_save_load_restore_fidelity() -> Result<()> {
    for codec in [RecordCodec::None, RecordCodec::Gzip, RecordCodec::Zstd] {
        let root = unique_root("fidelity");
        let cfg = VaultConfig::default()
            .with_store_dir(&root)
            .with_codec(codec)
            .with_capture_cells_per_tick(5)
            .with_batch(4, 2, 8);
        let mut host = MemoryHost::new()
            .with_world(source_world())
            .with_world(MemoryWorld::new("dest").with_id_base(1_000));

        let src_volume = Volume::new("src", Pos::new(0, 64, 0), Pos::new(2, 66, 2));
        let snap = capture(&mut host, &cfg, src_volume)?;
        assert_eq!(snap.cells().len(), 11);

        let mgr = PersistenceManager::open(&cfg)?;
        mgr.save("U1", 42, &snap)?;
        let rec = mgr.load("U1", 42)?.expect("record exists");
        assert_eq!(rec.owner, "U1");
        assert_eq!(rec.timestamp, 42);
        assert_eq!(rec.snapshot, snap, "codec {codec} must be lossless");

        let dest_volume = Volume::sized("dest", Pos::new(100, 70, -5), snap.size());
        let restore = RestorePipeline::new(Arc::new(VariantRegistry::modern()), &cfg);
        let mut sched = Scheduler::new();
        let done = restore.begin(&mut sched, Arc::new(rec.snapshot), dest_volume.clone(), None);
        sched.run_until_idle(&mut host, 10_000);
        assert_eq!(done.outcome(), Some(Ok(true)));

        let dest = host.world("dest").unwrap();
        let shift = Pos::new(100, 6, -5);
        for c in snap.cells() {
            let got = dest.cell(c.pos().add(shift)).expect("cell restored");
            assert_eq!(&got, c.state());
        }
        assert_eq!(
            dest.container_items(Pos::new(101, 71, -4)).unwrap()[&4].name.as_deref(),
            Some("Lunch")
        );
        // стек больше 127 не обрезается
        assert_eq!(dest.container_items(Pos::new(101, 71, -4)).unwrap()[&5].count, 200);
        assert_eq!(
            dest.tile_data(Pos::new(100, 71, -3)).unwrap().get_str("text"),
            Some("home")
        );

        // ссылки указывают на новые живые идентификаторы
        let cat = dest.objects().find(|o| o.kind == "cat").unwrap();
        let wolf = dest.objects().find(|o| o.kind == "wolf").unwrap();
        assert!(cat.id.0 >= 1_000);
        assert_eq!(wolf.attributes.get("owner"), Some(&Tag::Long(cat.id.0 as i64)));
        assert_eq!(cat.position, Vec3::new(102.5, 71.0, -4.5));

        // повторный захват назначения даёт ту же структуру
        let again = capture(&mut host, &cfg, dest_volume)?;
        assert_eq!(again.cells().len(), snap.cells().len());
        assert_eq!(again.objects().len(), snap.objects().len());
        assert_eq!(again.attached_count(), snap.attached_count());
        let _ = fs::remove_dir_all(&root);
    }
    Ok(())
}

#[test]
fn save_then_list_reports_the_timestamp() -> Result<()> {
    let root = unique_root("list");
    let cfg = VaultConfig::default().with_store_dir(&root);
    let mgr = PersistenceManager::open(&cfg)?;
    let snap = IslandSnapshot::new(Pos::new(0, 0, 0), (1, 1, 1), Vec::new(), Vec::new());
    mgr.save("U1", 1000, &snap)?;
    assert_eq!(mgr.list("U1")?, vec![1000]);
    assert!(mgr.list("U2")?.is_empty());
    assert!(mgr.load("U1", 999)?.is_none());
    assert!(mgr.delete("U1", 1000)?);
    assert!(!mgr.delete("U1", 1000)?);
    assert!(mgr.list("U1")?.is_empty());
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn retention_keeps_min_of_k_and_n() -> Result<()> {
    let root = unique_root("retention");
    let cfg = VaultConfig::default().with_store_dir(&root);
    let mgr = PersistenceManager::open(&cfg)?;
    let snap = IslandSnapshot::new(Pos::new(0, 0, 0), (1, 1, 1), Vec::new(), Vec::new());
    for n in 0..5u64 {
        for k in 0..6usize {
            let owner = format!("o{n}-{k}");
            for ts in 1..=n {
                mgr.save(&owner, ts * 10, &snap)?;
            }
            let removed = mgr.prune(&owner, k)?;
            let left = mgr.list(&owner)?;
            assert_eq!(left.len(), k.min(n as usize), "n={n} k={k}");
            assert_eq!(removed.len() + left.len(), n as usize);
            // остаются самые новые
            let expect: Vec<u64> = ((n - left.len() as u64 + 1)..=n).map(|t| t * 10).collect();
            assert_eq!(left, expect);
        }
    }
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn damaged_record_is_a_format_error() -> Result<()> {
    let root = unique_root("damaged");
    let cfg = VaultConfig::default().with_store_dir(&root);
    let mgr = PersistenceManager::open(&cfg)?;
    let snap = IslandSnapshot::new(Pos::new(3, 4, 5), (2, 2, 2), Vec::new(), Vec::new());
    let path = mgr.save("U1", 7, &snap)?;

    let mut bytes = fs::read(&path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, &bytes)?;
    assert!(matches!(mgr.load("U1", 7), Err(VaultError::Format(_))));

    fs::write(&path, b"definitely not a record")?;
    assert!(matches!(mgr.load("U1", 7), Err(VaultError::Format(_))));
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn async_save_and_load_come_back_on_the_tick_thread() -> Result<()> {
    let root = unique_root("async");
    let cfg = VaultConfig::default().with_store_dir(&root).with_io_threads(2);
    let mgr = PersistenceManager::open(&cfg)?;
    let mut host = MemoryHost::new();
    let mut sched = Scheduler::new();
    let snap = Arc::new(IslandSnapshot::new(Pos::new(0, 0, 0), (1, 1, 1), Vec::new(), Vec::new()));

    let saved = mgr.save_async(&sched, "U9", 5, snap.clone());
    assert!(sched.run_until(&mut host, 5_000, || saved.is_done()));
    assert!(saved.outcome().unwrap().is_ok());

    let loaded = mgr.load_async(&sched, "U9", 5);
    assert!(sched.run_until(&mut host, 5_000, || loaded.is_done()));
    let rec = loaded.outcome().unwrap()?.expect("record");
    assert_eq!(rec.snapshot, *snap);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}
