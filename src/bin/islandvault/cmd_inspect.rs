use anyhow::{anyhow, Result};

use IslandVault::codec::ToTag;
use IslandVault::config::VaultConfig;
use IslandVault::store::RecordStore;
use IslandVault::tag::json::to_json;

pub fn exec(cfg: &VaultConfig, owner: String, ts: u64, json: bool) -> Result<()> {
    let store = RecordStore::new(cfg.store_dir.clone(), cfg.codec);
    let rec = store
        .load(&owner, ts)?
        .ok_or_else(|| anyhow!("no record {}/{} in {}", owner, ts, store.root().display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(&rec.to_tag()))?);
        return Ok(());
    }

    let snap = &rec.snapshot;
    let (w, h, l) = snap.size();
    let passengers: usize = snap
        .objects()
        .iter()
        .map(|o| o.chain_len() - 1)
        .sum();
    println!("owner:     {}", rec.owner);
    println!("timestamp: {}", rec.timestamp);
    println!("schema:    v{}", rec.schema_version);
    println!("origin:    {}", snap.origin());
    println!("size:      {}x{}x{}", w, h, l);
    println!("cells:     {}", snap.cells().len());
    println!("objects:   {} free (+{} chained), {} attached", snap.objects().len(), passengers, snap.attached_count());
    Ok(())
}
