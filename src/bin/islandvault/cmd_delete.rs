use anyhow::{bail, Result};

use IslandVault::config::VaultConfig;
use IslandVault::store::RecordStore;

pub fn exec(cfg: &VaultConfig, owner: String, ts: u64) -> Result<()> {
    let store = RecordStore::new(cfg.store_dir.clone(), cfg.codec);
    if !store.delete(&owner, ts)? {
        bail!("no record {}/{}", owner, ts);
    }
    println!("deleted {owner}/{ts}");
    Ok(())
}
