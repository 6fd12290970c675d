use anyhow::Result;

use IslandVault::config::VaultConfig;
use IslandVault::store::RecordStore;

pub fn exec(cfg: &VaultConfig, owner: String, keep: usize) -> Result<()> {
    let store = RecordStore::new(cfg.store_dir.clone(), cfg.codec);
    let removed = store.prune(&owner, keep)?;
    if removed.is_empty() {
        println!("nothing to prune for '{owner}' (keep={keep})");
    } else {
        println!("pruned {} records of '{}': {:?}", removed.len(), owner, removed);
    }
    Ok(())
}
