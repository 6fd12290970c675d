use anyhow::Result;
use serde_json::json;

use IslandVault::config::VaultConfig;
use IslandVault::store::RecordStore;

pub fn exec(cfg: &VaultConfig, owner: Option<String>, json: bool) -> Result<()> {
    let store = RecordStore::new(cfg.store_dir.clone(), cfg.codec);

    let Some(owner) = owner else {
        let owners = store.owners()?;
        if json {
            println!("{}", serde_json::to_string(&owners)?);
        } else if owners.is_empty() {
            println!("(no owners in {})", store.root().display());
        } else {
            for o in owners {
                println!("{o}");
            }
        }
        return Ok(());
    };

    let stamps = store.list(&owner)?;
    if json {
        let mut rows = Vec::with_capacity(stamps.len());
        for ts in &stamps {
            let (schema, codec, bytes) = match store.header(&owner, *ts)? {
                Some((h, len)) => (Some(h.schema), Some(h.codec.to_string()), Some(len)),
                None => (None, None, None),
            };
            rows.push(json!({
                "timestamp": ts,
                "schema": schema,
                "codec": codec,
                "bytes": bytes,
            }));
        }
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }

    if stamps.is_empty() {
        println!("(no records for '{owner}')");
        return Ok(());
    }
    println!("{:>16}  {:>6}  {:>5}  {:>10}", "timestamp", "schema", "codec", "bytes");
    for ts in stamps {
        match store.header(&owner, ts) {
            Ok(Some((h, len))) => println!("{:>16}  {:>6}  {:>5}  {:>10}", ts, h.schema, h.codec, len),
            Ok(None) => println!("{:>16}  (vanished)", ts),
            // битый заголовок не прерывает листинг
            Err(e) => println!("{:>16}  unreadable: {}", ts, e),
        }
    }
    Ok(())
}
