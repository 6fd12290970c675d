use anyhow::Result;

use IslandVault::config::VaultConfig;

pub fn exec(cfg: &VaultConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(cfg)?);
    } else {
        println!("{cfg}");
    }
    Ok(())
}
