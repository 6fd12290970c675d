use anyhow::Result;
use env_logger::{Builder, Env};
use log::error;

mod cli;
mod util;
mod cmd_list;
mod cmd_inspect;
mod cmd_prune;
mod cmd_delete;
mod cmd_config;
mod cmd_demo;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт info.
    // Пример: RUST_LOG=debug ./islandvault ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse_args();
    let cfg = util::config_for(cli.store.clone());
    match cli.cmd {
        cli::Cmd::List { owner, json } =>
            cmd_list::exec(&cfg, owner, json),

        cli::Cmd::Inspect { owner, ts, json } =>
            cmd_inspect::exec(&cfg, owner, ts, json),

        cli::Cmd::Prune { owner, keep } =>
            cmd_prune::exec(&cfg, owner, keep),

        cli::Cmd::Delete { owner, ts } =>
            cmd_delete::exec(&cfg, owner, ts),

        cli::Cmd::Config { json } =>
            cmd_config::exec(&cfg, json),

        // Демо: остров в памяти -> захват -> запись
        cli::Cmd::Demo { owner, ts } =>
            cmd_demo::exec(&cfg, owner, ts),
    }
}
