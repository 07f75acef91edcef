mod broadcaster;
mod configuration;
mod gateway;
mod search;
mod socket;
mod subscriptions;
#[cfg(test)]
mod testing;
mod time;
mod upstream;
mod web;
mod web_cache;

use clap::Parser;
use configuration::Configuration;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Configuration::parse();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(web::main(config))
}
