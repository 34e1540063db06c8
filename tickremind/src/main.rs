use failure::Error;
use log::info;
use std::path::PathBuf;
use structopt::StructOpt;

use tickremind::config::Config;
use tickremind::{db, webserver};

#[derive(Clone, Debug, StructOpt)]
#[structopt(
    name = "tickremind",
    about = "Tracks rules and their ticks over HTTP, behind an authenticating proxy"
)]
struct Options {
    /// Configuration file path
    #[structopt(
        short = "c",
        long = "config",
        default_value = "tickremind.toml",
        parse(from_os_str)
    )]
    config: PathBuf,
}

#[actix_web::main]
async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();
    env_logger::init();

    let options = Options::from_args();

    // Load config
    let config = Config::load(&options.config)?;
    info!("loaded config from {}", options.config.display());

    // Storage actors
    let pool = db::open_pool(&config.database.url, config.database.pool_size)?;
    let db_addr = db::start_executors(pool, config.database.executors);

    webserver::start(config, db_addr)?.await?;

    info!("server stopped");

    Ok(())
}
