use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::*;
use serde::Deserialize;
use structopt::StructOpt;
use tokio::net::TcpListener;

#[derive(Debug, StructOpt)]
#[structopt(name = "serve", about = "Serve the Kusina API.")]
struct Opt {
    /// Configuration file
    #[structopt(parse(from_os_str))]
    config: PathBuf,
}

#[derive(Deserialize, Debug)]
struct Config {
    #[serde(flatten)]
    kusina: kusina::config::Config,
    #[serde(default)]
    env_logger: kusina::config::EnvLogger,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();

    let mut config_buf = String::new();
    File::open(&opt.config)?.read_to_string(&mut config_buf)?;
    let config: Config = toml::from_str(&config_buf)?;

    config.env_logger.builder().init();
    debug!("Options: {:?}", opt);

    let app = kusina::Kusina::new(config.kusina.db.build()?);
    app.setup()?;

    let listener = TcpListener::bind(&config.kusina.listener.addr)
        .await
        .context("bind")?;
    info!("Listening on: {:?}", listener.local_addr()?);
    axum::serve(listener, app.router()).await?;
    Ok(())
}
