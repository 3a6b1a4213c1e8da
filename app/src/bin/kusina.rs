use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;
use structopt::StructOpt;

use infra::documents::HasMeta;
use kusina::inventory::ListInventory;
use kusina::menu::ListMenu;
use kusina::services::Queryable;

#[derive(Debug, StructOpt)]
#[structopt(name = "kusina", about = "Kusina back office CLI")]
struct Opt {
    /// Configuration file
    #[structopt(parse(from_os_str))]
    config: PathBuf,
    #[structopt(subcommand)]
    command: Commands,
}

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "setup", about = "Initialize the database and seed data")]
    Setup,
    #[structopt(name = "show-menu", about = "List menu items")]
    ShowMenu,
    #[structopt(name = "show-inventory", about = "List inventory items")]
    ShowInventory,
}

#[derive(Deserialize, Debug)]
struct Config {
    #[serde(flatten)]
    kusina: kusina::config::Config,
    #[serde(default)]
    env_logger: kusina::config::EnvLogger,
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let mut config_buf = String::new();
    File::open(&opt.config)?.read_to_string(&mut config_buf)?;
    let config: Config = toml::from_str(&config_buf)?;

    config.env_logger.builder().init();

    let app = kusina::Kusina::new(config.kusina.db.build()?);

    match opt.command {
        Commands::Setup => {
            app.setup()?;
        }
        Commands::ShowMenu => {
            let list = app.menu().query(ListMenu::default())?;
            for item in list {
                println!(
                    "{}: {} [{}] ₱{}.{:02}",
                    item.meta().id,
                    item.name,
                    item.category,
                    item.price / 100,
                    item.price % 100
                );
            }
        }
        Commands::ShowInventory => {
            let list = app.inventory().query(ListInventory::default())?;
            for item in list {
                println!(
                    "{}: {} {:.2}{} ({})",
                    item.meta().id,
                    item.name,
                    item.current_stock,
                    item.unit,
                    item.status.as_str()
                );
            }
        }
    }

    Ok(())
}
