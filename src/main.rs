//! tinydb - interactive shell over the transactional storage core

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tinydb::database::{Database, DatabaseConfig};
use tinydb::session::Session;
use tinydb::storage::wal::WalConfig;

/// tinydb - a small transactional storage engine
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./tinydb_data")]
    data_dir: PathBuf,

    /// Page cache capacity in pages
    #[arg(short = 'c', long, default_value = "64")]
    cache_pages: usize,

    /// Do not sync the log on every append
    #[arg(long)]
    no_sync: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = DatabaseConfig {
        cache_pages: args.cache_pages,
        wal: WalConfig {
            sync_on_append: !args.no_sync,
        },
    };
    let database = Database::open_or_create(&args.data_dir, config).with_context(|| {
        format!(
            "Failed to open database in {}",
            args.data_dir.display()
        )
    })?;

    println!("tinydb {} ({})", env!("CARGO_PKG_VERSION"), args.data_dir.display());
    println!("Type 'quit' to exit.");

    {
        let mut session = Session::new(&database);
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("tinydb> ");
            stdout.flush().context("Failed to write prompt")?;

            let mut line = String::new();
            if stdin
                .lock()
                .read_line(&mut line)
                .context("Failed to read command")?
                == 0
            {
                break;
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
                break;
            }
            println!("{}", session.execute(line));
        }
    }

    database.close().context("Failed to close database")?;
    Ok(())
}
