#![allow(dead_code)]
#[macro_use]
mod errors;
mod pager;
mod storage;

use std::fs::OpenOptions;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use storage::btree::{BTreeFile, Cell};
use storage::catalog;
use storage::cursor::Cursor;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Direct, non-SQL debugging harness over the B-Tree file layer: opens (or
/// creates) a single file of B-Trees and runs one subcommand against it, the
/// way `sqlite3 file.db '.dump'` pokes at a database file without a shell.
#[derive(Parser)]
#[command(name = "mysqlite-btree-cli", version = VERSION, about = "Debug CLI over the B-Tree file layer.")]
struct Cli {
    /// Path to the B-Tree file. Created fresh if it doesn't exist.
    #[arg(long, env = "MYSQLITE_BTREE_FILE", default_value = "mysqlite.db")]
    file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new table tree and register it in the catalog.
    CreateTable { name: String },
    /// Insert a row into a table tree by integer key.
    Put { table: String, key: u32, value: String },
    /// Look up a row in a table tree by integer key.
    Get { table: String, key: u32 },
    /// Create a new index tree over an existing table.
    CreateIndex {
        name: String,
        #[arg(long = "table")]
        table: String,
    },
    /// Insert a (secondary key, primary key) pair into an index tree.
    IndexPut { index: String, key_idx: u32, key_pk: u32 },
    /// Look up a secondary key in an index tree and print the row it leads to.
    IndexGet { index: String, key_idx: u32 },
    /// Print every row of a table tree in ascending key order.
    Dump { table: String },
}

fn main() {
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open("mysqlite.log")
        .expect("Failed to open log file");

    tracing_subscriber::fmt()
        .with_writer(file)
        .with_ansi(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        println!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), errors::Error> {
    let mut bt = BTreeFile::open(&cli.file)?;
    info!(file = %cli.file.display(), "Opened B-Tree file");

    match cli.command {
        Command::CreateTable { name } => {
            let root = catalog::create_table(&mut bt, &name)?;
            println!("Created table '{}' at root page {}", name, root);
        }
        Command::Put { table, key, value } => {
            let entry = catalog::find_root(&mut bt, &table)?;
            bt.insert_in_table(entry.root_page, key, value.as_bytes())?;
            println!("Inserted key {} into '{}'", key, table);
        }
        Command::Get { table, key } => {
            let entry = catalog::find_root(&mut bt, &table)?;
            let data = bt.find(entry.root_page, key)?;
            println!("{}", String::from_utf8_lossy(&data));
        }
        Command::CreateIndex { name, table } => {
            let root = catalog::create_index(&mut bt, &name, &table)?;
            println!("Created index '{}' over '{}' at root page {}", name, table, root);
        }
        Command::IndexPut { index, key_idx, key_pk } => {
            let entry = catalog::find_root(&mut bt, &index)?;
            bt.insert_in_index(entry.root_page, key_idx, key_pk)?;
            println!("Inserted ({}, {}) into index '{}'", key_idx, key_pk, index);
        }
        Command::IndexGet { index, key_idx } => {
            let entry = catalog::find_root(&mut bt, &index)?;
            let data = bt.find_via_index(entry.root_page, entry.table_root, key_idx)?;
            println!("{}", String::from_utf8_lossy(&data));
        }
        Command::Dump { table } => {
            let entry = catalog::find_root(&mut bt, &table)?;
            if entry.kind != catalog::EntryKind::Table {
                return Err(err!(Schema, "'{}' is not a table", table));
            }
            dump_table(&mut bt, entry.root_page)?;
        }
    }

    bt.flush()?;
    Ok(())
}

fn dump_table(bt: &mut BTreeFile, root: pager::PageNum) -> Result<(), errors::Error> {
    let mut cursor = Cursor::start(bt, root)?;
    while !cursor.is_done() {
        if let Some(Cell::TableLeaf { key, data }) = cursor.current()? {
            println!("{}\t{}", key, String::from_utf8_lossy(&data));
        }
        cursor.advance()?;
    }
    Ok(())
}
