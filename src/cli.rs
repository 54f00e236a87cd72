use clap::{Parser, Subcommand};
use directories::BaseDirs;
use once_cell::sync::Lazy;
use std::{ffi::OsString, net::SocketAddr, path::PathBuf};

use crate::entity::user::Role;

pub static CLI: Lazy<Cli> = Lazy::new(parse_args);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(
        short,
        long,
        env = "DUES_DB",
        value_name = "FILE",
        help = "Path to the SQLite database file (tries to create if not exists)",
        default_value = get_default_database_file()
    )]
    pub database: PathBuf,
    #[arg(
        short,
        long,
        env = "DUES_LISTEN",
        value_name = "ADDR",
        help = "Address the HTTP API listens on",
        default_value = "127.0.0.1:8080"
    )]
    pub listen: SocketAddr,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve the HTTP API (the default)
    Serve,
    /// Register a user identity that the auth layer can act as
    AddUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "member", help = "admin or member")]
        role: Role,
    },
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

fn get_default_database_file() -> OsString {
    let db_name = "dues_ledger.sqlite";
    if cfg!(target_os = "android") {
        db_name.into()
    } else {
        match BaseDirs::new() {
            Some(base_dirs) => base_dirs.data_dir().join(db_name).into(),
            None => db_name.into(),
        }
    }
}
