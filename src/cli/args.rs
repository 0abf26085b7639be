use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "redirectfs")]
#[command(about = "Inspect a layered filesystem redirection stack from the command line")]
pub struct Args {
    #[arg(long, global = true, help = "Use this config file instead of the default one")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Print the engine API version")]
    Version,
    #[command(about = "List configured layers, highest priority first")]
    Layers {
        #[arg(long, help = "Machine-readable output (tab-separated values)")]
        porcelain: bool,

        #[arg(long, help = "JSON output")]
        json: bool,
    },
    #[command(about = "List a directory through the layer stack")]
    Ls {
        #[arg(help = "Virtual directory path")]
        path: String,

        #[arg(short, long, default_value_t = 1, help = "Client id issuing the request")]
        client: u32,

        #[arg(long, help = "JSON output")]
        json: bool,
    },
    #[command(about = "Print a file read through the layer stack")]
    Cat {
        #[arg(help = "Virtual file path")]
        path: String,

        #[arg(short, long, default_value_t = 1, help = "Client id issuing the request")]
        client: u32,
    },
    #[command(about = "Show file status through the layer stack")]
    Stat {
        #[arg(help = "Virtual path")]
        path: String,

        #[arg(short, long, default_value_t = 1, help = "Client id issuing the request")]
        client: u32,

        #[arg(long, help = "JSON output")]
        json: bool,
    },
    #[command(about = "Hide a path in a layer by creating a tombstone")]
    Hide {
        #[arg(help = "Layer name")]
        layer: String,

        #[arg(help = "Virtual path to hide")]
        path: String,
    },
    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    #[command(about = "Show current configuration values")]
    Show,
    #[command(about = "Show config file path")]
    Path,
    #[command(about = "Write a default config file if none exists")]
    Init,
}
