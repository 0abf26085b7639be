use clap::Parser;

mod cli;
mod commands;

use cli::{Args, Commands};
use redirectfs::config::{load_config, load_config_from, Config};
use redirectfs::session::API_VERSION;
use redirectfs::Session;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => {
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> redirectfs::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("REDIRECTFS_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("{}", API_VERSION);
            Ok(0)
        }
        Commands::Config { action } => {
            commands::handle_config_command(action)?;
            Ok(0)
        }
        command => {
            let config = match &args.config {
                Some(path) => load_config_from(path)?,
                None => load_config()?,
            };
            run_with_session(&config, command).await
        }
    }
}

async fn run_with_session(config: &Config, command: Commands) -> redirectfs::Result<i32> {
    let session = Session::from_config(config)?;

    let result = match command {
        Commands::Layers { porcelain, json } => commands::list_layers(&session, porcelain, json),
        Commands::Ls { path, client, json } => {
            commands::list_dir(&session, client, &path, json).await
        }
        Commands::Cat { path, client } => commands::cat_file(&session, client, &path).await,
        Commands::Stat { path, client, json } => {
            commands::stat_path(&session, client, &path, json).await
        }
        Commands::Hide { layer, path } => commands::hide_path(&session, &layer, &path),
        Commands::Version | Commands::Config { .. } => Ok(()),
    };

    session.shutdown();
    result.map(|_| 0)
}
