use crate::cli::ConfigAction;
use redirectfs::config::{get_config_path, load_config, save_config, Config};
use redirectfs::Result;

pub fn handle_config_command(action: Option<ConfigAction>) -> Result<()> {
    match action {
        Some(ConfigAction::Path) => {
            let config_path = get_config_path()?;
            println!("Config location: {}", config_path.display());
        }
        Some(ConfigAction::Init) => {
            let config_path = get_config_path()?;
            if config_path.exists() {
                println!("Config already exists at {}", config_path.display());
            } else {
                save_config(&Config::default())?;
                println!("Created default config at {}", config_path.display());
            }
        }
        None | Some(ConfigAction::Show) => {
            let config_path = get_config_path()?;
            let config = load_config()?;
            println!("Config file: {}", config_path.display());
            println!();
            println!("Current configuration:");
            println!("  Session:");
            println!("    workers: {}", config.session.get_workers());
            println!("    queue_capacity: {}", config.session.get_queue_capacity());
            println!(
                "    max_open_handles: {}",
                config.session.get_max_open_handles()
            );
            println!("  Native:");
            println!("    root: {}", config.native.get_root().display());
            println!("  Layers:");
            if config.layers.is_empty() {
                println!("    (none)");
            }
            for layer in &config.layers {
                println!(
                    "    {} [{}] {} -> {}",
                    layer.name, layer.mode, layer.prefix, layer.replacement
                );
                println!(
                    "      writable: {}, fallback_on_error: {}, active: {}",
                    layer.get_writable(),
                    layer.get_fallback_on_error(),
                    layer.get_active()
                );
                if !layer.ignore.is_empty() {
                    println!("      ignore: {:?}", layer.ignore);
                }
            }
        }
    }
    Ok(())
}
