use crate::cli::validate_virtual_path;
use redirectfs::{RedirectError, Result, Session};

pub fn hide_path(session: &Session, layer_name: &str, path: &str) -> Result<()> {
    validate_virtual_path(path)?;

    let layer = session
        .layers()
        .into_iter()
        .find(|l| l.name == layer_name)
        .ok_or_else(|| RedirectError::Config(format!("No layer named '{}'", layer_name)))?;

    session.hide(layer.id, 1, path)?;
    println!("Hid {} in layer '{}'", path, layer_name);
    Ok(())
}
