use redirectfs::{Result, Session};

pub fn list_layers(session: &Session, porcelain: bool, json: bool) -> Result<()> {
    let layers = session.layers();

    if json {
        println!("{}", serde_json::to_string(&layers)?);
    } else if porcelain {
        for layer in &layers {
            let (prefix, replacement, mode) = match &layer.spec {
                Some(spec) => (
                    spec.prefix.as_str(),
                    spec.replacement.as_str(),
                    spec.mode.to_string(),
                ),
                None => ("", "", "custom".to_string()),
            };
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}",
                layer.id,
                layer.name,
                mode,
                prefix,
                replacement,
                if layer.active { "active" } else { "inactive" }
            );
        }
    } else if layers.is_empty() {
        println!("No layers configured.");
    } else {
        println!("Layers (highest priority first):");
        println!();
        for layer in &layers {
            let marker = if layer.active { "●" } else { "○" };
            match &layer.spec {
                Some(spec) => {
                    let mut flags = Vec::new();
                    if spec.writable {
                        flags.push("writable");
                    }
                    if spec.fallback_on_error {
                        flags.push("fallback");
                    }
                    println!(
                        "  {} {} {:<16} {:<8} {} -> {}{}",
                        marker,
                        layer.id,
                        layer.name,
                        spec.mode,
                        spec.prefix,
                        spec.replacement,
                        if flags.is_empty() {
                            String::new()
                        } else {
                            format!(" ({})", flags.join(", "))
                        }
                    );
                }
                None => println!("  {} {} {}", marker, layer.id, layer.name),
            }
        }
    }
    Ok(())
}
