use redirectfs::{RedirectError, Result};

pub fn validate_virtual_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(RedirectError::Config("Path cannot be empty".to_string()));
    }

    for byte in path.bytes() {
        if byte < 32 || byte == 127 {
            return Err(RedirectError::Config(
                "Path contains control characters".to_string(),
            ));
        }
    }

    Ok(())
}

/// Client 0 is reserved for requests the engine issues itself.
pub fn validate_client(client: u32) -> Result<()> {
    if client == redirectfs::overlay::SYSTEM_CLIENT {
        return Err(RedirectError::Config(format!(
            "Client id {} is reserved",
            client
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_path_rules() {
        assert!(validate_virtual_path("/vol/content/a.txt").is_ok());
        assert!(validate_virtual_path("relative/b").is_ok());
        assert!(validate_virtual_path("").is_err());
        assert!(validate_virtual_path("   ").is_err());
        assert!(validate_virtual_path("/vol/\u{7}bell").is_err());
    }

    #[test]
    fn test_reserved_client() {
        assert!(validate_client(0).is_err());
        assert!(validate_client(1).is_ok());
    }
}
