//! `toolrelay init`: write a default config file.

use std::path::Path;
use toolrelay_config::AppConfig;

pub fn run(config_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if write_default(config_path, force)? {
        println!("Created {}", config_path.display());
        println!("\nNext steps:");
        println!("   1. Set api_key (or TOOLRELAY_API_KEY)");
        println!("   2. Add capabilities to {}", AppConfig::default().registry.resolved_path().display());
        println!("   3. Run: toolrelay serve");
    } else {
        println!("Config already exists at {}", config_path.display());
        println!("   Edit it manually or re-run with --force.");
    }
    Ok(())
}

/// Returns whether a file was written.
fn write_default(path: &Path, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
