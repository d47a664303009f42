//! `toolrelay serve`: start the HTTP gateway.

use std::path::Path;

pub async fn run(config_path: &Path, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = crate::load_config(config_path)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("ToolRelay gateway");
    println!("   Listening:  {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:   {} ({})", config.default_provider, config.default_model);
    println!("   Registry:   {} ({})", config.registry.backend, config.registry.resolved_path().display());
    println!(
        "   Announce:   {}",
        if config.announce.enabled { "enabled" } else { "disabled" }
    );

    toolrelay_gateway::start(config).await?;

    Ok(())
}
