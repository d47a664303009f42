//! `toolrelay doctor`: diagnose configuration and dependencies.

use std::path::Path;
use toolrelay_tools::ToolRegistry;

pub async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("ToolRelay Doctor");
    println!("================\n");

    let mut issues = 0;

    if config_path.exists() {
        println!("  ok    Config file found: {}", config_path.display());
    } else {
        println!("  warn  No config file at {}; using defaults (run `toolrelay init`)", config_path.display());
        issues += 1;
    }

    let config = match crate::load_config(config_path) {
        Ok(config) => {
            println!("  ok    Config valid");
            config
        }
        Err(e) => {
            println!("  FAIL  {e}");
            println!("\n  1 blocking issue found.");
            return Ok(());
        }
    };

    if config.has_api_key() || config.providers.values().any(|p| p.api_key.is_some()) {
        println!("  ok    API key configured");
    } else {
        println!("  warn  No API key; set TOOLRELAY_API_KEY or api_key in config.toml");
        issues += 1;
    }

    match toolrelay_gateway::open_store(&config.registry).await {
        Ok(store) => match ToolRegistry::uncached(store).load_capabilities().await {
            Ok(snapshot) => println!(
                "  ok    Capability store ({}): {} capabilities",
                config.registry.backend,
                snapshot.len()
            ),
            Err(e) => {
                println!("  FAIL  Capability store ({}): {e}", config.registry.backend);
                issues += 1;
            }
        },
        Err(e) => {
            println!("  FAIL  Capability store ({}): {e}", config.registry.backend);
            issues += 1;
        }
    }

    let router = toolrelay_providers::build_from_config(&config);
    match router.default() {
        Some(provider) => match provider.health_check().await {
            Ok(true) => println!("  ok    Provider '{}' reachable", provider.name()),
            Ok(false) => {
                println!("  warn  Provider '{}' answered but rejected the health check", provider.name());
                issues += 1;
            }
            Err(e) => {
                println!("  FAIL  Provider '{}': {e}", provider.name());
                issues += 1;
            }
        },
        None => {
            println!("  FAIL  Provider '{}' is not configured", config.default_provider);
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
