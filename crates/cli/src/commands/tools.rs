//! `toolrelay tools`: list the capability snapshot the registry serves.

use std::path::Path;
use toolrelay_tools::{CapabilitySnapshot, ToolRegistry};

pub async fn run(config_path: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = crate::load_config(config_path)?;
    let store = toolrelay_gateway::open_store(&config.registry).await?;
    let registry = ToolRegistry::uncached(store);
    let snapshot = registry.load_capabilities().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.to_model_schema())?);
    } else {
        print!("{}", render_table(&snapshot));
    }
    Ok(())
}

fn render_table(snapshot: &CapabilitySnapshot) -> String {
    if snapshot.is_empty() {
        return "No capabilities registered.\n".into();
    }

    let width = snapshot.iter().map(|d| d.name.len()).max().unwrap_or(0).max(4);
    let mut out = format!("{:<width$}  {:<6}  URL\n", "NAME", "METHOD");
    for def in snapshot.iter() {
        out.push_str(&format!(
            "{:<width$}  {:<6}  {}\n",
            def.name,
            def.endpoint.method.as_str(),
            def.endpoint.url_template,
        ));
    }
    out.push_str(&format!("\n{} capabilities\n", snapshot.len()));
    out
}
