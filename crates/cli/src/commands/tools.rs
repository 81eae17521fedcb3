//! `taskloom tools`: Show built-in tools.

use taskloom_config::AppConfig;

use crate::runtime;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let registry = runtime::base_tools(&config)?;

    println!("Built-in tools");
    println!("─────────────────────────────────────────────────────");
    for name in registry.names() {
        let Some(tool) = registry.get(&name) else { continue };
        let info = tool.info();
        let summary = info.description.lines().next().unwrap_or_default();
        println!("  {name:<10} {summary}");
    }
    println!();
    println!("  Agents also get an `agent_<id>` tool for each peer in `allowed_agents`.");

    Ok(())
}
