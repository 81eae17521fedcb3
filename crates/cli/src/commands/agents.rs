//! `taskloom agents`: Show configured agents.

use taskloom_config::AppConfig;

use crate::runtime;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let router = runtime::router(&config);

    println!("Agents (default: {})", config.default_agent);
    println!("─────────────────────────────────────────────────────");

    for def in config.agent_definitions() {
        let provider = def.provider.as_deref().unwrap_or(&config.default_provider);
        let model = def.model.as_deref().unwrap_or(&config.default_model);
        let info = router.model_info(provider, model);
        let status = if def.disabled { " (disabled)" } else { "" };

        println!("  {} ({}){status}", def.id, def.display_name());
        println!(
            "    model:  {provider}/{model}  (${:.2} in / ${:.2} out per 1M)",
            info.cost_per_1m_in, info.cost_per_1m_out
        );
        match &def.allowed_tools {
            Some(tools) => println!("    tools:  {}", tools.join(", ")),
            None => println!("    tools:  all"),
        }
        if !def.allowed_agents.is_empty() {
            println!("    agents: {}", def.allowed_agents.join(", "));
        }
        println!();
    }

    Ok(())
}
