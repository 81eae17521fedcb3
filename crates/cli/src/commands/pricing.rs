//! `taskloom pricing`: Show the model pricing table.

use taskloom_config::AppConfig;

use crate::runtime;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let router = runtime::router(&config);
    let table = router.pricing();
    let models = table.models();

    println!("Model Pricing (USD per 1M tokens)");
    println!("─────────────────────────────────────────────────────────────────────────────");
    println!(
        "{:<36} {:>9} {:>9} {:>11} {:>10}",
        "Model", "Input", "Output", "Cache write", "Cache read"
    );

    for name in &models {
        if let Some(p) = table.get(name) {
            println!(
                "{:<36} ${:>8.3} ${:>8.3} ${:>10.3} ${:>9.3}",
                name, p.input_per_m, p.output_per_m, p.cache_write_per_m, p.cache_read_per_m
            );
        }
    }

    println!();
    println!("  {} models with pricing data", models.len());

    Ok(())
}
