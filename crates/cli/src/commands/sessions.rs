//! `taskloom sessions` and `taskloom history`.

use taskloom_config::AppConfig;
use taskloom_core::{FinishReason, Message, Role};

use crate::runtime::open_stores;

/// List sessions, most recently updated first.
pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let stores = open_stores(&config).await?;
    let sessions = stores.sessions.list().await?;

    if sessions.is_empty() {
        println!("No sessions yet. Start one with `taskloom chat`.");
        return Ok(());
    }

    println!(
        "{:<38} {:<24} {:>6} {:>10} {:>10} {:>10}",
        "Session", "Title", "Msgs", "Prompt", "Compl.", "Cost"
    );
    println!("{}", "─".repeat(103));
    for s in &sessions {
        let marker = if s.is_task() { "↳ " } else { "" };
        println!(
            "{:<38} {:<24} {:>6} {:>10} {:>10} ${:>9.4}",
            format!("{marker}{}", s.id),
            truncate(&s.title, 24),
            s.message_count,
            s.prompt_tokens,
            s.completion_tokens,
            s.cost
        );
    }
    println!();
    println!("  {} sessions", sessions.len());

    Ok(())
}

/// Print every message of a session.
pub async fn history(session_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let stores = open_stores(&config).await?;
    let session = stores.sessions.get(session_id).await?;
    let messages = stores.messages.list(session_id).await?;

    println!("Session {} ({})", session.id, session.title);
    if let Some(parent) = &session.parent_session_id {
        println!("  Delegated from {parent}");
    }
    println!(
        "  {} prompt / {} completion tokens, ${:.4}",
        session.prompt_tokens, session.completion_tokens, session.cost
    );
    println!();

    for message in &messages {
        for line in render(message) {
            println!("{line}");
        }
        println!();
    }

    Ok(())
}

fn render(message: &Message) -> Vec<String> {
    let mut lines = Vec::new();
    let label = match message.role {
        Role::User => "You",
        Role::Assistant => "Assistant",
        Role::System => "System",
        Role::Tool => "Tool",
    };

    for line in message.content().lines() {
        lines.push(format!("  {label} > {line}"));
    }
    for call in message.tool_calls() {
        lines.push(format!("  {label} > [call {}] {}({})", call.id, call.name, call.input));
    }
    for result in message.tool_results() {
        let status = if result.is_error { "error" } else { "ok" };
        let first = result.content.lines().next().unwrap_or_default();
        lines.push(format!(
            "  {label} > [{status} {}] {}",
            result.tool_call_id,
            truncate(first, 100)
        ));
    }
    match message.finish_reason() {
        Some(FinishReason::EndTurn | FinishReason::ToolUse) | None => {}
        Some(reason) => lines.push(format!("  ({reason:?})")),
    }
    lines
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
