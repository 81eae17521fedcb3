//! `taskloom chat`: Interactive or single-message chat mode.

use std::io::Write;
use std::path::{Path, PathBuf};
use taskloom_agent::AgentLoop;
use taskloom_config::AppConfig;
use taskloom_core::store::DEFAULT_SESSION_TITLE;
use taskloom_core::{AgentEvent, AgentEventKind, Attachment, Session};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::runtime::Runtime;

pub async fn run(
    message: Option<String>,
    agent_id: Option<String>,
    session_id: Option<String>,
    attach: Vec<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Fail early with setup help when no API key is configured
    if !config.has_api_key() {
        print_setup_guide();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let runtime = Runtime::build(&config).await?;
    let agent_id = agent_id.unwrap_or_else(|| config.default_agent.clone());
    let agent = runtime
        .manager
        .get(&agent_id)
        .ok_or_else(|| format!("Unknown agent: {agent_id}"))?;

    let session = match session_id {
        Some(id) => runtime.stores.sessions.get(&id).await?,
        None => runtime.stores.sessions.create(DEFAULT_SESSION_TITLE).await?,
    };
    let attachments = attach
        .iter()
        .map(|path| load_attachment(path))
        .collect::<std::io::Result<Vec<_>>>()?;
    let root = CancellationToken::new();

    if let Some(msg) = message {
        // Single message mode
        let Some(mut rx) = agent.run(&root, &session.id, &msg, attachments)? else {
            return Err(format!("Session {} is busy", session.id).into());
        };

        eprint!("  Thinking...");
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                agent.cancel(&session.id);
                rx.recv().await
            }
        };
        eprint!("\r              \r");

        match event {
            Some(event) if event.kind == AgentEventKind::Response => {
                if let Some(message) = &event.message {
                    println!("{}", message.content());
                }
            }
            Some(event) => print_event(&event),
            None => eprintln!("  [Error] turn ended without a result"),
        }
    } else {
        // Interactive mode
        println!();
        println!("  ╔══════════════════════════════════════════════╗");
        println!("  ║          Taskloom : Interactive Mode         ║");
        println!("  ╚══════════════════════════════════════════════╝");
        println!();
        println!("  Agent:     {} ({})", agent.name(), agent.id());
        println!("  Model:     {}", agent.model().id);
        println!("  Tools:     {}", agent.tools().names().join(", "));
        println!("  Session:   {}", session.id);
        println!();
        println!("  Type your message and press Enter.");
        println!("  Messages sent while the agent works are queued.");
        println!("  Ctrl+C cancels the running turn; 'exit' quits.");
        println!();

        interactive(&agent, &root, &session, attachments).await?;

        println!();
        println!("  Goodbye!");
    }

    runtime.manager.cancel_all().await;
    let session = runtime.stores.sessions.get(&session.id).await?;
    println!(
        "  Session {}: {} prompt / {} completion tokens, ${:.4}",
        session.id, session.prompt_tokens, session.completion_tokens, session.cost
    );
    println!();

    Ok(())
}

enum Input {
    Line(std::io::Result<Option<String>>),
    Event(Option<AgentEvent>),
    Interrupt,
}

async fn interactive(
    agent: &AgentLoop,
    root: &CancellationToken,
    session: &Session,
    mut attachments: Vec<Attachment>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<mpsc::Receiver<AgentEvent>> = None;

    prompt()?;
    loop {
        let input = tokio::select! {
            line = lines.next_line() => Input::Line(line),
            event = next_event(&mut pending) => Input::Event(event),
            _ = tokio::signal::ctrl_c() => Input::Interrupt,
        };

        match input {
            Input::Line(line) => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line == "exit" || line == "quit" {
                    break;
                }
                if line.is_empty() {
                    prompt()?;
                    continue;
                }
                // Attachments ride along with the first message only
                match agent.run(root, &session.id, line, std::mem::take(&mut attachments))? {
                    Some(rx) => pending = Some(rx),
                    None => {
                        println!(
                            "  (queued, {} waiting)",
                            agent.queued_prompts(&session.id)
                        );
                        prompt()?;
                    }
                }
            }
            Input::Event(event) => {
                pending = None;
                match event {
                    Some(event) => print_event(&event),
                    None => eprintln!("  [Error] turn ended without a result"),
                }
                prompt()?;
            }
            Input::Interrupt => {
                if agent.is_session_busy(&session.id) {
                    eprintln!();
                    eprintln!("  Canceling...");
                    agent.cancel(&session.id);
                } else {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// The next terminal event, or never when no turn is running.
async fn next_event(pending: &mut Option<mpsc::Receiver<AgentEvent>>) -> Option<AgentEvent> {
    match pending {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn print_event(event: &AgentEvent) {
    match event.kind {
        AgentEventKind::Response => {
            println!();
            if let Some(message) = &event.message {
                for line in message.content().lines() {
                    println!("  Assistant > {line}");
                }
            }
            println!();
        }
        AgentEventKind::Error if event.is_cancelled() => {
            eprintln!("  [Canceled]");
            println!();
        }
        AgentEventKind::Error => {
            if let Some(e) = &event.error {
                eprintln!("  [Error] {e}");
            }
            println!();
        }
    }
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

fn load_attachment(path: &Path) -> std::io::Result<Attachment> {
    let content = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Attachment {
        file_path: path.display().to_string(),
        mime_type: mime_for(path).to_string(),
        file_name,
        content,
    })
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "text/plain",
    }
}

fn print_setup_guide() {
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    export ANTHROPIC_API_KEY='sk-ant-...'");
    eprintln!("    export TASKLOOM_API_KEY='sk-ant-...'     (takes precedence)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    eprintln!("  Run `taskloom init` to write a default config.");
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for(Path::new("shot.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("a/b.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("notes")), "text/plain");
    }

    #[test]
    fn attachment_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diagram.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let attachment = load_attachment(&path).unwrap();
        assert_eq!(attachment.file_name, "diagram.png");
        assert_eq!(attachment.mime_type, "image/png");
        assert_eq!(attachment.content, vec![1, 2, 3]);
    }
}
