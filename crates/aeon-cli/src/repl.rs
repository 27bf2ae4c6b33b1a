//! Interactive REPL — a local "cli" channel talking to the kernel
//! through the bus, exactly like a remote transport would.

use anyhow::Result;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::debug;

use aeon_core::bus::InboundMessage;
use aeon_core::config::Config;

use crate::gateway::{build_kernel, Kernel};

const CHANNEL: &str = "cli";
const CHAT_ID: &str = "repl";

/// Run an interactive chat session until EOF or `/quit`.
pub async fn run(config: Config) -> Result<()> {
    let Kernel {
        bus,
        mut agent,
        cron,
        heartbeat: _,
        channels: _,
    } = build_kernel(&config)?;

    // The agent and scheduler run in the background; this task owns stdin.
    let agent_task = tokio::spawn(async move { agent.run().await });
    let cron_task = {
        let cron = cron.clone();
        tokio::spawn(async move { cron.run().await })
    };

    // Printer: render outbound traffic addressed to this channel.
    let mut rx = bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if !msg.channel.is_empty() && msg.channel != CHANNEL {
                continue;
            }
            if msg.is_status() || msg.silent {
                debug!("skipping status message");
                continue;
            }
            println!("{} {}", "aeon>".cyan().bold(), msg.content);
        }
    });

    println!("{}", "Aeon interactive chat. /help for commands, /quit to leave.".dimmed());

    let mut editor = DefaultEditor::new()?;
    loop {
        let (returned_editor, line) =
            tokio::task::spawn_blocking(move || {
                let line = editor.readline(&format!("{} ", "you>".green().bold()));
                (editor, line)
            })
            .await?;
        editor = returned_editor;

        match line {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" || line == "/exit" {
                    break;
                }
                let _ = editor.add_history_entry(&line);
                bus.publish(InboundMessage::new(CHANNEL, CHAT_ID, "local", line))
                    .await?;
                // Give the turn a moment so replies interleave naturally.
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    cron.stop();
    bus.close().await;
    let _ = agent_task.await;
    cron_task.abort();
    printer.abort();

    println!("{}", "bye.".dimmed());
    Ok(())
}
