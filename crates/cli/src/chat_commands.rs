use std::io::Write;

use {
    anyhow::Result,
    tokio::io::{AsyncBufReadExt, BufReader},
    tracing::debug,
    veritas_chat::{ChatError, ChatReply, ChatService, Conversation},
    veritas_orchestrator::{CancellationToken, Depth, Orchestrator},
};

const HELP: &str = "\
Commands:
  /depth <SURFACE|DEEP|DARK|VAULT>  switch knowledge layer
  /reset                            start a new conversation
  /help                             show this help
  /quit                             leave";

/// One question, one answer. Ctrl-C cancels the in-flight request.
pub async fn ask(
    service: &ChatService,
    message: &str,
    depth: Option<Depth>,
    json: bool,
) -> Result<()> {
    let mut conversation = Conversation::new();
    let outcome = send_cancellable(service, &mut conversation, message, depth).await;

    match outcome {
        Ok(reply) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                print_reply(&reply);
            }
            Ok(())
        },
        Err(err) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&err.to_payload())?);
            } else {
                print_error(&err);
            }
            std::process::exit(1);
        },
    }
}

/// Interactive session. Ctrl-C at the prompt quits; during a request it
/// cancels that request only.
pub async fn repl(service: &ChatService, depth: Option<Depth>) -> Result<()> {
    let mut depth = depth.unwrap_or(service.settings().default_depth);
    let mut conversation = Conversation::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("VERITAS ({depth}). Type /help for commands.");

    loop {
        eprint!("{depth}> ");
        std::io::stderr().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            eprintln!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            match parse_command(command) {
                ReplCommand::Quit => break,
                ReplCommand::Help => eprintln!("{HELP}"),
                ReplCommand::Reset => {
                    conversation.reset();
                    eprintln!("Conversation cleared.");
                },
                ReplCommand::Depth(Ok(next)) => {
                    depth = next;
                    eprintln!("Layer set to {depth}.");
                },
                ReplCommand::Depth(Err(msg)) | ReplCommand::Unknown(msg) => eprintln!("{msg}"),
            }
            continue;
        }

        match send_cancellable(service, &mut conversation, input, Some(depth)).await {
            Ok(reply) => print_reply(&reply),
            Err(err) => print_error(&err),
        }
    }

    Ok(())
}

pub fn print_models(orchestrator: &Orchestrator) {
    let states = orchestrator.breaker_states();
    println!("Model chain (tried in order):");
    for (i, model) in orchestrator.settings().models().iter().enumerate() {
        let route = if orchestrator.registry().route(model).is_some() {
            "routable"
        } else {
            "no provider"
        };
        let state = states
            .iter()
            .find(|(id, _)| id == model)
            .map(|(_, s)| s.to_string())
            .unwrap_or_else(|| "-".into());
        println!("  {}. {model:<40} {route:<12} {state}", i + 1);
    }

    let families = orchestrator.registry().families();
    if families.is_empty() {
        println!("\nNo providers registered.");
    } else {
        println!("\nProviders: {}", families.join(", "));
    }
}

async fn send_cancellable(
    service: &ChatService,
    conversation: &mut Conversation,
    message: &str,
    depth: Option<Depth>,
) -> Result<ChatReply, ChatError> {
    let cancel = CancellationToken::new();
    let send = service.send(conversation, message, depth, &cancel);
    tokio::pin!(send);

    tokio::select! {
        result = &mut send => result,
        _ = tokio::signal::ctrl_c() => {
            debug!("interrupt received, cancelling request");
            cancel.cancel();
            send.await
        },
    }
}

fn print_reply(reply: &ChatReply) {
    println!("{}", reply.content);
    if !reply.citations.is_empty() {
        println!("\nSources:");
        for url in &reply.citations {
            println!("  - {url}");
        }
    }
    debug!(
        correlation_id = %reply.meta.correlation_id,
        model = reply.meta.model_used.as_deref().unwrap_or("-"),
        attempts = reply.meta.attempts,
        latency_ms = reply.meta.total_latency_ms,
        "reply received"
    );
}

fn print_error(err: &ChatError) {
    let payload = err.to_payload();
    let kind = payload["type"].as_str().unwrap_or("error");
    eprintln!("error [{kind}]: {err}");
    if let Some(id) = err.correlation_id() {
        eprintln!("correlation id: {id}");
    }
}

#[derive(Debug, PartialEq)]
enum ReplCommand {
    Quit,
    Help,
    Reset,
    Depth(Result<Depth, String>),
    Unknown(String),
}

fn parse_command(command: &str) -> ReplCommand {
    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        "quit" | "exit" | "q" => ReplCommand::Quit,
        "help" | "?" => ReplCommand::Help,
        "reset" | "clear" => ReplCommand::Reset,
        "depth" => match parts.next() {
            Some(layer) => ReplCommand::Depth(layer.parse()),
            None => ReplCommand::Depth(Err("usage: /depth <SURFACE|DEEP|DARK|VAULT>".into())),
        },
        other => ReplCommand::Unknown(format!("unknown command /{other}; try /help")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repl_commands() {
        assert_eq!(parse_command("quit"), ReplCommand::Quit);
        assert_eq!(parse_command("reset"), ReplCommand::Reset);
        assert_eq!(parse_command("depth dark"), ReplCommand::Depth(Ok(Depth::Dark)));
        assert!(matches!(parse_command("depth"), ReplCommand::Depth(Err(_))));
        assert!(matches!(parse_command("depth abyss"), ReplCommand::Depth(Err(_))));
        assert!(matches!(parse_command("frobnicate"), ReplCommand::Unknown(_)));
    }
}
