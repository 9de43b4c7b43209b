use std::time::Duration;

use futures::future::{BoxFuture, join_all};

use super::command::{Command, suggest};
use super::{DisplayResult, Router};
use crate::adapters::{MAX_SYSTEM_CHARS, cap_content};
use crate::error::SwitchError;
use crate::provider::ProviderId;
use crate::session::Role;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HISTORY: usize = 10;
const HISTORY_PREVIEW_CHARS: usize = 200;

pub type Handler = for<'a> fn(&'a mut Router, &'a Command) -> BoxFuture<'a, DisplayResult>;

pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub usage: &'static str,
    pub summary: &'static str,
    pub handler: Handler,
}

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "help",
        aliases: &["?"],
        usage: "/help",
        summary: "Show commands",
        handler: help,
    },
    CommandSpec {
        name: "switch",
        aliases: &[],
        usage: "/switch <provider>[:<model>]",
        summary: "Change the active provider and model",
        handler: switch,
    },
    CommandSpec {
        name: "models",
        aliases: &[],
        usage: "/models [provider]",
        summary: "Provider health, or one provider's models",
        handler: models,
    },
    CommandSpec {
        name: "run",
        aliases: &[],
        usage: "/run <command> [args...]",
        summary: "Run an allowlisted system command",
        handler: run,
    },
    CommandSpec {
        name: "status",
        aliases: &[],
        usage: "/status",
        summary: "Active provider, model and context size",
        handler: status,
    },
    CommandSpec {
        name: "history",
        aliases: &[],
        usage: "/history [n]",
        summary: "Show the last n messages",
        handler: history,
    },
    CommandSpec {
        name: "clear",
        aliases: &["new"],
        usage: "/clear",
        summary: "Reset the conversation",
        handler: clear,
    },
    CommandSpec {
        name: "key",
        aliases: &[],
        usage: "/key <provider> <key>",
        summary: "Set or rotate a provider key for this session",
        handler: key,
    },
    CommandSpec {
        name: "exit",
        aliases: &["quit"],
        usage: "/exit",
        summary: "Quit",
        handler: exit,
    },
];

pub(super) fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|c| c.name == name || c.aliases.iter().any(|a| *a == name))
}

pub(super) fn unknown_command(name: &str) -> String {
    let names = COMMANDS
        .iter()
        .flat_map(|c| std::iter::once(c.name).chain(c.aliases.iter().copied()));
    match suggest(name, names).and_then(find) {
        Some(spec) => format!(
            "Unknown command /{name}. Did you mean /{}? Type /help for the list.",
            spec.name
        ),
        None => format!("Unknown command /{name}. Type /help for the list."),
    }
}

fn help<'a>(_router: &'a mut Router, _cmd: &'a Command) -> BoxFuture<'a, DisplayResult> {
    Box::pin(async move {
        let width = COMMANDS.iter().map(|c| c.usage.len()).max().unwrap_or(0);
        let mut out = String::from("Commands:");
        for c in COMMANDS {
            out.push_str(&format!("\n  {:width$}  {}", c.usage, c.summary));
            if !c.aliases.is_empty() {
                let aliases: Vec<String> = c.aliases.iter().map(|a| format!("/{a}")).collect();
                out.push_str(&format!(" (also {})", aliases.join(", ")));
            }
        }
        out.push_str("\nAnything else is sent to the active model.");
        DisplayResult::Info(out)
    })
}

/// `/switch groq`, `/switch groq:llama-3.1-8b-instant` or `/switch groq llama-3.1-8b-instant`.
fn switch<'a>(router: &'a mut Router, cmd: &'a Command) -> BoxFuture<'a, DisplayResult> {
    Box::pin(async move {
        let Some(target) = cmd.arg(0) else {
            return DisplayResult::Error("usage: /switch <provider>[:<model>]".into());
        };
        let (name, model) = match target.split_once(':') {
            Some((name, model)) => (name, model),
            None => (target, cmd.arg(1).unwrap_or("")),
        };
        let Ok(id) = name.parse::<ProviderId>() else {
            return DisplayResult::Error(SwitchError::UnknownProvider(name.to_string()).to_string());
        };
        match router.session.switch(&router.registry, id, model) {
            Ok(state) => {
                router.config.default_provider = Some(id.to_string());
                if !model.is_empty() {
                    router
                        .config
                        .default_models
                        .insert(id.to_string(), state.model_name.clone());
                }
                router.save_config();
                DisplayResult::Success(format!(
                    "Switched to {} ({})",
                    state.provider_id, state.model_name
                ))
            }
            Err(e) => DisplayResult::Error(e.to_string()),
        }
    })
}

fn models<'a>(router: &'a mut Router, cmd: &'a Command) -> BoxFuture<'a, DisplayResult> {
    Box::pin(async move {
        if let Some(name) = cmd.arg(0) {
            let id = match name.parse::<ProviderId>() {
                Ok(id) => id,
                Err(e) => return DisplayResult::Error(e.to_string()),
            };
            let Some(entry) = router.registry.get(id) else {
                return DisplayResult::Error(SwitchError::NotRegistered(id.to_string()).to_string());
            };
            let listed =
                tokio::time::timeout(entry.config.timeout, entry.adapter.list_models(&entry.config))
                    .await;
            return match listed {
                Ok(Ok(models)) if models.is_empty() => {
                    DisplayResult::Info(format!("{id} reported no models"))
                }
                Ok(Ok(models)) => {
                    let mut out = format!("{} models for {id}:", models.len());
                    for m in &models {
                        if m.display_name != m.id {
                            out.push_str(&format!("\n  {}  ({})", m.id, m.display_name));
                        } else {
                            out.push_str(&format!("\n  {}", m.id));
                        }
                    }
                    DisplayResult::Info(cap_content(&out, MAX_SYSTEM_CHARS))
                }
                Ok(Err(e)) => DisplayResult::Error(format!("{id}: {e}")),
                Err(_) => DisplayResult::Error(format!(
                    "{id}: timeout after {}s",
                    entry.config.timeout.as_secs()
                )),
            };
        }

        if router.registry.is_empty() {
            return DisplayResult::Info("No providers configured.".into());
        }
        let checks = router.registry.iter().map(|entry| async move {
            let healthy =
                tokio::time::timeout(HEALTH_TIMEOUT, entry.adapter.health_check(&entry.config))
                    .await
                    .unwrap_or(false);
            (entry, healthy)
        });
        let results = join_all(checks).await;
        let active = router.session.current().map(|s| s.provider_id);
        let mut out = String::from("Providers:");
        for (entry, healthy) in results {
            let marker = if Some(entry.config.id) == active { "*" } else { " " };
            out.push_str(&format!(
                "\n{marker} {:<12} {:<24} {:<36} {}",
                entry.config.id.as_str(),
                entry.config.display_name,
                entry.config.default_model,
                if healthy { "ok" } else { "unreachable" }
            ));
        }
        DisplayResult::Info(cap_content(&out, MAX_SYSTEM_CHARS))
    })
}

fn run<'a>(router: &'a mut Router, cmd: &'a Command) -> BoxFuture<'a, DisplayResult> {
    Box::pin(async move {
        let Some((program, args)) = cmd.args.split_first() else {
            return DisplayResult::Error("usage: /run <command> [args...]".into());
        };
        let ran = tokio::select! {
            ran = router.executor.run(program, args) => ran,
            _ = router.cancel.cancelled() => {
                return DisplayResult::Info("command cancelled".into());
            }
        };
        match ran {
            Ok(result) => {
                let output = result.combined_output();
                let output = if output.trim().is_empty() {
                    "(no output)".to_string()
                } else {
                    output
                };
                DisplayResult::Info(cap_content(&output, MAX_SYSTEM_CHARS))
            }
            Err(e) => DisplayResult::Error(e.to_string()),
        }
    })
}

fn status<'a>(router: &'a mut Router, _cmd: &'a Command) -> BoxFuture<'a, DisplayResult> {
    Box::pin(async move {
        let active = match router.session.current() {
            Some(s) => format!(
                "{} ({}) since {}",
                s.provider_id,
                s.model_name,
                s.switched_at.format("%H:%M:%S")
            ),
            None => "none (commands-only mode)".to_string(),
        };
        let ctx = router.session.history();
        let budget = match ctx.budget() {
            crate::session::ContextBudget::Messages(n) => format!("{n} messages"),
            crate::session::ContextBudget::Tokens(n) => format!("{n} tokens"),
        };
        let fallback = router
            .fallback
            .map(|id| {
                if router.registry.contains(id) {
                    id.to_string()
                } else {
                    format!("{id} (not configured)")
                }
            })
            .unwrap_or_else(|| "none".to_string());
        let registered: Vec<&str> = router.registry.ids().iter().map(|id| id.as_str()).collect();
        DisplayResult::Info(format!(
            "Active:    {active}\nContext:   {} messages, ~{} tokens (budget {budget})\nFallback:  {fallback}\nProviders: {}",
            ctx.len(),
            ctx.estimated_tokens(),
            if registered.is_empty() {
                "none".to_string()
            } else {
                registered.join(", ")
            }
        ))
    })
}

fn history<'a>(router: &'a mut Router, cmd: &'a Command) -> BoxFuture<'a, DisplayResult> {
    Box::pin(async move {
        let n = match cmd.arg(0).map(str::parse::<usize>) {
            None => DEFAULT_HISTORY,
            Some(Ok(n)) if n > 0 => n,
            Some(_) => return DisplayResult::Error("usage: /history [n], n > 0".into()),
        };
        let ctx = router.session.history();
        if ctx.is_empty() {
            return DisplayResult::Info("No messages yet.".into());
        }
        let mut out = String::new();
        for m in ctx.tail(n) {
            let who = match m.role {
                Role::User => "you",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            let preview = cap_content(&m.content.replace('\n', " "), HISTORY_PREVIEW_CHARS);
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!(
                "[{}] {who}: {}",
                m.timestamp.format("%H:%M"),
                preview.replace('\n', " ")
            ));
        }
        DisplayResult::Info(out)
    })
}

fn clear<'a>(router: &'a mut Router, _cmd: &'a Command) -> BoxFuture<'a, DisplayResult> {
    Box::pin(async move {
        router.session.clear();
        if let Some(store) = &router.history
            && let Err(e) = store.clear()
        {
            tracing::warn!("cannot clear saved history: {e}");
        }
        DisplayResult::Success("Conversation cleared.".into())
    })
}

fn key<'a>(router: &'a mut Router, cmd: &'a Command) -> BoxFuture<'a, DisplayResult> {
    Box::pin(async move {
        let (Some(name), Some(value)) = (cmd.arg(0), cmd.arg(1)) else {
            return DisplayResult::Error("usage: /key <provider> <key>".into());
        };
        let id = match name.parse::<ProviderId>() {
            Ok(id) => id,
            Err(e) => return DisplayResult::Error(e.to_string()),
        };
        match router.registry.rotate_key(id, value) {
            Ok(()) => {
                let masked = router
                    .registry
                    .get(id)
                    .map(|e| e.config.auth_key.masked())
                    .unwrap_or_default();
                let mut msg = format!("Key for {id} accepted ({masked}).");
                if router.session.current().is_none()
                    && router.session.switch(&router.registry, id, "").is_ok()
                {
                    msg.push_str(&format!(" Now using {id}."));
                }
                DisplayResult::Success(msg)
            }
            Err(e) => DisplayResult::Error(e.to_string()),
        }
    })
}

fn exit<'a>(_router: &'a mut Router, _cmd: &'a Command) -> BoxFuture<'a, DisplayResult> {
    Box::pin(async move { DisplayResult::Exit })
}
