mod theme;
mod util;

use std::io::{IsTerminal, Write};
use std::path::PathBuf;

use clap::Parser;
use nexus_core::config::{self, NexusConfig};
use nexus_core::{DisplayResult, ProviderId, ProviderRegistry, Router, SafeExecutor};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use theme::{ASH_TEXT, BOLD, ERR, RESET, SODIUM};
use util::pad_to;

#[derive(Parser)]
#[command(name = "nexus", version, about = "Terminal gateway to hosted and local language models")]
struct Args {
    /// Directory for config, history and logs (defaults to ~/.nexus)
    #[arg(long, env = "NEXUS_HOME")]
    data_dir: Option<PathBuf>,

    /// Provider to start with (gemini, groq, openai, huggingface, ollama, mcp)
    #[arg(long)]
    provider: Option<ProviderId>,

    /// Model to start with on the chosen provider
    #[arg(long)]
    model: Option<String>,

    /// Provider to try once when the active one fails
    #[arg(long, env = "NEXUS_FALLBACK")]
    fallback: Option<ProviderId>,

    /// Neither restore nor save the conversation
    #[arg(long)]
    no_history: bool,

    /// Run headlessly: dispatch one line, print the result, exit
    #[arg(short = 'p', long = "print")]
    print_line: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let data_dir = args.data_dir.clone().unwrap_or_else(config::default_data_dir);
    config::ensure_data_dir(&data_dir)?;

    // Logs go to <data-dir>/nexus.log
    {
        let log_file = std::fs::File::create(data_dir.join("nexus.log"))?;

        use tracing_subscriber::EnvFilter;
        let filter =
            EnvFilter::try_from_env("NEXUS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(log_file)
            .with_ansi(false)
            .init();
    }

    let nexus_config = NexusConfig::load(&data_dir);
    let (registry, rejected) = ProviderRegistry::from_env(&nexus_config);
    let color = std::io::stdout().is_terminal();

    for e in &rejected {
        tracing::warn!("provider rejected at startup: {e}");
        if color {
            eprintln!("  {ERR}{e}{RESET}");
        } else {
            eprintln!("{e}");
        }
    }

    let executor = SafeExecutor::new()?;
    let mut router = Router::new(registry, nexus_config, executor)
        .with_data_dir(&data_dir, !args.no_history)
        .with_fallback(args.fallback);
    let restored = router.restore_history();
    let startup = router.activate_initial(args.provider, args.model.as_deref());

    if let Some(line) = args.print_line {
        let result = dispatch(&mut router, &line).await;
        if let Some(out) = theme::render(&result, false) {
            if result.is_error() {
                eprintln!("{out}");
            } else {
                println!("{out}");
            }
        }
        if result.is_error() {
            std::process::exit(1);
        }
        return Ok(());
    }

    print_banner(&router, &startup, restored, color);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let active = router
            .session()
            .current()
            .map(|s| s.provider_id.as_str());
        print!("{}", theme::prompt(active, color));
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let result = dispatch(&mut router, &line).await;
        if result == DisplayResult::Exit {
            break;
        }
        if let Some(out) = theme::render(&result, color) {
            println!("{out}");
        }
    }
    Ok(())
}

/// Dispatch one line; Ctrl-C while it runs cancels the provider request.
async fn dispatch(router: &mut Router, line: &str) -> DisplayResult {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = router.dispatch_with(line, cancel).await;
    watcher.abort();
    result
}

fn print_banner(router: &Router, startup: &DisplayResult, restored: usize, color: bool) {
    let (accent, dim, bold, reset) = if color {
        (SODIUM, ASH_TEXT, BOLD, RESET)
    } else {
        ("", "", "", "")
    };
    println!();
    println!("  {accent}{bold}nexus{reset} {dim}v{}{reset}", env!("CARGO_PKG_VERSION"));
    for entry in router.registry().iter() {
        println!(
            "    {dim}{}{}{reset}",
            pad_to(entry.config.id.as_str(), 14),
            entry.config.default_model
        );
    }
    if restored > 0 {
        println!("  {dim}restored {restored} messages{reset}");
    }
    if let Some(out) = theme::render(startup, color) {
        println!("  {out}");
    }
    println!("  {dim}/help for commands{reset}");
    println!();
}
