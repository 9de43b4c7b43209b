use nexus_core::DisplayResult;

use crate::util::{format_elapsed, rule_for};

// ── Design system ANSI colors ──────────────────────────────────────
pub const SODIUM: &str = "\x1b[38;2;232;163;60m"; // #e8a33c
pub const CHALK: &str = "\x1b[38;2;232;228;208m"; // #e8e4d0
pub const ASH_TEXT: &str = "\x1b[38;2;90;90;80m"; // #5a5a50
pub const LICHEN: &str = "\x1b[38;2;138;158;108m"; // #8a9e6c
pub const ERR: &str = "\x1b[38;2;204;68;68m"; // #c44
pub const BOLD: &str = "\x1b[1m";
pub const RESET: &str = "\x1b[0m";

pub const PROMPT_CHAR: &str = "❯";
pub const STATUS_SEP: &str = " · ";

/// Sodium bold prompt, optionally tagged with the active provider.
pub fn prompt(provider: Option<&str>, color: bool) -> String {
    match (provider, color) {
        (Some(p), true) => format!("{ASH_TEXT}{p}{RESET} {SODIUM}{BOLD}{PROMPT_CHAR}{RESET} "),
        (None, true) => format!("{SODIUM}{BOLD}{PROMPT_CHAR}{RESET} "),
        (Some(p), false) => format!("{p} {PROMPT_CHAR} "),
        (None, false) => format!("{PROMPT_CHAR} "),
    }
}

/// Render a dispatch result for the terminal. `None` means print nothing.
pub fn render(result: &DisplayResult, color: bool) -> Option<String> {
    let paint = |code: &str, text: &str| {
        if color {
            format!("{code}{text}{RESET}")
        } else {
            text.to_string()
        }
    };
    match result {
        DisplayResult::Empty | DisplayResult::Exit => None,
        DisplayResult::Info(s) => Some(paint(ASH_TEXT, s)),
        DisplayResult::Success(s) => Some(paint(LICHEN, s)),
        DisplayResult::Error(s) => Some(paint(ERR, &format!("error: {s}"))),
        DisplayResult::Reply {
            provider,
            model,
            content,
            elapsed,
        } => {
            let header = format!("{provider}{STATUS_SEP}{model}{STATUS_SEP}{}", format_elapsed(*elapsed));
            Some(format!(
                "{}\n{}\n{}",
                paint(ASH_TEXT, &header),
                paint(ASH_TEXT, &rule_for(&header)),
                paint(CHALK, content)
            ))
        }
    }
}
