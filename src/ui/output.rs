//! Line-oriented output that degrades to plain text off a terminal

use super::context::UiContext;
use console::style;

/// Severity of a one-line notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Success,
    Warning,
    Remark,
}

impl Notice {
    fn plain_tag(self) -> String {
        match self {
            Self::Success => style("[OK]").green().to_string(),
            Self::Warning => style("[WARN]").yellow().to_string(),
            Self::Remark => String::new(),
        }
    }
}

/// Banner at the start of a command
pub fn intro(ctx: &UiContext, title: &str) {
    let title = style(title).cyan().bold();
    if ctx.use_fancy_output() {
        cliclack::intro(title).ok();
    } else {
        println!("{}", title);
    }
}

/// Closing line after a command succeeded
pub fn outro_success(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).green().bold()).ok();
    } else {
        println!("{} {}", Notice::Success.plain_tag(), message);
    }
}

/// One-line notice, with an optional dimmed detail after the message
pub fn notice(ctx: &UiContext, level: Notice, message: &str, detail: Option<&str>) {
    let text = match detail {
        Some(d) if ctx.use_fancy_output() => format!("{} ({})", message, style(d).dim()),
        Some(d) => format!("{} ({})", message, d),
        None => message.to_string(),
    };

    if ctx.use_fancy_output() {
        let _ = match level {
            Notice::Success => cliclack::log::success(text),
            Notice::Warning => cliclack::log::warning(text),
            Notice::Remark => cliclack::log::remark(style(text).dim()),
        };
        return;
    }

    match level {
        Notice::Remark => println!("  {}", style(text).dim()),
        _ => println!("  {} {}", level.plain_tag(), text),
    }
}

/// Aligned `key: value` block
pub fn summary(ctx: &UiContext, rows: &[(&str, String)]) {
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in rows {
        let padded = format!("{:<width$}", key, width = width);
        if ctx.use_fancy_output() {
            println!("  {}  {}", style(padded).dim(), value);
        } else {
            println!("  {}: {}", key, value);
        }
    }
}
