use std::io::Write;
use std::sync::Mutex;

use colored::Colorize;

use super::{Renderer, Style};

/// Draws the size element as a line on stdout.
///
/// Each `show` prints one line, prefixed with the repository currently
/// being annotated when one has been set.
#[derive(Debug, Default)]
pub struct TerminalRenderer {
    subject: Mutex<Option<String>>,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label printed before every rendered state.
    pub fn set_subject(&self, subject: Option<String>) {
        *self.subject.lock().unwrap_or_else(|p| p.into_inner()) = subject;
    }

    fn line(&self, text: &str, style: Style) -> String {
        let body = match style {
            Style::Loading => text.dimmed().italic(),
            Style::Size => text.green().bold(),
            Style::Error => text.red(),
        };
        match self.subject.lock().unwrap_or_else(|p| p.into_inner()).as_deref() {
            Some(subject) => format!("{} {body}", subject.cyan()),
            None => body.to_string(),
        }
    }
}

impl Renderer for TerminalRenderer {
    fn attach(&self) {}

    fn show(&self, text: &str, style: Style) {
        let line = self.line(text, style);
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }

    fn detach(&self) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", "(removed)".dimmed());
        let _ = stdout.flush();
    }
}
