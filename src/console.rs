//! Operator-facing messages and confirmation prompts
//!
//! Diagnostics go through `tracing`; this module is only for the short,
//! colored lines an operator reads while a command runs.

use std::io::{self, BufRead, Write};

const RED: &str = "\x1b[0;31m";
const GREEN: &str = "\x1b[0;32m";
const YELLOW: &str = "\x1b[1;33m";
const BLUE: &str = "\x1b[0;34m";
const RESET: &str = "\x1b[0m";

/// Colored line printer
#[derive(Debug, Clone, Copy)]
pub struct Console {
    color: bool,
    quiet: bool,
}

impl Console {
    pub fn new(color: bool) -> Self {
        Self { color, quiet: false }
    }

    /// No escape codes, for logs and tests
    pub fn plain() -> Self {
        Self::new(false)
    }

    /// Suppresses everything except errors
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn paint(&self, color: &str, message: &str) -> String {
        if self.color {
            format!("{}{}{}", color, message, RESET)
        } else {
            message.to_string()
        }
    }

    pub fn step(&self, message: &str) {
        if !self.quiet {
            println!("{}", self.paint(BLUE, &format!("==> {}", message)));
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{}", message);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{}", self.paint(GREEN, &format!("✓ {}", message)));
        }
    }

    pub fn warn(&self, message: &str) {
        if !self.quiet {
            eprintln!("{}", self.paint(YELLOW, &format!("WARNING: {}", message)));
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("{}", self.paint(RED, &format!("ERROR: {}", message)));
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Yes/no question answered by the operator
pub trait Prompt: Send + Sync {
    fn confirm(&self, question: &str) -> io::Result<bool>;
}

/// Reads answers from stdin; anything but `y`/`yes` is a no
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm(&self, question: &str) -> io::Result<bool> {
        let mut stdout = io::stdout();
        write!(stdout, "{} [y/N] ", question)?;
        stdout.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(is_affirmative(&answer))
    }
}

/// Answers every question the same way (`--yes`, non-interactive runs)
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl Prompt for AutoConfirm {
    fn confirm(&self, _question: &str) -> io::Result<bool> {
        Ok(self.0)
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Human-readable byte count, `du -h` style
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}
