//! User-decision strategies consumed by the import and upgrade flows.
//!
//! The core never renders UI; anything that needs a yes/no answer or
//! wants to show a message takes a [`Confirmer`] chosen by the caller's
//! environment. The binary wires in [`ConsoleConfirmer`]; tests supply
//! canned deciders.

use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;

#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Ask a yes/no question.
    async fn confirm(&self, message: &str) -> Result<bool>;

    /// Ask for a line of free-form input.
    async fn prompt(&self, message: &str) -> Result<String>;

    /// Show a message the user should see before work continues.
    async fn alert(&self, message: &str) -> Result<()>;
}

/// Interactive strategy reading answers from the terminal.
pub struct ConsoleConfirmer;

#[async_trait]
impl Confirmer for ConsoleConfirmer {
    async fn confirm(&self, message: &str) -> Result<bool> {
        let line = read_line(format!("{message} [y/N] ")).await?;
        Ok(matches!(line.trim(), "y" | "Y" | "yes"))
    }

    async fn prompt(&self, message: &str) -> Result<String> {
        let line = read_line(format!("{message} ")).await?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn alert(&self, message: &str) -> Result<()> {
        eprintln!("{message}");
        Ok(())
    }
}

async fn read_line(prompt: String) -> Result<String> {
    // stdin reads are blocking; keep them off the runtime threads
    tokio::task::spawn_blocking(move || {
        eprint!("{prompt}");
        std::io::stderr().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await?
}

/// Non-interactive strategy with a fixed answer. Backs `--force` in the
/// CLI and stands in for the user in tests.
pub struct PresetConfirmer {
    pub answer: bool,
}

impl PresetConfirmer {
    pub fn yes() -> Self {
        Self { answer: true }
    }

    pub fn no() -> Self {
        Self { answer: false }
    }
}

#[async_trait]
impl Confirmer for PresetConfirmer {
    async fn confirm(&self, _message: &str) -> Result<bool> {
        Ok(self.answer)
    }

    async fn prompt(&self, _message: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn alert(&self, message: &str) -> Result<()> {
        eprintln!("{message}");
        Ok(())
    }
}
