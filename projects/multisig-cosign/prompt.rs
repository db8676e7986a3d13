//! Operator interaction: free-text answers, hidden PIN / passphrase entry and
//! yes/no confirmations

use std::io::{self, BufRead, Write};

use crate::errors::{CosignError, Result};

/// Source of operator input
pub trait Prompt: Send {
    fn ask(&mut self, question: &str) -> Result<String>;

    /// Read without echo
    fn ask_secret(&mut self, question: &str) -> Result<String>;

    fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.ask(&format!("{} [y/N]", question))?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }

    /// Scrambled PIN entry: the device shows the digit layout, the operator
    /// types positions on the keypad grid
    fn ask_pin(&mut self) -> Result<String> {
        eprintln!("Enter the PIN using the positions shown on the device:");
        eprintln!("    7 8 9");
        eprintln!("    4 5 6");
        eprintln!("    1 2 3");
        let pin = self.ask_secret("PIN")?;
        validate_pin(&pin)?;
        Ok(pin)
    }
}

/// PIN positions are digits 1-9 only
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.is_empty() || pin.len() > 50 {
        return Err(CosignError::InvalidInput("PIN must be 1-50 positions".to_string()));
    }
    if !pin.chars().all(|c| ('1'..='9').contains(&c)) {
        return Err(CosignError::InvalidInput(
            "PIN positions must be digits 1-9".to_string(),
        ));
    }
    Ok(())
}

/// Prompts on stderr, reads from stdin
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn ask(&mut self, question: &str) -> Result<String> {
        eprint!("{}: ", question);
        io::stderr().flush()?;
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(CosignError::Aborted);
        }
        Ok(line.trim().to_string())
    }

    fn ask_secret(&mut self, question: &str) -> Result<String> {
        let answer = rpassword::prompt_password(format!("{}: ", question))?;
        Ok(answer.trim().to_string())
    }
}

/// Answers from a fixed script, for non-interactive runs and tests
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    pub answers: std::collections::VecDeque<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
        }
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&mut self, question: &str) -> Result<String> {
        self.answers.pop_front().ok_or_else(|| {
            CosignError::InvalidInput(format!("No answer available for '{}'", question))
        })
    }

    fn ask_secret(&mut self, question: &str) -> Result<String> {
        self.ask(question)
    }
}
