//! Interactive questions with fixed choice lists.
//!
//! Any unambiguous prefix of a choice is accepted; an ambiguous or unknown
//! answer asks again. End of input and Ctrl-C cancel cleanly.
use std::io::{self, BufRead, IsTerminal as _, Write};
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{EngineError, EngineResult, Flow};

/// Asks the user to pick one of a fixed set of answers.
#[cfg_attr(test, mockall::automock)]
pub trait Prompter: Send {
    /// Ask `question` until the answer selects exactly one of `choices`.
    ///
    /// # Errors
    ///
    /// Returns [`Flow::Cancel`] on end of input or interrupt, and
    /// [`EngineError::Prompt`] if there is nowhere to ask.
    fn choice(&mut self, question: &str, choices: &[&'static str]) -> EngineResult<&'static str>;
}

/// The choice `answer` selects: an exact match, or the only choice it is
/// a prefix of.
#[must_use]
pub fn unique_abbreviation(answer: &str, choices: &[&'static str]) -> Option<&'static str> {
    if answer.is_empty() {
        return None;
    }
    if let Some(exact) = choices.iter().copied().find(|c| *c == answer) {
        return Some(exact);
    }
    let mut matches = choices.iter().copied().filter(|c| c.starts_with(answer));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// Choices for a per-path confirmation.
pub const YES_NO_ALL_QUIT: &[&str] = &["yes", "no", "all", "quit"];

/// Asks yes/no/all/quit once per path until `all` or `force` turns the
/// questions off.
pub struct Confirm<'a> {
    prompter: &'a mut dyn Prompter,
    force: bool,
}

impl std::fmt::Debug for Confirm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Confirm")
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

impl<'a> Confirm<'a> {
    /// Confirm through `prompter`; with `force`, never ask.
    #[must_use]
    pub fn new(prompter: &'a mut dyn Prompter, force: bool) -> Self {
        Self { prompter, force }
    }

    /// Whether to go ahead with the action `question` describes.
    ///
    /// # Errors
    ///
    /// Returns [`Flow::Cancel`] on `quit`, or the prompter's error.
    pub fn ask(&mut self, question: &str) -> EngineResult<bool> {
        if self.force {
            return Ok(true);
        }
        match self.prompter.choice(question, YES_NO_ALL_QUIT)? {
            "yes" => Ok(true),
            "no" => Ok(false),
            "all" => {
                self.force = true;
                Ok(true)
            }
            _ => Err(EngineError::Flow(Flow::Cancel)),
        }
    }
}

static PROMPTING: AtomicBool = AtomicBool::new(false);
static HANDLER: Once = Once::new();

/// Ctrl-C while a question is pending exits cleanly; anywhere else it
/// exits the way an unhandled interrupt would.
fn install_interrupt_handler() {
    HANDLER.call_once(|| {
        let installed = ctrlc::set_handler(|| {
            if PROMPTING.load(Ordering::SeqCst) {
                std::process::exit(0);
            }
            std::process::exit(130);
        });
        if let Err(e) = installed {
            tracing::debug!("interrupt handler not installed: {e}");
        }
    });
}

/// Reads answers line by line, writing questions to standard error.
pub struct TerminalPrompter {
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
    usable: bool,
}

impl std::fmt::Debug for TerminalPrompter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalPrompter")
            .field("usable", &self.usable)
            .finish_non_exhaustive()
    }
}

impl TerminalPrompter {
    /// Prompt on the process's standard streams.
    ///
    /// Unless `no_tty` is set, standard input must be a terminal.
    #[must_use]
    pub fn stdio(no_tty: bool) -> Self {
        let usable = no_tty || io::stdin().is_terminal();
        Self {
            input: Box::new(io::BufReader::new(io::stdin())),
            output: Box::new(io::stderr()),
            usable,
        }
    }

    /// Prompt over arbitrary streams.
    #[must_use]
    pub fn new(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input,
            output,
            usable: true,
        }
    }

    fn ask(&mut self, question: &str, choices: &[&'static str]) -> EngineResult<&'static str> {
        let cancel = || EngineError::Flow(Flow::Cancel);
        loop {
            write!(self.output, "{question} [{}]? ", choices.join(",")).map_err(|_| cancel())?;
            self.output.flush().map_err(|_| cancel())?;
            let mut line = String::new();
            match self.input.read_line(&mut line) {
                Ok(0) | Err(_) => return Err(cancel()),
                Ok(_) => {}
            }
            if let Some(choice) = unique_abbreviation(line.trim(), choices) {
                return Ok(choice);
            }
        }
    }
}

impl Prompter for TerminalPrompter {
    fn choice(&mut self, question: &str, choices: &[&'static str]) -> EngineResult<&'static str> {
        if !self.usable {
            return Err(EngineError::Prompt(format!(
                "{question}: cannot prompt without a terminal (use --force or --no-tty)"
            )));
        }
        install_interrupt_handler();
        PROMPTING.store(true, Ordering::SeqCst);
        let answer = self.ask(question, choices);
        PROMPTING.store(false, Ordering::SeqCst);
        answer
    }
}
