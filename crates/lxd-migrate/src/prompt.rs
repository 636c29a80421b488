//! Yes/no confirmation read from an injected input stream.

use std::io::{self, BufRead, Write};

const INVALID_INPUT: &str = "Invalid input, try again.\n\n";

/// Source of operator decisions.
pub trait Confirm {
    /// Writes `question` to `out` and returns the operator's answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the question cannot be written or the answer read.
    fn confirm(&mut self, out: &mut dyn Write, question: &str) -> io::Result<bool>;
}

/// Line-oriented prompt with a fixed default answer.
///
/// `yes`/`y` and `no`/`n` are accepted in any case. An empty line or the end
/// of input selects the default; anything else re-asks.
#[derive(Debug)]
pub struct Prompt<R> {
    input: R,
    default: bool,
}

impl<R: BufRead> Prompt<R> {
    /// Creates a prompt that defaults to "no".
    pub fn new(input: R) -> Self {
        Self {
            input,
            default: false,
        }
    }
}

impl<R: BufRead> Confirm for Prompt<R> {
    fn confirm(&mut self, out: &mut dyn Write, question: &str) -> io::Result<bool> {
        loop {
            write!(out, "{question}")?;
            out.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(self.default);
            }
            match Answer::parse(line.trim_end_matches(['\n', '\r'])) {
                Answer::Yes => return Ok(true),
                Answer::No => return Ok(false),
                Answer::Default => return Ok(self.default),
                Answer::Invalid => write!(out, "{INVALID_INPUT}")?,
            }
        }
    }
}

enum Answer {
    Yes,
    No,
    Default,
    Invalid,
}

impl Answer {
    fn parse(input: &str) -> Self {
        if input.is_empty() {
            return Self::Default;
        }
        match input.to_ascii_lowercase().as_str() {
            "yes" | "y" => Self::Yes,
            "no" | "n" => Self::No,
            _ => Self::Invalid,
        }
    }
}
