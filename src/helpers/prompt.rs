use std::io::{self, BufRead, Write};

/// Operator input. Returns the entered line without its trailing newline;
/// an empty string means the operator just pressed Enter.
pub trait Prompt {
    fn ask(&self, message: &str) -> io::Result<String>;
}

/// Blocking prompt on stdin/stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&self, message: &str) -> io::Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{message}")?;
        stdout.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl<P: Prompt + ?Sized> Prompt for &P {
    fn ask(&self, message: &str) -> io::Result<String> {
        (**self).ask(message)
    }
}
