use std::io::Write;

use crossterm::style::Stylize;

use super::conversation_state::{Message, Role};

/// Receives a reply as it is produced.
///
/// `partial` is called with the whole reply so far after every streamed
/// fragment. `finish` is called once per turn with the final text, whether or
/// not any partials preceded it.
pub trait ResponseSink {
    fn partial(&mut self, text_so_far: &str) -> std::io::Result<()>;
    fn finish(&mut self, text: &str) -> std::io::Result<()>;
}

pub fn role_label(role: Role) -> String {
    match role {
        Role::Assistant => format!("{}", "💎 Smart Diamond".cyan().bold()),
        Role::User => format!("{}", "👤 You".green().bold()),
    }
}

/// Writes a message with its role label.
pub fn render_message(output: &mut dyn Write, message: &Message) -> std::io::Result<()> {
    writeln!(output, "{}", role_label(message.role))?;
    writeln!(output, "{}\n", message.content)
}

/// Streams a reply to the terminal. Each partial is a prefix of the next, so
/// only the new tail is written.
pub struct TerminalRenderer<'a> {
    output: &'a mut dyn Write,
    printed: String,
    started: bool,
}

impl<'a> TerminalRenderer<'a> {
    pub fn new(output: &'a mut dyn Write) -> Self {
        Self {
            output,
            printed: String::new(),
            started: false,
        }
    }

    fn write_tail(&mut self, text: &str) -> std::io::Result<()> {
        if !self.started {
            writeln!(self.output, "{}", role_label(Role::Assistant))?;
            self.started = true;
        }
        match text.strip_prefix(self.printed.as_str()) {
            Some(tail) => write!(self.output, "{tail}")?,
            None => write!(self.output, "\n{text}")?,
        }
        self.printed.clear();
        self.printed.push_str(text);
        self.output.flush()
    }
}

impl ResponseSink for TerminalRenderer<'_> {
    fn partial(&mut self, text_so_far: &str) -> std::io::Result<()> {
        self.write_tail(text_so_far)
    }

    fn finish(&mut self, text: &str) -> std::io::Result<()> {
        self.write_tail(text)?;
        writeln!(self.output, "\n")?;
        self.output.flush()
    }
}
