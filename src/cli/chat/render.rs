use std::io::Write;

use color_print::cformat;
use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use eyre::Result;

use super::conversation_state::{ConversationState, Message, Role, WINDOW_LIMIT};

pub fn format_message(message: &Message) -> String {
    match message.role {
        Role::User => cformat!("<bold><blue>{}</blue></bold>: {}", message.role.as_str(), message.content),
        Role::Assistant => cformat!("<bold><green>{}</green></bold>: {}", message.role.as_str(), message.content),
    }
}

pub fn format_counter(len: usize) -> String {
    cformat!("<dim>{} / {} messages in context</dim>", len, WINDOW_LIMIT)
}

pub fn format_notice(text: &str) -> String {
    cformat!("<bold><yellow>! {}</yellow></bold>", text)
}

/// Transient indicator shown while a request is in flight.
pub fn show_thinking<W: Write>(output: &mut W) -> Result<()> {
    output.queue(Print(cformat!("<dim>Thinking...</dim>")))?;
    output.flush()?;
    Ok(())
}

pub fn clear_thinking<W: Write>(output: &mut W) -> Result<()> {
    output.queue(MoveToColumn(0))?.queue(Clear(ClearType::CurrentLine))?;
    output.flush()?;
    Ok(())
}

/// Terminal view over a [`ConversationState`].
///
/// Only writes when the state's revision moved, and only the turns it has
/// not written yet.
pub struct Transcript {
    last_revision: u64,
    shown_total: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            last_revision: 0,
            shown_total: 0,
        }
    }

    /// Returns the number of turns written.
    pub fn render_new<W: Write>(&mut self, output: &mut W, state: &ConversationState) -> Result<usize> {
        if state.revision() == self.last_revision {
            return Ok(0);
        }
        self.last_revision = state.revision();

        let unseen = state.appended_total().saturating_sub(self.shown_total);
        let unseen = usize::try_from(unseen).unwrap_or(usize::MAX).min(state.len());
        for message in state.get_messages().skip(state.len() - unseen) {
            writeln!(output, "{}", format_message(message))?;
        }
        self.shown_total = state.appended_total();

        Ok(unseen)
    }

    /// Write the whole window again, e.g. for `/history`.
    pub fn render_all<W: Write>(&mut self, output: &mut W, state: &ConversationState) -> Result<()> {
        if state.is_empty() {
            writeln!(output, "{}", cformat!("<dim>Start a conversation...</dim>"))?;
        }
        for message in state.get_messages() {
            writeln!(output, "{}", format_message(message))?;
        }
        writeln!(output, "{}", format_counter(state.len()))?;

        self.last_revision = state.revision();
        self.shown_total = state.appended_total();
        Ok(())
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}
