use rustyline::{Config, Editor, Result};

use super::conversation_state::WINDOW_LIMIT;

/// Prompt prefixed with how full the context window is.
pub fn generate_prompt(messages_in_context: usize) -> String {
    format!("[{}/{}] > ", messages_in_context, WINDOW_LIMIT)
}

pub fn rl() -> Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .history_ignore_dups(true)
        .auto_add_history(false)
        .build();
    Editor::with_config(config)
}
