/// A line of REPL input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Clear,
    History,
    ShowSystem,
    SetSystem(String),
    SetKey(String),
    Unknown(String),
    /// Anything that isn't a slash command is sent to the provider.
    Message(String),
}

impl Command {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if !trimmed.starts_with('/') {
            return Command::Message(input.to_string());
        }

        let (name, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (trimmed, ""),
        };

        match (name, rest) {
            ("/help", _) => Command::Help,
            ("/quit" | "/exit", _) => Command::Quit,
            ("/clear", _) => Command::Clear,
            ("/history", _) => Command::History,
            ("/system", "") => Command::ShowSystem,
            ("/system", prompt) => Command::SetSystem(prompt.to_string()),
            ("/key", key) if !key.is_empty() => Command::SetKey(key.to_string()),
            _ => Command::Unknown(name.to_string()),
        }
    }
}
