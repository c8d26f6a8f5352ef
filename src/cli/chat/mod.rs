pub mod command;
pub mod conversation_state;
pub mod prompt;
pub mod render;
pub mod send_cycle;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use command::Command;
use conversation_state::ConversationState;
use eyre::Result;
use prompt::generate_prompt;
use render::Transcript;
use rustyline::error::ReadlineError;
use send_cycle::{Conversation, Refusal, SendOutcome, SendReport};
use tracing::{debug, error, info};

use crate::config::ChatConfig;
use crate::provider_client::{AiProvider, ChatOptions, OpenAiClient};

const WELCOME_TEXT: &str = "
Hi, I'm your chat assistant. Ask me anything.

The last 20 messages are kept as context; older ones are forgotten.

/system       Show or change the assistant's persona
/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
Persona Chat

/system         Show the current persona (system prompt)
/system <text>  Use a new persona from the next message on
/history        Show every message still in context
/clear          Clear the conversation history
/key <api-key>  Connect to the AI provider with this key
/help           Show this help dialogue
/quit           Quit the application
";

const PROVIDER_UNAVAILABLE_NOTICE: &str =
    "The AI provider hasn't loaded yet. Set an API key (or use /key <api-key>) and try again.";

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<String>,
    interactive: bool,
    config: ChatConfig,
    conversation: Conversation,
    transcript: Transcript,
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        interactive: bool,
        config: ChatConfig,
        provider: Option<Arc<dyn AiProvider>>,
    ) -> Self {
        let state = ConversationState::with_system_prompt(config.system_prompt.clone());
        let options = ChatOptions {
            model: config.model.clone(),
        };
        let conversation = Conversation::new(state, provider)
            .with_options(options)
            .with_timeout(config.timeout);

        Self {
            output,
            input,
            interactive,
            config,
            conversation,
            transcript: Transcript::new(),
        }
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        if self.interactive {
            self.print_welcome()?;
        }

        // Handle non-interactive mode (single query)
        if let Some(input) = self.input.take() {
            let report = self.process_chat_input(&input).await?;
            return Ok(match report {
                SendReport::Replied => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            });
        }

        if self.interactive {
            self.run_interactive().await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        writeln!(self.output, "Persona: {}\n", self.conversation.state().system_prompt())?;
        if !self.conversation.provider_available() {
            writeln!(self.output, "{}\n", render::format_notice(PROVIDER_UNAVAILABLE_NOTICE))?;
        }
        Ok(())
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = prompt::rl()?;

        loop {
            let prompt_text = generate_prompt(self.conversation.state().len());
            match rl.readline(&prompt_text) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    // Keys stay out of the line history.
                    if !line.trim_start().starts_with("/key") {
                        rl.add_history_entry(line.as_str());
                    }

                    match self.handle_input(&line).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            error!("Failed to handle input: {}", e);
                            writeln!(self.output, "Error: {}", e)?;
                        }
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Returns `false` when the session should end.
    async fn handle_input(&mut self, input: &str) -> Result<bool> {
        match Command::parse(input) {
            Command::Help => {
                writeln!(self.output, "{}", HELP_TEXT)?;
            }
            Command::Quit => return Ok(false),
            Command::Clear => {
                if self.conversation.clear() {
                    writeln!(self.output, "Conversation cleared.")?;
                }
            }
            Command::History => {
                self.transcript.render_all(&mut self.output, self.conversation.state())?;
            }
            Command::ShowSystem => {
                writeln!(self.output, "Persona: {}", self.conversation.state().system_prompt())?;
            }
            Command::SetSystem(prompt) => {
                self.conversation.set_system_prompt(&prompt);
                writeln!(self.output, "Persona updated. It applies from your next message.")?;
            }
            Command::SetKey(key) => {
                self.attach_provider(key)?;
            }
            Command::Unknown(name) => {
                writeln!(self.output, "Unknown command {}. Type /help for the list.", name)?;
            }
            Command::Message(text) => {
                self.process_chat_input(&text).await?;
            }
        }

        Ok(true)
    }

    fn attach_provider(&mut self, key: String) -> Result<()> {
        self.config.api_key = Some(key);
        match OpenAiClient::from_config(&self.config)? {
            Some(client) => {
                info!("Provider attached at {}", client.endpoint());
                self.conversation.set_provider(Arc::new(client));
                writeln!(self.output, "Connected to the AI provider.")?;
            }
            None => {
                writeln!(self.output, "{}", render::format_notice(PROVIDER_UNAVAILABLE_NOTICE))?;
            }
        }
        Ok(())
    }

    async fn process_chat_input(&mut self, input: &str) -> Result<SendReport> {
        let request = match self.conversation.begin_send(input) {
            SendOutcome::Started(request) => request,
            SendOutcome::Ignored(reason) => {
                debug!("Input ignored: {:?}", reason);
                return Ok(SendReport::Ignored(reason));
            }
            SendOutcome::Refused(refusal @ Refusal::CapabilityUnavailable) => {
                writeln!(self.output, "{}", render::format_notice(PROVIDER_UNAVAILABLE_NOTICE))?;
                return Ok(SendReport::Refused(refusal));
            }
        };

        // Echo the user turn before the provider is awaited. Render errors surface
        // only after the cycle has settled.
        let echoed = self
            .transcript
            .render_new(&mut self.output, self.conversation.state())
            .and_then(|_| render::show_thinking(&mut self.output));
        debug!("Dispatching {} message(s) to the provider", request.payload().len());

        let result = request.dispatch().await;
        let cleared = render::clear_thinking(&mut self.output);

        let report = self.conversation.complete(result);

        echoed?;
        cleared?;
        self.transcript.render_new(&mut self.output, self.conversation.state())?;
        writeln!(self.output, "{}", render::format_counter(self.conversation.state().len()))?;

        Ok(report)
    }
}
