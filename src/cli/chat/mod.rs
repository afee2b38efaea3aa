pub mod calculator;
pub mod classifier;
pub mod command;
pub mod conversation_state;
pub mod prompt;
pub mod render;
pub mod turn;

use std::io::Write;
use std::process::ExitCode;

use color_print::{cformat, cstr};
use command::{Command, Service};
use eyre::Result;
use prompt::generate_prompt;
use render::{render_message, TerminalRenderer};
use rustyline::error::ReadlineError;
use tracing::info;
use turn::{Conversation, TurnOutcome};

use crate::completion_client::CompletionClient;
use crate::config::{self, Config};
use crate::search_client::SearchClient;

const WELCOME_TEXT: &str = cstr!(
    "
<cyan,bold>💎 Smart Diamond</> <dim>Your multifaceted guide to knowledge</>

I can answer general questions, search the web for current events,
and do arithmetic.

Things to try
• <green>What is 12 * (3 + 4)?</>
• <green>What's the latest news about Rust?</>
• <green>Write a haiku about diamonds.</>

/help         Show the help dialogue
/quit         Quit the application
"
);

const HELP_TEXT: &str = cstr!(
    "
<cyan,bold>Smart Diamond</>

/clear                       Clear the conversation history
/history                     Show the conversation so far
/key openai|serper [value]   Set an API key (prompted without echo if omitted)
/help                        Show this help dialogue
/quit                        Quit the application

Messages mentioning current events are searched on the web, arithmetic is
calculated locally, and everything else goes to the language model.
"
);

const KEY_REQUIRED_WARNING: &str =
    "⚠️  Please enter your OpenAI API key first! Run /key openai or set OPENAI_API_KEY.";

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<String>,
    interactive: bool,
    config: Config,
    conversation: Conversation,
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        interactive: bool,
        config: Config,
    ) -> Result<Self> {
        let conversation = Conversation::new(
            Box::new(SearchClient::new(&config.search)?),
            Box::new(CompletionClient::new(&config.completion)?),
        );

        Ok(Self {
            output,
            input,
            interactive,
            config,
            conversation,
        })
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        // Non-interactive mode answers a single message
        if let Some(input) = self.input.take() {
            let outcome = self.process_chat_input(&input).await?;
            return Ok(match outcome {
                TurnOutcome::Rejected => ExitCode::FAILURE,
                TurnOutcome::Answered(_) => ExitCode::SUCCESS,
            });
        }

        if self.interactive {
            self.print_welcome()?;
            self.run_interactive().await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        if self.config.completion.api_key.is_none() {
            writeln!(
                self.output,
                "{}",
                cformat!("<yellow>No OpenAI API key found. Run /key openai to add one.</>\n")
            )?;
        }
        for message in self.conversation.messages() {
            render_message(self.output.as_mut(), message)?;
        }
        Ok(())
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = prompt::rl()?;

        loop {
            let prompt_text = generate_prompt(None);
            match rl.readline(&prompt_text) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    // Keys typed inline stay out of the line editor history
                    if !line.trim_start().starts_with("/key") {
                        rl.add_history_entry(line.as_str());
                    }

                    match self.handle_input(&line).await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => writeln!(self.output, "Error: {}", e)?,
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

    /// Returns `true` when the user asked to quit.
    async fn handle_input(&mut self, input: &str) -> Result<bool> {
        match Command::parse(input) {
            Command::Help => writeln!(self.output, "{}", HELP_TEXT)?,
            Command::Clear => {
                self.conversation.reset();
                writeln!(self.output, "Conversation cleared.\n")?;
                if let Some(greeting) = self.conversation.messages().first() {
                    render_message(self.output.as_mut(), greeting)?;
                }
            }
            Command::History => {
                for message in self.conversation.messages() {
                    render_message(self.output.as_mut(), message)?;
                }
            }
            Command::Quit => return Ok(true),
            Command::SetKey { service, value } => self.set_key(service, value)?,
            Command::Invalid(message) => writeln!(self.output, "{}", message)?,
            Command::Chat(text) => {
                self.process_chat_input(text).await?;
            }
        }
        Ok(false)
    }

    async fn process_chat_input(&mut self, input: &str) -> Result<TurnOutcome> {
        let mut renderer = TerminalRenderer::new(self.output.as_mut());
        let outcome = self.conversation.submit(input, &mut renderer).await?;

        if outcome == TurnOutcome::Rejected {
            writeln!(self.output, "{}\n", cformat!("<yellow>{}</>", KEY_REQUIRED_WARNING))?;
        }
        Ok(outcome)
    }

    fn set_key(&mut self, service: Service, value: Option<&str>) -> Result<()> {
        let raw = match value {
            Some(value) => value.to_string(),
            None => rpassword::prompt_password(format!("{service} API key: "))?,
        };
        let Some(key) = config::secret(Some(raw)) else {
            writeln!(self.output, "No key entered; {service} settings unchanged.")?;
            return Ok(());
        };

        match service {
            Service::OpenAi => {
                self.config.completion.api_key = Some(key);
                let client = CompletionClient::new(&self.config.completion)?;
                self.conversation.set_completion(Box::new(client));
            }
            Service::Serper => {
                self.config.search.api_key = Some(key);
                self.conversation.set_search(Box::new(SearchClient::new(&self.config.search)?));
            }
        }

        info!("{} API key updated", service);
        writeln!(self.output, "{service} API key set.\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::Overrides;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn context(input: Option<&str>) -> (ChatContext, SharedBuffer) {
        // Unroutable endpoints: these tests must never reach a provider.
        let overrides = Overrides {
            openai_base_url: Some("http://127.0.0.1:9/v1/".into()),
            search_url: Some("http://127.0.0.1:9/search".into()),
            ..Default::default()
        };
        let config = Config::from_lookup(overrides, |_| None).unwrap();
        let buffer = SharedBuffer::default();
        let input = input.map(str::to_string);
        let ctx = ChatContext::new(Box::new(buffer.clone()), input, false, config).unwrap();
        (ctx, buffer)
    }

    #[tokio::test]
    async fn single_message_without_key_is_rejected() {
        let (mut ctx, buffer) = context(Some("hello there"));
        ctx.run().await.unwrap();

        assert!(buffer.contents().contains(KEY_REQUIRED_WARNING));
        assert_eq!(ctx.conversation.messages().len(), 1);
    }

    #[tokio::test]
    async fn key_command_enables_turns() {
        let (mut ctx, buffer) = context(None);

        assert!(!ctx.handle_input("/key openai sk-test").await.unwrap());
        assert!(ctx.config.completion.api_key.is_some());

        ctx.handle_input("what is 6 * 7").await.unwrap();
        let out = buffer.contents();
        assert!(out.contains("OpenAI API key set."));
        assert!(out.contains("**Calculation Result:** 42"));
        assert_eq!(ctx.conversation.messages().len(), 3);
    }

    #[tokio::test]
    async fn search_without_key_prompts_for_configuration() {
        let (mut ctx, buffer) = context(None);
        ctx.handle_input("/key openai sk-test").await.unwrap();

        ctx.handle_input("weather today").await.unwrap();
        assert!(buffer.contents().contains(turn::SEARCH_KEY_MISSING));
    }

    #[tokio::test]
    async fn clear_and_history() {
        let (mut ctx, buffer) = context(None);
        ctx.handle_input("/key openai sk-test").await.unwrap();
        ctx.handle_input("bye").await.unwrap();
        assert_eq!(ctx.conversation.messages().len(), 3);

        ctx.handle_input("/history").await.unwrap();
        assert!(buffer.contents().contains(turn::FAREWELL));

        ctx.handle_input("/clear").await.unwrap();
        assert_eq!(ctx.conversation.messages().len(), 1);
        assert!(buffer.contents().contains("Conversation cleared."));
    }

    #[tokio::test]
    async fn quit_and_unknown_commands() {
        let (mut ctx, buffer) = context(None);
        assert!(ctx.handle_input("/quit").await.unwrap());
        assert!(!ctx.handle_input("/nope").await.unwrap());
        assert!(buffer.contents().contains("unknown command: /nope"));
    }
}
