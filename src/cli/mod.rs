//! Command-line interface parsing and handling
//!
//! This module parses arguments, installs the diagnostics subscriber and
//! dispatches to the chat loop, the one-shot `say` command or the config
//! subcommands.

pub mod chat;
pub mod say;

use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::chat::{run_chat, ChatOptions};
use crate::cli::say::run_say;
use crate::core::config::defaults::CONFIG_KEYS;
use crate::core::config::{path_display, Config};
use crate::gateway::http::HttpGateway;
use crate::gateway::RemoteGateway;
use crate::utils::url::is_http_url;

/// Environment variable holding the diagnostics filter.
pub const LOG_FILTER_ENV: &str = "IRIS_LOG";

const VERSION: &str = version_or_package(option_env!("VERGEN_GIT_DESCRIBE"));

/// Value vergen writes when it cannot read the repository.
const VERGEN_PLACEHOLDER: &str = "VERGEN_IDEMPOTENT_OUTPUT";

const fn version_or_package(describe: Option<&'static str>) -> &'static str {
    match describe {
        Some(describe) if !const_str_eq(describe, VERGEN_PLACEHOLDER) => describe,
        _ => env!("CARGO_PKG_VERSION"),
    }
}

const fn const_str_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

#[derive(Parser)]
#[command(name = "iris")]
#[command(version = VERSION)]
#[command(about = "A line-mode chat client for the Iris assistant backend")]
#[command(
    long_about = "Iris connects to an Iris backend, keeps several conversations side by side \
and reveals assistant replies as they stream in.\n\n\
Environment Variables:\n\
  IRIS_BASE_URL     Backend address (overrides the config file)\n\
  IRIS_LOG          Diagnostics filter, e.g. 'iris=debug' (written to stderr)\n\n\
Commands inside the chat:\n\
  /help             List chat commands\n\
  /log <filename>   Enable transcript logging to the file\n\
  /log              Toggle logging pause/resume"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Backend base URL, e.g. http://127.0.0.1:8000
    #[arg(short = 'u', long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Enable transcript logging to the specified file
    #[arg(short = 'l', long, global = true)]
    pub log: Option<String>,

    /// Diagnostics filter; takes precedence over IRIS_LOG
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the chat (default)
    Chat,
    /// Send one prompt, print the streamed reply and exit
    Say {
        /// Conversation number to send into; a new conversation is created if omitted
        #[arg(short = 'c', long, value_name = "NUMBER")]
        conversation: Option<usize>,
        /// The prompt (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// List conversations stored on the backend
    List,
    /// Set a configuration value
    Set {
        /// Configuration key to set
        key: String,
        /// Value for the key (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset a configuration value
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// Print the current configuration
    Config,
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    // Ignore a second initialization, e.g. when embedded in another binary.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Set { key, value } => {
            let mut config = Config::load()?;
            if value.is_empty() {
                config.print_all();
                return Ok(());
            }
            let value = value.join(" ");
            if let Err(err) = config.set_value(&key, &value) {
                eprintln!("❌ {err}");
                eprintln!("Known keys: {}", CONFIG_KEYS.join(", "));
                std::process::exit(1);
            }
            config.save()?;
            println!("✅ Set {key} to: {value}");
            Ok(())
        }
        Commands::Unset { key } => {
            let mut config = Config::load()?;
            if let Err(err) = config.unset_value(&key) {
                eprintln!("❌ {err}");
                eprintln!("Known keys: {}", CONFIG_KEYS.join(", "));
                std::process::exit(1);
            }
            config.save()?;
            println!("✅ Unset {key}");
            Ok(())
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("Config file: {}", path_display(Config::get_config_path()?));
            config.print_all();
            Ok(())
        }
        Commands::List => {
            let options = chat_options(args.base_url.as_deref(), None)?;
            let gateway = HttpGateway::new(&options.base_url, options.config.request_timeout());
            let conversations = gateway.list_conversations().await?;
            if conversations.is_empty() {
                println!("No conversations.");
            }
            for (position, summary) in conversations.iter().enumerate() {
                println!("{:>3}. {} (id {})", position + 1, summary.title, summary.id);
            }
            Ok(())
        }
        Commands::Say {
            conversation,
            prompt,
        } => {
            let options = chat_options(args.base_url.as_deref(), args.log)?;
            let gateway = Arc::new(HttpGateway::new(
                &options.base_url,
                options.config.request_timeout(),
            ));
            run_say(gateway, options, prompt.join(" "), conversation).await
        }
        Commands::Chat => {
            let options = chat_options(args.base_url.as_deref(), args.log)?;
            let gateway = Arc::new(HttpGateway::new(
                &options.base_url,
                options.config.request_timeout(),
            ));
            run_chat(gateway, options).await
        }
    }
}

fn chat_options(
    base_url: Option<&str>,
    log_file: Option<String>,
) -> Result<ChatOptions, Box<dyn Error>> {
    let config = Config::load()?;
    let base_url = config.resolve_base_url(base_url);
    if !is_http_url(&base_url) {
        return Err(format!("Invalid backend URL '{base_url}': expected http:// or https://").into());
    }
    Ok(ChatOptions {
        base_url,
        log_file,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_prefers_git_describe() {
        assert_eq!(version_or_package(Some("v0.2.0-3-gabc1234")), "v0.2.0-3-gabc1234");
        assert_eq!(version_or_package(None), env!("CARGO_PKG_VERSION"));
        assert_eq!(
            version_or_package(Some("VERGEN_IDEMPOTENT_OUTPUT")),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn say_joins_trailing_words() {
        let args = Args::try_parse_from(["iris", "say", "-c", "2", "hello", "there"]).expect("parse");
        match args.command {
            Some(Commands::Say {
                conversation,
                prompt,
            }) => {
                assert_eq!(conversation, Some(2));
                assert_eq!(prompt.join(" "), "hello there");
            }
            _ => panic!("expected say"),
        }
    }

    #[test]
    fn global_flags_apply_to_subcommands() {
        let args = Args::try_parse_from(["iris", "list", "--base-url", "http://backend:9000"])
            .expect("parse");
        assert!(matches!(args.command, Some(Commands::List)));
        assert_eq!(args.base_url.as_deref(), Some("http://backend:9000"));
    }

    #[test]
    fn chat_is_the_default() {
        let args = Args::try_parse_from(["iris", "--log", "chat.txt"]).expect("parse");
        assert!(args.command.is_none());
        assert_eq!(args.log.as_deref(), Some("chat.txt"));
    }

    #[test]
    fn set_accepts_multi_word_values() {
        let args = Args::try_parse_from(["iris", "set", "greeting", "Hello", "{title}"])
            .expect("parse");
        match args.command {
            Some(Commands::Set { key, value }) => {
                assert_eq!(key, "greeting");
                assert_eq!(value.join(" "), "Hello {title}");
            }
            _ => panic!("expected set"),
        }
    }
}
