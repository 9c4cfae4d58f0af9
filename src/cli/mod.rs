//! Command-line interface parsing and handling
//!
//! Every command shares the same wiring: configuration, the API client, the
//! conversation store and the session token storage.

pub mod say;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::api::ApiClient;
use crate::auth::prompt::prompt_credentials;
use crate::auth::{self, Session};
use crate::core::config::data::{path_display, Config, TokenStoreKind};
use crate::core::controller::ChatController;
use crate::core::persistence::ConversationPersistence;
use crate::core::storage::{FileStorage, KeyringStorage, Storage};
use crate::core::store::ConversationStore;
use crate::ui::app::ChatApp;
use crate::ui::run_chat;
use crate::utils::logging::init_tracing;

/// Service name under which the keyring token store files its entry.
const KEYRING_SERVICE: &str = "eesyai";

#[derive(Parser)]
#[command(name = "eesyai")]
#[command(version)]
#[command(about = "A terminal chat client for the EESYAI assistant")]
#[command(
    long_about = "EESYAI is a full-screen terminal chat client. Log in, keep several \
conversations side by side and watch replies stream in as they are generated.\n\n\
Environment Variables:\n\
  EESYAI_BASE_URL   Server address (overrides the config file)\n\
  EESYAI_LOG        Log filter, e.g. 'eesyai=debug'\n\n\
Controls:\n\
  Enter             Send the message\n\
  Ctrl+N            New conversation\n\
  Ctrl+R            Rename the current conversation\n\
  Ctrl+D            Delete the current conversation\n\
  Tab               Switch between input and conversation list\n\
  Up/Down           Scroll, or pick a conversation in the list\n\
  PageUp/PageDown   Scroll the transcript\n\
  Ctrl+O            Log out\n\
  Ctrl+C            Quit"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server address, e.g. http://localhost:8000
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Append log output to this file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the chat interface (default)
    Chat,
    /// Send one message into a new conversation and print the reply
    Say {
        /// Message text; multiple words are joined with spaces
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Log in and store the session token
    Login {
        /// Account email; prompted for when omitted
        #[arg(short = 'u', long)]
        username: Option<String>,
    },
    /// Create a new account
    Signup {
        /// Account email; prompted for when omitted
        #[arg(short = 'u', long)]
        username: Option<String>,
    },
    /// Forget the stored session token
    Logout,
    /// List saved conversations
    List,
    /// Set configuration values
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set for the key
        value: Option<String>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

impl Commands {
    fn is_interactive(&self) -> bool {
        matches!(self, Commands::Chat)
    }
}

/// Shared state every command is built from.
pub struct Context {
    pub api: ApiClient,
    pub conversations: Arc<dyn Storage>,
    pub tokens: Arc<dyn Storage>,
}

impl Context {
    fn build(args_base_url: Option<&str>) -> Result<Self, Box<dyn Error>> {
        let config = Config::load()?;
        let api = ApiClient::new(
            config.resolve_base_url(args_base_url),
            config.request_timeout(),
        )?;
        let data_dir = Config::data_dir()?;
        debug!(data_dir = %path_display(&data_dir), "Using data directory");

        let file_storage: Arc<dyn Storage> = Arc::new(FileStorage::new(data_dir));
        let tokens: Arc<dyn Storage> = match config.token_store() {
            TokenStoreKind::File => Arc::clone(&file_storage),
            TokenStoreKind::Keyring => Arc::new(KeyringStorage::new(KEYRING_SERVICE)),
        };

        Ok(Self {
            api,
            conversations: file_storage,
            tokens,
        })
    }

    pub fn session(&self) -> Session {
        Session::open(Arc::clone(&self.tokens))
    }

    pub fn controller(&self) -> ChatController {
        let persistence = ConversationPersistence::new(Arc::clone(&self.conversations));
        ChatController::new(ConversationStore::load(persistence))
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Commands::Chat);
    init_tracing(args.log.as_deref(), command.is_interactive())?;

    match command {
        Commands::Set { key, value } => set_config(&key, value),
        Commands::Unset { key } => unset_config(&key),
        command => {
            let context = Context::build(args.base_url.as_deref())?;
            run_command(command, context).await
        }
    }
}

async fn run_command(command: Commands, context: Context) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Chat => {
            let app = ChatApp::new(
                context.api.clone(),
                context.session(),
                context.controller(),
            );
            run_chat(app).await
        }
        Commands::Say { prompt } => say::run_say(prompt, &context).await,
        Commands::Login { username } => {
            let credentials = prompt_credentials(username)?;
            let mut session = context.session();
            match auth::login_and_store(
                &context.api,
                &mut session,
                &credentials.username,
                &credentials.password,
            )
            .await
            {
                Ok(_) => {
                    println!("✅ Logged in as {}", credentials.username);
                    Ok(())
                }
                Err(err) => {
                    eprintln!("❌ {err}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Signup { username } => {
            let credentials = prompt_credentials(username)?;
            match auth::signup(&context.api, &credentials.username, &credentials.password).await {
                Ok(_) => {
                    println!("✅ Account created. Run 'eesyai login' to log in.");
                    Ok(())
                }
                Err(err) => {
                    eprintln!("❌ {err}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Logout => {
            let mut session = context.session();
            auth::logout(&mut session)?;
            println!("✅ Logged out");
            Ok(())
        }
        Commands::List => {
            list_conversations(&context);
            Ok(())
        }
        Commands::Set { key, value } => set_config(&key, value),
        Commands::Unset { key } => unset_config(&key),
    }
}

fn list_conversations(context: &Context) {
    let controller = context.controller();
    println!("Conversations:");
    for line in conversation_lines(controller.store()) {
        println!("{line}");
    }
}

/// One line per conversation, newest first; the active one is starred.
fn conversation_lines(store: &ConversationStore) -> Vec<String> {
    store
        .conversations()
        .iter()
        .map(|conversation| {
            let marker = if conversation.id == store.active_id() {
                "*"
            } else {
                " "
            };
            format!(
                "{marker} {} ({} messages)",
                conversation.title,
                conversation.messages.len()
            )
        })
        .collect()
}

fn set_config(key: &str, value: Option<String>) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load()?;
    let Some(value) = value.filter(|value| !value.trim().is_empty()) else {
        config.print_all();
        return Ok(());
    };

    match apply_setting(&mut config, key, &value) {
        Ok(shown) => {
            config.save()?;
            println!("✅ Set {key} to: {shown}");
            Ok(())
        }
        Err(err) => {
            eprintln!("❌ {err}");
            std::process::exit(1);
        }
    }
}

fn unset_config(key: &str) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load()?;
    if let Err(err) = clear_setting(&mut config, key) {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
    config.save()?;
    println!("✅ Unset {key}");
    Ok(())
}

/// Store `value` under `key`, returning the value as it will be shown back.
fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<String, String> {
    let value = value.trim();
    match key {
        "base-url" => {
            config.base_url = Some(value.to_string());
            Ok(value.to_string())
        }
        "token-store" => {
            let kind: TokenStoreKind = value.parse()?;
            config.token_store = Some(kind);
            Ok(kind.to_string())
        }
        "request-timeout" => {
            let secs: u64 = value.parse().map_err(|_| {
                format!("request-timeout must be a whole number of seconds, got '{value}'")
            })?;
            config.request_timeout_secs = Some(secs);
            Ok(format!("{secs}s"))
        }
        _ => Err(format!("Unknown config key: {key}")),
    }
}

fn clear_setting(config: &mut Config, key: &str) -> Result<(), String> {
    match key {
        "base-url" => config.base_url = None,
        "token-store" => config.token_store = None,
        "request-timeout" => config.request_timeout_secs = None,
        _ => return Err(format!("Unknown config key: {key}")),
    }
    Ok(())
}
