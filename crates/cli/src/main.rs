//! Operator CLI for the SixLab provider integration layer.
//!
//! Loads provider settings from a JSON file and drives the provider contract
//! directly: connection tests, session lifecycle, and validation steps. The
//! settings file maps a provider name to its stored row:
//!
//! ```json
//! {
//!   "campus-gns3": {
//!     "type": "gns3",
//!     "display_name": "Campus GNS3 rack",
//!     "config": { "server_url": "http://gns3.lab:3080" }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use sixlab_providers::{LabProvider, TracingEventSink, build_provider};
use sixlab_types::ValidationStep;

#[derive(Parser)]
#[command(name = "sixlab", about = "Drive SixLab lab providers from the command line")]
struct Cli {
    /// Path to the provider settings JSON file.
    #[arg(long, default_value = "providers.json")]
    settings: PathBuf,

    /// Provider name within the settings file.
    #[arg(long)]
    provider: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a cheap authenticated round-trip against the backend.
    TestConnection,
    /// Print the provider's derived capability record.
    Capabilities,
    /// Print the provider's configuration field schema.
    Fields,
    /// Print the defaults a fresh provider configuration starts from.
    Defaults,
    /// Create a session for a user, optionally from a template payload file.
    Create {
        #[arg(long)]
        user: String,
        /// JSON file with the template payload (gns3_template,
        /// eveng_template, or guacamole_config block).
        #[arg(long)]
        template: Option<PathBuf>,
        /// Override the synthesized backend resource name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Show a session snapshot.
    Show {
        #[arg(long)]
        session: String,
    },
    /// Recompute the access URL for a session.
    Url {
        #[arg(long)]
        session: String,
        #[arg(long)]
        user: String,
    },
    /// Stop and delete a session.
    Destroy {
        #[arg(long)]
        session: String,
    },
    /// Execute one validation step against a session.
    Validate {
        #[arg(long)]
        session: String,
        /// Validation type key (e.g. ping_test, file_exists).
        #[arg(long = "type")]
        validation_type: String,
        #[arg(long, default_value_t = 100.0)]
        max_score: f64,
        /// JSON file with the opaque validation data payload.
        #[arg(long)]
        data: Option<PathBuf>,
    },
}

/// One stored provider row in the settings file.
#[derive(Debug, Deserialize)]
struct ProviderSettings {
    #[serde(rename = "type")]
    provider_type: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    config: Map<String, Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let provider = load_provider(&cli)?;
    run(provider.as_ref(), cli.command).await
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_provider(cli: &Cli) -> Result<Box<dyn LabProvider>> {
    let raw = std::fs::read_to_string(&cli.settings)
        .with_context(|| format!("could not read settings file {}", cli.settings.display()))?;
    let mut settings: BTreeMap<String, ProviderSettings> =
        serde_json::from_str(&raw).context("settings file is not a name -> provider map")?;

    let Some(row) = settings.remove(&cli.provider) else {
        let known: Vec<&String> = settings.keys().collect();
        bail!("no provider named '{}' in settings; known providers: {:?}", cli.provider, known);
    };

    debug!(provider = %cli.provider, provider_type = %row.provider_type, "loaded provider settings");
    build_provider(&row.provider_type, row.display_name, row.config, Arc::new(TracingEventSink))
        .with_context(|| format!("could not construct provider '{}'", cli.provider))
}

async fn run(provider: &dyn LabProvider, command: Command) -> Result<()> {
    match command {
        Command::TestConnection => {
            let result = provider.test_connection().await;
            print_json(&result)?;
            if !result.success {
                std::process::exit(1);
            }
        }
        Command::Capabilities => print_json(&provider.capabilities())?,
        Command::Fields => print_json(&provider.config_fields())?,
        Command::Defaults => print_json(&provider.default_config())?,
        Command::Create { user, template, name } => {
            let template = match template {
                Some(path) => read_json_file(&path)?,
                None => Value::Null,
            };
            let mut options = Map::new();
            if let Some(name) = name {
                options.insert("session_name".to_string(), Value::String(name));
            }
            let session = provider.create_session(&user, &template, &options).await?;
            print_json(&session)?;
        }
        Command::Show { session } => print_json(&provider.get_session(&session).await?)?,
        Command::Url { session, user } => println!("{}", provider.session_url(&session, &user).await?),
        Command::Destroy { session } => print_json(&provider.destroy_session(&session).await?)?,
        Command::Validate {
            session,
            validation_type,
            max_score,
            data,
        } => {
            let step = ValidationStep {
                validation_type,
                expected_result: None,
                max_score,
            };
            let data = match data {
                Some(path) => read_json_file(&path)?,
                None => Value::Null,
            };
            let result = provider.validate_step(&session, &step, &data).await?;
            print_json(&result)?;
        }
    }
    Ok(())
}

fn read_json_file(path: &PathBuf) -> Result<Value> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
