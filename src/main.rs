use authswitch::application::AuthorizationSwitch;
use authswitch::config::SwitchConfig;
use authswitch::domain::ports::{CardStoreBox, ClockHandle, TerminalStoreBox, TransactionStoreBox};
use authswitch::infrastructure::clock::SystemClock;
use authswitch::infrastructure::in_memory::{
    InMemoryCardStore, InMemoryTerminalStore, InMemoryTransactionStore,
};
use authswitch::infrastructure::key_store::KeyStore;
use authswitch::interfaces::csv::message_reader::MessageReader;
use authswitch::interfaces::csv::result_writer::ResultWriter;
use authswitch::interfaces::iso8583::{self, bitmap};
use authswitch::interfaces::provisioning::Provisioning;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authorize every message of a CSV file and print the outcomes as CSV
    Authorize {
        /// CSV file with a `message` column of raw wire messages
        input: PathBuf,

        /// JSON document with keys, terminals and cards
        #[arg(long)]
        provision: PathBuf,

        /// JSON switch configuration (optional)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Decode every message of a CSV file and print one JSON object per line
    Decode {
        /// CSV file with a `message` column of raw wire messages
        input: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Authorize {
            input,
            provision,
            config,
        } => authorize(input, provision, config).await,
        Command::Decode { input } => decode(input),
    }
}

async fn authorize(input: PathBuf, provision: PathBuf, config: Option<PathBuf>) -> Result<()> {
    let config = match config {
        Some(path) => SwitchConfig::load(&path).into_diagnostic()?,
        None => SwitchConfig::default(),
    };

    let clock: ClockHandle = Arc::new(SystemClock);
    let keys = Arc::new(KeyStore::new(clock.clone()));
    let cards = InMemoryCardStore::new();
    let terminals = InMemoryTerminalStore::new();
    Provisioning::load(&provision)
        .into_diagnostic()?
        .apply(&keys, &terminals, &cards, config.rotation_validity())
        .await
        .into_diagnostic()?;

    let cards: CardStoreBox = Box::new(cards);
    let terminals: TerminalStoreBox = Box::new(terminals);
    let history: TransactionStoreBox =
        Box::new(InMemoryTransactionStore::with_depth(config.history_depth));
    let switch = AuthorizationSwitch::new(config, keys, cards, terminals, history, clock);

    let file = File::open(input).into_diagnostic()?;
    let reader = MessageReader::new(file);
    let stdout = io::stdout();
    let mut writer = ResultWriter::new(stdout.lock());
    for record in reader.messages() {
        match record {
            Ok(record) => {
                let outcome = switch.authorize(record.as_bytes()).await;
                writer.write(&outcome).into_diagnostic()?;
            }
            Err(e) => {
                eprintln!("Error reading message: {}", e);
            }
        }
    }
    writer.flush().into_diagnostic()?;
    Ok(())
}

fn decode(input: PathBuf) -> Result<()> {
    let file = File::open(input).into_diagnostic()?;
    let reader = MessageReader::new(file);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in reader.messages() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                eprintln!("Error reading message: {}", e);
                continue;
            }
        };
        match iso8583::decode(record.as_bytes()) {
            Ok(message) => {
                let fields: BTreeMap<String, &str> = message
                    .fields()
                    .map(|(field, value)| (format!("{field:03}"), value))
                    .collect();
                let line = serde_json::json!({
                    "mti": message.mti().code(),
                    "bitmap": bitmap::to_hex(message.bitmap()),
                    "fields": fields,
                });
                writeln!(out, "{line}").into_diagnostic()?;
            }
            Err(e) => {
                eprintln!("Error decoding message: {}", e);
            }
        }
    }
    Ok(())
}
