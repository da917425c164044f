use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use qpersist::config::Config;
use qpersist::http::{HttpClient, HttpQueryKey};
use qpersist::{logging, MemoryQueryCache, Persister, QueryKey};

#[derive(Parser, Debug)]
#[command(name = "qpersist")]
#[command(about = "Fetch HTTP resources through a persistent query cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/qpersist/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// GET a URL, serving the persisted response while it is valid
  Fetch {
    url: String,

    /// Version tag; records written under another tag are discarded
    #[arg(long)]
    buster: Option<String>,

    /// Maximum age of a persisted response in milliseconds
    #[arg(long)]
    max_age_ms: Option<i64>,
  },
  /// Print the persisted record for a URL, if it is still valid
  Show { url: String },
  /// Delete the persisted record for a URL
  Forget { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let _guard = if args.verbose {
    logging::init_stderr()?;
    None
  } else {
    Some(logging::init_file(&config.log_dir()?)?)
  };

  match args.command {
    Command::Fetch {
      url,
      buster,
      max_age_ms,
    } => {
      // Override persistence settings if specified on command line
      let config = Config {
        buster: buster.unwrap_or(config.buster),
        max_age_ms: max_age_ms.unwrap_or(config.max_age_ms),
        ..config
      };
      config.validate()?;
      fetch(&config, &url).await
    }
    Command::Show { url } => show(&config, &url).await,
    Command::Forget { url } => forget(&config, &url).await,
  }
}

fn persister(config: &Config) -> Result<Persister> {
  let options = config.persist_options()?;
  Ok(Persister::new(options, Arc::new(MemoryQueryCache::new())))
}

async fn fetch(config: &Config, url: &str) -> Result<()> {
  let key = HttpQueryKey::get(url)?;
  let client = HttpClient::new()?;

  let query = persister(config)?.wrap(&key, |client: HttpClient| {
    let url = key.url().clone();
    async move { client.get(url).await }
  })?;

  let result = query.run(client).await?;
  info!(
    url = %key.url(),
    from_storage = result.is_from_storage(),
    status = result.data.status,
    "Fetched"
  );

  print!("{}", result.data.body);
  Ok(())
}

async fn show(config: &Config, url: &str) -> Result<()> {
  let key = HttpQueryKey::get(url)?;
  let record = persister(config)?
    .retrieve_query(&key.cache_hash()?)
    .await?;

  match record {
    Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
    None => eprintln!("No persisted response for {}", key.url()),
  }
  Ok(())
}

async fn forget(config: &Config, url: &str) -> Result<()> {
  let key = HttpQueryKey::get(url)?;
  persister(config)?.remove_query(&key.cache_hash()?).await?;
  info!(url = %key.url(), "Forgot persisted response");
  Ok(())
}
