use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use palsync::config::{Config, LogConfig};
use palsync::palette::{
  CacheOptions, CacheResult, Color, HttpRemote, NewPalette, PaletteCache, PaletteUpdate,
};
use palsync::store::SqliteKvStore;

#[derive(Parser, Debug)]
#[command(name = "palsync")]
#[command(about = "Offline-first palette cache that syncs local edits with the palette API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/palsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Work from the local cache only
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show one palette
  Get { id: String },
  /// List palettes, optionally for one image
  List {
    #[arg(long)]
    image: Option<String>,
  },
  /// Create a palette
  Create {
    #[arg(long)]
    name: String,
    #[arg(long)]
    image_id: String,
    #[arg(long, default_value = "")]
    description: String,
    /// Comma-separated hex colors, e.g. "#ff5733,#33ff57"
    #[arg(long, value_delimiter = ',', value_parser = parse_color)]
    colors: Vec<Color>,
  },
  /// Change fields of a palette
  Update {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    image_id: Option<String>,
    /// Comma-separated hex colors, replacing the current list
    #[arg(long, value_delimiter = ',', value_parser = parse_color)]
    colors: Option<Vec<Color>>,
  },
  /// Push pending local changes to the API
  Sync,
  /// Export a cached palette's colors with rgb and hsv values
  Export { id: String },
  /// Show offline mode, pending changes and API health
  Status,
  /// Delete all locally cached palettes and pending changes
  Clear,
}

fn parse_color(s: &str) -> Result<Color, String> {
  Color::from_hex(s).ok_or_else(|| format!("invalid hex color: {}", s))
}

/// Install the global subscriber. Logs go to stderr so stdout stays JSON.
fn init_logging(log: &LogConfig) -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

  let (writer, guard) = match &log.file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name))
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(
      fmt::layer()
        .with_writer(writer)
        .with_ansi(log.file.is_none()),
    )
    .init();

  Ok(guard)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  println!("{}", out);
  Ok(())
}

fn print_result<T: Serialize>(result: &CacheResult<T>) -> Result<()> {
  if let Some(warning) = &result.warning {
    eprintln!("warning: {}", warning);
  }
  print_json(&result.data)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if args.offline {
    config.offline = true;
  }

  let _log_guard = init_logging(&config.log)?;

  let store_path = match &config.store.path {
    Some(path) => path.clone(),
    None => SqliteKvStore::default_path()?,
  };
  debug!(path = %store_path.display(), "Opening palette store");
  let store = Arc::new(SqliteKvStore::open(&store_path)?);

  let remote = HttpRemote::new(&config.api)?;
  let cache = PaletteCache::new(store, remote.clone(), CacheOptions::from(&config))?;

  match args.command {
    Command::Get { id } => match cache.get(&id).await? {
      Some(palette) => print_json(&palette)?,
      None => {
        if let Some(error) = cache.error() {
          eprintln!("warning: {}", error);
        }
        return Err(eyre!("Palette not found: {}", id));
      }
    },
    Command::List { image } => {
      let result = match image {
        Some(image_id) => cache.list_by_image(&image_id).await?,
        None => cache.list().await?,
      };
      print_result(&result)?;
    }
    Command::Create {
      name,
      image_id,
      description,
      colors,
    } => {
      let result = cache
        .create(NewPalette {
          name,
          image_id,
          description,
          colors,
        })
        .await?;
      print_result(&result)?;
    }
    Command::Update {
      id,
      name,
      description,
      image_id,
      colors,
    } => {
      let fields = PaletteUpdate {
        name,
        description,
        image_id,
        image_url: None,
        colors,
      };
      if fields.is_empty() {
        return Err(eyre!("Nothing to update for palette {}", id));
      }
      let result = cache.update(&id, fields).await?;
      print_result(&result)?;
    }
    Command::Sync => {
      let report = cache.sync_pending_changes().await?;
      print_json(&report)?;
    }
    Command::Export { id } => match cache.export(&id) {
      Some(colors) => print_json(&colors)?,
      None => return Err(eyre!("Palette not cached: {}", id)),
    },
    Command::Status => {
      let health = if cache.is_offline() {
        json!(null)
      } else {
        match remote.check_health().await {
          Ok(health) => json!({
            "status": health.status,
            "version": health.version,
            "databaseConnection": health.database_connection,
            "healthy": health.is_healthy,
          }),
          Err(e) => json!({ "healthy": false, "error": e.to_string() }),
        }
      };
      print_json(&json!({
        "offline": cache.is_offline(),
        "pending": cache.pending_ids(),
        "api": config.api.base_url,
        "health": health,
      }))?;
    }
    Command::Clear => {
      cache.clear_local_data()?;
      eprintln!("Cleared local palette data");
    }
  }

  Ok(())
}
