use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use reliefsync::config::{self, Config};
use reliefsync::network::{HttpProbe, NetworkMonitor};
use reliefsync::remote::HttpRemote;
use reliefsync::resource::ResourceCache;
use reliefsync::store::{ContentIndex, SharedCache};
use reliefsync::{logging, CollectionResult, ContentRecord, SyncOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "reliefsync")]
#[command(about = "Offline-first content sync for the disaster-response portal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/reliefsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the network as unavailable
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch collections and reconcile the local cache
  Sync {
    /// Collections to sync (default: configured collections)
    collections: Vec<String>,
  },
  /// List a collection's records
  Show {
    collection: String,
    /// Only records of this content type
    #[arg(long = "type")]
    content_type: Option<String>,
    /// Only records published on this day (YYYY-MM-DD)
    #[arg(long)]
    published: Option<String>,
  },
  /// Print a rendered page
  Page { path: String },
  /// List pages available offline
  Pages,
  /// Show connectivity and cache state
  Status,
  /// Remove everything from the local cache
  Clear,
  /// Follow connectivity and resync collections on reconnect
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let shared = SharedCache::new(config.cache.clone());
  let cache = shared.get_or_open().await;
  if let Err(e) = cache.status() {
    warn!("{}", e);
  }

  let probe = HttpProbe::new(
    &config.remote.base_url,
    &config.remote.health_path,
    config.remote.fetch_timeout(),
  )?;
  let online = if args.offline {
    false
  } else if let Some(assumed) = config.network.assume_online {
    assumed
  } else {
    probe.check().await
  };
  let network = NetworkMonitor::new(online);
  info!(online, "Initial network status");

  let resources_path = config::data_dir()?.join("resources.json");
  let resources = Arc::new(ResourceCache::load(&config.policy, &resources_path)?);

  let remote = HttpRemote::new(&config.remote)?;
  let site = remote.base_url().clone();
  let orchestrator = SyncOrchestrator::new(remote.clone(), cache.clone(), network.clone())
    .with_fetch_timeout(config.remote.fetch_timeout())
    .with_resources(resources.clone(), site);

  match args.command {
    Command::Sync { collections } => {
      let collections = if collections.is_empty() {
        config.collections.clone()
      } else {
        collections
      };

      if network.is_online() {
        match resources
          .install_precache(&config.policy.precache, |url| remote.fetch_resource(url))
          .await
        {
          Ok(fetched) => info!(fetched, "Precache up to date"),
          Err(e) => warn!("Precache install failed: {:#}", e),
        }
      }

      for name in &collections {
        match orchestrator.fetch_collection(name).await {
          Ok(result) => {
            println!("{}: {} records ({})", name, result.data.len(), result.source.as_str());
            print_notice(&result);
          }
          Err(e) => println!("{}: {}", name, e),
        }
      }
    }
    Command::Show {
      collection,
      content_type,
      published,
    } => {
      let result = orchestrator.fetch_collection(&collection).await?;
      print_notice(&result);

      // Filter what was returned; the cache may not hold it.
      let mut records = result.data;
      if let Some(content_type) = content_type {
        records = ContentIndex::ContentType.select(&records, &content_type)?;
      }
      if let Some(day) = published {
        records = ContentIndex::PublishedOn.select(&records, &day)?;
      }

      for record in &records {
        print_record(record);
      }
    }
    Command::Page { path } => {
      if network.is_online() {
        let url = remote.page_url(&path)?;
        if let Err(e) = resources
          .fetch(url.as_str(), |u| remote.fetch_resource(u))
          .await
        {
          warn!("Resource cache refresh failed: {:#}", e);
        }
      }

      let page = orchestrator.load_page(&path).await?;
      if page.is_cached() {
        println!("{}", freshness_notice(page.last_updated));
      }
      println!("{}", page.content);
    }
    Command::Pages => {
      for path in orchestrator.offline_pages() {
        println!("{}", path);
      }
    }
    Command::Status => {
      let status = orchestrator.network_status();
      println!("network: {}", if status.is_online { "online" } else { "offline" });
      match orchestrator.cache().status() {
        Ok(()) => println!("cache: available"),
        Err(e) => println!("cache: {}", e),
      }
      for name in &config.collections {
        let cached = orchestrator.cache().get_collection(name);
        let updated = cached
          .last_updated()
          .map(|t| t.to_rfc3339())
          .unwrap_or_else(|| "unknown".to_string());
        println!("{}: {} cached, last updated {}", name, cached.records.len(), updated);
      }
      println!("offline pages: {}", orchestrator.offline_pages().len());
    }
    Command::Clear => {
      orchestrator.cache().clear()?;
      println!("Local cache cleared");
    }
    Command::Watch => {
      let _subscription = orchestrator.subscribe_network_status(|online| {
        println!("network: {}", if online { "online" } else { "offline" });
      });
      let resync = orchestrator.spawn_reconnect_sync(config.collections.clone());
      let probing = probe.spawn(
        network.clone(),
        Duration::from_secs(config.network.probe_interval_secs),
      );

      tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
      probing.abort();
      resync.abort();
    }
  }

  if let Err(e) = resources.save(&resources_path) {
    warn!("Failed to persist resource cache: {:#}", e);
  }

  Ok(())
}

fn print_notice(result: &CollectionResult) {
  if result.is_cached() {
    println!("{}", freshness_notice(result.last_updated));
  }
  if let Some(error) = &result.error {
    println!("warning: {}", error);
  }
}

fn freshness_notice(last_updated: Option<DateTime<Utc>>) -> String {
  match last_updated {
    Some(t) => format!(
      "Viewing cached content, last updated at {}",
      t.format("%Y-%m-%d %H:%M UTC")
    ),
    None => "Viewing cached content, last updated at unknown time".to_string(),
  }
}

fn print_record(record: &ContentRecord) {
  println!(
    "{}  [{}] {}",
    record.published_at.format("%Y-%m-%d"),
    record.content_type,
    record.title
  );
}
