use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;

use vpctrace::cache::Cache;
use vpctrace::cli::Args;
use vpctrace::cloud::InventoryApi;
use vpctrace::config::Config;
use vpctrace::prefs::Prefs;
use vpctrace::topology::TOPOLOGY_NAMESPACE;
use vpctrace::topology::markers::MARKERS_NAMESPACE;
use vpctrace::trace::{Hop, TraceObserver, Tracer};

/// Prints hops to stdout as they are found and progress to stderr
struct ConsoleObserver;

impl TraceObserver for ConsoleObserver {
    fn on_hop(&self, hop: &Hop) {
        println!(
            "{:>2}. {:<18} {} ({}) @ {}",
            hop.seq, hop.kind, hop.id, hop.name, hop.region
        );
    }

    fn on_status(&self, msg: &str) {
        eprintln!("  -> {}", msg);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.as_str())
        .with_writer(std::io::stderr)
        .init();

    let mut prefs = Prefs::load();

    if let Some(ref ttl) = args.set_ttl {
        prefs.cache_ttl = Some(ttl.clone());
        prefs.save().context("Failed to save preferences")?;
        println!("Default cache TTL set to {}", ttl);
    }

    let config = Config::from_args(&args, &prefs);
    let cache_dir = config.cache_dir();

    if args.clear_cache {
        Cache::new(&cache_dir, TOPOLOGY_NAMESPACE).clear()?;
        Cache::new(&cache_dir, MARKERS_NAMESPACE).clear()?;
        println!("Cache cleared");
    }

    if args.cache_info {
        print_cache_info(&Cache::new(&cache_dir, TOPOLOGY_NAMESPACE));
    }

    if args.is_maintenance() {
        return Ok(());
    }

    let (Some(src), Some(dst)) = (args.src, args.dst) else {
        anyhow::bail!("Source and destination addresses are required");
    };
    let inventory = args
        .inventory
        .as_deref()
        .context("--inventory is required to trace")?;
    let api = Arc::new(InventoryApi::from_file(inventory)?);

    println!("\nTracing {} -> {}\n", src, dst);

    let tracer = Tracer::new(api, config, Arc::new(ConsoleObserver));
    let start = Instant::now();
    let result = tracer.trace(src, dst).await?;
    let elapsed = start.elapsed().as_secs_f64();

    println!();
    if result.reachable {
        println!("REACHABLE in {:.1}s", elapsed);
    } else {
        println!("BLOCKED in {:.1}s", elapsed);
        if !result.blocked_reason.is_empty() {
            println!("Reason: {}", result.blocked_reason);
        }
        std::process::exit(2);
    }

    Ok(())
}

fn print_cache_info(cache: &Cache) {
    match cache.info() {
        Some(info) => {
            println!("Cache: {}", cache.path().display());
            println!("  cached at: {}", info.cached_at.to_rfc3339());
            println!("  age:       {}s (ttl {}s)", info.age_seconds, info.ttl_seconds);
            println!(
                "  status:    {}",
                if info.expired { "expired" } else { "valid" }
            );
            if let Some(account) = info.account_id {
                println!("  account:   {}", account);
            }
        }
        None => println!("No cached topology at {}", cache.path().display()),
    }
}
