use clap::Parser;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use foodlog::analyzer::SimulatedAnalyzer;
use foodlog::backend::{Backend, LedgerBackend, MemoryBackend};
use foodlog::manager::{self, SystemProfile};
use foodlog::ops::OperationTracker;
use foodlog::remote::{serve_backend, HttpBackend};
use foodlog::server::FoodLogServer;
use foodlog::Ledger;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "FoodLog node: record store, analysis and REPL endpoint", long_about = None)]
struct Args {
    /// Client (REPL) TCP address.
    #[clap(long, default_value = "127.0.0.1:9100")]
    addr: String,

    /// Port of the HTTP key-value API exposed for remote nodes.
    #[clap(long, default_value = "20101")]
    api_port: u16,

    #[clap(long, default_value = "foodlog_ledger.dat")]
    data_file: String,

    /// `ledger`, `memory`, or the `http://host:port` of another node's API.
    #[clap(long, default_value = "ledger")]
    backend: String,

    #[clap(long, default_value = "0.3")]
    flag_probability: f64,

    #[clap(long, default_value = "3000")]
    analysis_delay_ms: u64,

    #[clap(long, default_value = "Dairy,Gluten,Nuts", value_delimiter = ',')]
    allergens: Vec<String>,

    #[clap(long, default_value = "600")]
    compaction_interval_secs: u64,

    #[clap(long)]
    read_only: bool,
}

fn main() {
    let args = Args::parse();
    let profile = SystemProfile::detect();

    println!("--- [FoodLog Resource Manager] ---");
    println!("Detected Cores: {}", profile.logical_cores);
    println!("Worker Threads: {}", profile.worker_threads);
    println!("Durability Mode: {}", if profile.strict_durability { "Strict (Fsync)" } else { "High Throughput (Async)" });
    println!("----------------------------------");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(profile.worker_threads)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(args, profile)) {
        eprintln!("fatal: {}", e);
        process::exit(1);
    }
}

async fn async_main(args: Args, profile: SystemProfile) -> std::io::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,foodlog=info");
    }
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let backend: Arc<dyn Backend> = match args.backend.as_str() {
        "ledger" => {
            println!("Initializing Storage Engine...");
            let ledger = Arc::new(Ledger::open(
                Path::new(&args.data_file),
                profile.strict_durability,
                args.read_only,
            )?);
            if !args.read_only {
                manager::start_compaction_task(ledger.clone(), Duration::from_secs(args.compaction_interval_secs));
            }
            Arc::new(LedgerBackend::new(ledger))
        }
        "memory" => {
            info!("using in-memory backend; nothing survives a restart");
            Arc::new(MemoryBackend::new())
        }
        url if url.starts_with("http://") || url.starts_with("https://") => {
            info!("using remote backend at {}", url);
            Arc::new(HttpBackend::new(url))
        }
        other => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unknown backend '{}' (expected ledger, memory or an http:// URL)", other),
            ));
        }
    };

    // Only locally owned stores are re-exported over HTTP.
    if !args.backend.starts_with("http") {
        let api_backend = backend.clone();
        let api_port = args.api_port;
        tokio::spawn(async move {
            serve_backend(api_backend, api_port).await;
        });
        println!("Backend HTTP API listening on port {}", api_port);
    }

    let analyzer = Arc::new(SimulatedAnalyzer::new(
        args.allergens.iter().map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect(),
        args.flag_probability,
        Duration::from_millis(args.analysis_delay_ms),
    ));
    let server = FoodLogServer::new(backend, analyzer, Arc::new(OperationTracker::default()));

    let addr = args.addr.clone();
    tokio::spawn(async move {
        if let Err(e) = server.run(&addr).await {
            error!("client server on {} stopped: {}", addr, e);
        }
    });

    println!("FoodLog Client Server listening on {}", args.addr);
    println!("Node is Ready.");

    tokio::signal::ctrl_c().await?;
    println!("Shutting down.");
    Ok(())
}
