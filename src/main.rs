//! projupdate - Main entry point.
//!
//! Serves plugin and theme updates from remote source hosts.
//!
//! Usage: projupdate [OPTIONS]
//!
//! Options:
//!   --root <DIR>            Data directory (default: current directory)
//!   --bind <ADDR>           Listen address (default: 127.0.0.1:8080)
//!   --log-level <LEVEL>     trace, debug, info, warn, error or off
//!   --log-retention <HOURS> Age after which old log files are deleted
//!   --no-log                Disable file logging
//!   --clean                 Remove all cached files and temp directories, then exit
//!   --version, -v           Show version

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use projupdate::cache;
use projupdate::config::Paths;
use projupdate::engine::Engine;
use projupdate::host::ReqwestTransport;
use projupdate::logging::{self, LogConfig};
use projupdate::server::{DEFAULT_BIND, UpdateServer};

/// Parsed command-line options.
struct Options {
    root: PathBuf,
    bind: String,
    log_level: Option<String>,
    log_retention: Option<String>,
    no_log: bool,
    clean: bool,
}

/// Returns the value following a flag.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_options(args: &[String]) -> Options {
    Options {
        root: flag_value(args, "--root").map_or_else(|| PathBuf::from("."), PathBuf::from),
        bind: flag_value(args, "--bind").unwrap_or_else(|| DEFAULT_BIND.to_string()),
        log_level: flag_value(args, "--log-level"),
        log_retention: flag_value(args, "--log-retention"),
        no_log: args.iter().any(|a| a == "--no-log"),
        clean: args.iter().any(|a| a == "--clean"),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("projupdate v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let options = parse_options(&args);
    let paths = Paths::new(&options.root);

    let mut log_config = LogConfig::new(paths.logs_dir());
    if let Some(level) = &options.log_level {
        log_config.level = LogConfig::parse_level(level);
    }
    if let Some(hours) = &options.log_retention {
        log_config.retention_hours = LogConfig::parse_retention(hours);
    }
    log_config.enabled = !options.no_log;
    let _log_guard = logging::init(&log_config)?;

    if options.clean {
        cache::clean_all(&paths)?;
        println!("Cache and temp directories removed.");
        return Ok(());
    }

    let addr: SocketAddr = match options.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Invalid bind address {}: {}", options.bind, e);
            process::exit(2);
        }
    };

    // The blocking client must not be built inside the async runtime.
    let transport = ReqwestTransport::new()?;
    let engine = Arc::new(Engine::new(options.root.clone(), Arc::new(transport)));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut server = UpdateServer::start(engine, addr).await?;
        println!("projupdate listening on {}", server.url());

        tokio::signal::ctrl_c().await?;
        server.shutdown();
        Ok::<(), std::io::Error>(())
    })?;

    Ok(())
}
