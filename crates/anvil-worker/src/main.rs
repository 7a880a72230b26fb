// Entry point for the Anvil worker process.
//
// Parses CLI arguments, configures the tracing subscriber from the debug
// flags, enters the scratch directory, probes host capacity once, and hands
// control to the session loop. The process exits 0 on a graceful `exit`
// command or idle expiry, 1 on invalid usage or a startup failure.

use anvil_sdk::{StringUtil, TracingTraceWriter};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use anvil_worker::resources;
use anvil_worker::scratch;
use anvil_worker::session::{Session, SessionConfig};

/// Command-line arguments for the worker process.
#[derive(Parser, Debug)]
#[command(
    name = "anvil-worker",
    about = "Anvil remote execution agent",
    disable_version_flag = true
)]
struct Args {
    /// Controller host name or address.
    ///
    /// Optional at the clap level so a bare `-v` still parses; required by
    /// `target()` before the worker starts.
    host: Option<String>,

    /// Controller TCP port.
    port: Option<u16>,

    /// Enable debug output for a subsystem (tcp, transfer, session, all).
    /// May be given more than once.
    #[arg(short = 'd', long = "debug", value_name = "SUBSYSTEM")]
    debug: Vec<String>,

    /// Abort after this much idle time (e.g. "30s", "15m", "1h").
    #[arg(short = 't', long = "timeout", value_name = "TIME", default_value = "1h")]
    idle_timeout: String,

    /// Send debug output to this file instead of stderr.
    #[arg(short = 'o', long = "debug-file", value_name = "FILE")]
    debug_file: Option<PathBuf>,

    /// TCP window size (e.g. "64k", "1M").
    #[arg(short = 'w', long = "window", value_name = "SIZE")]
    window: Option<String>,

    /// Print version information and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,
}

impl Args {
    /// The controller endpoint, when both positionals were given.
    fn target(&self) -> Option<(String, u16)> {
        Some((self.host.clone()?, self.port?))
    }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help/version display is a graceful exit; anything else is usage
            // error and exits 1.
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if args.version {
        println!(
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );
        std::process::exit(0);
    }

    let Some((host, port)) = args.target() else {
        eprintln!("usage: anvil-worker [OPTIONS] <HOST> <PORT>");
        eprintln!("Try 'anvil-worker --help' for more information.");
        std::process::exit(1);
    };

    let idle_timeout = match StringUtil::parse_time_span(&args.idle_timeout) {
        Some(seconds) => Duration::from_secs(seconds),
        None => {
            eprintln!("invalid idle timeout '{}'", args.idle_timeout);
            std::process::exit(1);
        }
    };

    let window = match &args.window {
        Some(value) => match StringUtil::parse_metric(value).and_then(|n| u32::try_from(n).ok()) {
            Some(size) => Some(size),
            None => {
                eprintln!("invalid window size '{}'", value);
                std::process::exit(1);
            }
        },
        None => None,
    };

    if let Err(message) = init_tracing(&args.debug, args.debug_file.as_deref()) {
        eprintln!("{message}");
        std::process::exit(1);
    }

    // The session loop is strictly sequential; a single-threaded runtime is
    // all it needs.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    let exit_code = runtime.block_on(run(host, port, idle_timeout, window));
    std::process::exit(exit_code);
}

async fn run(host: String, port: u16, idle_timeout: Duration, window: Option<u32>) -> i32 {
    tracing::info!("Worker process starting.");
    tracing::info!("  Version = {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Controller = {}:{}", host, port);
    tracing::info!("  Idle timeout = {:?}", idle_timeout);

    let workdir = match scratch::enter_scratch_dir() {
        Ok(path) => path,
        Err(e) => {
            tracing::error!("Worker failed to start: {:#}", e);
            return 1;
        }
    };
    tracing::info!("  Scratch = {}", workdir.display());

    let snapshot = resources::probe(&workdir);
    tracing::info!(
        "  Capacity = {} cpus, {}/{} memory, {}/{} disk",
        snapshot.cpus,
        snapshot.memory_avail,
        snapshot.memory_total,
        snapshot.disk_avail,
        snapshot.disk_total
    );

    let mut config = SessionConfig::new(host, port, workdir);
    config.idle_timeout = idle_timeout;
    config.window = window;

    let session = Session::new(
        config,
        snapshot,
        Arc::new(TracingTraceWriter::prefixed("Session")),
    );
    session.run().await
}

/// Configure the global tracing subscriber from the `-d` and `-o` flags.
fn init_tracing(debug: &[String], debug_file: Option<&Path>) -> Result<(), String> {
    let mut filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    for subsystem in debug {
        for directive in debug_directives(subsystem)
            .ok_or_else(|| format!("unknown debug subsystem '{subsystem}'"))?
        {
            filter = filter.add_directive(
                directive
                    .parse()
                    .map_err(|e| format!("bad debug directive '{directive}': {e}"))?,
            );
        }
    }

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match debug_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("cannot open debug file '{}': {e}", path.display()))?;
            builder.with_ansi(false).with_writer(Arc::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// Env-filter directives enabled by a named debug subsystem.
fn debug_directives(subsystem: &str) -> Option<&'static [&'static str]> {
    match subsystem {
        // Session-level diagnostics flow through the injected trace writer.
        "session" | "process" => Some(&["anvil_sdk::trace=debug"]),
        "tcp" | "transport" => Some(&["anvil_worker::transport=debug"]),
        "transfer" => Some(&["anvil_worker::transfer=debug"]),
        "all" => Some(&["anvil_worker=debug", "anvil_sdk=debug"]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_debug_subsystems_map_to_directives() {
        for name in ["tcp", "transport", "transfer", "session", "process", "all"] {
            assert!(debug_directives(name).is_some(), "{name}");
        }
        assert!(debug_directives("bogus").is_none());
    }

    #[test]
    fn args_parse_positionals_and_flags() {
        let args = Args::parse_from([
            "anvil-worker",
            "-d",
            "tcp",
            "-t",
            "15m",
            "-w",
            "64k",
            "master.example.org",
            "9123",
        ]);
        assert_eq!(args.target(), Some(("master.example.org".to_string(), 9123)));
        assert_eq!(args.debug, vec!["tcp"]);
        assert_eq!(args.idle_timeout, "15m");
        assert_eq!(args.window.as_deref(), Some("64k"));
        assert!(!args.version);
    }

    #[test]
    fn bare_version_flag_parses_without_positionals() {
        let args = Args::try_parse_from(["anvil-worker", "-v"]).unwrap();
        assert!(args.version);
        assert_eq!(args.target(), None);
        let args = Args::try_parse_from(["anvil-worker", "--version"]).unwrap();
        assert!(args.version);
    }

    #[test]
    fn missing_positionals_yield_no_target() {
        let args = Args::try_parse_from(["anvil-worker"]).unwrap();
        assert_eq!(args.target(), None);
        let args = Args::try_parse_from(["anvil-worker", "host"]).unwrap();
        assert_eq!(args.target(), None);
        assert!(Args::try_parse_from(["anvil-worker", "host", "notaport"]).is_err());
    }
}
