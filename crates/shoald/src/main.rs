//! shoald, the Shoal autoscaler daemon.
//!
//! Single binary that assembles the Shoal subsystems:
//! - Coordination store (redb)
//! - Task inventory client
//! - Metrics providers
//! - Per-instance autoscaler + scale-out loop
//! - Operator REST API
//!
//! # Usage
//!
//! ```text
//! shoald --config /etc/shoal/system.toml serve --listen 0.0.0.0:5054
//! shoald once web api
//! shoald pause --minutes 30
//! ```

mod commands;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shoald", about = "Shoal autoscaler daemon")]
struct Cli {
    /// System config file.
    #[arg(long, global = true, default_value = "/etc/shoal/system.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run scale-out cycles on the configured interval until interrupted.
    Run,

    /// Run a single scale-out cycle.
    Once {
        /// Services to evaluate (all when omitted).
        services: Vec<String>,

        /// Read the task inventory from a JSON file instead of the cluster manager.
        #[arg(long)]
        inventory_file: Option<PathBuf>,
    },

    /// Print what the autoscaler would do, without writing anything.
    Status {
        /// Services to report on (all when omitted).
        services: Vec<String>,
    },

    /// Suppress all autoscaling decisions for a while.
    Pause {
        #[arg(long, default_value = "30")]
        minutes: u64,
    },

    /// Lift an active pause.
    Unpause,

    /// Override the instance count of one service instance.
    SetInstances {
        service: String,
        instance: String,
        count: u32,
    },

    /// Run the scale-out loop and serve the operator API.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:5054")]
        listen: SocketAddr,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shoald=debug,shoal=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let system = shoal_core::SystemConfig::from_file(&cli.config)?;

    match cli.command {
        Command::Run => commands::run(&system).await,
        Command::Once {
            services,
            inventory_file,
        } => commands::once(&system, &services, inventory_file.as_deref()).await,
        Command::Status { services } => commands::status(&system, &services).await,
        Command::Pause { minutes } => commands::pause(&system, minutes),
        Command::Unpause => commands::unpause(&system),
        Command::SetInstances {
            service,
            instance,
            count,
        } => commands::set_instances(&system, &service, &instance, count),
        Command::Serve { listen } => commands::serve(&system, listen).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_once_with_services() {
        let cli = Cli::try_parse_from(["shoald", "once", "web", "api"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/shoal/system.toml"));
        match cli.command {
            Command::Once {
                services,
                inventory_file,
            } => {
                assert_eq!(services, vec!["web".to_string(), "api".to_string()]);
                assert!(inventory_file.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "shoald",
            "pause",
            "--minutes",
            "5",
            "--config",
            "/tmp/system.toml",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.config, PathBuf::from("/tmp/system.toml"));
        assert!(matches!(cli.command, Command::Pause { minutes: 5 }));
    }

    #[test]
    fn set_instances_requires_count() {
        assert!(Cli::try_parse_from(["shoald", "set-instances", "web", "main"]).is_err());
        let cli = Cli::try_parse_from(["shoald", "set-instances", "web", "main", "7"]).unwrap();
        assert!(matches!(cli.command, Command::SetInstances { count: 7, .. }));
    }

    #[test]
    fn serve_listen_default() {
        let cli = Cli::try_parse_from(["shoald", "serve"]).unwrap();
        match cli.command {
            Command::Serve { listen } => assert_eq!(listen.port(), 5054),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
