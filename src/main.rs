use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Context;
use swagman::{
    GracefulShutdown, OpError, SwagService,
    config::load_settings,
    core::requests::{
        ConfigRequest, EditRequest, HealthRequest, ListFilter, LogsRequest, RemoveRequest,
        UpdateRequest,
    },
    tracing_setup,
};
use tokio_util::sync::CancellationToken;

/// Exit code for invalid configuration or environment.
const EXIT_BAD_ENV: u8 = 2;
/// Exit code for a missing or incomplete template directory.
const EXIT_NO_TEMPLATES: u8 = 3;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Manage SWAG reverse-proxy configurations")]
struct Args {
    /// Emit JSON logs instead of console output
    #[clap(long, global = true)]
    json_logs: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configurations
    List {
        /// all, active or samples
        #[clap(short, long, default_value = "all")]
        filter: String,
    },
    /// Print a configuration file
    Read { name: String },
    /// Create a configuration from its template
    Create {
        /// Full filename, e.g. plex.subdomain.conf
        name: String,
        #[clap(long)]
        server_name: String,
        #[clap(long)]
        upstream_app: String,
        #[clap(long)]
        upstream_port: u16,
        #[clap(long, default_value = "http")]
        upstream_proto: String,
        /// Authentication method (defaults to the environment default)
        #[clap(long)]
        auth: Option<String>,
        /// Render the MCP variant
        #[clap(long)]
        mcp: bool,
        /// Enable the QUIC listener
        #[clap(long)]
        quic: bool,
    },
    /// Replace a configuration's full content
    Edit {
        name: String,
        /// Read the new content from this file instead of stdin
        #[clap(long)]
        file: Option<PathBuf>,
        #[clap(long)]
        no_backup: bool,
    },
    /// Update one field (port, upstream, app, add_mcp)
    Update {
        name: String,
        #[clap(long)]
        field: String,
        #[clap(long, default_value = "")]
        value: String,
        #[clap(long)]
        no_backup: bool,
    },
    /// Remove a configuration
    Remove {
        name: String,
        #[clap(long)]
        no_backup: bool,
    },
    /// Splice an MCP location block into an existing configuration
    AddMcp {
        name: String,
        #[clap(long, default_value = "/mcp")]
        path: String,
        #[clap(long)]
        no_backup: bool,
    },
    /// Probe a proxied service over HTTPS
    Health {
        domain: String,
        /// Total budget in seconds (defaults to the environment default)
        #[clap(long)]
        timeout: Option<u64>,
        #[clap(long)]
        no_follow_redirects: bool,
    },
    /// Print the tail of a gateway log
    Logs {
        /// nginx-error, nginx-access, fail2ban, letsencrypt or renewal
        kind: String,
        #[clap(long, default_value_t = 100)]
        lines: usize,
    },
    /// List backup files
    Backups,
    /// Delete backups past the retention window
    Cleanup {
        #[clap(long)]
        days: Option<u32>,
    },
    /// Show the environment defaults
    Defaults,
}

#[tokio::main]
async fn main() -> ExitCode {
    color_eyre::install().expect("failed to install error reporting");

    let args = Args::parse();
    let log_init = if args.json_logs {
        tracing_setup::init_tracing()
    } else {
        tracing_setup::init_console_tracing()
    };
    if let Err(e) = log_init {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(EXIT_BAD_ENV);
        }
    };

    let service = match SwagService::new(settings).await {
        Ok(service) => service,
        Err(err @ OpError::Template(_)) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_NO_TEMPLATES);
        }
        Err(err @ (OpError::InvalidInput { .. } | OpError::Io { .. })) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_BAD_ENV);
        }
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    // SIGINT / SIGTERM cancel in-flight operations through the shared token.
    let shutdown = GracefulShutdown::new();
    let cancel = shutdown.cancellation_token();
    tokio::spawn(async move {
        if let Err(e) = shutdown.run_signal_handler().await {
            tracing::error!("signal handler error: {e:#}");
        }
    });

    match run(&service, args.command, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    service: &SwagService,
    command: Commands,
    cancel: &CancellationToken,
) -> color_eyre::Result<()> {
    match command {
        Commands::List { filter } => {
            let filter: ListFilter = filter.parse()?;
            let result = service.list(filter, cancel).await?;
            print_json(&result)
        }
        Commands::Read { name } => {
            let content = service.read(&name, cancel).await?;
            print!("{content}");
            Ok(())
        }
        Commands::Create {
            name,
            server_name,
            upstream_app,
            upstream_port,
            upstream_proto,
            auth,
            mcp,
            quic,
        } => {
            let defaults = service.defaults();
            let request = ConfigRequest {
                config_name: name,
                server_name,
                upstream_app,
                upstream_port,
                upstream_proto: upstream_proto.parse()?,
                mcp_enabled: mcp,
                auth_method: match auth {
                    Some(raw) => raw.parse()?,
                    None => defaults.auth_method,
                },
                enable_quic: quic,
            };
            let result = service.create(&request, cancel).await?;
            print_json(&result)
        }
        Commands::Edit {
            name,
            file,
            no_backup,
        } => {
            let new_content = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .wrap_err_with(|| format!("failed to read {}", path.display()))?,
                None => {
                    use std::io::Read;
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .wrap_err("failed to read new content from stdin")?;
                    buffer
                }
            };
            let request = EditRequest {
                config_name: name,
                new_content,
                create_backup: !no_backup,
            };
            let result = service.overwrite(&request, cancel).await?;
            print_json(&result)
        }
        Commands::Update {
            name,
            field,
            value,
            no_backup,
        } => {
            let request = UpdateRequest {
                config_name: name,
                kind: field.parse()?,
                value,
                create_backup: !no_backup,
            };
            let result = service.update(&request, cancel).await?;
            print_json(&result)
        }
        Commands::Remove { name, no_backup } => {
            let request = RemoveRequest {
                config_name: name,
                create_backup: !no_backup,
            };
            let result = service.remove(&request, cancel).await?;
            print_json(&result)
        }
        Commands::AddMcp {
            name,
            path,
            no_backup,
        } => {
            let result = service
                .add_mcp(&name, Some(&path), !no_backup, cancel)
                .await?;
            print_json(&result)
        }
        Commands::Health {
            domain,
            timeout,
            no_follow_redirects,
        } => {
            let request = HealthRequest {
                domain,
                timeout_secs: timeout.unwrap_or(service.defaults().health_timeout_secs),
                follow_redirects: !no_follow_redirects,
            };
            let result = service.health_check(&request, cancel).await?;
            print_json(&result)
        }
        Commands::Logs { kind, lines } => {
            let request = LogsRequest {
                kind: kind.parse()?,
                lines,
            };
            let text = service.logs(&request, cancel).await?;
            print!("{text}");
            Ok(())
        }
        Commands::Backups => {
            let result = service.backups_list(cancel).await?;
            print_json(&result)
        }
        Commands::Cleanup { days } => {
            let removed = service.backups_cleanup(days, cancel).await?;
            println!("{removed}");
            Ok(())
        }
        Commands::Defaults => print_json(&service.defaults()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> color_eyre::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).wrap_err("failed to serialize result")?
    );
    Ok(())
}
