//! CLI entry point. Also the Worker entry point: when re-exec'd with the
//! hidden `__worker <config_ini> <descriptor_ini>` argv, this process
//! becomes a Tunnel Worker instead of the Supervisor. That branch is
//! checked before any flag parsing so it never shows up in `--help`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use revtun::alerts::{AlertFanout, AlertSender, HttpAlertSender, SmtpAlertSender};
use revtun::config::TopLevelConfig;
use revtun::{TunnelDescriptor, device, logging, selftest, worker};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "revtun", version, about = "Reverse-tunnel supervisor")]
struct Cli {
    /// Path to the top-level configuration file.
    #[arg(long, default_value = "pytun.ini")]
    config_ini: PathBuf,

    /// Send one test alert through the configured SMTP sender and exit.
    #[arg(long)]
    test_smtp: bool,

    /// Send one test alert through the configured HTTP sender and exit.
    #[arg(long)]
    test_http: bool,

    /// Probe every descriptor's local service and exit.
    #[arg(long)]
    test_connections: bool,

    /// Connect and request a port-forward for every descriptor and exit.
    #[arg(long)]
    test_tunnels: bool,
}

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    if argv.get(1).map(String::as_str) == Some(worker::WORKER_SUBCOMMAND) {
        return run_worker_process(&argv);
    }

    let rt = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    rt.block_on(run_supervisor_process())
}

/// Re-exec'd Worker entry point. Builds its own logging and its own
/// Alert Fanout from the same top-level config the Supervisor used, since
/// nothing is shared across the process boundary except argv.
fn run_worker_process(argv: &[String]) -> ExitCode {
    let Some(config_path) = argv.get(2) else {
        eprintln!("{} requires <config_ini> <descriptor_ini>", worker::WORKER_SUBCOMMAND);
        return ExitCode::from(1);
    };
    let Some(descriptor_path) = argv.get(3) else {
        eprintln!("{} requires <config_ini> <descriptor_ini>", worker::WORKER_SUBCOMMAND);
        return ExitCode::from(1);
    };

    let rt = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    rt.block_on(async {
        let top_level = match TopLevelConfig::from_ini_file(PathBuf::from(config_path).as_path()) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("worker: failed to load {config_path}: {e}");
                return ExitCode::from(1);
            }
        };
        let descriptor = match TunnelDescriptor::from_ini_file(PathBuf::from(descriptor_path).as_path()) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("worker: failed to load {descriptor_path}: {e}");
                return ExitCode::from(1);
            }
        };

        let _guard = match logging::init(logging::LoggingConfig {
            log_level: &descriptor.log_level,
            log_to_console: descriptor.log_to_console,
            log_path: descriptor.log_path.as_deref().or(Some(top_level.log_path.as_path())),
        }) {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("worker: failed to initialize logging: {e}");
                return ExitCode::from(1);
            }
        };

        let alerts = build_alert_fanout(&top_level);
        let code = worker::run(&descriptor, Some(&alerts)).await;
        ExitCode::from(code as u8)
    })
}

async fn run_supervisor_process() -> ExitCode {
    let cli = Cli::parse();

    let top_level = match TopLevelConfig::from_ini_file(&cli.config_ini) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load {}: {e}", cli.config_ini.display());
            return ExitCode::from(1);
        }
    };

    let _guard = match logging::init(logging::LoggingConfig {
        log_level: &top_level.log_level,
        log_to_console: top_level.log_to_console,
        log_path: Some(&top_level.log_path),
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return ExitCode::from(1);
        }
    };

    if !device::is_device_authorized(top_level.mac_address_signature.as_deref()) {
        error!("device is not authorized to run this supervisor");
        return ExitCode::from(1);
    }

    let descriptor_paths = match TunnelDescriptor::discover(&top_level.tunnel_dirs) {
        Ok(paths) => paths,
        Err(e) => {
            error!(error = %e, "failed to enumerate tunnel descriptors");
            return ExitCode::from(1);
        }
    };
    let mut descriptors = Vec::with_capacity(descriptor_paths.len());
    for path in &descriptor_paths {
        match TunnelDescriptor::from_ini_file(path) {
            Ok(d) => descriptors.push(d),
            Err(e) => {
                error!(path = %path.display(), error = %e, "malformed descriptor");
                return ExitCode::from(1);
            }
        }
    }

    if cli.test_smtp {
        let Some(smtp) = top_level.smtp.clone() else {
            error!("--test_smtp requires smtp_hostname to be configured");
            return ExitCode::from(selftest::EXIT_SMTP_FAILED as u8);
        };
        return ExitCode::from(selftest::test_smtp(smtp, &top_level.tunnel_manager_id).await as u8);
    }
    if cli.test_http {
        let Some(http) = top_level.http.clone() else {
            error!("--test_http requires http_url to be configured");
            return ExitCode::from(selftest::EXIT_HTTP_FAILED as u8);
        };
        return ExitCode::from(selftest::test_http(http, &top_level.tunnel_manager_id).await as u8);
    }
    if cli.test_connections {
        return ExitCode::from(selftest::test_connections(&descriptors) as u8);
    }
    if cli.test_tunnels {
        return ExitCode::from(selftest::test_tunnels(&descriptors).await as u8);
    }

    info!(
        tunnel_manager_id = %top_level.tunnel_manager_id,
        tunnels = descriptors.len(),
        "starting supervisor"
    );

    let alerts = build_alert_fanout(&top_level);

    let mac_address = device::primary_mac_address();
    let status = Arc::new(revtun::StatusRegistry::new(mac_address));

    let introspection_config = Arc::new(revtun::introspection::IntrospectionConfig {
        tunnel_manager_id: top_level.tunnel_manager_id.clone(),
        inspection_port: top_level.inspection_port,
        inspection_localhost_only: top_level.inspection_localhost_only,
        tunnel_dirs: top_level.tunnel_dirs.clone(),
        log_path: top_level.log_path.clone(),
        descriptors: descriptors.clone(),
    });
    revtun::introspection::spawn(introspection_config, status.clone());

    let mut supervisor = match revtun::Supervisor::new(top_level, cli.config_ini.clone(), alerts, status) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to initialize supervisor");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = supervisor.start_all().await {
        error!(error = %e, "failed to start one or more tunnels, exiting");
        return ExitCode::from(1);
    }

    supervisor.run().await;
    info!("supervisor exiting cleanly");
    ExitCode::from(0)
}

fn build_alert_fanout(top_level: &TopLevelConfig) -> revtun::alerts::AlertFanoutHandle {
    let mut senders: Vec<Box<dyn AlertSender>> = Vec::new();
    if let Some(smtp) = top_level.smtp.clone() {
        senders.push(Box::new(SmtpAlertSender::new(smtp, top_level.tunnel_manager_id.clone())));
    }
    if let Some(http) = top_level.http.clone() {
        senders.push(Box::new(HttpAlertSender::new(http, top_level.tunnel_manager_id.clone())));
    }
    AlertFanout::new(senders).spawn()
}
