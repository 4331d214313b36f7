use clap::{Parser, Subcommand};
use lswitch::config::{self, Config, PhysicalConfig, SessionConfig};
use lswitch::telemetry::{init_logging, MetricsRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const DEFAULT_CONFIG: &str = "config.toml";

#[derive(Parser)]
#[command(name = "lswitch")]
#[command(about = "A software Ethernet learning switch implemented in Rust")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the switch
    Run {
        /// Path to config.toml (defaults apply if omitted and absent)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Additional physical interface to attach
        #[arg(short, long = "interface")]
        interfaces: Vec<String>,

        /// Additional Unix socket to accept virtual sessions on
        #[arg(short, long = "socket-file")]
        sockets: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate config.toml
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Print the effective configuration with all defaults filled in
    Show {
        /// Path to config.toml
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Config { action }) => match action {
            ConfigAction::Validate {
                config: config_path,
            } => cmd_config_validate(&config_path),
            ConfigAction::Show {
                config: config_path,
            } => cmd_config_show(config_path.as_deref()),
        },
        Some(Commands::Run {
            config: config_path,
            interfaces,
            sockets,
        }) => cmd_run(config_path.as_deref(), interfaces, sockets),
        // Default: run with config.toml if present
        None => cmd_run(None, Vec::new(), Vec::new()),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

/// Explicit path must exist; otherwise config.toml is used when present
fn load_config(config_path: Option<&Path>) -> Result<Config, String> {
    match config_path {
        Some(path) => {
            config::load(path).map_err(|e| format!("Failed to load {}: {}", path.display(), e))
        }
        None if Path::new(DEFAULT_CONFIG).exists() => config::load(DEFAULT_CONFIG)
            .map_err(|e| format!("Failed to load {}: {}", DEFAULT_CONFIG, e)),
        None => Ok(Config::default()),
    }
}

fn cmd_run(
    config_path: Option<&Path>,
    interfaces: Vec<String>,
    sockets: Vec<PathBuf>,
) -> Result<(), String> {
    use lswitch::capture::{interface_mac, AfPacketPort, SessionListener};
    use lswitch::dataplane::{Coordinator, Device, DeviceId, Fdb, Switch};
    use tokio::runtime::Runtime;
    use tracing::{error, warn};

    let mut cfg = load_config(config_path)?;
    cfg.physical
        .extend(interfaces.into_iter().map(|interface| PhysicalConfig { interface }));
    cfg.sessions
        .extend(sockets.into_iter().map(|socket| SessionConfig { socket }));

    // RUST_LOG still takes priority over [logging]
    init_logging(Some(&cfg.logging));
    info!("lswitch starting...");

    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Validation failed".to_string());
    }

    let metrics = Arc::new(MetricsRegistry::new());
    let fdb = Fdb::new(cfg.switch.mac_table_capacity, cfg.switch.table_full_policy);
    let mut switch = Switch::new(fdb, cfg.switch.burst_size, Arc::clone(&metrics));
    info!(
        "MAC table: {} entries, {:?} when full",
        cfg.switch.mac_table_capacity, cfg.switch.table_full_policy
    );

    // Physical ports are numbered in configuration order
    for (number, physical) in cfg.physical.iter().enumerate() {
        let number = number as u32;
        let name = &physical.interface;

        let port = AfPacketPort::open(name, DeviceId::physical(number), Arc::clone(&metrics))
            .map_err(|e| format!("Cannot init port {} ({}): {}", number, name, e))?;

        match interface_mac(name) {
            Ok(mac) => info!("Port {} ({}) MAC: {}", number, name, mac),
            Err(e) => warn!("Port {} ({}) MAC unavailable: {}", number, name, e),
        }

        switch
            .attach(Device::physical(number, port))
            .map_err(|e| format!("Cannot attach port {}: {}", number, e))?;
    }

    let coordinator = Arc::new(Coordinator::new(switch, cfg.switch.idle_sleep()));

    let forwarding = {
        let coordinator = Arc::clone(&coordinator);
        std::thread::Builder::new()
            .name("forwarding".to_string())
            .spawn(move || coordinator.run())
            .map_err(|e| format!("Failed to spawn forwarding thread: {}", e))?
    };

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    let served = rt.block_on(async {
        let sessions = SessionListener::new(Arc::clone(&coordinator), cfg.switch.session_queue_depth);

        for session in &cfg.sessions {
            let listener = SessionListener::bind(&session.socket)
                .map_err(|e| format!("Cannot listen on {}: {}", session.socket.display(), e))?;
            let sessions = sessions.clone();
            let path = session.socket.clone();
            tokio::spawn(async move {
                if let Err(e) = sessions.serve(listener).await {
                    error!("Session listener on {} failed: {}", path.display(), e);
                }
            });
        }

        info!(
            "lswitch running: {} physical port(s), {} session socket(s)",
            cfg.physical.len(),
            cfg.sessions.len()
        );

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("Failed to wait for Ctrl-C: {}", e))?;
        info!("Shutting down...");
        Ok::<(), String>(())
    });

    coordinator.shutdown();
    if forwarding.join().is_err() {
        error!("Forwarding thread panicked");
    }
    rt.shutdown_background();

    for session in &cfg.sessions {
        if let Err(e) = std::fs::remove_file(&session.socket) {
            warn!("Cannot remove {}: {}", session.socket.display(), e);
        }
    }

    info!("Final statistics:");
    for (name, value) in metrics.export() {
        info!("  {} = {}", name, value);
    }

    served
}

fn cmd_config_validate(config_path: &Path) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<(), String> {
    let cfg = load_config(config_path)?;
    let text =
        toml::to_string_pretty(&cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    print!("{}", text);
    Ok(())
}
