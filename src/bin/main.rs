use std::{error::Error, path::PathBuf, sync::Arc, sync::mpsc};
use strum::IntoEnumIterator;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stackctl::{
    cli::{Cli, Commands, parse_args},
    config::{ConfigStore, SettingsFile},
    descriptor::DaemonKind,
    policy,
    status::{DaemonStatus, NoopObserver, StatusEvent, format_summary},
    supervisor::Supervisor,
    version,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let settings_path = resolve_settings_path(&args.settings)?;
    let store = Arc::new(SettingsFile::open(&settings_path)?);
    info!("Using settings {}", store.path().display());

    match args.command {
        Commands::Run => run(store)?,
        Commands::Check => check(store),
        Commands::Versions => {
            for (kind, version) in version::probe_all(store.as_ref()) {
                let name = kind.descriptor().display_name;
                match version {
                    Some(version) => println!("{name:<10} {version}"),
                    None => println!("{name:<10} not installed"),
                }
            }
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::default().add_directive(level.level().into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn resolve_settings_path(path: &str) -> Result<PathBuf, Box<dyn Error>> {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        return Ok(candidate);
    }

    let resolved = std::env::current_dir()?.join(&candidate);
    Ok(resolved.canonicalize().unwrap_or(resolved))
}

fn log_status(event: &StatusEvent) {
    match (event.status, &event.error) {
        (DaemonStatus::Failed, Some(reason)) => {
            error!("[{}] failed: {reason}", event.kind)
        }
        (status, _) => match event.exit_code {
            Some(code) => info!("[{}] {status} (exit code {code})", event.kind),
            None => info!("[{}] {status}", event.kind),
        },
    }
}

fn run(store: Arc<SettingsFile>) -> Result<(), Box<dyn Error>> {
    let supervisor = Supervisor::new(store.clone(), Arc::new(log_status));

    let report = policy::on_startup(&supervisor);
    if !report.failed.is_empty() {
        warn!("{} daemon(s) failed to autostart", report.failed.len());
    }
    println!("{}", format_summary(&supervisor.snapshot()));

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    info!("Waiting for Ctrl-C...");
    let _ = rx.recv();

    info!("stackctl is shutting down...");
    if let Err(err) = store.reload() {
        warn!("Keeping previous settings for shutdown: {err}");
    }
    if let Err(err) = policy::on_shutdown(&supervisor) {
        error!("{err}");
    }
    println!("{}", format_summary(&supervisor.snapshot()));

    Ok(())
}

fn check(store: Arc<SettingsFile>) {
    let supervisor = Supervisor::new(store.clone(), Arc::new(NoopObserver));
    let foreign = supervisor.foreign_instances();

    for kind in DaemonKind::iter() {
        let descriptor = kind.descriptor();
        let executable = match descriptor.install_dir(store.as_ref()) {
            Ok(dir) => {
                let path = descriptor.executable_path(&dir);
                let state = if path.is_file() { "found" } else { "missing" };
                format!("{} ({state})", path.display())
            }
            Err(err) => err.to_string(),
        };
        let autostart = store.flag(&kind.autostart_key());

        println!("{kind}: {executable}; autostart={autostart}");
        for instance in foreign.iter().filter(|instance| instance.kind == kind) {
            println!("  already running outside stackctl: PID {}", instance.pid);
        }
    }
}
