//! Static launch recipes for the supported daemons.
use std::{
    env::consts::EXE_SUFFIX,
    io::{Error, ErrorKind},
    path::{Path, PathBuf},
};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::{
    config::ConfigStore,
    constants::{AUTOSTART_SECTION, DEFAULT_FASTCGI_HOST, DEFAULT_FASTCGI_PORT},
    error::SupervisorError,
};

/// The daemons a stack is made of. The serialized form is the name used in settings
/// keys (`paths/<name>`, `autostart/<name>`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
pub enum DaemonKind {
    /// Nginx.
    #[strum(serialize = "nginx")]
    WebServer,
    /// PHP FastCGI runner.
    #[strum(serialize = "php")]
    ScriptRunner,
    /// MariaDB.
    #[strum(serialize = "mariadb")]
    RelationalDb,
    /// MongoDB.
    #[strum(serialize = "mongodb")]
    DocumentDb,
    /// Memcached.
    #[strum(serialize = "memcached")]
    CacheServer,
}

/// Order used by `start_all`.
pub const START_ORDER: [DaemonKind; 5] = [
    DaemonKind::WebServer,
    DaemonKind::ScriptRunner,
    DaemonKind::RelationalDb,
    DaemonKind::DocumentDb,
    DaemonKind::CacheServer,
];

/// Order used by `stop_all`: the database goes first, then its consumers.
pub const STOP_ORDER: [DaemonKind; 5] = [
    DaemonKind::RelationalDb,
    DaemonKind::ScriptRunner,
    DaemonKind::WebServer,
    DaemonKind::DocumentDb,
    DaemonKind::CacheServer,
];

impl DaemonKind {
    /// Static descriptor for this kind.
    pub fn descriptor(self) -> &'static DaemonDescriptor {
        match self {
            DaemonKind::WebServer => &NGINX,
            DaemonKind::ScriptRunner => &PHP,
            DaemonKind::RelationalDb => &MARIADB,
            DaemonKind::DocumentDb => &MONGODB,
            DaemonKind::CacheServer => &MEMCACHED,
        }
    }

    /// The `autostart/<name>` settings key.
    pub fn autostart_key(self) -> String {
        format!("{AUTOSTART_SECTION}/{self}")
    }
}

/// Builds an argument list from the resolved installation directory and settings.
pub type ArgumentRecipe = fn(&RecipeContext<'_>) -> Vec<String>;

/// Values available to an [`ArgumentRecipe`] at launch time.
pub struct RecipeContext<'a> {
    /// Resolved installation directory.
    pub install_dir: &'a Path,
    /// Resolved configuration file, when the daemon has one configured.
    pub config_file: Option<PathBuf>,
    /// The settings store, for recipe-specific lookups.
    pub store: &'a dyn ConfigStore,
}

/// A daemon-specific cooperative shutdown command, run instead of `SIGTERM`.
#[derive(Debug)]
pub struct GracefulStop {
    /// Helper executable, relative to the daemon's installation directory.
    pub executable_relative_path: &'static str,
    /// Arguments for the helper.
    pub arguments: ArgumentRecipe,
}

/// Static metadata describing how to launch one daemon kind.
#[derive(Debug)]
pub struct DaemonDescriptor {
    pub kind: DaemonKind,
    /// Human-readable name.
    pub display_name: &'static str,
    /// Executable path relative to the installation directory, without platform suffix.
    pub executable_relative_path: &'static str,
    /// Settings key holding the installation directory.
    pub install_dir_key: &'static str,
    /// Settings key holding the daemon's configuration file, if it takes one.
    pub config_file_key: Option<&'static str>,
    pub launch_arguments: ArgumentRecipe,
    pub graceful_stop: Option<GracefulStop>,
    /// Flag that makes the executable print its version and exit.
    pub version_flag: &'static str,
}

/// A fully resolved command line, ready to hand to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecipe {
    pub program: PathBuf,
    pub arguments: Vec<String>,
    pub working_dir: PathBuf,
}

impl DaemonDescriptor {
    /// Absolute path of the daemon executable inside `install_dir`.
    pub fn executable_path(&self, install_dir: &Path) -> PathBuf {
        install_dir.join(format!("{}{EXE_SUFFIX}", self.executable_relative_path))
    }

    /// File name the daemon's process carries in the OS process table.
    pub fn process_name(&self) -> String {
        let base = Path::new(self.executable_relative_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable_relative_path.to_string());
        format!("{base}{EXE_SUFFIX}")
    }

    /// Looks up the installation directory, failing when it is unset or missing on disk.
    pub fn install_dir(&self, store: &dyn ConfigStore) -> Result<PathBuf, SupervisorError> {
        let dir = store.path(self.install_dir_key).ok_or_else(|| {
            SupervisorError::ConfigurationMissing {
                daemon: self.kind,
                key: self.install_dir_key.to_string(),
            }
        })?;

        if !dir.is_dir() {
            return Err(SupervisorError::LaunchFailure {
                daemon: self.kind,
                source: Error::new(
                    ErrorKind::NotFound,
                    format!("installation directory {} does not exist", dir.display()),
                ),
            });
        }

        Ok(dir)
    }

    fn context<'a>(
        &self,
        install_dir: &'a Path,
        store: &'a dyn ConfigStore,
    ) -> RecipeContext<'a> {
        RecipeContext {
            install_dir,
            config_file: self.config_file_key.and_then(|key| store.path(key)),
            store,
        }
    }

    /// Resolves the launch recipe from the current settings. Nothing is cached, so a
    /// settings change takes effect on the next start.
    pub fn resolve(&self, store: &dyn ConfigStore) -> Result<LaunchRecipe, SupervisorError> {
        let install_dir = self.install_dir(store)?;
        let context = self.context(&install_dir, store);
        let arguments = (self.launch_arguments)(&context);

        Ok(LaunchRecipe {
            program: self.executable_path(&install_dir),
            arguments,
            working_dir: install_dir,
        })
    }

    /// Resolves the cooperative shutdown command, if this daemon has one.
    pub fn resolve_graceful_stop(
        &self,
        store: &dyn ConfigStore,
    ) -> Option<Result<LaunchRecipe, SupervisorError>> {
        let graceful = self.graceful_stop.as_ref()?;
        Some(self.install_dir(store).map(|install_dir| {
            let context = self.context(&install_dir, store);
            LaunchRecipe {
                program: install_dir
                    .join(format!("{}{EXE_SUFFIX}", graceful.executable_relative_path)),
                arguments: (graceful.arguments)(&context),
                working_dir: install_dir.clone(),
            }
        }))
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn nginx_prefix(ctx: &RecipeContext<'_>) -> Vec<String> {
    let mut args = vec!["-p".to_string(), display(ctx.install_dir)];
    if let Some(config) = &ctx.config_file {
        args.push("-c".into());
        args.push(display(config));
    }
    args
}

fn nginx_arguments(ctx: &RecipeContext<'_>) -> Vec<String> {
    nginx_prefix(ctx)
}

fn nginx_quit_arguments(ctx: &RecipeContext<'_>) -> Vec<String> {
    let mut args = nginx_prefix(ctx);
    args.push("-s".into());
    args.push("quit".into());
    args
}

fn php_arguments(ctx: &RecipeContext<'_>) -> Vec<String> {
    let host = ctx
        .store
        .get("php/fastcgi-host")
        .unwrap_or_else(|| DEFAULT_FASTCGI_HOST.to_string());
    let port = ctx
        .store
        .get("php/fastcgi-port")
        .unwrap_or_else(|| DEFAULT_FASTCGI_PORT.to_string());

    let mut args = vec!["-b".to_string(), format!("{host}:{port}")];
    if let Some(config) = &ctx.config_file {
        args.push("-c".into());
        args.push(display(config));
    }
    args
}

fn mariadb_defaults(ctx: &RecipeContext<'_>) -> Vec<String> {
    ctx.config_file
        .iter()
        .map(|config| format!("--defaults-file={}", config.display()))
        .collect()
}

fn mariadb_arguments(ctx: &RecipeContext<'_>) -> Vec<String> {
    mariadb_defaults(ctx)
}

fn mariadb_shutdown_arguments(ctx: &RecipeContext<'_>) -> Vec<String> {
    let mut args = mariadb_defaults(ctx);
    args.push("--user=root".into());
    args.push("shutdown".into());
    args
}

fn mongodb_arguments(ctx: &RecipeContext<'_>) -> Vec<String> {
    match &ctx.config_file {
        Some(config) => vec!["--config".into(), display(config)],
        None => Vec::new(),
    }
}

fn memcached_arguments(ctx: &RecipeContext<'_>) -> Vec<String> {
    match ctx.store.get("memcached/port") {
        Some(port) => vec!["-p".into(), port],
        None => Vec::new(),
    }
}

static NGINX: DaemonDescriptor = DaemonDescriptor {
    kind: DaemonKind::WebServer,
    display_name: "Nginx",
    executable_relative_path: "nginx",
    install_dir_key: "paths/nginx",
    config_file_key: Some("nginx/config"),
    launch_arguments: nginx_arguments,
    graceful_stop: Some(GracefulStop {
        executable_relative_path: "nginx",
        arguments: nginx_quit_arguments,
    }),
    version_flag: "-v",
};

static PHP: DaemonDescriptor = DaemonDescriptor {
    kind: DaemonKind::ScriptRunner,
    display_name: "PHP",
    executable_relative_path: "php-cgi",
    install_dir_key: "paths/php",
    config_file_key: Some("php/config"),
    launch_arguments: php_arguments,
    graceful_stop: None,
    version_flag: "-v",
};

static MARIADB: DaemonDescriptor = DaemonDescriptor {
    kind: DaemonKind::RelationalDb,
    display_name: "MariaDB",
    executable_relative_path: "bin/mysqld",
    install_dir_key: "paths/mariadb",
    config_file_key: Some("mariadb/config"),
    launch_arguments: mariadb_arguments,
    graceful_stop: Some(GracefulStop {
        executable_relative_path: "bin/mysqladmin",
        arguments: mariadb_shutdown_arguments,
    }),
    version_flag: "--version",
};

static MONGODB: DaemonDescriptor = DaemonDescriptor {
    kind: DaemonKind::DocumentDb,
    display_name: "MongoDB",
    executable_relative_path: "bin/mongod",
    install_dir_key: "paths/mongodb",
    config_file_key: Some("mongodb/config"),
    launch_arguments: mongodb_arguments,
    graceful_stop: None,
    version_flag: "--version",
};

static MEMCACHED: DaemonDescriptor = DaemonDescriptor {
    kind: DaemonKind::CacheServer,
    display_name: "Memcached",
    executable_relative_path: "memcached",
    install_dir_key: "paths/memcached",
    config_file_key: None,
    launch_arguments: memcached_arguments,
    graceful_stop: None,
    version_flag: "-h",
};
