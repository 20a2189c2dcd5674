//! Constants and configuration values for stackctl.
//!
//! This module centralizes the timing values and settings keys used by the supervisor and
//! the autostart/shutdown policy.

use std::time::Duration;

// ============================================================================
// Settings Keys
// ============================================================================

/// Master switch for the autostart policy.
pub const AUTOSTART_DAEMONS_KEY: &str = "global/autostartdaemons";

/// Stop every daemon when the host application quits.
pub const STOP_DAEMONS_ON_QUIT_KEY: &str = "global/stopdaemonsonquit";

/// Directory receiving daemon stdout/stderr.
pub const LOGS_DIR_KEY: &str = "paths/logs";

/// Section holding the per-daemon autostart flags (`autostart/<daemon>`).
pub const AUTOSTART_SECTION: &str = "autostart";

/// Host the PHP FastCGI runner binds to when `php/fastcgi-host` is not set.
pub const DEFAULT_FASTCGI_HOST: &str = "127.0.0.1";

/// Port the PHP FastCGI runner binds to when `php/fastcgi-port` is not set.
pub const DEFAULT_FASTCGI_PORT: &str = "9100";

// ============================================================================
// Process Management Timing
// ============================================================================

/// How long `stop` waits for a daemon to exit after the graceful request before
/// escalating to `SIGKILL`.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// How long `stop` waits for the process to be reaped after `SIGKILL`.
pub const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound for a daemon-specific graceful-stop command (e.g. `mysqladmin shutdown`).
pub const GRACEFUL_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound for a version probe (`nginx -v` and friends).
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Polling interval while waiting on short-lived helper commands.
pub const HELPER_POLL_INTERVAL: Duration = Duration::from_millis(50);
