//! Default values for the migration configuration.
//!
//! The paths mirror the Ubuntu package layout on the source side and the snap
//! layout on the destination side.

/// Default log filter expression. Operator narration goes to stdout, so the
/// diagnostic stream stays quiet unless asked.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Data directory of the package-managed daemon.
pub const DEFAULT_SOURCE_DIR: &str = "/var/lib/lxd";

/// Data directory of the snap-managed daemon.
pub const DEFAULT_DESTINATION_DIR: &str = "/var/snap/lxd/common/lxd";

/// Persistent, revision-tracking location of the snap database.
pub const DEFAULT_DATABASE_PATH: &str = "/var/snap/lxd/current/lxd/lxd.db";

/// Bridge configuration written by the `lxd` package.
pub const DEFAULT_BRIDGE_CONFIG: &str = "/etc/default/lxd-bridge";

/// Bridge configuration read by the snap.
pub const DEFAULT_BRIDGE_DESTINATION: &str = "/var/snap/lxd/common/lxd-bridge/config";

/// Seconds to wait for the destination daemon to answer after a start.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 600;
