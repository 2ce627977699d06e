//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for hardbake data when running as root.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/hardbake";

/// Returns the data directory, preferring `$HOME/.hardbake` for non-root
/// users, falling back to `/var/lib/hardbake`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".hardbake");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Tag assumed when an image reference omits one.
pub const DEFAULT_TAG: &str = "latest";

/// Recipe file name used when none is given on the command line.
pub const DEFAULT_RECIPE_FILE: &str = "Hardfile";

/// Identity a base image runs as when its config does not name one.
pub const DEFAULT_BASE_USER: &str = "root";

/// Working directory a base image uses when its config does not name one.
pub const DEFAULT_BASE_WORKDIR: &str = "/";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Maximum number of layers in an image.
pub const MAX_IMAGE_LAYERS: usize = 128;

/// First id handed out to system accounts.
pub const FIRST_SYSTEM_ID: u32 = 100;
/// Last id handed out to system accounts.
pub const LAST_SYSTEM_ID: u32 = 999;
/// First id handed out to normal accounts.
pub const FIRST_NORMAL_ID: u32 = 1000;
/// Last id handed out to normal accounts.
pub const LAST_NORMAL_ID: u32 = 59_999;

/// Home directory assigned to system accounts.
pub const SYSTEM_HOME: &str = "/nonexistent";
/// Login shell assigned to system accounts.
pub const NOLOGIN_SHELL: &str = "/usr/sbin/nologin";
/// Login shell assigned to normal accounts.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "hbk";
