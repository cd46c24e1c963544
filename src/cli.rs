//! CLI argument parsing and startup helpers for the admin binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::db::Database;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gatehouse",
    about = "Session and identity store administration"
)]
pub struct Args {
    /// Path to SQLite database file
    #[arg(short, long, default_value = "gatehouse.db", env = "GATEHOUSE_DATABASE")]
    pub database: String,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Upper bound for a single store call, in seconds
    #[arg(long, default_value = "5", value_parser = validate_timeout)]
    pub store_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create or migrate the database, optionally creating the first super user
    Init {
        /// Email of the first super user. Password comes from BOOTSTRAP_PASSWORD
        /// or --password-file
        #[arg(long)]
        email: Option<String>,

        #[arg(long, default_value = "Administrator")]
        full_name: String,

        #[arg(long)]
        name_to_use: Option<String>,

        /// Path to a file containing the first user's password
        #[arg(long)]
        password_file: Option<PathBuf>,
    },

    /// Remove expired sessions, old signin history and stale verification codes
    Sweep {
        /// Keep running and sweep every hour
        #[arg(long)]
        watch: bool,
    },

    /// Print a user's recent signins as JSON
    Signins {
        email: String,

        /// Maximum number of events
        #[arg(short, default_value = "20")]
        n: u32,
    },
}

fn validate_timeout(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|_| format!("Not a number of seconds: {}", s))?;
    if secs == 0 {
        return Err("Store timeout must be at least 1 second".to_string());
    }
    Ok(secs)
}

impl Args {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load the bootstrap password from environment variable or file.
/// Returns None and logs an error if the password cannot be loaded.
pub fn load_bootstrap_password(password_file: Option<&std::path::Path>) -> Option<String> {
    if let Ok(password) = std::env::var("BOOTSTRAP_PASSWORD") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("BOOTSTRAP_PASSWORD") };
        return Some(password);
    }

    match password_file {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(content) => Some(content.trim_end_matches(['\r', '\n']).to_string()),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read password file");
                None
            }
        },
        None => {
            error!(
                "A password is required. Set BOOTSTRAP_PASSWORD environment variable (recommended) or use --password-file"
            );
            None
        }
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
