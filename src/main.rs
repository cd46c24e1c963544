use std::sync::Arc;

use clap::Parser;
use gatehouse::cleanup::{run_cleanup, spawn_cleanup_scheduler};
use gatehouse::cli::{Args, Command, init_logging, load_bootstrap_password, open_database};
use gatehouse::{Argon2Hasher, AuthConfig, Authenticator, NewUser, ProviderRegistry};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let config = AuthConfig::default().with_store_timeout(args.store_timeout());

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    match args.command {
        Command::Init {
            email,
            full_name,
            name_to_use,
            password_file,
        } => {
            let Some(email) = email else {
                info!("Database ready");
                return;
            };
            let Some(password) = load_bootstrap_password(password_file.as_deref()) else {
                std::process::exit(1);
            };

            let auth = authenticator(db, config);
            let name_to_use = name_to_use.unwrap_or_else(|| full_name.clone());
            let new = NewUser::with_password(email, full_name, name_to_use, password);
            match auth.bootstrap_super_user(new).await {
                Ok(user) => println!("Super user created: {} (id {})", user.email, user.id),
                Err(e) => {
                    error!(error = %e, "Failed to create super user");
                    std::process::exit(1);
                }
            }
        }
        Command::Sweep { watch } => {
            if watch {
                info!("Sweeping every hour");
                if let Err(e) = spawn_cleanup_scheduler(db, config).await {
                    error!(error = %e, "Cleanup scheduler stopped");
                    std::process::exit(1);
                }
            } else {
                let report = run_cleanup(&db, &config).await;
                println!(
                    "Removed {} sessions, {} signin events, {} email verifications",
                    report.sessions, report.signin_events, report.email_verifications
                );
            }
        }
        Command::Signins { email, n } => {
            let auth = authenticator(db, config);
            let user = match auth.database().users().get_by_email(&email).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    error!(email = %email, "No such user");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!(error = %e, "Failed to load user");
                    std::process::exit(1);
                }
            };

            let events = auth.recent_signins(user.id, n).await.unwrap_or_else(|e| {
                error!(error = %e, "Failed to load signin history");
                std::process::exit(1);
            });
            match serde_json::to_string_pretty(&events) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    error!(error = %e, "Failed to serialize signin history");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn authenticator(db: gatehouse::db::Database, config: AuthConfig) -> Authenticator {
    let registry = Arc::new(ProviderRegistry::new());
    Authenticator::new(db, registry, Arc::new(Argon2Hasher::new()), config).unwrap_or_else(|e| {
        error!(error = %e, "Failed to initialize authenticator");
        std::process::exit(1);
    })
}
