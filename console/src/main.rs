use std::{io::IsTerminal, path::PathBuf, sync::Arc};

use clap::Parser;
use feedback360_client::{
    clock::SystemClock,
    directory::HostedDirectory,
    identity::HostedIdentityClient,
    storage::{FileStorage, FileTokenStore},
    types::OrganizationId,
    AuthError, ClientConfig, CoordinatorDeps, SessionCoordinator,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{SecretInput, Shell};

const DEFAULT_SESSION_PATH: &str = ".feedback360-session.json";

#[derive(Parser, Debug)]
#[command(name = "feedback360-console")]
#[command(about = "Interactive sign-in console for the feedback360 platform", long_about = None)]
struct Args {
    /// Organization used when a command does not name one
    #[arg(long, value_name = "ORG_ID")]
    organization: Option<OrganizationId>,

    /// Where the session snapshot is kept between runs
    /// [default: $SESSION_STATE_PATH or .feedback360-session.json]
    #[arg(long, value_name = "PATH")]
    session_file: Option<PathBuf>,
}

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedback360_console=info,feedback360_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = match ClientConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", AuthError::Configuration(err.to_string()).user_message());
            return Err(err);
        }
    };
    let session_path = args
        .session_file
        .or_else(|| std::env::var_os("SESSION_STATE_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_PATH));
    let token_store = Arc::new(FileTokenStore::beside(&session_path));
    let storage = Arc::new(FileStorage::new(session_path));
    tracing::info!(
        backend_url = %config.backend_url,
        api_key = %mask_secret(&config.api_key),
        session_idle_timeout_minutes = config.session_idle_timeout_minutes,
        session_max_age_hours = config.session_max_age_hours,
        profile_fetch_attempts = config.profile_fetch_attempts,
        session_file = %storage.path().display(),
        token_file = %token_store.path().display(),
        "Loaded configuration from environment/.env"
    );

    let identity =
        Arc::new(HostedIdentityClient::from_config(&config).with_token_store(token_store));
    let directory = Arc::new(HostedDirectory::from_config(&config).with_identity(identity.clone()));
    let coordinator = SessionCoordinator::start(CoordinatorDeps {
        identity,
        directory,
        storage,
        clock: Arc::new(SystemClock),
        session_policy: config.session_policy(),
        retry_policy: config.retry_policy(),
    });

    coordinator.restore_persisted().await;
    if let Some(user) = coordinator.current_user() {
        println!("Welcome back, {}.", user.full_name());
    }

    let input = BufReader::new(tokio::io::stdin()).lines();
    let secrets = if std::io::stdin().is_terminal() {
        SecretInput::Terminal
    } else {
        SecretInput::Lines
    };
    let mut shell = Shell::new(coordinator.clone(), args.organization, input, secrets);
    let result = tokio::select! {
        result = shell.run() => result,
        _ = tokio::signal::ctrl_c() => {
            println!();
            Ok(())
        }
    };

    coordinator.shutdown();
    tracing::info!("console stopped");
    result
}
