//! Interactive command shell over the session coordinator.

use std::{io::Write, sync::Arc};

use clap::{Parser, Subcommand};
use dialoguer::Password;
use feedback360_client::{
    models::SessionEnd, types::OrganizationId, AuthError, AuthState, AuthStatus, LoginOutcome,
    SessionCoordinator,
};
use tokio::io::{AsyncBufRead, Lines};

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct Line {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Sign in with email and password
    Login {
        email: String,
        /// Organization to sign in to
        #[arg(long, value_name = "ORG_ID")]
        org: Option<OrganizationId>,
    },
    /// Sign in to the administrative console
    AdminLogin { email: String },
    /// Email a one-time sign-in code to an existing account
    SendOtp {
        email: String,
        #[arg(long, value_name = "ORG_ID")]
        org: Option<OrganizationId>,
    },
    /// Sign in with a one-time code
    VerifyOtp {
        email: String,
        code: String,
        #[arg(long, value_name = "ORG_ID")]
        org: Option<OrganizationId>,
    },
    /// Replace a temporary password
    ChangePassword,
    /// End this session
    Logout,
    /// End every session of the current user
    LogoutAll,
    /// Show the signed-in user
    Whoami,
    /// Check a permission
    Can { permission: String },
    /// Show session state
    Status,
    #[command(alias = "exit")]
    Quit,
}

enum Flow {
    Continue,
    Quit,
}

/// How passwords are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretInput {
    /// Prompt on the terminal without echo.
    Terminal,
    /// Take the next input line, for piped or scripted input.
    Lines,
}

pub struct Shell<R> {
    coordinator: Arc<SessionCoordinator>,
    default_organization: Option<OrganizationId>,
    input: Lines<R>,
    secrets: SecretInput,
}

impl<R: AsyncBufRead + Unpin> Shell<R> {
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        default_organization: Option<OrganizationId>,
        input: Lines<R>,
        secrets: SecretInput,
    ) -> Self {
        Self {
            coordinator,
            default_organization,
            input,
            secrets,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            prompt("feedback360> ")?;
            let Some(line) = self.input.next_line().await? else {
                break;
            };
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.is_empty() {
                continue;
            }
            match Line::try_parse_from(words) {
                Ok(parsed) => {
                    if let Flow::Quit = self.execute(parsed.command).await? {
                        break;
                    }
                }
                Err(err) => println!("{}", err.render()),
            }
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> anyhow::Result<Flow> {
        tracing::debug!(?command, "console command");
        match command {
            Command::Login { email, org } => {
                let Some(org) = self.organization(org) else {
                    return Ok(Flow::Continue);
                };
                let password = self.read_secret("Password", false).await?;
                report_login(self.coordinator.login(&email, &password, org).await);
            }
            Command::AdminLogin { email } => {
                let password = self.read_secret("Password", false).await?;
                report_login(self.coordinator.login_as_admin(&email, &password).await);
            }
            Command::SendOtp { email, org } => {
                let Some(org) = self.organization(org) else {
                    return Ok(Flow::Continue);
                };
                match self.coordinator.send_one_time_code(&email, org).await {
                    Ok(()) => println!("A sign-in code was sent to {}.", email),
                    Err(err) => report_error(&err),
                }
            }
            Command::VerifyOtp { email, code, org } => {
                let Some(org) = self.organization(org) else {
                    return Ok(Flow::Continue);
                };
                report_login(self.coordinator.verify_one_time_code(&email, &code, org).await);
            }
            Command::ChangePassword => {
                let password = self.read_secret("New password", true).await?;
                match self.coordinator.complete_password_change(&password).await {
                    Ok(()) => println!("Password updated."),
                    Err(err) => report_error(&err),
                }
            }
            Command::Logout => {
                self.coordinator.logout().await;
                println!("Signed out.");
            }
            Command::LogoutAll => match self.coordinator.logout_all_sessions().await {
                Ok(()) => println!("Signed out everywhere."),
                Err(err) => {
                    println!("Signed out here, but other sessions may still be active.");
                    report_error(&err);
                }
            },
            Command::Whoami => match self.coordinator.current_user() {
                Some(user) => println!("{} <{}> ({})", user.full_name(), user.email, user.role),
                None => println!("Not signed in."),
            },
            Command::Can { permission } => {
                let verdict = if self.coordinator.has_permission(&permission) {
                    "allowed"
                } else {
                    "denied"
                };
                println!("{}: {}", permission, verdict);
            }
            Command::Status => println!("{}", describe(&self.coordinator.state())),
            Command::Quit => return Ok(Flow::Quit),
        }
        self.coordinator.update_activity();
        Ok(Flow::Continue)
    }

    fn organization(&self, explicit: Option<OrganizationId>) -> Option<OrganizationId> {
        let organization = explicit.or(self.default_organization);
        if organization.is_none() {
            println!("No organization given. Pass --org <ORG_ID> or start the console with --organization.");
        }
        organization
    }

    async fn read_secret(&mut self, label: &str, confirm: bool) -> anyhow::Result<String> {
        match self.secrets {
            SecretInput::Terminal => {
                let label = label.to_string();
                let password = tokio::task::spawn_blocking(move || {
                    let input = Password::new().with_prompt(label);
                    if confirm {
                        input
                            .with_confirmation("Repeat password", "Error: Passwords do not match")
                            .interact()
                    } else {
                        input.interact()
                    }
                })
                .await??;
                Ok(password)
            }
            SecretInput::Lines => {
                prompt(&format!("{}: ", label.to_lowercase()))?;
                Ok(self.input.next_line().await?.unwrap_or_default())
            }
        }
    }
}

fn prompt(label: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}", label)?;
    stdout.flush()
}

fn report_login(result: Result<LoginOutcome, AuthError>) {
    match result {
        Ok(LoginOutcome::Authenticated(user)) => println!("Signed in as {}.", user.full_name()),
        Ok(LoginOutcome::PasswordResetRequired(user)) => println!(
            "Signed in as {}. A new password is required; run `change-password`.",
            user.full_name()
        ),
        Err(AuthError::Cancelled) => {}
        Err(err) => report_error(&err),
    }
}

fn report_error(err: &AuthError) {
    tracing::debug!(code = err.code(), error = %err, "command failed");
    println!("{}", err.user_message());
}

fn describe(state: &AuthState) -> String {
    let status = match state.status {
        AuthStatus::Unauthenticated => "signed out",
        AuthStatus::Authenticating => "signing in",
        AuthStatus::Authenticated => "signed in",
        AuthStatus::PasswordResetRequired => "signed in, password change required",
    };
    let mut lines = vec![format!("status: {}", status)];
    if let (Some(user), Some(session)) = (&state.user, &state.session) {
        lines.push(format!("user: {} ({})", user.email, user.role));
        if let Some(organization) = &state.organization {
            lines.push(format!("organization: {}", organization.name));
        }
        lines.push(format!("session: {}", session.id));
        lines.push(format!("last activity: {}", session.last_activity_at.to_rfc3339()));
    }
    if let Some(reason) = state.last_ended {
        let reason = match reason {
            SessionEnd::IdleExpired => "expired after inactivity",
            SessionEnd::LoggedOut => "signed out",
            SessionEnd::ForceExpired => "ended by the server",
        };
        lines.push(format!("previous session: {}", reason));
    }
    if let Some(error) = &state.error {
        lines.push(format!("last error: {}", error));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORG: &str = "6f1c2a9e-3b7d-4c55-9a0e-2b4f8d1e7c33";

    fn parse(line: &str) -> Result<Command, clap::Error> {
        Line::try_parse_from(line.split_whitespace()).map(|l| l.command)
    }

    #[test]
    fn parses_login_with_organization() {
        let command = parse(&format!("login ana@acme.test --org {}", ORG)).unwrap();
        assert_eq!(
            command,
            Command::Login {
                email: "ana@acme.test".into(),
                org: Some(ORG.parse().unwrap()),
            }
        );
    }

    #[test]
    fn parses_one_time_code_commands() {
        assert_eq!(
            parse("verify-otp ana@acme.test 482913").unwrap(),
            Command::VerifyOtp {
                email: "ana@acme.test".into(),
                code: "482913".into(),
                org: None,
            }
        );
        assert!(matches!(parse("send-otp ana@acme.test").unwrap(), Command::SendOtp { .. }));
    }

    #[test]
    fn rejects_malformed_organization_id() {
        assert!(parse("login ana@acme.test --org not-a-uuid").is_err());
    }

    #[test]
    fn requires_permission_argument() {
        assert!(parse("can").is_err());
        assert_eq!(
            parse("can view_reports").unwrap(),
            Command::Can {
                permission: "view_reports".into()
            }
        );
    }

    #[test]
    fn exit_is_an_alias_for_quit() {
        assert_eq!(parse("exit").unwrap(), Command::Quit);
        assert_eq!(parse("logout-all").unwrap(), Command::LogoutAll);
    }

    fn shell(script: &'static [u8]) -> Shell<tokio::io::BufReader<&'static [u8]>> {
        use feedback360_client::{
            clock::SystemClock, directory::HostedDirectory, identity::HostedIdentityClient,
            models::SessionPolicy, retry::RetryPolicy, storage::MemoryStorage, CoordinatorDeps,
        };
        use tokio::io::AsyncBufReadExt;

        let coordinator = SessionCoordinator::new(CoordinatorDeps {
            identity: Arc::new(HostedIdentityClient::new("http://127.0.0.1:9", "anon")),
            directory: Arc::new(HostedDirectory::new("http://127.0.0.1:9", "anon")),
            storage: Arc::new(MemoryStorage::new()),
            clock: Arc::new(SystemClock),
            session_policy: SessionPolicy::default(),
            retry_policy: RetryPolicy::default(),
        });
        Shell::new(
            Arc::new(coordinator),
            None,
            tokio::io::BufReader::new(script).lines(),
            SecretInput::Lines,
        )
    }

    #[tokio::test]
    async fn piped_passwords_come_from_the_next_line() {
        let mut shell = shell(b"s3cret-pass1\nwhoami\n");
        let password = shell.read_secret("Password", false).await.unwrap();
        assert_eq!(password, "s3cret-pass1");
        assert_eq!(shell.input.next_line().await.unwrap().as_deref(), Some("whoami"));
    }

    #[tokio::test]
    async fn missing_password_line_reads_as_empty() {
        let mut shell = shell(b"");
        assert_eq!(shell.read_secret("Password", true).await.unwrap(), "");
    }

    #[test]
    fn describe_reports_why_the_last_session_ended() {
        let state = AuthState {
            last_ended: Some(SessionEnd::IdleExpired),
            ..AuthState::default()
        };
        let text = describe(&state);
        assert!(text.contains("status: signed out"));
        assert!(text.contains("expired after inactivity"));
    }
}
