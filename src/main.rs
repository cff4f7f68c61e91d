use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value, json};
use sessiongate::guard::{self, NavigationTarget, RouteGuard};
use sessiongate::net::TransportError;
use sessiongate::session::pending_navigations;
use sessiongate::storage::FileStorage;
use sessiongate::{Authorization, Outcome, RoleBinding, Session, SessionConfig, SessionError, SessionEvent};
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("could not build http client: {0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Rejected(String),
    #[error("session expired; sign in again")]
    SessionExpired,
    #[error("invalid field `{0}`; expected KEY=VALUE")]
    InvalidField(String),
    #[error("invalid JSON output: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "sessiongate", about = "Session and authorization client for the auth API")]
struct Cli {
    /// Overrides SESSION_API_BASE_URL.
    #[arg(long)]
    api_base_url: Option<String>,

    /// Overrides SESSION_STORE_PATH.
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Overrides SESSION_LOGIN_ROUTE.
    #[arg(long)]
    login_route: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and persist the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SESSION_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in as it.
    Register {
        #[arg(long, env = "SESSION_PASSWORD", hide_env_values = true)]
        password: String,
        #[command(flatten)]
        profile: ProfileArgs,
    },
    /// Sign out and clear the stored session.
    Logout,
    /// Print the stored session.
    Status,
    /// Refresh user, roles and permissions from the server.
    Profile,
    /// Update the signed-in user's profile.
    UpdateProfile(ProfileArgs),
    /// Evaluate a role gate against the stored session.
    Check {
        #[arg(long = "role", required = true)]
        roles: Vec<String>,
        /// Require every role instead of any.
        #[arg(long)]
        all: bool,
    },
    /// Evaluate a route guard against the stored session.
    Guard(GuardArgs),
}

#[derive(Args, Debug)]
struct ProfileArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
    /// Extra profile field, repeatable.
    #[arg(long = "field", value_name = "KEY=VALUE")]
    fields: Vec<String>,
}

#[derive(Args, Debug)]
struct GuardArgs {
    /// Target path including query string.
    #[arg(long)]
    path: String,
    #[arg(long, conflicts_with_all = ["roles", "permissions"])]
    guest: bool,
    #[arg(long = "role", conflicts_with = "permissions")]
    roles: Vec<String>,
    #[arg(long = "permission")]
    permissions: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let mut config = SessionConfig::from_env();
    if let Some(url) = cli.api_base_url.as_deref() {
        config = config.with_api_base_url(url);
    }
    if let Some(path) = cli.store_path {
        config.store_path = path;
    }
    if let Some(route) = cli.login_route {
        config.login_route = route;
    }

    let storage = Arc::new(FileStorage::new(config.store_path.clone()));
    let session = Session::from_config(&config, storage)?;
    let mut events = session.subscribe();
    session.initialize_auth();

    let result = run(&session, &config, cli.command).await;
    report_navigation(&mut events);
    result
}

async fn run(session: &Session, config: &SessionConfig, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login { email, password } => {
            let user = accepted(session.login(&email, &password).await)?;
            eprintln!("signed in as {}", user.display_name());
            print_json(&session_summary(session))
        }
        Command::Register { password, profile } => {
            let mut body = profile.into_body()?;
            body.insert("password".to_owned(), Value::String(password));
            let user = accepted(session.register(&Value::Object(body)).await)?;
            eprintln!("registered {}", user.display_email());
            print_json(&session_summary(session))
        }
        Command::Logout => {
            session.logout().await;
            eprintln!("signed out");
            Ok(())
        }
        Command::Status => print_json(&session_summary(session)),
        Command::Profile => match session.get_profile().await? {
            Some(_) => print_json(&session_summary(session)),
            None => Err(CliError::SessionExpired),
        },
        Command::UpdateProfile(profile) => {
            let body = profile.into_body()?;
            let user = accepted(session.update_profile(&Value::Object(body)).await)?;
            print_json(&serde_json::to_value(user)?)
        }
        Command::Check { roles, all } => {
            let binding = if all { RoleBinding::all(roles) } else { RoleBinding::any(roles) };
            let visibility = binding.evaluate(session);
            println!("{}", if visibility.is_visible() { "visible" } else { "hidden" });
            Ok(())
        }
        Command::Guard(args) => {
            let route_guard = if args.guest {
                RouteGuard::Guest
            } else if !args.roles.is_empty() {
                RouteGuard::AnyRole(args.roles)
            } else if !args.permissions.is_empty() {
                RouteGuard::AnyPermission(args.permissions)
            } else {
                RouteGuard::Auth
            };
            let target = NavigationTarget::path(args.path);
            let decision = guard::guard_navigation(session, &route_guard, &target);
            match decision.location(&config.login_route) {
                Some(location) => println!("redirect {location}"),
                None => println!("proceed"),
            }
            Ok(())
        }
    }
}

impl ProfileArgs {
    fn into_body(self) -> Result<Map<String, Value>, CliError> {
        let mut body = Map::new();
        if let Some(name) = self.name {
            body.insert("name".to_owned(), Value::String(name));
        }
        if let Some(email) = self.email {
            body.insert("email".to_owned(), Value::String(email));
        }
        for field in self.fields {
            let (key, value) = field
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| CliError::InvalidField(field.clone()))?;
            body.insert(key.to_owned(), Value::String(value.to_owned()));
        }
        Ok(body)
    }
}

fn accepted<T>(outcome: Outcome<T>) -> Result<T, CliError> {
    match outcome {
        Outcome::Success { payload, message } => {
            if let Some(message) = message {
                eprintln!("{message}");
            }
            Ok(payload)
        }
        Outcome::Failure { message } => Err(CliError::Rejected(message)),
    }
}

fn session_summary(session: &Session) -> Value {
    let state = session.state();
    json!({
        "phase": format!("{:?}", state.phase),
        "authenticated": session.is_logged_in(),
        "user": state.snapshot.user,
        "roles": state.snapshot.roles,
        "permissions": state.snapshot.permissions,
    })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_navigation(events: &mut broadcast::Receiver<SessionEvent>) {
    for intent in pending_navigations(events) {
        eprintln!("navigate to {}", intent.location());
    }
}
