use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use messenger_session::api::CurrentUser;
use messenger_session::flows::RegisterOutcome;
use messenger_session::forms::{PasswordMatch, RegisterFields, password_match};
use messenger_session::guard::BootstrapReport;
use messenger_session::messages::DEFAULT_PAGE_LIMIT;
use messenger_session::navigator::Navigator;
use messenger_session::storage::FileStore;
use messenger_session::{SessionApp, SessionConfig, SessionError};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{}", .0.user_message())]
    Session(#[from] SessionError),
    #[error("not logged in; run `messenger-cli login` first")]
    NotLoggedIn,
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "messenger-cli", about = "Messenger session and API CLI")]
struct Cli {
    /// Overrides `MESSENGER_BASE_URL` from the session config.
    #[arg(long, env = "MESSENGER_BASE_URL")]
    base_url: Option<String>,

    /// Where the token, cookie and redirect target persist between runs.
    #[arg(long, env = "MESSENGER_STORE", default_value = ".messenger-session.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the API origin answers.
    Ping,
    Login {
        username: String,
        #[arg(long, env = "MESSENGER_PASSWORD")]
        password: String,
    },
    Register(RegisterArgs),
    Logout,
    /// Run the page-load guard for a path, as if it had just been opened.
    Visit {
        path: String,
    },
    Whoami,
    Users(UsersCommand),
    Messages(MessagesCommand),
}

#[derive(Args, Debug)]
struct RegisterArgs {
    username: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long, env = "MESSENGER_PASSWORD")]
    password: String,
    /// Defaults to `--password`.
    #[arg(long)]
    confirm: Option<String>,
    #[arg(long)]
    accept_terms: bool,
}

#[derive(Args, Debug)]
struct UsersCommand {
    #[command(subcommand)]
    command: UsersSubcommand,
}

#[derive(Subcommand, Debug)]
enum UsersSubcommand {
    List,
    Get { user_id: i64 },
}

#[derive(Args, Debug)]
struct MessagesCommand {
    #[command(subcommand)]
    command: MessagesSubcommand,
}

#[derive(Subcommand, Debug)]
enum MessagesSubcommand {
    List {
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: u32,
    },
    /// Conversation with one user, oldest first.
    With { user_id: i64 },
    Send { receiver_id: i64, content: String },
}

/// Prints each navigation so the guard's decisions are visible.
struct StdoutNavigator;

impl Navigator for StdoutNavigator {
    fn navigate(&self, to: &str) {
        println!("-> {to}");
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = SessionConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    let store = FileStore::open(&cli.store)?;
    tracing::debug!(store = %store.path().display(), base_url = %config.base_url, "session store opened");
    let app = SessionApp::new(config, store, Arc::new(StdoutNavigator))?;

    match cli.command {
        Command::Ping => run_ping(&app).await,
        Command::Login { username, password } => {
            app.login(&username, &password).await?;
            println!("logged in as {username}");
            Ok(())
        }
        Command::Register(args) => run_register(&app, args).await,
        Command::Logout => Ok(app.logout()?),
        Command::Visit { path } => {
            let report = app.bootstrap_on_load(&path).await?;
            print_report(&report);
            Ok(())
        }
        Command::Whoami => run_whoami(&app).await,
        Command::Users(users) => run_users(&app, users).await,
        Command::Messages(messages) => run_messages(&app, messages).await,
    }
}

async fn run_ping(app: &SessionApp) -> Result<(), CliError> {
    let response = app.client().send(app.client().get("/")).await?;
    println!("ok ({})", response.status());
    Ok(())
}

async fn run_register(app: &SessionApp, args: RegisterArgs) -> Result<(), CliError> {
    let fields = RegisterFields {
        confirm_password: args.confirm.unwrap_or_else(|| args.password.clone()),
        username: args.username,
        email: args.email,
        password: args.password,
        accepted_terms: args.accept_terms,
    };
    if password_match(&fields.password, &fields.confirm_password) == PasswordMatch::Mismatch {
        tracing::warn!("password confirmation does not match");
    }
    if let Some(strength) = app.flows().strength_hint(&fields.password) {
        println!("password strength: {strength:?}");
    }

    let outcome = app.register(&fields).await.map_err(|err| {
        if let SessionError::Validation(errors) = &err {
            for (field, message) in errors.iter() {
                eprintln!("{}: {message}", field.as_str());
            }
        }
        err
    })?;

    match outcome {
        RegisterOutcome::LoggedIn { navigation, .. } => {
            println!("registered and logged in as {}", fields.username());
            navigation.await?;
        }
        RegisterOutcome::Registered { manual_login: true } => {
            println!("registered; you can now log in");
        }
        RegisterOutcome::Registered { manual_login: false } => println!("registered"),
    }
    Ok(())
}

async fn run_whoami(app: &SessionApp) -> Result<(), CliError> {
    if app.session().token().is_none() {
        return Err(CliError::NotLoggedIn);
    }
    let me: CurrentUser = app.whoami().await?;
    print_json(&me)
}

async fn run_users(app: &SessionApp, users: UsersCommand) -> Result<(), CliError> {
    let api = app.messenger();
    match users.command {
        UsersSubcommand::List => print_json(&api.list_users().await?),
        UsersSubcommand::Get { user_id } => print_json(&api.get_user(user_id).await?),
    }
}

async fn run_messages(app: &SessionApp, messages: MessagesCommand) -> Result<(), CliError> {
    let api = app.messenger();
    match messages.command {
        MessagesSubcommand::List { skip, limit } => print_json(&api.list_messages(skip, limit).await?),
        MessagesSubcommand::With { user_id } => print_json(&api.conversation(user_id).await?),
        MessagesSubcommand::Send { receiver_id, content } => {
            print_json(&api.send_message(receiver_id, &content).await?)
        }
    }
}

fn print_report(report: &BootstrapReport) {
    println!("route: {:?}", report.route);
    println!("state: {:?}", report.state);
    if let Some(to) = &report.navigated_to {
        println!("navigated to: {to}");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
