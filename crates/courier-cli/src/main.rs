use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use courier_core::api::ApiClient;
use courier_core::auth::{
    AuthError, AuthManager, FileCredentialStore, IdentityClient, LoginRedirect, SessionHandle,
    SessionStatus, Signup, UserProfile,
};
use courier_core::config::ApiConfig;
use courier_core::services::{
    NewPickupRequest, PackageType, PickupRequest, PickupService, SupportRequest, SupportService,
};
use textwrap::wrap;
use tokio::task;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "ParcelMyBox courier CLI")]
struct Cli {
    /// Profile name for stored credentials (defaults to COURIER_PROFILE or "default")
    #[arg(long, global = true)]
    profile: Option<String>,
    /// Open the sign-in page in a browser when the session expires
    #[arg(long = "open-login", global = true)]
    open_login: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in, sign up, and inspect the current account
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Schedule and list parcel pickups
    #[command(subcommand)]
    Pickup(PickupCommand),
    /// Contact customer support
    #[command(subcommand)]
    Support(SupportCommand),
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Sign in with email and password
    Login(LoginArgs),
    /// Create an account and sign in to it
    Signup(SignupArgs),
    /// Forget stored credentials for a profile
    Logout,
    /// Show the signed-in account
    Whoami(JsonArgs),
    /// Check whether the stored credential is still accepted
    Verify,
}

#[derive(Subcommand, Debug)]
enum PickupCommand {
    /// List scheduled pickups
    List(JsonArgs),
    /// Schedule a new pickup
    Create(PickupCreateArgs),
}

#[derive(Subcommand, Debug)]
enum SupportCommand {
    /// Send a message to customer support (no sign-in required)
    Submit(SupportArgs),
}

#[derive(Args, Debug)]
struct JsonArgs {
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long)]
    email: String,
    /// Password; prompted for when omitted
    #[arg(long)]
    password: Option<String>,
}

#[derive(Args, Debug)]
struct SignupArgs {
    #[arg(long = "first-name")]
    first_name: String,
    #[arg(long = "last-name")]
    last_name: String,
    #[arg(long)]
    email: String,
    /// Password; prompted for when omitted
    #[arg(long)]
    password: Option<String>,
}

#[derive(Args, Debug)]
struct PickupCreateArgs {
    /// Contact name at the pickup address
    #[arg(long)]
    name: String,
    #[arg(long)]
    phone: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    address: String,
    #[arg(long)]
    city: String,
    #[arg(long = "postal-code")]
    postal_code: String,
    /// Pickup date (YYYY-MM-DD)
    #[arg(long)]
    date: String,
    /// Pickup time (HH:MM)
    #[arg(long)]
    time: String,
    /// One of doc, small, medium, large, xl
    #[arg(long = "package", default_value = "small")]
    package_type: PackageType,
    /// Weight in kilograms
    #[arg(long)]
    weight: String,
    #[arg(long)]
    instructions: Option<String>,
    /// Output raw JSON instead of formatted text
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SupportArgs {
    #[arg(long)]
    subject: String,
    #[arg(long)]
    message: String,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

/// Everything a command needs to talk to the API for one profile.
struct Runtime {
    config: ApiConfig,
    store: Arc<FileCredentialStore>,
    session: SessionHandle,
    client: ApiClient,
}

impl Runtime {
    fn new(profile: Option<String>, open_login: bool) -> Result<Self> {
        let mut config = ApiConfig::from_env().context("invalid COURIER_* configuration")?;
        if let Some(profile) = profile {
            config = config.with_profile(profile);
        }
        let store = Arc::new(
            FileCredentialStore::with_default_locator(config.profile.clone())
                .context("unable to initialise credential store")?,
        );
        let session = SessionHandle::default();
        let terminator = LoginRedirect::new(session.clone(), config.login_url.clone())
            .with_browser(open_login);
        let client = ApiClient::new(&config, store.clone(), Arc::new(terminator))
            .context("failed to build API client")?;
        Ok(Self {
            config,
            store,
            session,
            client,
        })
    }

    fn auth(&self) -> AuthManager {
        AuthManager::new(
            IdentityClient::new(self.client.clone()),
            self.store.clone(),
            self.session.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = Runtime::new(cli.profile, cli.open_login)?;
    let result = match cli.command {
        Commands::Auth(cmd) => match cmd {
            AuthCommand::Login(args) => auth_login(&runtime, args).await,
            AuthCommand::Signup(args) => auth_signup(&runtime, args).await,
            AuthCommand::Logout => auth_logout(&runtime),
            AuthCommand::Whoami(args) => auth_whoami(&runtime, args).await,
            AuthCommand::Verify => auth_verify(&runtime).await,
        },
        Commands::Pickup(cmd) => match cmd {
            PickupCommand::List(args) => pickup_list(&runtime, args).await,
            PickupCommand::Create(args) => pickup_create(&runtime, args).await,
        },
        Commands::Support(cmd) => match cmd {
            SupportCommand::Submit(args) => support_submit(&runtime, args).await,
        },
    };
    report_login_required(&runtime.session);
    result
}

fn report_login_required(session: &SessionHandle) {
    if let SessionStatus::LoginRequired { reason, login_url } = session.current() {
        eprintln!("Your session has ended ({reason}).");
        eprintln!("Sign in again with `courier auth login` or visit {login_url}");
    }
}

async fn auth_login(runtime: &Runtime, args: LoginArgs) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => prompt_for_password().await?,
    };
    runtime
        .auth()
        .login(&args.email, &password)
        .await
        .context("sign-in failed")?;
    println!(
        "Signed in as {}. Credentials stored for profile '{}'.",
        args.email, runtime.config.profile
    );
    Ok(())
}

async fn auth_signup(runtime: &Runtime, args: SignupArgs) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => prompt_for_password().await?,
    };
    let signup = Signup {
        first_name: args.first_name,
        last_name: args.last_name,
        email: args.email,
        password,
    };
    runtime
        .auth()
        .signup(&signup)
        .await
        .context("sign-up failed")?;
    println!(
        "Account created for {}. Credentials stored for profile '{}'.",
        signup.email, runtime.config.profile
    );
    Ok(())
}

fn auth_logout(runtime: &Runtime) -> Result<()> {
    runtime
        .auth()
        .logout()
        .context("failed to remove stored credentials")?;
    println!(
        "Deleted credentials for profile '{}'.",
        runtime.config.profile
    );
    Ok(())
}

async fn auth_whoami(runtime: &Runtime, args: JsonArgs) -> Result<()> {
    let user = match runtime.auth().restore_session().await {
        Ok(Some(user)) => user,
        Ok(None) | Err(AuthError::NotAuthenticated) => {
            return Err(anyhow!(
                "not signed in for profile '{}'; run `courier auth login`",
                runtime.config.profile
            ))
        }
        Err(err) => return Err(err).context("failed to load the current account"),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        render_user(&user);
    }
    Ok(())
}

async fn auth_verify(runtime: &Runtime) -> Result<()> {
    let valid = runtime
        .auth()
        .verify()
        .await
        .context("verification request failed")?;
    if valid {
        println!("Stored credential is valid.");
    } else {
        println!("Stored credential is missing or no longer accepted.");
    }
    Ok(())
}

async fn pickup_list(runtime: &Runtime, args: JsonArgs) -> Result<()> {
    let pickups = PickupService::new(runtime.client.clone())
        .list()
        .await
        .context("failed to list pickups")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&pickups)?);
    } else {
        render_pickup_list(&pickups);
    }
    Ok(())
}

async fn pickup_create(runtime: &Runtime, args: PickupCreateArgs) -> Result<()> {
    let request = NewPickupRequest {
        name: args.name,
        phone_number: args.phone,
        email: args.email,
        address: args.address,
        city: args.city,
        postal_code: args.postal_code,
        date: args
            .date
            .parse()
            .with_context(|| format!("invalid date '{}'", args.date))?,
        time: parse_time(&args.time)?,
        package_type: args.package_type,
        weight: args.weight,
        instructions: args.instructions.unwrap_or_default(),
    };

    let pickup = PickupService::new(runtime.client.clone())
        .create(&request)
        .await
        .context("failed to schedule pickup")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&pickup)?);
    } else {
        println!("Scheduled pickup #{}", pickup.id);
        render_pickup(&pickup);
    }
    Ok(())
}

async fn support_submit(runtime: &Runtime, args: SupportArgs) -> Result<()> {
    let receipt = SupportService::new(runtime.client.clone())
        .submit(&SupportRequest {
            subject: args.subject,
            message: args.message,
        })
        .await
        .context("failed to submit support request")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        match receipt.id {
            Some(id) => println!("Support request #{id} received."),
            None => println!("Support request received."),
        }
    }
    Ok(())
}

fn parse_time<T>(raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    // Accept HH:MM as well as HH:MM:SS.
    let normalized = if raw.matches(':').count() == 1 {
        format!("{raw}:00")
    } else {
        raw.to_owned()
    };
    normalized
        .parse()
        .with_context(|| format!("invalid time '{raw}'"))
}

async fn prompt_for_password() -> Result<String> {
    task::spawn_blocking(|| -> Result<String> {
        use std::io::{self, Write};
        print!("Password: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim_end_matches(['\r', '\n']).to_owned())
    })
    .await
    .map_err(|_| anyhow!("password prompt was cancelled"))?
}

fn render_user(user: &UserProfile) {
    println!("Name  : {}", user.display_name());
    println!("Email : {}", user.email);
    if let Some(id) = user.id {
        println!("ID    : {}", id);
    }
}

fn truncate(value: &str, max_len: usize) -> String {
    let mut chars = value.chars();
    let mut collected = String::new();
    for _ in 0..max_len.saturating_sub(1) {
        match chars.next() {
            Some(ch) => collected.push(ch),
            None => return value.to_owned(),
        }
    }
    if chars.next().is_some() {
        collected.push('…');
        collected
    } else {
        value.to_owned()
    }
}

fn render_pickup_list(pickups: &[PickupRequest]) {
    if pickups.is_empty() {
        println!("No pickups scheduled.");
        return;
    }
    println!(
        "{:<6} {:<10} {:<5} {:<20} {:<7} {:>8}",
        "ID", "DATE", "TIME", "CITY", "PACKAGE", "KG"
    );
    println!("{}", "-".repeat(61));
    for pickup in pickups {
        let details = &pickup.details;
        println!(
            "{:<6} {:<10} {:<5} {:<20} {:<7} {:>8}",
            pickup.id,
            details.date,
            details.time.format("%H:%M"),
            truncate(&details.city, 20),
            details.package_type.as_str(),
            details.weight
        );
    }
}

fn render_pickup(pickup: &PickupRequest) {
    let details = &pickup.details;
    println!("Contact   : {} <{}>", details.name, details.email);
    println!("Phone     : {}", details.phone_number);
    println!(
        "Address   : {}, {} {}",
        details.address, details.city, details.postal_code
    );
    println!(
        "When      : {} {}",
        details.date,
        details.time.format("%H:%M")
    );
    println!(
        "Package   : {} ({} kg)",
        details.package_type.as_str(),
        details.weight
    );
    println!("Created   : {}", pickup.created_at.to_rfc3339());

    let instructions = details.instructions.trim();
    if !instructions.is_empty() {
        println!();
        for line in wrap(instructions, 80) {
            println!("{}", line);
        }
    }
}
