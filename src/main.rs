//! ppauth - PowerPlatform credential gateway diagnostics
//!
//! Acquire, inspect and clear the tokens the PowerPlatform tools use.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use powerplatform_auth::{AuthMode, AuthProvider, Config};

#[derive(Parser)]
#[command(name = "ppauth")]
#[command(about = "Acquire and manage PowerPlatform access tokens", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print an access token for a resource
    Token {
        /// Resource URL (defaults to POWERPLATFORM_URL)
        #[arg(short, long)]
        resource: Option<String>,
    },

    /// Show the signed-in account
    Whoami,

    /// Sign out and delete the encrypted token cache
    Logout,

    /// Show authentication mode and cache state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `token` output can be piped
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::load()?;
    let auth = AuthProvider::from_config(&config).context("Invalid authentication settings")?;

    match cli.command {
        Commands::Token { resource } => {
            let resource = resource
                .or_else(|| config.organization_url.clone())
                .context("No resource given and POWERPLATFORM_URL is not set")?;
            let token = auth.get_access_token(&resource).await?;
            println!("{}", token.secret());
        }
        Commands::Whoami => match auth.auth_mode() {
            AuthMode::ServiceIdentity => {
                println!("Authenticated as a service identity (client credentials).");
            }
            AuthMode::Interactive => match auth.user_info().await {
                Some(account) => {
                    println!();
                    println!("Name:     {}", account.name.as_deref().unwrap_or("(none)"));
                    println!("Username: {}", account.username);
                    println!("Tenant:   {}", account.tenant_id.as_deref().unwrap_or("(none)"));
                    println!("ID:       {}", account.home_account_id);
                }
                None => println!("Not signed in. Run 'ppauth token' to sign in."),
            },
        },
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth.clear_cache()?;
            println!("Logged out.");
        }
        Commands::Status => {
            println!("Mode:        {}", auth.auth_mode());
            if auth.auth_mode() == AuthMode::Interactive {
                println!(
                    "Token cache: {}",
                    if auth.cache_exists() { "present" } else { "none" }
                );
                match auth.user_info().await {
                    Some(account) => println!("Account:     {}", account.username),
                    None => println!("Account:     none"),
                }
            }
        }
    }

    Ok(())
}
