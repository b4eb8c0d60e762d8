//! Ratna CLI - Database migrations and management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! ratna-cli migrate
//!
//! # Grant the admin role to a registered account
//! ratna-cli admin promote -e owner@example.com
//!
//! # Seed the default shipping rates
//! ratna-cli shipping seed
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use ratna_core::Role;

mod commands;

#[derive(Parser)]
#[command(name = "ratna-cli")]
#[command(author, version, about = "Ratna store CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage admin accounts
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    /// Manage shipping rates
    Shipping {
        #[command(subcommand)]
        action: ShippingAction,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Grant the admin role to an existing account
    Promote {
        /// Account email address
        #[arg(short, long)]
        email: String,
    },
    /// Revoke the admin role
    Demote {
        /// Account email address
        #[arg(short, long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum ShippingAction {
    /// Insert the default shipping rates
    Seed,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Admin { action } => match action {
            AdminAction::Promote { email } => {
                commands::admin::set_role(&email, Role::Admin).await?;
            }
            AdminAction::Demote { email } => {
                commands::admin::set_role(&email, Role::User).await?;
            }
        },
        Commands::Shipping { action } => match action {
            ShippingAction::Seed => commands::shipping::seed().await?,
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_promote() {
        let cli = Cli::try_parse_from(["ratna-cli", "admin", "promote", "-e", "a@b.com"]);
        assert!(matches!(
            cli.map(|c| c.command),
            Ok(Commands::Admin { action: AdminAction::Promote { email } }) if email == "a@b.com"
        ));
    }
}
