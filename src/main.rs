//! `cavemaster` operator CLI
//!
//! Drives the session core against a live auth API: sign in, inspect the
//! current user, check route access, run the password flows.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use cavemaster_session::AuthContext;
use cavemaster_session::config::{self, AppConfig};
use cavemaster_session::guard::{GuardDecision, RouteRequirement};
use cavemaster_session::role::Role;
use cavemaster_session::session::{ActionResponse, LoginOutcome};
use cavemaster_session::telemetry;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

#[derive(Parser, Debug)]
#[command(name = "cavemaster", author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    config: config::Cli,

    /// Emit logs as JSON lines
    #[arg(long, env = "CAVEMASTER_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and cache the profile
    Login {
        email: String,
        #[arg(long, env = "CAVEMASTER_PASSWORD")]
        password: String,
    },
    /// Show the current user
    Whoami {
        /// Skip the cached profile
        #[arg(long)]
        refresh: bool,
    },
    /// Sign out and clear the stored session
    Logout,
    /// Print the current role
    Role,
    /// Print the landing route for the current session
    Landing,
    /// Check access to a route
    Check {
        path: String,
        /// Accepted roles; omit to admit any signed-in user
        #[arg(long, value_delimiter = ',')]
        roles: Option<Vec<String>>,
    },
    /// Request a password reset mail
    ForgotPassword { email: String },
    /// Validate a reset token from a reset link
    ValidateResetToken { email: String, token: String },
    /// Set a new password with a reset token
    ResetPassword {
        email: String,
        token: String,
        #[arg(long, env = "CAVEMASTER_NEW_PASSWORD")]
        new_password: String,
    },
    /// Change the password of the signed-in user
    ChangePassword {
        #[arg(long, env = "CAVEMASTER_PASSWORD")]
        current_password: String,
        #[arg(long, env = "CAVEMASTER_NEW_PASSWORD")]
        new_password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let args = Args::parse();
    telemetry::init(args.log_json);

    let config = AppConfig::from_cli(&args.config).context("loading configuration")?;
    tracing::debug!(
        name: "config.loaded",
        base_url = %config.api.base_url,
        storage = %config.storage.path.display(),
        "Configuration loaded"
    );

    let ctx = AuthContext::from_config(Arc::new(config)).context("initializing session core")?;
    run(&ctx, args.command).await
}

async fn run(ctx: &AuthContext, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login { email, password } => match ctx.session.login(&email, &password).await {
            LoginOutcome::Authenticated { role, profile } => {
                let role = role.map_or_else(|| "-".to_string(), |r| r.to_string());
                match profile.wait().await {
                    Some(user) => println!("Logged in as {} ({role})", user.display_name()),
                    None => println!("Logged in ({role}); profile unavailable"),
                }
                println!("Landing: {}", ctx.guard.landing_route());
            }
            LoginOutcome::Rejected { message } => {
                anyhow::bail!(
                    "login rejected: {}",
                    message.unwrap_or_else(|| "no token issued".into())
                );
            }
            LoginOutcome::Failed { reason } => anyhow::bail!("login failed: {reason}"),
        },
        Command::Whoami { refresh } => {
            if !ctx.session.is_authenticated() {
                anyhow::bail!("not logged in");
            }
            let user = ctx.session.load_current_user_profile(refresh).await?;
            match user {
                Some(user) => println!("{}", serde_json::to_string_pretty(user.as_ref())?),
                None => anyhow::bail!("no profile for the current session"),
            }
        }
        Command::Logout => {
            let target = ctx.session.logout();
            println!("Logged out; go to {}", target.path(ctx.guard.routes()));
        }
        Command::Role => match ctx.session.get_user_role() {
            Some(role) if ctx.session.is_authenticated() => println!("{role}"),
            _ => anyhow::bail!("not logged in"),
        },
        Command::Landing => println!("{}", ctx.guard.landing_route()),
        Command::Check { path, roles } => {
            let route = match roles {
                Some(roles) => RouteRequirement::for_roles(
                    path,
                    roles.iter().map(|r| Role::from(r.as_str())),
                ),
                None => RouteRequirement::authenticated(path),
            };
            match ctx.guard.check(&route) {
                GuardDecision::Allow => println!("allow {}", route.path),
                GuardDecision::Redirect(target) => {
                    println!("redirect {}", target.path(ctx.guard.routes()));
                }
            }
        }
        Command::ForgotPassword { email } => {
            report(ctx.session.forgot_password(&email).await)?;
        }
        Command::ValidateResetToken { email, token } => {
            report(ctx.session.validate_reset_token(&email, &token).await)?;
        }
        Command::ResetPassword {
            email,
            token,
            new_password,
        } => {
            report(
                ctx.session
                    .reset_password(&email, &token, &new_password)
                    .await,
            )?;
        }
        Command::ChangePassword {
            current_password,
            new_password,
        } => {
            report(
                ctx.session
                    .change_password(&current_password, &new_password)
                    .await,
            )?;
        }
    }
    Ok(())
}

fn report(response: ActionResponse) -> anyhow::Result<()> {
    let message = response.message.unwrap_or_default();
    if response.success {
        println!("ok {message}");
        Ok(())
    } else {
        anyhow::bail!("failed: {message}")
    }
}
