//! Mints an access token for local development, so a WebSocket client can
//! connect without going through the login flow.
//!
//! ```sh
//! JWT_SECRET=... cargo run --bin issue_token -- --user-id 42
//! ```

use clap::Parser;
use domain::jwt::generate_access_token;
use dotenvy::dotenv;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// User id the token identifies
    #[arg(short, long)]
    user_id: i64,

    /// Optional email claim
    #[arg(short, long)]
    email: Option<String>,

    /// Lifetime of the token in minutes
    #[arg(short, long, default_value_t = 60)]
    ttl_minutes: i64,

    /// Signing secret; must match the server's
    #[arg(long, env, hide_env_values = true)]
    jwt_secret: String,

    /// Issuer claim; must match the server's if it enforces one
    #[arg(long, env)]
    jwt_issuer: Option<String>,
}

fn main() {
    dotenv().ok();
    let args = Args::parse();

    let Some(ttl) = chrono::TimeDelta::try_minutes(args.ttl_minutes) else {
        eprintln!("Token lifetime of {} minutes is out of range", args.ttl_minutes);
        std::process::exit(1);
    };

    match generate_access_token(
        &args.jwt_secret,
        args.user_id,
        args.email.as_deref(),
        ttl,
        args.jwt_issuer.as_deref(),
    ) {
        Ok(token) => println!("{token}"),
        Err(e) => {
            eprintln!("Failed to issue token: {e}");
            std::process::exit(1);
        }
    }
}
