use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use session::admission::{AdmissionConfig, DEFAULT_AUTH_HEADER_SCHEME, DEFAULT_TOKEN_QUERY_PARAM};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The HMAC secret access tokens are signed with.
    #[arg(long, env, hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Only accept access tokens carrying this issuer, if set.
    #[arg(long, env)]
    jwt_issuer: Option<String>,

    /// Query parameter a WebSocket client may pass its access token in.
    #[arg(long, env, default_value = DEFAULT_TOKEN_QUERY_PARAM)]
    pub ws_token_query_param: String,

    /// Authorization header scheme checked when no query token is present.
    #[arg(long, env, default_value = DEFAULT_AUTH_HEADER_SCHEME)]
    pub ws_auth_header_scheme: String,

    /// Milliseconds token verification may take before a handshake is refused.
    #[arg(long, env, default_value_t = 5000)]
    pub ws_verify_timeout_ms: u64,

    /// Frames buffered per connection before further messages are dropped for it.
    #[arg(long, env, default_value_t = 64, value_parser = clap::value_parser!(u16).range(1..))]
    pub ws_outbound_buffer: u16,

    /// Optional JSON file of known users, used to enrich connection logs.
    #[arg(long, env)]
    users_file: Option<PathBuf>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn set_jwt_secret(mut self, jwt_secret: String) -> Self {
        self.jwt_secret = Some(jwt_secret);
        self
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        self.jwt_secret.as_deref()
    }

    pub fn jwt_issuer(&self) -> Option<&str> {
        self.jwt_issuer.as_deref()
    }

    pub fn users_file(&self) -> Option<&PathBuf> {
        self.users_file.as_ref()
    }

    /// Where the admission gate looks for credentials and how long it waits.
    pub fn admission(&self) -> AdmissionConfig {
        AdmissionConfig {
            query_param: self.ws_token_query_param.clone(),
            header_scheme: self.ws_auth_header_scheme.clone(),
            verify_timeout: Duration::from_millis(self.ws_verify_timeout_ms),
        }
    }

    pub fn outbound_buffer(&self) -> usize {
        usize::from(self.ws_outbound_buffer)
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}
