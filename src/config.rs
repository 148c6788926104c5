use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Role claim key used by the CaveMaster auth server.
pub const DEFAULT_ROLE_CLAIM: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";

/// Config file picked up from the working directory when none is given.
const CWD_CONFIG_FILE: &str = "cavemaster.yaml";

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Base URL of the auth API
    #[arg(long, env = "CAVEMASTER_API_URL")]
    pub api_url: Option<String>,

    /// Location of the session file
    #[arg(long, env = "CAVEMASTER_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub token: TokenConfig,
    pub routes: RoutesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub login_path: String,
    pub profile_path: String,
    pub forgot_password_path: String,
    pub reset_password_path: String,
    pub validate_reset_token_path: String,
    pub change_password_path: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
    /// Key of the token+role composite record.
    pub token_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    /// Claim carrying the user's role.
    pub role_claim: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoutesConfig {
    pub home: String,
    pub auth_entry: String,
    pub login: String,
    pub access_denied: String,
    /// Landing route per role name.
    #[serde(default)]
    pub dashboards: HashMap<String, String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    /// Layer defaults, config file, `CAVEMASTER_` env vars and CLI flags.
    ///
    /// Priority: CLI flag > env var > config file > defaults.
    pub fn from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("api.base_url", "http://localhost:5000")?
            .set_default("api.timeout_secs", 30)?
            .set_default("api.login_path", "/api/Auth/login")?
            .set_default("api.profile_path", "/api/Auth/me")?
            .set_default("api.forgot_password_path", "/api/Auth/forgot-password")?
            .set_default("api.reset_password_path", "/api/Auth/reset-password")?
            .set_default(
                "api.validate_reset_token_path",
                "/api/Auth/validate-reset-token",
            )?
            .set_default("api.change_password_path", "/api/Auth/change-password")?
            .set_default("storage.backend", "file")?
            .set_default("storage.path", default_storage_path())?
            .set_default("storage.token_key", "cm_x7f2_sess")?
            .set_default("token.role_claim", DEFAULT_ROLE_CLAIM)?
            .set_default("routes.home", "/")?
            .set_default("routes.auth_entry", "/auth")?
            .set_default("routes.login", "/auth/login")?
            .set_default("routes.access_denied", "/access-denied")?
            .set_default("routes.dashboards.admin", "/admin/dashboard")?
            .set_default("routes.dashboards.manager", "/manager/dashboard")?
            .set_default("routes.dashboards.waitress", "/waitress/dashboard")?
            .set_default("routes.dashboards.client", "/client/home")?;

        // Explicit file wins over ./cavemaster.yaml
        match &cli.config {
            Some(path) => {
                builder = builder.add_source(File::from(path.as_path()).required(true));
            }
            None if Path::new(CWD_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::from(Path::new(CWD_CONFIG_FILE)));
            }
            None => {}
        }

        // E.g. CAVEMASTER_API__BASE_URL=https://api.cavemaster.example
        builder = builder.add_source(
            Environment::with_prefix("CAVEMASTER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = &cli.api_url {
            builder = builder.set_override("api.base_url", url.as_str())?;
        }
        if let Some(path) = &cli.storage_path {
            builder = builder.set_override("storage.path", path.to_string_lossy().into_owned())?;
        }

        builder.build()?.try_deserialize()
    }
}

fn default_storage_path() -> String {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cavemaster")
        .join("session.json")
        .to_string_lossy()
        .into_owned()
}
