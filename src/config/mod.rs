//! Settings for the demo host. Sources are layered as default file, local
//! file, `--config-file`, `VETRINA__*` environment, then CLI flags.

mod cli;

pub use cli::*;

use std::{
    net::{IpAddr, SocketAddr},
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vetrina";
const ENV_PREFIX: &str = "VETRINA";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DEMOS_DIR: &str = "demos";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 200 * 1024 * 1024;
const DEFAULT_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_SESSION_COOKIE: &str = "vetrina_session";
const DEFAULT_SESSION_TTL_HOURS: u64 = 24 * 30;
const DEFAULT_PASSWORD_WINDOW_SECS: u64 = 60;
const DEFAULT_PASSWORD_MAX_ATTEMPTS: u64 = 5;

/// Validated settings shared by every command.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub demos: DemoSettings,
    pub auth: AuthSettings,
    pub password_rate_limit: PasswordRateLimitSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Reverse proxies whose `X-Forwarded-For` entries are believed.
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct DemoSettings {
    pub directory: PathBuf,
    pub max_upload_bytes: NonZeroU64,
    pub max_extracted_bytes: NonZeroU64,
    pub max_entries: usize,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Lowercased addresses treated as administrators regardless of profile role.
    pub admin_emails: Vec<String>,
    pub session_cookie: String,
    pub session_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct PasswordRateLimitSettings {
    pub window: Duration,
    pub max_attempts: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("auth.admin_emails")
            .with_list_parse_key("server.trusted_proxies"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Token(args)) => match &args.command {
            TokenCommand::Issue(issue) => raw.apply_database_override(&issue.database),
            TokenCommand::Revoke(revoke) => raw.apply_database_override(&revoke.database),
        },
        Some(Command::Reconcile(args)) => raw.apply_reconcile_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    demos: RawDemoSettings,
    auth: RawAuthSettings,
    password_rate_limit: RawPasswordRateLimitSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(directory) = overrides.demos_directory.as_ref() {
            self.demos.directory = Some(directory.clone());
        }
        if let Some(limit) = overrides.demos_max_upload_bytes {
            self.demos.max_upload_bytes = Some(limit);
        }
        if let Some(limit) = overrides.demos_max_extracted_bytes {
            self.demos.max_extracted_bytes = Some(limit);
        }
        if let Some(limit) = overrides.demos_max_entries {
            self.demos.max_entries = Some(limit);
        }

        self.apply_database_override(&overrides.database);
    }

    fn apply_reconcile_overrides(&mut self, args: &ReconcileArgs) {
        if let Some(directory) = args.demos_directory.as_ref() {
            self.demos.directory = Some(directory.clone());
        }
        self.apply_database_override(&args.database);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            demos,
            auth,
            password_rate_limit,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            demos: build_demo_settings(demos)?,
            auth: build_auth_settings(auth)?,
            password_rate_limit: build_password_rate_limit_settings(password_rate_limit)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.host", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let mut trusted_proxies = Vec::with_capacity(server.trusted_proxies.len());
    for raw in server.trusted_proxies {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let ip = raw.parse::<IpAddr>().map_err(|err| {
            LoadError::invalid("server.trusted_proxies", format!("`{raw}`: {err}"))
        })?;
        if !trusted_proxies.contains(&ip) {
            trusted_proxies.push(ip);
        }
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        trusted_proxies,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_demo_settings(demos: RawDemoSettings) -> Result<DemoSettings, LoadError> {
    let directory = demos
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DEMOS_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "demos.directory",
            "path must not be empty",
        ));
    }

    let max_upload_bytes = non_zero_u64(
        demos.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        "demos.max_upload_bytes",
    )?;
    usize::try_from(max_upload_bytes.get()).map_err(|_| {
        LoadError::invalid(
            "demos.max_upload_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let max_extracted_bytes = non_zero_u64(
        demos
            .max_extracted_bytes
            .unwrap_or(DEFAULT_MAX_EXTRACTED_BYTES),
        "demos.max_extracted_bytes",
    )?;

    let max_entries = non_zero_u64(
        demos.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES),
        "demos.max_entries",
    )?;
    let max_entries = usize::try_from(max_entries.get()).map_err(|_| {
        LoadError::invalid(
            "demos.max_entries",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(DemoSettings {
        directory,
        max_upload_bytes,
        max_extracted_bytes,
        max_entries,
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> Result<AuthSettings, LoadError> {
    let mut admin_emails = Vec::with_capacity(auth.admin_emails.len());
    for email in auth.admin_emails {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() {
            continue;
        }
        if !email.contains('@') {
            return Err(LoadError::invalid(
                "auth.admin_emails",
                format!("`{email}` is not an email address"),
            ));
        }
        if !admin_emails.contains(&email) {
            admin_emails.push(email);
        }
    }

    let session_cookie = auth
        .session_cookie
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());
    if session_cookie.is_empty()
        || !session_cookie
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(LoadError::invalid(
            "auth.session_cookie",
            "must be a non-empty cookie name of letters, digits, `_` or `-`",
        ));
    }

    let ttl_hours = auth.session_ttl_hours.unwrap_or(DEFAULT_SESSION_TTL_HOURS);
    if ttl_hours == 0 {
        return Err(LoadError::invalid(
            "auth.session_ttl_hours",
            "must be greater than zero",
        ));
    }
    let session_ttl = ttl_hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| LoadError::invalid("auth.session_ttl_hours", "value is too large"))?;

    Ok(AuthSettings {
        admin_emails,
        session_cookie,
        session_ttl,
    })
}

fn build_password_rate_limit_settings(
    limit: RawPasswordRateLimitSettings,
) -> Result<PasswordRateLimitSettings, LoadError> {
    let window_seconds = limit
        .window_seconds
        .unwrap_or(DEFAULT_PASSWORD_WINDOW_SECS);
    if window_seconds == 0 {
        return Err(LoadError::invalid(
            "password_rate_limit.window_seconds",
            "must be greater than zero",
        ));
    }

    let max_attempts = non_zero_u32(
        limit.max_attempts.unwrap_or(DEFAULT_PASSWORD_MAX_ATTEMPTS),
        "password_rate_limit.max_attempts",
    )?;

    Ok(PasswordRateLimitSettings {
        window: Duration::from_secs(window_seconds),
        max_attempts,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    trusted_proxies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDemoSettings {
    directory: Option<PathBuf>,
    max_upload_bytes: Option<u64>,
    max_extracted_bytes: Option<u64>,
    max_entries: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    admin_emails: Vec<String>,
    session_cookie: Option<String>,
    session_ttl_hours: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPasswordRateLimitSettings {
    window_seconds: Option<u64>,
    max_attempts: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
