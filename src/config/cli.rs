use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::types::UserRole;

/// Command-line arguments for the Vetrina binary.
#[derive(Debug, Parser)]
#[command(name = "vetrina", version, about = "Vetrina demo hosting server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "VETRINA_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run migrations and the HTTP server.
    Serve(Box<ServeArgs>),
    /// Issue or revoke API session tokens.
    Token(TokenArgs),
    /// List (and optionally delete) demo directories no demo record references.
    Reconcile(ReconcileArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the directory demos are extracted into.
    #[arg(long = "demos-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub demos_directory: Option<PathBuf>,

    /// Override the maximum archive upload size in bytes.
    #[arg(long = "demos-max-upload-bytes", value_name = "BYTES")]
    pub demos_max_upload_bytes: Option<u64>,

    /// Override the maximum total extracted size in bytes.
    #[arg(long = "demos-max-extracted-bytes", value_name = "BYTES")]
    pub demos_max_extracted_bytes: Option<u64>,

    /// Override the maximum number of archive entries.
    #[arg(long = "demos-max-entries", value_name = "COUNT")]
    pub demos_max_entries: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct TokenArgs {
    #[command(subcommand)]
    pub command: TokenCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum TokenCommand {
    /// Create (or update) a profile and print a fresh session token for it.
    Issue(TokenIssueArgs),
    /// Revoke a session by its token prefix.
    Revoke(TokenRevokeArgs),
}

#[derive(Debug, Args, Clone)]
pub struct TokenIssueArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Email address of the profile the token belongs to.
    #[arg(long, value_name = "EMAIL")]
    pub email: String,

    /// Role stored on the profile (admin|client).
    #[arg(long, value_name = "ROLE", default_value = "client")]
    pub role: UserRole,

    /// Token lifetime; falls back to `auth.session_ttl_hours`.
    #[arg(long = "ttl-hours", value_name = "HOURS")]
    pub ttl_hours: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct TokenRevokeArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Token prefix, as printed by `token issue`.
    #[arg(value_name = "PREFIX")]
    pub prefix: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the directory demos are extracted into.
    #[arg(long = "demos-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub demos_directory: Option<PathBuf>,

    /// Delete the orphaned directories instead of only listing them.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub apply: bool,
}
