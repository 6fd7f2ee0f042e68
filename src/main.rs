use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc, time::Duration};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use vetrina::{
    application::{
        audit::AuditService,
        auth::AuthService,
        demos::DemoService,
        error::AppError,
        repos::{
            AuditRepo, DemoAccessRepo, DemosRepo, HealthRepo, ProfilesRepo, ProjectsRepo,
            SessionsRepo,
        },
        viewer::DemoViewer,
    },
    config,
    infra::{
        db::PostgresRepositories,
        demo_storage::{DemoStorage, ExtractLimits},
        error::InfraError,
        http::{self, HttpState, PasswordRateLimiter},
        telemetry,
    },
    util::bytes::format_bytes,
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let chain = error.chain();
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?chain, "command failed");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?chain, "command failed");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Token(args) => match args.command {
            config::TokenCommand::Issue(issue) => run_token_issue(settings, issue).await,
            config::TokenCommand::Revoke(revoke) => run_token_revoke(settings, revoke).await,
        },
        config::Command::Reconcile(args) => run_reconcile(settings, args.apply).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let storage = init_storage(&settings)?;
    let state = build_http_state(&settings, repositories, storage);

    info!(
        target = "vetrina::serve",
        addr = %settings.server.addr,
        demos_dir = %settings.demos.directory.display(),
        max_upload = %format_bytes(settings.demos.max_upload_bytes.get()),
        "starting demo hosting server"
    );

    serve_http(&settings, state).await
}

async fn run_token_issue(
    settings: config::Settings,
    args: config::TokenIssueArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let auth = build_auth_service(&settings, &repositories);

    let ttl = args
        .ttl_hours
        .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
        .unwrap_or(settings.auth.session_ttl);
    let ttl = time::Duration::try_from(ttl)
        .map_err(|err| AppError::validation(format!("invalid token lifetime: {err}")))?;
    let issued = auth.issue(&args.email, args.role, Some(ttl)).await?;

    info!(
        target = "vetrina::token",
        email = %issued.profile.email,
        role = issued.profile.role.as_str(),
        prefix = %issued.session.prefix,
        "issued session token"
    );
    println!("{}", issued.token);
    Ok(())
}

async fn run_token_revoke(
    settings: config::Settings,
    args: config::TokenRevokeArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let auth = build_auth_service(&settings, &repositories);

    auth.revoke(&args.prefix).await?;

    info!(
        target = "vetrina::token",
        prefix = %args.prefix,
        "revoked session token"
    );
    Ok(())
}

async fn run_reconcile(settings: config::Settings, apply: bool) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let storage = init_storage(&settings)?;
    let demos = build_demo_service(&repositories, storage);

    let report = demos.reconcile(apply).await?;

    for path in &report.orphans {
        println!("{}", path.display());
    }
    info!(
        target = "vetrina::reconcile",
        orphans = report.orphans.len(),
        removed = report.removed,
        apply,
        "reconciled demo directories"
    );
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| InfraError::database(err.to_string()))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::migration(err.to_string()))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn init_storage(settings: &config::Settings) -> Result<Arc<DemoStorage>, AppError> {
    let limits = ExtractLimits {
        max_upload_bytes: settings.demos.max_upload_bytes.get(),
        max_extracted_bytes: settings.demos.max_extracted_bytes.get(),
        max_entries: settings.demos.max_entries,
    };
    let storage = DemoStorage::new(settings.demos.directory.clone(), limits)
        .map_err(|err| InfraError::Storage(err.into()))?;
    Ok(Arc::new(storage))
}

fn build_auth_service(
    settings: &config::Settings,
    repositories: &Arc<PostgresRepositories>,
) -> AuthService {
    let sessions: Arc<dyn SessionsRepo> = repositories.clone();
    let profiles: Arc<dyn ProfilesRepo> = repositories.clone();
    AuthService::new(sessions, profiles, &settings.auth.admin_emails)
}

fn build_demo_service(
    repositories: &Arc<PostgresRepositories>,
    storage: Arc<DemoStorage>,
) -> DemoService {
    let projects: Arc<dyn ProjectsRepo> = repositories.clone();
    let demos: Arc<dyn DemosRepo> = repositories.clone();
    let access: Arc<dyn DemoAccessRepo> = repositories.clone();
    let audit: Arc<dyn AuditRepo> = repositories.clone();
    DemoService::new(projects, demos, access, storage, AuditService::new(audit))
}

fn build_http_state(
    settings: &config::Settings,
    repositories: Arc<PostgresRepositories>,
    storage: Arc<DemoStorage>,
) -> HttpState {
    let projects: Arc<dyn ProjectsRepo> = repositories.clone();
    let demos: Arc<dyn DemosRepo> = repositories.clone();
    let access: Arc<dyn DemoAccessRepo> = repositories.clone();
    let health: Arc<dyn HealthRepo> = repositories.clone();

    let auth = Arc::new(build_auth_service(settings, &repositories));
    let demo_service = Arc::new(build_demo_service(&repositories, storage.clone()));
    let viewer = Arc::new(DemoViewer::new(projects, demos, access, storage));
    let password_limiter = Arc::new(PasswordRateLimiter::new(
        settings.password_rate_limit.window,
        settings.password_rate_limit.max_attempts.get(),
    ));

    HttpState {
        auth,
        demos: demo_service,
        viewer,
        health,
        password_limiter,
        session_cookie: Arc::from(settings.auth.session_cookie.as_str()),
        trusted_proxies: Arc::from(settings.server.trusted_proxies.as_slice()),
        upload_limit_bytes: settings.demos.max_upload_bytes.get(),
    }
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let addr = settings.server.addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| InfraError::Bind { addr, source })?;

    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = signalled_tx.send(());
    })
    .into_future();

    let grace = settings.server.graceful_shutdown;
    let drain_deadline = async move {
        match signalled_rx.await {
            Ok(()) => tokio::time::sleep(grace).await,
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = drain_deadline => {
            warn!(
                target = "vetrina::serve",
                grace_secs = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    info!(target = "vetrina::serve", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "vetrina::serve", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "vetrina::serve", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!(target = "vetrina::serve", "shutdown signal received, draining connections");
}
