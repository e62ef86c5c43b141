use std::{collections::BTreeMap, process, sync::Arc};

use prerender::{
    application::{
        error::AppError,
        render::{HttpRenderEngine, HttpRenderEngineConfig},
        storage::SnapshotStorage,
    },
    cache::{
        CacheConfig, GateConfig, PrerenderState, RenderCoordinator, RenderTrigger, TaskRegistry,
    },
    config,
    domain::{clock::SystemClock, entities::RenderStatus},
    infra::{
        assets::AssetState,
        client::StatusClient,
        error::InfraError,
        http::{self, RouterState},
        storage::{FsStorage, MemoryStorage},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging).map_err(AppError::from)?;
            run_serve(settings).await
        }
        config::Command::Status(args) => run_status(args).await,
        config::Command::Inspect(_) => run_inspect(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let storage = open_storage(&settings.storage)?;
    let cache_config = CacheConfig::from(&settings.cache);

    let coordinator = Arc::new(
        RenderCoordinator::start(cache_config.clone(), storage, Arc::new(SystemClock)).await?,
    );

    let endpoint = settings.render.endpoint.clone().ok_or_else(|| {
        InfraError::configuration("render.endpoint must be set to serve snapshots")
    })?;
    let engine = HttpRenderEngine::new(HttpRenderEngineConfig {
        endpoint,
        user_agent: settings.render.user_agent.clone(),
        timeout: cache_config.render_timeout,
    })
    .map_err(|err| InfraError::configuration(format!("failed to build render client: {err}")))?;
    info!(endpoint = %engine.endpoint(), "render engine configured");

    let trigger = Arc::new(RenderTrigger::new(
        Arc::clone(&coordinator),
        Arc::new(engine),
    ));
    let gate = GateConfig::new(
        &settings.gate.patterns,
        &settings.gate.extra_bot_agents,
        settings.server.public_origin.clone(),
    )
    .map_err(|err| AppError::validation(err.to_string()))?;

    if !settings.assets.directory.is_dir() {
        warn!(
            directory = %settings.assets.directory.display(),
            "assets directory missing, non-snapshot requests will 404"
        );
    }

    let state = RouterState {
        prerender: PrerenderState {
            coordinator,
            trigger: Arc::clone(&trigger),
            gate: Arc::new(gate),
        },
        assets: AssetState::new(settings.assets.directory.clone()),
    };

    serve_http(&settings, state).await?;

    if !trigger.drain(settings.server.graceful_shutdown).await {
        warn!("shutting down with revalidations still running");
    }
    Ok(())
}

async fn run_status(args: config::StatusArgs) -> Result<(), AppError> {
    let client = StatusClient::new(&args.server)
        .map_err(|err| AppError::validation(format!("invalid --server: {err}")))?;
    let status = client
        .status(&args.url, args.language.as_deref())
        .await
        .map_err(|err| InfraError::upstream("status", err.to_string()))?;
    print_json(&status)
}

async fn run_inspect(settings: config::Settings) -> Result<(), AppError> {
    let directory = settings.storage.directory.ok_or_else(|| {
        AppError::validation("inspect needs --storage-dir or storage.directory")
    })?;
    let storage =
        FsStorage::open(&directory).map_err(|err| InfraError::storage_root(&directory, err))?;
    let tasks = TaskRegistry::read_persisted(&storage).await?;

    let summary: BTreeMap<String, RenderStatus> = tasks
        .into_iter()
        .map(|(key, status)| (key, RenderStatus { html: None, ..status }))
        .collect();
    print_json(&summary)
}

fn open_storage(settings: &config::StorageSettings) -> Result<Arc<dyn SnapshotStorage>, AppError> {
    match settings.directory.as_ref() {
        Some(directory) => {
            let storage = FsStorage::open(directory)
                .map_err(|err| InfraError::storage_root(directory, err))?;
            info!(directory = %directory.display(), "using filesystem snapshot storage");
            Ok(Arc::new(storage))
        }
        None => {
            warn!("no storage directory configured, snapshots will not survive restarts");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn serve_http(settings: &config::Settings, state: RouterState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|source| InfraError::Bind {
            addr: settings.server.addr,
            source,
        })?;
    info!(addr = %settings.server.addr, "listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
