use std::sync::Arc;
use streamvisor_control_plane::features::instance_management::controller::InstanceController;
use streamvisor_control_plane::features::instance_management::repo::{
    InMemoryInstanceRepository, InstanceRepository,
};
use streamvisor_control_plane::features::instance_management::service::InstanceService;
use streamvisor_control_plane::features::message_dispatch::controller::DispatchController;
use streamvisor_control_plane::features::message_dispatch::repo::{
    AmqpAckPublisher, AmqpControlSource, BrokerPool,
};
use streamvisor_control_plane::features::message_dispatch::service::DispatchService;
use streamvisor_control_plane::shared::config::ControlPlaneConfig;
use streamvisor_control_plane::shared::error::ControlPlaneResult;
use streamvisor_runtime::{ContainerController, DockerEngine};
use tokio::runtime::Handle;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("streamvisor_control_plane=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ControlPlaneConfig::from_env()?;
    config.validate()?;

    info!(
        broker_host = %config.broker.host,
        control_queue = %config.queues.control,
        image = %config.processor_image,
        mode = %config.processing_mode,
        "Starting Streamvisor Control Plane"
    );

    let engine = Arc::new(DockerEngine::connect_local(Handle::current())?);
    let containers = ContainerController::new(engine, config.run_config());
    if let Err(e) = containers.check_health().await {
        error!(error = %e, "Container engine health check failed");
        return Err(e.into());
    }

    let repo = build_repository(&config).await?;
    let instance_service = Arc::new(InstanceService::new(repo, Arc::new(containers)));
    let instance_controller = Arc::new(InstanceController::new(instance_service));

    let pool = BrokerPool::connect(&config.broker).await?;
    let publisher = AmqpAckPublisher::new(pool.clone(), config.queues.clone());
    publisher.declare_topology().await?;

    let dispatch_service = Arc::new(DispatchService::new(
        instance_controller,
        Arc::new(publisher),
    ));
    let dispatcher = DispatchController::new(
        dispatch_service,
        config.dispatch_workers,
        config.broker.prefetch as usize,
    );

    let source =
        AmqpControlSource::open(&pool, &config.queues.control, config.broker.prefetch).await?;

    info!("Control Plane initialized successfully");

    let outcome = dispatcher
        .run(source, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    pool.close().await;
    outcome?;
    Ok(())
}

#[cfg(feature = "postgres")]
async fn build_repository(config: &ControlPlaneConfig) -> ControlPlaneResult<Arc<dyn InstanceRepository>> {
    use streamvisor_control_plane::features::instance_management::repo::postgres::PostgresInstanceRepository;

    match &config.database_url {
        Some(url) => {
            let repo = PostgresInstanceRepository::connect(url, 5).await?;
            repo.ensure_schema().await?;
            info!("Using PostgreSQL instance store");
            Ok(Arc::new(repo))
        }
        None => {
            warn!("DATABASE_URL is not set, using in-memory instance store");
            Ok(Arc::new(InMemoryInstanceRepository::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_repository(config: &ControlPlaneConfig) -> ControlPlaneResult<Arc<dyn InstanceRepository>> {
    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but the postgres feature is not enabled");
    }
    info!("Using in-memory instance store");
    Ok(Arc::new(InMemoryInstanceRepository::new()))
}
