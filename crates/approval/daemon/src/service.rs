//! Daemon service assembly and lifecycle

use crate::seed;
use approval_engine::{
    ApprovalConfig, ApprovalEngine, DispatchLoop, InMemoryStore, LogDispatcher,
    NotificationOutbox, ReminderScheduler, ResolverChain, StaticAccessPolicy,
};
use approval_types::PrincipalId;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Approval daemon service
pub struct ApprovalService {
    config: ApprovalConfig,
    engine: Arc<ApprovalEngine>,
    dispatch: DispatchLoop,
}

impl ApprovalService {
    /// Wire storage, resolvers, the notification outbox and the engine,
    /// then publish the seed templates
    pub fn new(config: ApprovalConfig) -> anyhow::Result<Self> {
        let directory = &config.directory;
        if directory.roles.is_empty() && directory.managers.is_empty() {
            tracing::warn!("Directory is empty: every step will block until reassigned");
        }
        let resolver = ResolverChain::from_directory(directory);

        let access = StaticAccessPolicy::new(config.engine.admins.iter().map(PrincipalId::new));
        let (outbox, notifications) = NotificationOutbox::channel();
        let dispatch = DispatchLoop::new(
            notifications,
            Arc::new(LogDispatcher),
            config.notifications.clone(),
        );

        let engine = ApprovalEngine::new(
            config.engine.clone(),
            Arc::new(InMemoryStore::new()),
            Arc::new(resolver),
            Arc::new(access),
            outbox,
        )?;

        if let Some(path) = &config.templates_path {
            let drafts = seed::read_drafts(path)?;
            let published = seed::publish_all(&engine, &drafts)?;
            tracing::info!(path = %path, templates = published, "Templates seeded");
        }

        Ok(Self {
            config,
            engine: Arc::new(engine),
            dispatch,
        })
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            config,
            engine,
            dispatch,
        } = self;

        let dispatch_handle = dispatch.spawn();

        let mut scheduler: Option<(Arc<ReminderScheduler>, JoinHandle<()>)> = None;
        if config.scheduler.enabled {
            let (reminders, scan_rx) = ReminderScheduler::new(config.scheduler.clone(), engine.clone());
            let handle = reminders.clone().start(scan_rx).await;
            scheduler = Some((reminders, handle));
        } else {
            tracing::info!("Reminder scheduler disabled by configuration");
        }

        tracing::info!(
            request_types = ?engine.templates().request_types(),
            "Approval daemon ready"
        );

        shutdown_signal().await;
        tracing::info!("Approval daemon shutting down");

        // Stop scheduler
        if let Some((reminders, handle)) = scheduler {
            reminders.stop().await;
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler task failed");
            }
        }

        // Dropping the last engine handle closes the outbox; the dispatch
        // loop drains what is queued and exits
        drop(engine);
        if let Err(e) = dispatch_handle.await {
            tracing::error!(error = %e, "Dispatch task failed");
        }

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
