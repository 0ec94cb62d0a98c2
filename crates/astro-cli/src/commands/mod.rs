//! CLI commands

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;

use astro_cluster::ClusterAdapter;
use astro_common::config::AstroConfig;
use astro_lifecycle::{
    LifecycleController, NamespacePolicy, OwnerId, ReconcileScheduler, RecordStore,
};

use crate::{Commands, Result};

pub mod app;

/// Wire a controller from configuration and its collaborators
pub fn build_controller(
    config: &AstroConfig,
    cluster: Arc<dyn ClusterAdapter>,
    store: Arc<dyn RecordStore>,
    scheduler: Arc<dyn ReconcileScheduler>,
) -> LifecycleController {
    LifecycleController::new(cluster, store, scheduler)
        .with_namespace_policy(NamespacePolicy::new(config.namespace_prefix.clone()))
        .with_default_log_lines(config.default_log_lines)
}

/// Run one command as `owner`, writing its output to `out`
pub async fn execute<W: Write>(
    controller: &LifecycleController,
    owner: OwnerId,
    command: Commands,
    out: &mut W,
) -> Result<()> {
    match command {
        Commands::Create(args) => app::create(controller, owner, args, out).await,
        Commands::Start(args) => app::start(controller, owner, args, out).await,
        Commands::Stop(args) => app::stop(controller, owner, args, out).await,
        Commands::Restart(args) => app::restart(controller, owner, args, out).await,
        Commands::Delete(args) => app::delete(controller, owner, args, out).await,
        Commands::Get(args) => app::get(controller, owner, args, out).await,
        Commands::List => app::list(controller, owner, out).await,
        Commands::Logs(args) => app::logs(controller, owner, args, out).await,
    }
}

/// Pretty-print a value as JSON followed by a newline
pub fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
