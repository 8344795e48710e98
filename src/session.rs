//! One complete client run against a daemon

use anyhow::Result;
use std::time::Instant;

use crate::config::ClientConfig;
use crate::identity::Reference;
use crate::logger::Logger;
use crate::net_async::client::TcpRemote;
use crate::reconcile::{Reconciler, RunStats};

/// Connect to the configured endpoint and reconcile the configured root.
/// Errors from the walk keep their `SyncError` so callers can downcast for
/// the kind and path. A configured timeout bounds the whole run.
pub async fn synchronize(config: &ClientConfig, logger: &dyn Logger) -> Result<RunStats> {
    match config.timeout {
        Some(limit) => match tokio::time::timeout(limit, run(config, logger)).await {
            Ok(res) => res,
            Err(_) => anyhow::bail!("run timed out after {} s", limit.as_secs()),
        },
        None => run(config, logger).await,
    }
}

async fn run(config: &ClientConfig, logger: &dyn Logger) -> Result<RunStats> {
    let started = Instant::now();
    let reference = Reference::root(config.endpoint.clone())?;
    logger.start(&config.directory, &reference.to_string());

    let remote = TcpRemote::connect(&reference.endpoint).await.map_err(|e| {
        logger.error(crate::identity::ROOT_PATH, &e);
        e
    })?;
    let stats = Reconciler::new(&remote, config.directory.clone(), logger)
        .with_options(config.reconcile_options())
        .run()
        .await?;

    logger.done(&stats, started.elapsed().as_secs_f64());
    Ok(stats)
}
