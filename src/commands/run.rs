//! Run command - every reconcile loop plus the namespace controller.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio::sync::watch;
use tracing::{error, info};

use super::GlobalArgs;
use super::runtime::ControlPlane;
use crate::debt::every;

#[derive(Args)]
pub struct RunCmd {
    /// Cluster state file (YAML)
    #[arg(long)]
    pub cluster: PathBuf,

    /// Seconds between cluster state file writes
    #[arg(long, default_value = "30")]
    pub save_interval: u64,
}

impl RunCmd {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let plane = ControlPlane::open(global, &self.cluster).await?;
        if !plane.config.object_storage.is_configured() {
            println!("Object storage admin not configured; storage stages are skipped.");
        }

        let (stop, cancel) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received Ctrl+C, stopping"),
                Err(e) => error!(error = %e, "failed to listen for Ctrl+C, stopping"),
            }
            let _ = stop.send(true);
        });

        println!("Running against {}", self.cluster.display());
        println!("Press Ctrl+C to stop.\n");

        let plane = &plane;
        tokio::join!(
            plane.scheduler.run(cancel.clone()),
            plane.controller.run(cancel.clone()),
            every(
                "state-save",
                Duration::from_secs(self.save_interval.max(1)),
                cancel,
                move || async move {
                    if let Err(e) = plane.save().await {
                        error!(error = %e, "failed to save cluster state");
                    }
                },
            ),
        );

        plane.close().await?;
        println!("Stopped.");
        Ok(())
    }
}
