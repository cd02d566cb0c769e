use crate::cli::actions::{Target, print_json, reorderer};
use crate::order::DensityReport;
use anyhow::{Result, bail};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct Checked {
    container: Uuid,
    dense: bool,
    #[serde(flatten)]
    report: DensityReport,
}

#[derive(Debug, Serialize)]
struct Compacted {
    container: Uuid,
    moved: usize,
}

/// Print the density report; fails when the container has gaps or duplicates
/// so scripts can act on the exit status.
/// # Errors
/// Returns an error if the store cannot be read or the container is not dense.
pub async fn check(target: &Target) -> Result<()> {
    let engine = reorderer(&target.globals).await?;
    let report = engine.verify(&target.container).await?;
    let dense = report.is_dense();
    print_json(&Checked {
        container: target.container,
        dense,
        report,
    })?;
    if !dense {
        warn!(container = %target.container, "container is not dense");
        bail!("container {} is not dense", target.container);
    }
    Ok(())
}

/// # Errors
/// Returns an error if the container cannot be renumbered.
pub async fn compact(target: &Target) -> Result<()> {
    let engine = reorderer(&target.globals).await?;
    let moved = engine.compact(&target.container).await?;
    print_json(&Compacted {
        container: target.container,
        moved,
    })
}
