//! Update command handlers: run, check, apply, acknowledge.

use anyhow::{bail, Context, Result};

use hubupdate::{TickOutcome, UpdateController, UpdaterConfig, Version};

use super::common::shutdown_signal;

/// Resume, then run the scheduler until Ctrl-C or SIGTERM.
pub(crate) async fn cmd_run(config: UpdaterConfig) -> Result<()> {
    let controller = UpdateController::from_config(config).context("Failed to start updater")?;
    controller
        .run(shutdown_signal())
        .await
        .context("Updater stopped")?;
    Ok(())
}

/// One version check; no mutation.
pub(crate) async fn cmd_check(config: UpdaterConfig) -> Result<()> {
    let controller = UpdateController::from_config(config)?;
    let check = controller.version_check().await;

    println!("Installed: {}", check.current);
    match &check.latest {
        Some(latest) => println!("Latest:    {}", latest),
        None => println!("Latest:    unknown (repository unreachable)"),
    }
    if check.update_available {
        println!("\nUpdate available. Run `hubupdate apply` to install it now.");
    } else {
        println!("\nUp to date.");
    }
    Ok(())
}

/// One full update attempt now.
pub(crate) async fn cmd_apply(config: UpdaterConfig, version: Option<String>) -> Result<()> {
    let controller = UpdateController::from_config(config)?;
    let outcome = match version {
        Some(v) => {
            let target: Version = v
                .parse()
                .with_context(|| format!("'{v}' is not a version"))?;
            controller.apply_update(&target).await?
        }
        None => controller.tick().await?,
    };

    println!("{}", outcome);
    match outcome {
        TickOutcome::CheckFailed { .. }
        | TickOutcome::Rejected { .. }
        | TickOutcome::Aborted { .. }
        | TickOutcome::RolledBack { .. } => bail!("update not installed"),
        TickOutcome::Busy | TickOutcome::NoUpdate { .. } | TickOutcome::Committed { .. } => Ok(()),
    }
}

/// Clear a fatal journal.
pub(crate) fn cmd_acknowledge(config: UpdaterConfig) -> Result<()> {
    let controller = UpdateController::from_config(config)?;
    match controller.acknowledge()? {
        Some(entry) => {
            println!(
                "Cleared journal for update {} -> {} (snapshot {}).",
                entry.from_version, entry.to_version, entry.backup_id
            );
            if let Some(error) = entry.error {
                println!("Recorded failure: {}", error);
            }
        }
        None => println!("No pending update journal."),
    }
    Ok(())
}
