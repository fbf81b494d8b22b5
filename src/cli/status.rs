//! Status command handler.

use anyhow::Result;

use hubupdate::state::JournalPhase;
use hubupdate::{UpdateController, UpdaterConfig};

/// Show installed version, pending journal and snapshots.
pub(crate) fn cmd_status(config: UpdaterConfig) -> Result<()> {
    let controller = UpdateController::from_config(config)?;
    let config = controller.config();
    let report = controller.status();

    println!("hubupdate Status");
    println!("================");
    println!();
    println!("Repository: {} ({})", config.repository.repo, config.repository.branch);
    println!("Strategy:   {:?}", config.services.strategy);
    println!();

    match &report.installed {
        Ok(v) => println!("Installed version: {}", v),
        Err(e) => println!("Installed version: unknown ({})", e),
    }

    match &report.pending {
        Ok(None) => println!("Pending update:    none"),
        Ok(Some(entry)) => {
            println!(
                "Pending update:    {} -> {} ({:?}, since {})",
                entry.from_version, entry.to_version, entry.phase, entry.started_at
            );
            if entry.phase == JournalPhase::Fatal {
                println!("  Restore failed. Repair the appliance, then run `hubupdate acknowledge`.");
            }
        }
        Err(e) => println!("Pending update:    journal unreadable ({})", e),
    }

    println!();
    if report.snapshots.is_empty() {
        println!("Snapshots: none in {}", config.paths.backup_dir.display());
    } else {
        println!("Snapshots ({}):", report.snapshots.len());
        for snapshot in &report.snapshots {
            println!(
                "  {}  {} files  {}",
                snapshot.id,
                snapshot.file_count(),
                snapshot.created_at
            );
        }
    }
    Ok(())
}
