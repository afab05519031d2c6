use crate::args::GitSyncAction;
use recall_runtime::ops::ReplicationWorkspace;
use recall_runtime::{ServiceDirs, Settings};

pub fn run(dirs: ServiceDirs, settings: Settings, action: GitSyncAction) -> anyhow::Result<()> {
    let workspace = ReplicationWorkspace::new(&dirs.export_dir(), &settings.replication);

    match action {
        GitSyncAction::Status => {
            let status = workspace.status()?;
            if !status.initialized {
                println!("workspace: {} (not initialized)", dirs.export_dir().display());
                return Ok(());
            }
            println!("workspace: {}", dirs.export_dir().display());
            println!("pending changes: {}", status.pending_changes);
            println!(
                "last commit: {}",
                status.last_commit.as_deref().unwrap_or("(none)")
            );
            println!("remote: {}", status.remote.as_deref().unwrap_or("(none)"));
        }
        GitSyncAction::Init { remote } => {
            let workspace = ReplicationWorkspace::with_remote(
                &dirs.export_dir(),
                &settings.replication.remote_name,
                remote.or(settings.replication.remote_url.clone()),
            );
            workspace.ensure_initialized()?;
            println!("initialized {}", dirs.export_dir().display());
        }
        GitSyncAction::Push { full } => {
            let full_db = full.then(|| dirs.store_db());
            workspace.snapshot(&dirs.vectors_db(), full_db.as_deref())?;
            workspace.push()?;
            println!("pushed snapshot");
        }
        GitSyncAction::Pull => {
            workspace.pull()?;
            println!("pulled latest snapshot");
        }
    }
    Ok(())
}
