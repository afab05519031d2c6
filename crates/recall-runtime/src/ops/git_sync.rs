use crate::settings::ReplicationSettings;
use crate::{Error, Result};
use git2::{IndexAddOption, Repository, Signature};
use recall_types::util;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

// Replication workspace: a git repository holding database snapshots. The
// `.gitattributes` written at init routes *.db blobs through large-file
// tracking so a remote with LFS enabled stores them out of band.

const GIT_ATTRIBUTES: &str = "*.db filter=lfs diff=lfs merge=lfs -text\n";
const README: &str = "# Memory snapshots\n\nReplicated vector and relational database snapshots. \
Managed by `recall git-sync`; do not edit by hand.\n";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoStatus {
    pub initialized: bool,
    pub pending_changes: usize,
    pub last_commit: Option<String>,
    pub remote: Option<String>,
}

pub struct ReplicationWorkspace {
    dir: PathBuf,
    remote_name: String,
    remote_url: Option<String>,
}

impl ReplicationWorkspace {
    pub fn new(dir: &Path, settings: &ReplicationSettings) -> Self {
        Self {
            dir: dir.to_path_buf(),
            remote_name: settings.remote_name.clone(),
            remote_url: settings.remote_url.clone(),
        }
    }

    pub fn with_remote(dir: &Path, remote_name: &str, remote_url: Option<String>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            remote_name: remote_name.to_string(),
            remote_url,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_initialized(&self) -> bool {
        self.dir.join(".git").exists()
    }

    /// Init once: repository, large-binary tracking attributes, README.
    /// Subsequent calls open the existing repository and reconcile the
    /// remote configuration.
    pub fn ensure_initialized(&self) -> Result<Repository> {
        let repo = if self.is_initialized() {
            Repository::open(&self.dir)?
        } else {
            std::fs::create_dir_all(&self.dir)?;
            let repo = Repository::init(&self.dir)?;
            std::fs::write(self.dir.join(".gitattributes"), GIT_ATTRIBUTES)?;
            std::fs::write(self.dir.join("README.md"), README)?;
            info!("initialized replication workspace at {}", self.dir.display());
            repo
        };

        if let Some(url) = &self.remote_url {
            match repo.find_remote(&self.remote_name) {
                Ok(remote) if remote.url() == Some(url.as_str()) => {}
                Ok(_) => {
                    repo.remote_set_url(&self.remote_name, url)?;
                }
                Err(_) => {
                    repo.remote(&self.remote_name, url)?;
                }
            }
        }
        Ok(repo)
    }

    /// Copy the database snapshots in, write metadata, and commit with a
    /// timestamp message.
    pub fn snapshot(&self, vectors_db: &Path, full_db: Option<&Path>) -> Result<()> {
        let repo = self.ensure_initialized()?;

        if !vectors_db.exists() {
            return Err(Error::Config(format!(
                "no vector database at {}",
                vectors_db.display()
            )));
        }
        crate::ops::export::checkpoint_for_copy(vectors_db);
        std::fs::copy(vectors_db, self.dir.join("vectors.db"))?;
        if let Some(full_db) = full_db {
            crate::ops::export::checkpoint_for_copy(full_db);
            std::fs::copy(full_db, self.dir.join("full-export.db"))?;
        }

        let metadata = json!({
            "exported_at": util::now_rfc3339(),
            "source": vectors_db
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            "size_bytes": std::fs::metadata(vectors_db)?.len(),
            "hostname": std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            "platform": std::env::consts::OS,
        });
        std::fs::write(
            self.dir.join("metadata.json"),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        let message = format!("memory snapshot {}", util::now_rfc3339());
        self.commit_all(&repo, &message)?;
        info!("committed snapshot to {}", self.dir.display());
        Ok(())
    }

    fn commit_all(&self, repo: &Repository, message: &str) -> Result<()> {
        let mut index = repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let signature = Signature::now("recall-worker", "recall@localhost")?;
        let parent = repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        Ok(())
    }

    pub fn push(&self) -> Result<()> {
        let repo = self.ensure_initialized()?;
        let head = repo.head()?;
        let branch = head
            .shorthand()
            .ok_or_else(|| Error::InvalidOperation("detached HEAD in workspace".to_string()))?
            .to_string();

        let mut remote = repo.find_remote(&self.remote_name).map_err(|_| {
            Error::Config(format!(
                "no remote '{}' configured; run git-sync init --remote URL",
                self.remote_name
            ))
        })?;

        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.credentials(|_url, username, _allowed| {
            git2::Cred::ssh_key_from_agent(username.unwrap_or("git"))
                .or_else(|_| git2::Cred::default())
        });
        let mut options = git2::PushOptions::new();
        options.remote_callbacks(callbacks);

        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        remote.push(&[&refspec], Some(&mut options))?;
        info!("pushed {} to {}", branch, self.remote_name);
        Ok(())
    }

    /// Fetch and fast-forward only; the workspace is single-writer so a
    /// divergent history means something else wrote to the remote.
    pub fn pull(&self) -> Result<()> {
        let repo = self.ensure_initialized()?;
        let head = repo.head()?;
        let branch = head
            .shorthand()
            .ok_or_else(|| Error::InvalidOperation("detached HEAD in workspace".to_string()))?
            .to_string();

        let mut remote = repo.find_remote(&self.remote_name)?;
        remote.fetch(&[&branch], None, None)?;

        let fetch_head = repo.find_reference("FETCH_HEAD")?;
        let fetched = repo.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = repo.merge_analysis(&[&fetched])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }
        if !analysis.is_fast_forward() {
            return Err(Error::InvalidOperation(
                "remote history diverged; refusing non-fast-forward pull".to_string(),
            ));
        }

        let refname = format!("refs/heads/{}", branch);
        let mut reference = repo.find_reference(&refname)?;
        reference.set_target(fetched.id(), "git-sync pull: fast-forward")?;
        repo.set_head(&refname)?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
        Ok(())
    }

    pub fn status(&self) -> Result<RepoStatus> {
        if !self.is_initialized() {
            return Ok(RepoStatus {
                initialized: false,
                pending_changes: 0,
                last_commit: None,
                remote: self.remote_url.clone(),
            });
        }

        let repo = Repository::open(&self.dir)?;
        let pending = self.pending_changes(&repo)?;
        let last_commit = repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
            .and_then(|commit| commit.summary().map(str::to_string));
        let remote = repo
            .find_remote(&self.remote_name)
            .ok()
            .and_then(|remote| remote.url().map(str::to_string))
            .or_else(|| self.remote_url.clone());

        Ok(RepoStatus {
            initialized: true,
            pending_changes: pending,
            last_commit,
            remote,
        })
    }

    fn pending_changes(&self, repo: &Repository) -> Result<usize> {
        let mut options = git2::StatusOptions::new();
        options.include_untracked(true);
        let statuses = repo.statuses(Some(&mut options))?;
        Ok(statuses.len())
    }

    /// Auto-push policy: enabled, changes pending, and the worker idle for
    /// at least the configured window.
    pub fn should_auto_push(
        &self,
        settings: &ReplicationSettings,
        last_activity_epoch_ms: i64,
    ) -> bool {
        if !settings.enabled || !settings.auto_push {
            return false;
        }
        let has_pending = match self.status() {
            Ok(status) => status.initialized && status.pending_changes > 0,
            Err(_) => false,
        };
        if !has_pending {
            return false;
        }
        let idle_ms = util::now_epoch_ms().saturating_sub(last_activity_epoch_ms);
        idle_ms >= settings.idle_push_secs as i64 * 1_000
    }
}
