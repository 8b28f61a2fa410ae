// Package parent queues
//
// Each package owns two parent nodes, `<name>` and `UP-<name>`, which
// every client child hangs off. They are updated in place so children
// keep their parent across limit changes and renames.

use tikshape_api::{QueueEntry, QueueTreeSpec, QueueTreeUpdate};
use tracing::{debug, info, instrument, warn};

use super::{ParentAction, ParentReport, Reconciler};
use crate::error::{CoreError, StepExt, SyncStep};
use crate::model::{BandwidthPackage, Direction, PackageId};
use crate::store::BillingStore;

impl<S: BillingStore> Reconciler<S> {
    /// Make sure both parent nodes of `package` exist with its current
    /// limits. With `previous_name`, the nodes under the old name are
    /// renamed in place.
    #[instrument(skip_all, fields(package = %package.name))]
    pub async fn ensure_package_parents(
        &self,
        package: &BandwidthPackage,
        previous_name: Option<&str>,
    ) -> Result<ParentReport, CoreError> {
        let previous_name = previous_name
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != package.name);
        let download = self
            .ensure_parent(package, Direction::Download, previous_name)
            .await?;
        let upload = self
            .ensure_parent(package, Direction::Upload, previous_name)
            .await?;
        info!(download = download.id(), upload = upload.id(), "package parents in place");
        Ok(ParentReport {
            package: package.name.clone(),
            download,
            upload,
        })
    }

    async fn ensure_parent(
        &self,
        package: &BandwidthPackage,
        direction: Direction,
        previous_name: Option<&str>,
    ) -> Result<ParentAction, CoreError> {
        let name = package.queue_name(direction);
        let parent = package
            .upstream_parent(direction)
            .unwrap_or(self.config.root_parent.as_str())
            .to_owned();
        let comment = format!("{} {direction}", package.name);
        let current = self.router.find_queue_by_name(&name).await?;

        if let Some(old_name) = previous_name.map(|p| direction.qualify(p)) {
            if let Some(old) = self.router.find_queue_by_name(&old_name).await? {
                if current.is_none() {
                    let update = QueueTreeUpdate {
                        name: Some(name.clone()),
                        parent: (old.parent != parent).then(|| parent.clone()),
                        max_limit: Some(package.max_limit(direction)),
                        limit_at: package.limit_at(direction),
                        comment: Some(comment),
                        ..QueueTreeUpdate::default()
                    };
                    info!(from = %old_name, to = %name, "renaming package parent");
                    self.router.update_queue(&old.id, &update).await?;
                    return Ok(ParentAction::Renamed {
                        id: old.id,
                        from: old_name,
                    });
                }
                warn!(
                    old = %old_name,
                    new = %name,
                    "both old and new parent exist, keeping the new one"
                );
            }
        }

        match current {
            Some(existing) => {
                let update = parent_update(&existing, package, direction, &parent, comment);
                if !update.is_empty() {
                    debug!(%name, "updating package parent");
                    self.router.update_queue(&existing.id, &update).await?;
                }
                Ok(ParentAction::Updated { id: existing.id })
            }
            None => {
                let spec = QueueTreeSpec {
                    max_limit: Some(package.max_limit(direction)),
                    limit_at: package.limit_at(direction),
                    comment: Some(comment),
                    ..QueueTreeSpec::new(&name, &parent)
                };
                info!(%name, %parent, "creating package parent");
                let id = self.router.create_queue(&spec).await?;
                Ok(ParentAction::Created { id })
            }
        }
    }

    /// Reload a package from the billing store and bring its parents in
    /// line. Run after a package edit, passing the old name on a rename.
    pub async fn sync_package(
        &self,
        package_id: PackageId,
        previous_name: Option<&str>,
    ) -> Result<ParentReport, CoreError> {
        let package = self.load_package(package_id).await.at(SyncStep::LoadPackage)?;
        self.ensure_package_parents(&package, previous_name)
            .await
            .at(SyncStep::EnsureParents)
    }

    /// Remove both parent nodes of a package. Absent nodes are skipped;
    /// returns how many were removed.
    #[instrument(skip(self))]
    pub async fn delete_package_parents(&self, package_name: &str) -> Result<usize, CoreError> {
        let package_name = package_name.trim();
        if package_name.is_empty() {
            return Err(CoreError::Validation {
                message: "package name must not be empty".into(),
            });
        }
        let mut removed = 0;
        for direction in Direction::ALL {
            let name = direction.qualify(package_name);
            match self
                .router
                .find_queue_by_name(&name)
                .await
                .at(SyncStep::RemoveParents)?
            {
                Some(queue) => {
                    self.router
                        .remove_queue(&queue.id)
                        .await
                        .at(SyncStep::RemoveParents)?;
                    removed += 1;
                }
                None => debug!(%name, "package parent already absent"),
            }
        }
        info!(removed, "package parents removed");
        Ok(removed)
    }
}

/// Only fields that differ from what the router already has.
fn parent_update(
    existing: &QueueEntry,
    package: &BandwidthPackage,
    direction: Direction,
    parent: &str,
    comment: String,
) -> QueueTreeUpdate {
    let differs = |current: Option<&String>, wanted: &str| current.is_none_or(|c| c != wanted);
    let max_limit = package.max_limit(direction);
    let limit_at = package.limit_at(direction);
    QueueTreeUpdate {
        parent: (existing.parent != parent).then(|| parent.to_owned()),
        max_limit: differs(existing.max_limit.as_ref(), &max_limit.to_string()).then_some(max_limit),
        limit_at: limit_at.filter(|l| differs(existing.limit_at.as_ref(), &l.to_string())),
        comment: differs(existing.comment.as_ref(), &comment).then_some(comment),
        ..QueueTreeUpdate::default()
    }
}
