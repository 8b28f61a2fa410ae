// Client sync
//
// Cleanup-then-create reconciliation of one client binding. Steps run
// strictly in order; the first failure aborts the rest and is returned
// tagged with the step it happened in.

use std::sync::Arc;

use tikshape_api::{AddressSpec, AddressUpdate, QueueTreeSpec};
use tracing::{debug, info, instrument, warn};

use super::{
    AddressAction, ChildQueue, Reconciler, SyncAllReport, SyncFailure, SyncOptions, SyncReport,
    SyncRequest,
};
use crate::error::{CoreError, StepExt, SyncStep};
use crate::model::{BandwidthPackage, ClientBinding, ClientLookup, Direction, PackageId};
use crate::net::Cidr;
use crate::store::BillingStore;

impl<S: BillingStore> Reconciler<S> {
    pub(crate) async fn load_package(
        &self,
        package_id: PackageId,
    ) -> Result<Arc<BandwidthPackage>, CoreError> {
        self.store
            .package_by_id(package_id)
            .await?
            .ok_or_else(|| CoreError::PackageNotFound {
                identifier: package_id.to_string(),
            })
    }

    /// Bring the router in line with one client binding.
    ///
    /// Parents are ensured, every queue named after the client (or its
    /// previous name) and every queue marked for its peer is removed, the
    /// address binding and marking rules are replaced, and both child
    /// queues are created fresh. Failing to create a child leaves the
    /// router half-built and yields [`CoreError::PartialReconciliation`].
    #[instrument(skip_all, fields(client = %request.client_name, package = request.package_id))]
    pub async fn sync_client_binding(&self, request: &SyncRequest) -> Result<SyncReport, CoreError> {
        let client = request.client_name.trim();
        if client.is_empty() {
            return Err(CoreError::Validation {
                message: "client name must not be empty".into(),
            })
            .at(SyncStep::LoadPackage);
        }
        let options = &request.options;
        // Validated before anything reaches the router.
        let cidr = request.ip_cidr.parse::<Cidr>().at(SyncStep::ResolvePeer)?;
        let previous_cidr = options
            .previous_ip_cidr
            .as_deref()
            .map(str::parse::<Cidr>)
            .transpose()
            .at(SyncStep::ResolvePeer)?;

        // 1. Package
        let package = self
            .load_package(request.package_id)
            .await
            .at(SyncStep::LoadPackage)?;

        // 2. Parents
        let parents = self
            .ensure_package_parents(&package, None)
            .await
            .at(SyncStep::EnsureParents)?;

        // 3. Cleanup by name
        let mut queues_removed = self
            .router
            .delete_queues_matching(client)
            .await
            .at(SyncStep::CleanupByName)?;
        let previous_name = options
            .previous_client_name
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != client);
        if let Some(previous) = previous_name {
            queues_removed += self
                .router
                .delete_queues_matching(previous)
                .await
                .at(SyncStep::CleanupByName)?;
        }

        // 4. Peer
        let peer = cidr.peer();
        debug!(%cidr, %peer, "resolved point-to-point peer");

        // 5. Cleanup by mark
        queues_removed += self
            .remove_queues_marked_for(&peer)
            .await
            .at(SyncStep::CleanupByMark)?;

        // 6. Address binding
        if let Some(previous) = previous_cidr.filter(|p| *p != cidr) {
            self.retire_address(&previous)
                .await
                .at(SyncStep::BindAddress)?;
        }
        let address = self
            .bind_address(client, &cidr, options)
            .await
            .at(SyncStep::BindAddress)?;

        // 7. Classification
        let download_mark = Direction::Download.qualify(&peer);
        let upload_mark = Direction::Upload.qualify(&peer);
        let mangle_rules_replaced = self
            .router
            .add_mangle_rules(&peer, &download_mark, &upload_mark, &format!("{client} ({peer})"))
            .await
            .at(SyncStep::Classify)?;

        // 8. Limits
        let mut warnings = Vec::new();
        let active = self
            .store
            .active_client_count(package.id)
            .await
            .at(SyncStep::ComputeLimits)?;
        if active > usize::try_from(package.max_clients).unwrap_or(usize::MAX) {
            warn!(
                package = %package.name,
                active,
                max_clients = package.max_clients,
                "package is over-subscribed"
            );
            warnings.push(format!(
                "package {} has {active} active clients for {} slots",
                package.name, package.max_clients
            ));
        }

        // 9. Children
        let download = self
            .create_child(client, &peer, &package, Direction::Download, options)
            .await
            .partial(SyncStep::CreateDownloadQueue)?;
        let upload = self
            .create_child(client, &peer, &package, Direction::Upload, options)
            .await
            .partial(SyncStep::CreateUploadQueue)?;

        info!(
            %peer,
            download = %download.max_limit,
            upload = %upload.max_limit,
            queues_removed,
            "client synced"
        );

        // 10. Done
        Ok(SyncReport {
            client_name: client.to_owned(),
            package: package.name.clone(),
            ip_cidr: cidr.to_string(),
            peer,
            parents,
            address,
            queues_removed,
            mangle_rules_replaced,
            download,
            upload,
            warnings,
        })
    }

    /// Look a binding up in the billing store and sync it.
    pub async fn sync_client(&self, lookup: &ClientLookup) -> Result<SyncReport, CoreError> {
        self.sync_client_with(lookup, SyncOptions::default()).await
    }

    /// Like [`sync_client`](Self::sync_client), with operator overrides.
    /// An interface given in `options` wins over the binding's own.
    pub async fn sync_client_with(
        &self,
        lookup: &ClientLookup,
        options: SyncOptions,
    ) -> Result<SyncReport, CoreError> {
        let binding = self.load_client(lookup).await.at(SyncStep::LoadPackage)?;
        if !binding.active {
            return Err(CoreError::Validation {
                message: format!("client '{}' is not active", binding.client_name),
            })
            .at(SyncStep::LoadPackage);
        }
        let mut request = SyncRequest::for_binding(&binding);
        request.options = SyncOptions {
            interface: options.interface.or(request.options.interface),
            ..options
        };
        self.sync_client_binding(&request).await
    }

    /// Sync every active binding, continuing past failures.
    #[instrument(skip_all)]
    pub async fn sync_all(&self) -> Result<SyncAllReport, CoreError> {
        let bindings = self.store.active_clients().await?;
        info!(clients = bindings.len(), "syncing all active clients");
        let mut report = SyncAllReport::default();
        for binding in bindings {
            match self.sync_client_binding(&SyncRequest::for_binding(&binding)).await {
                Ok(synced) => report.synced.push(synced),
                Err(err) => {
                    warn!(client = %binding.client_name, error = %err, "sync failed");
                    report.failed.push(SyncFailure {
                        client_name: binding.client_name.clone(),
                        step: err.step(),
                        retryable: err.is_retryable(),
                        error: err.root().to_string(),
                    });
                }
            }
        }
        info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            "bulk sync finished"
        );
        Ok(report)
    }

    pub(crate) async fn load_client(
        &self,
        lookup: &ClientLookup,
    ) -> Result<Arc<ClientBinding>, CoreError> {
        self.store
            .client(lookup)
            .await?
            .ok_or_else(|| CoreError::ClientNotFound {
                identifier: lookup.to_string(),
            })
    }

    /// Remove queues carrying the download or upload mark of `peer`.
    pub(crate) async fn remove_queues_marked_for(&self, peer: &str) -> Result<usize, CoreError> {
        let mut removed = 0;
        for direction in Direction::ALL {
            let mark = direction.qualify(peer);
            for queue in self.router.queues_by_packet_mark(&mark).await? {
                debug!(name = %queue.name, %mark, "removing queue by packet mark");
                self.router.remove_queue(&queue.id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Drop the binding and marking rules of an address the client no
    /// longer uses.
    async fn retire_address(&self, previous: &Cidr) -> Result<(), CoreError> {
        let old_peer = previous.peer();
        info!(previous = %previous, "retiring previous address");
        self.router.remove_address(&previous.address()).await?;
        self.router
            .remove_mangle_rules(
                &old_peer,
                &Direction::Download.qualify(&old_peer),
                &Direction::Upload.qualify(&old_peer),
            )
            .await?;
        Ok(())
    }

    async fn bind_address(
        &self,
        client: &str,
        cidr: &Cidr,
        options: &SyncOptions,
    ) -> Result<AddressAction, CoreError> {
        let interface = match &options.interface {
            Some(interface) => Some(interface.clone()),
            None => self
                .store
                .client(&ClientLookup::Name(client.to_owned()))
                .await?
                .and_then(|b| b.interface.clone()),
        };
        let address = cidr.to_string();
        let existing = self.router.find_address(&address).await?;
        let Some(interface) = interface.filter(|i| !i.trim().is_empty()) else {
            if existing.is_some() {
                return Ok(AddressAction::Unchanged);
            }
            debug!(%address, "no interface known, leaving address binding alone");
            return Ok(AddressAction::Skipped);
        };

        match existing {
            Some(entry) => {
                let update = AddressUpdate {
                    interface: (entry.interface.as_deref() != Some(interface.as_str()))
                        .then(|| interface.clone()),
                    comment: (entry.comment.as_deref() != Some(client)).then(|| client.to_owned()),
                    ..AddressUpdate::default()
                };
                if update == AddressUpdate::default() {
                    return Ok(AddressAction::Unchanged);
                }
                debug!(%address, %interface, "updating address binding");
                self.router.update_address(&entry.id, &update).await?;
                Ok(AddressAction::Updated)
            }
            None => {
                let spec = AddressSpec {
                    address,
                    interface,
                    comment: Some(client.to_owned()),
                };
                self.router.add_address(&spec).await?;
                Ok(AddressAction::Added)
            }
        }
    }

    async fn create_child(
        &self,
        client: &str,
        peer: &str,
        package: &BandwidthPackage,
        direction: Direction,
        options: &SyncOptions,
    ) -> Result<ChildQueue, CoreError> {
        let limits = package.child_limits(
            direction,
            options.limit_override(direction),
            options.limit_at_override(direction),
        );
        let template = package.child(direction);
        let spec = QueueTreeSpec {
            packet_mark: Some(direction.qualify(peer)),
            max_limit: Some(limits.max_limit),
            limit_at: limits.limit_at,
            queue_type: template
                .queue_type
                .clone()
                .or_else(|| self.config.default_queue_type.clone()),
            priority: template.priority.or(self.config.default_priority),
            burst: package.burst(direction),
            comment: Some(format!("{client} {direction}")),
            ..QueueTreeSpec::new(direction.qualify(client), package.queue_name(direction))
        };
        let id = self.router.create_queue(&spec).await?;
        debug!(name = %spec.name, %id, "child queue created");
        Ok(ChildQueue {
            direction,
            id,
            name: spec.name,
            parent: spec.parent,
            packet_mark: direction.qualify(peer),
            max_limit: limits.max_limit,
            limit_at: limits.limit_at,
        })
    }
}
