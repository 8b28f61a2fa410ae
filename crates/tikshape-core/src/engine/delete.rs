// Client teardown

use tracing::{info, instrument};

use super::{CleanupReport, Reconciler};
use crate::error::{CoreError, StepExt, SyncStep};
use crate::model::{ClientLookup, Direction};
use crate::net::Cidr;
use crate::store::BillingStore;

impl<S: BillingStore> Reconciler<S> {
    /// Remove everything a sync created for a client: the address
    /// binding, both marking rules (peer-keyed), both child queues
    /// (name-keyed), and any queue still carrying the peer's marks.
    /// Absent resources are skipped.
    #[instrument(skip(self))]
    pub async fn delete_client_binding(
        &self,
        client_name: &str,
        ip_cidr: &str,
    ) -> Result<CleanupReport, CoreError> {
        let client = client_name.trim();
        if client.is_empty() {
            return Err(CoreError::Validation {
                message: "client name must not be empty".into(),
            });
        }
        let cidr = ip_cidr.parse::<Cidr>().at(SyncStep::ResolvePeer)?;
        let peer = cidr.peer();

        let address_removed = self
            .router
            .remove_address(&cidr.to_string())
            .await
            .at(SyncStep::RemoveAddress)?;
        let mangle_rules_removed = self
            .router
            .remove_mangle_rules(
                &peer,
                &Direction::Download.qualify(&peer),
                &Direction::Upload.qualify(&peer),
            )
            .await
            .at(SyncStep::Classify)?;
        let mut queues_removed = self
            .router
            .delete_queues_matching(client)
            .await
            .at(SyncStep::CleanupByName)?;
        queues_removed += self
            .remove_queues_marked_for(&peer)
            .await
            .at(SyncStep::CleanupByMark)?;

        info!(
            %peer,
            address_removed,
            mangle_rules_removed,
            queues_removed,
            "client binding removed"
        );
        Ok(CleanupReport {
            client_name: client.to_owned(),
            ip_cidr: cidr.to_string(),
            peer,
            address_removed,
            mangle_rules_removed,
            queues_removed,
        })
    }

    /// Look a binding up in the billing store and tear it down.
    pub async fn delete_client(&self, lookup: &ClientLookup) -> Result<CleanupReport, CoreError> {
        let binding = self.load_client(lookup).await?;
        self.delete_client_binding(&binding.client_name, &binding.ip_cidr.to_string())
            .await
    }
}
