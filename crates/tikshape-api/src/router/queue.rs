// Queue tree endpoints
//
// `/queue/tree` lookups by name and packet mark, create/update/remove by id,
// and name-based bulk cleanup for client queues.

use tracing::debug;

use crate::command::Command;
use crate::error::Error;
use crate::request::{QUEUE_TREE, QueueTreeSpec, QueueTreeUpdate};
use crate::router::RouterClient;
use crate::router::models::QueueEntry;

/// Whether `queue_name` refers to `client_name`: the client name appears
/// delimited by the string edges or by `-`/`_`. Matches `Budi`, `UP-Budi`
/// and `Budi_DOWNLOAD`, but not `Budiman`.
pub fn name_references(queue_name: &str, client_name: &str) -> bool {
    if client_name.is_empty() {
        return false;
    }
    let is_delimiter = |c: char| matches!(c, '-' | '_');
    queue_name.match_indices(client_name).any(|(start, matched)| {
        let before = queue_name[..start].chars().next_back();
        let after = queue_name[start + matched.len()..].chars().next();
        before.is_none_or(is_delimiter) && after.is_none_or(is_delimiter)
    })
}

impl RouterClient {
    /// Every queue tree node.
    pub async fn list_queues(&self) -> Result<Vec<QueueEntry>, Error> {
        let reply = self.lookup(&Command::print(QUEUE_TREE)).await?;
        Ok(reply.records().iter().filter_map(QueueEntry::from_record).collect())
    }

    /// `/queue/tree/print ?name=<name>`
    pub async fn find_queue_by_name(&self, name: &str) -> Result<Option<QueueEntry>, Error> {
        let reply = self
            .lookup(&Command::print(QUEUE_TREE).query("name", name))
            .await?;
        Ok(reply.records().iter().find_map(QueueEntry::from_record))
    }

    /// First node classifying on `mark`.
    pub async fn find_queue_by_packet_mark(&self, mark: &str) -> Result<Option<QueueEntry>, Error> {
        Ok(self.queues_by_packet_mark(mark).await?.into_iter().next())
    }

    /// `/queue/tree/print ?packet-mark=<mark>`
    pub async fn queues_by_packet_mark(&self, mark: &str) -> Result<Vec<QueueEntry>, Error> {
        let reply = self
            .lookup(&Command::print(QUEUE_TREE).query("packet-mark", mark))
            .await?;
        Ok(reply.records().iter().filter_map(QueueEntry::from_record).collect())
    }

    /// Create a node; returns the id the router assigned.
    pub async fn create_queue(&self, spec: &QueueTreeSpec) -> Result<String, Error> {
        let command = spec.to_command()?;
        debug!(name = %spec.name, parent = %spec.parent, "creating queue");
        let reply = self.mutate(&command).await?;
        Ok(reply.ret().unwrap_or_default().to_owned())
    }

    pub async fn update_queue(&self, id: &str, update: &QueueTreeUpdate) -> Result<(), Error> {
        let command = update.to_command(id)?;
        debug!(id, "updating queue");
        self.mutate(&command).await?;
        Ok(())
    }

    pub async fn remove_queue(&self, id: &str) -> Result<(), Error> {
        debug!(id, "removing queue");
        self.mutate(&Command::remove(QUEUE_TREE, id)).await?;
        Ok(())
    }

    /// Remove every node whose name references `client_name` (see
    /// [`name_references`]). Returns how many were removed.
    pub async fn delete_queues_matching(&self, client_name: &str) -> Result<usize, Error> {
        if client_name.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "refusing to match queues against an empty name".into(),
            ));
        }
        let doomed: Vec<QueueEntry> = self
            .list_queues()
            .await?
            .into_iter()
            .filter(|q| name_references(&q.name, client_name))
            .collect();
        for queue in &doomed {
            debug!(name = %queue.name, "removing queue for {client_name}");
            self.mutate(&Command::remove(QUEUE_TREE, &queue.id)).await?;
        }
        Ok(doomed.len())
    }
}
