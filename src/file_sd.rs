use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::target::{RefreshBatch, TargetGroup};

/// One entry of a file_sd discovery file, the shape a file-based service
/// discovery watcher consumes.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct Entry {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Folds refresh batches into a per-source group map and mirrors it into
/// one file_sd file.
pub struct Writer {
    path: PathBuf,
    groups: BTreeMap<String, TargetGroup>,
}

impl Writer {
    pub fn new(path: PathBuf) -> Writer {
        Writer {
            path,
            groups: BTreeMap::new(),
        }
    }

    /// Consume batches until the producer closes the channel.
    ///
    /// A failed write leaves the file at its previous content; the state
    /// map is already updated, so the next batch repairs the file.
    pub async fn run(mut self, mut batches: mpsc::Receiver<RefreshBatch>) {
        while let Some(batch) = batches.recv().await {
            self.apply(batch);

            if let Err(err) = self.write().await {
                error!(message = "write discovery file failed", path = ?self.path, ?err);
            }
        }

        debug!(message = "discovery file writer finished", path = ?self.path);
    }

    /// Alive groups upsert their entry, tombstones remove theirs.
    fn apply(&mut self, batch: RefreshBatch) {
        for group in batch {
            if group.is_tombstone() {
                self.groups.remove(&group.source);
            } else {
                self.groups.insert(group.source.clone(), group);
            }
        }
    }

    /// Replace the discovery file atomically, so a watcher never observes
    /// a partially written list.
    async fn write(&self) -> io::Result<()> {
        let entries = self
            .groups
            .values()
            .map(|group| Entry {
                targets: group.targets.clone(),
                labels: group.labels.clone(),
            })
            .collect::<Vec<_>>();

        let data = serde_json::to_vec_pretty(&entries)?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use super::*;

    fn group(address: &str) -> TargetGroup {
        TargetGroup {
            source: address.to_string(),
            labels: BTreeMap::from([("__meta_role".to_string(), "jmx".to_string())]),
            targets: vec![address.to_string()],
        }
    }

    async fn read_entries(path: &Path) -> Vec<Entry> {
        let data = tokio::fs::read(path).await.unwrap();
        serde_json::from_slice(&data).unwrap()
    }

    #[tokio::test]
    async fn apply_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jmx_exporter.metrics.json");
        let mut writer = Writer::new(path.clone());

        writer.apply(vec![group("10.0.0.1:9404"), group("10.0.0.2:9404")]);
        writer.write().await.unwrap();

        let entries = read_entries(&path).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].targets, vec!["10.0.0.1:9404".to_string()]);
        assert_eq!(
            entries[0].labels.get("__meta_role"),
            Some(&"jmx".to_string())
        );

        // a tombstone removes its entry, everything else stays
        writer.apply(vec![TargetGroup::tombstone("10.0.0.1:9404".to_string())]);
        writer.write().await.unwrap();

        let entries = read_entries(&path).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].targets, vec!["10.0.0.2:9404".to_string()]);

        // no temp file is left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn tombstone_for_unknown_source_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jmx_exporter.metrics.json");
        let mut writer = Writer::new(path.clone());

        writer.apply(vec![
            group("10.0.0.1:9404"),
            TargetGroup::tombstone("10.0.0.9:9404".to_string()),
        ]);
        writer.write().await.unwrap();

        let entries = read_entries(&path).await;
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn run_drains_until_channel_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jmx_exporter.metrics.json");

        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(Writer::new(path.clone()).run(rx));

        tx.send(vec![group("10.0.0.1:9404")]).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let entries = read_entries(&path).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].targets, vec!["10.0.0.1:9404".to_string()]);
    }
}
