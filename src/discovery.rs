use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Config, DiscoveryConfig};
use crate::file_sd;
use crate::metrics::Metrics;
use crate::query::{Client, Sample};
use crate::target::{RefreshBatch, TargetGroup, build_group};

/// How many refresh batches may queue before the producer blocks on its
/// consumer.
const BATCH_CAPACITY: usize = 8;

/// Create one independent discovery instance per (host, role) pair. Each
/// instance gets a private channel and file writer; instances share only
/// the cancellation token and the metrics registry.
pub fn spawn(
    config: &Config,
    metrics: &Metrics,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::with_capacity(config.discoveries.len() * 2);

    for dc in &config.discoveries {
        let (tx, rx) = mpsc::channel(BATCH_CAPACITY);

        let discovery = Discovery::new(dc, metrics.clone());
        let path = config.output_path.join(format!("{}.metrics.json", dc.role));
        let writer = file_sd::Writer::new(path);

        tasks.push(tokio::spawn(discovery.run(tx, shutdown.clone())));
        tasks.push(tokio::spawn(writer.run(rx)));
    }

    tasks
}

/// Retrieves targets for one (host, role) pair by polling the backend and
/// diffing each cycle's identities against the previous one.
pub struct Discovery {
    client: Client,
    address: String,
    role: String,
    interval: Duration,

    /// Identities emitted as alive in the previous cycle.
    old_source_list: BTreeSet<String>,

    metrics: Metrics,
}

impl Discovery {
    pub fn new(config: &DiscoveryConfig, metrics: Metrics) -> Discovery {
        Discovery {
            client: Client::new(&config.address),
            address: config.address.clone(),
            role: config.role.clone(),
            interval: config.refresh_interval,
            old_source_list: BTreeSet::new(),
            metrics,
        }
    }

    /// Run refresh cycles until `shutdown` trips.
    ///
    /// The sender is dropped on return, which closes the channel and lets
    /// the consumer drain and exit on its own.
    pub async fn run(mut self, output: mpsc::Sender<RefreshBatch>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let resp = match self.client.query(&self.role).await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(
                        message = "refresh query failed",
                        address = %self.address,
                        role = %self.role,
                        ?err
                    );
                    self.metrics
                        .refresh_errors
                        .with_label_values(&[self.address.as_str(), self.role.as_str()])
                        .inc();

                    // no batch for this cycle; the next attempt happens one
                    // refresh interval from now, and cancellation is still
                    // observed while waiting
                    continue;
                }
            };

            let (batch, new_source_list) =
                refresh_batch(&resp.data.result, &self.old_source_list, &self.role);

            if output.send(batch).await.is_err() {
                warn!(
                    message = "refresh batch receiver is gone, stopping",
                    address = %self.address,
                    role = %self.role
                );
                break;
            }

            self.old_source_list = new_source_list;
            self.metrics
                .refresh_cycles
                .with_label_values(&[self.address.as_str(), self.role.as_str()])
                .inc();
        }

        debug!(
            message = "discovery loop finished",
            address = %self.address,
            role = %self.role
        );
    }
}

/// Build one cycle's batch: alive groups for every convertible record, then
/// one tombstone per identity that was alive last cycle and is gone now.
///
/// Records that cannot be converted are logged and skipped; the remaining
/// records still form the batch.
fn refresh_batch(
    samples: &[Sample],
    old_source_list: &BTreeSet<String>,
    role: &str,
) -> (RefreshBatch, BTreeSet<String>) {
    let mut batch = Vec::with_capacity(samples.len());
    let mut new_source_list = BTreeSet::new();

    for sample in samples {
        match build_group(&sample.metric) {
            Ok(group) => {
                new_source_list.insert(group.source.clone());
                batch.push(group);
            }
            Err(err) => {
                warn!(
                    message = "skipping unconvertible record",
                    role,
                    ?err,
                    metric = ?sample.metric
                );
            }
        }
    }

    for source in old_source_list.difference(&new_source_list) {
        batch.push(TargetGroup::tombstone(source.clone()));
    }

    (batch, new_source_list)
}
