//! Background batch syncer.
//!
//! One long-lived task with a ticker. Each tick drains up to
//! `records_per_run` unsynced records, calls the registry once, marks
//! every `SUCCESS` id synced — always before reporting any fatal
//! failures, so the store stays consistent even if the process is
//! killed right after — and publishes at most one fatal notification per
//! tick to a capacity-1 channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use otpa_proto::common::v1::{RegisterStatus, RegistryRecord};
use registry_client::Registry;

use crate::store::ProxyBufferStore;

#[derive(Debug, Clone)]
pub struct SyncerConfig {
    pub frequency: Duration,
    pub records_per_run: usize,
    /// `None` means retries are unbounded (never fatal), expressed as
    /// an `Option` instead of a sentinel negative number.
    pub max_retries_per_record: Option<u32>,
}

/// Published to the fatal channel when a record exceeds its retry
/// budget. Carries every id that went fatal on that tick.
#[derive(Debug, Clone)]
pub struct FatalSyncError {
    pub device_ids: Vec<String>,
}

impl fmt::Display for FatalSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device registration permanently failed to sync for ids: {}",
            self.device_ids.join(", ")
        )
    }
}

impl std::error::Error for FatalSyncError {}

pub struct Syncer {
    store: Arc<ProxyBufferStore>,
    registry: Arc<dyn Registry>,
    config: SyncerConfig,
    fatal_tx: mpsc::Sender<FatalSyncError>,
    stop: Notify,
    stopped: std::sync::atomic::AtomicBool,
}

impl Syncer {
    /// Returns the syncer plus the receiving half of its capacity-1
    /// fatal channel.
    pub fn new(
        store: Arc<ProxyBufferStore>,
        registry: Arc<dyn Registry>,
        config: SyncerConfig,
    ) -> (Arc<Self>, mpsc::Receiver<FatalSyncError>) {
        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        let syncer = Arc::new(Self {
            store,
            registry,
            config,
            fatal_tx,
            stop: Notify::new(),
            stopped: std::sync::atomic::AtomicBool::new(false),
        });
        (syncer, fatal_rx)
    }

    /// Signal the run loop to stop after its current tick completes.
    pub fn stop(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        self.stop.notify_one();
    }

    /// Drive the periodic sync loop until `stop` is called.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.frequency);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.stopped.load(std::sync::atomic::Ordering::SeqCst) {
                        break;
                    }
                    self.tick().await;
                }
                _ = self.stop.notified() => {
                    break;
                }
            }
        }
        info!("syncer run loop exited");
    }

    /// One iteration of the drain/retry/fatal-notify state machine.
    pub async fn tick(&self) {
        let records = self.store.get_unsynced(self.config.records_per_run);
        if records.is_empty() {
            return;
        }

        let registry_records: Vec<RegistryRecord> = records
            .iter()
            .map(|(device_id, sku, bytes)| {
                RegistryRecord::decode(bytes.as_slice()).unwrap_or_else(|_| RegistryRecord {
                    device_id: device_id.clone(),
                    sku: sku.clone(),
                    ..Default::default()
                })
            })
            .collect();

        let responses = match self.registry.batch_register_device(registry_records).await {
            Ok(responses) => responses,
            Err(err) => {
                warn!(error = %err, "registry batch call failed, retrying next tick");
                return;
            }
        };

        let mut success_ids = Vec::new();
        let mut fatal_ids = Vec::new();
        for response in &responses {
            if response.status == RegisterStatus::Success as i32 {
                success_ids.push(response.device_id.clone());
            } else {
                let count = self.store.bump_retry(&response.device_id).unwrap_or(0);
                if let Some(max) = self.config.max_retries_per_record {
                    if count >= max {
                        fatal_ids.push(response.device_id.clone());
                    }
                }
            }
        }

        if !success_ids.is_empty() {
            if let Err(err) = self.store.mark_as_synced(&success_ids) {
                tracing::error!(error = %err, "mark_as_synced failed after a successful batch");
            }
        }

        if !fatal_ids.is_empty() {
            let error = FatalSyncError { device_ids: fatal_ids };
            if self.fatal_tx.try_send(error).is_err() {
                warn!("fatal channel full, a prior fatal notification is still unread; dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreCapacity;
    use registry_client::fake::FakeRegistry;

    fn encode(device_id: &str) -> Vec<u8> {
        RegistryRecord {
            device_id: device_id.to_string(),
            sku: "sival".to_string(),
            version: 1,
            data: vec![1],
            auth_pubkey: vec![],
            auth_signature: vec![],
        }
        .encode_to_vec()
    }

    #[tokio::test]
    async fn retry_bound_reaches_fatal_after_two_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ProxyBufferStore::open(dir.path().join("buffer.json"), StoreCapacity(None)).unwrap(),
        );
        for i in 1..=5 {
            store
                .insert(&i.to_string(), "sival", encode(&i.to_string()))
                .unwrap();
        }

        let registry = Arc::new(FakeRegistry::rejecting(["4".to_string(), "5".to_string()]));
        let (syncer, mut fatal_rx) = Syncer::new(
            store.clone(),
            registry,
            SyncerConfig {
                frequency: Duration::from_secs(3600),
                records_per_run: 10,
                max_retries_per_record: Some(2),
            },
        );

        syncer.tick().await;
        assert!(fatal_rx.try_recv().is_err());
        syncer.tick().await;

        let fatal = fatal_rx.try_recv().expect("expected a fatal notification");
        let mut ids = fatal.device_ids.clone();
        ids.sort();
        assert_eq!(ids, vec!["4".to_string(), "5".to_string()]);

        let unsynced: Vec<String> = store
            .get_unsynced(10)
            .into_iter()
            .map(|(id, ..)| id)
            .collect();
        let mut unsynced_sorted = unsynced.clone();
        unsynced_sorted.sort();
        assert_eq!(unsynced_sorted, vec!["4".to_string(), "5".to_string()]);
    }

    #[tokio::test]
    async fn synced_record_is_never_redelivered() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ProxyBufferStore::open(dir.path().join("buffer.json"), StoreCapacity(None)).unwrap(),
        );
        store.insert("1", "sival", encode("1")).unwrap();

        let registry = Arc::new(FakeRegistry::new());
        let (syncer, _fatal_rx) = Syncer::new(
            store.clone(),
            registry,
            SyncerConfig {
                frequency: Duration::from_secs(3600),
                records_per_run: 10,
                max_retries_per_record: Some(2),
            },
        );

        syncer.tick().await;
        assert!(store.get_unsynced(10).is_empty());
        syncer.tick().await;
        assert!(store.get_unsynced(10).is_empty());
    }
}
