//! In-memory registry fake for the syncer's and PA's test suites, and
//! for exercising a bounded-retry scenario against a configurable set of
//! rejected ids.

use parking_lot::Mutex;
use std::collections::HashSet;

use async_trait::async_trait;
use otpa_proto::common::v1::{RegisterDeviceResponse, RegisterStatus, RegistryRecord};

use crate::error::RegistryResult;
use crate::Registry;

/// Accepts every record unless its `device_id` is in `reject_ids`, in
/// which case it reports `BAD_REQUEST`. Records the full history of
/// requests it has seen so tests can assert on what the syncer sent.
pub struct FakeRegistry {
    reject_ids: Mutex<HashSet<String>>,
    received: Mutex<Vec<RegistryRecord>>,
}

impl Default for FakeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self {
            reject_ids: Mutex::new(HashSet::new()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            reject_ids: Mutex::new(ids.into_iter().collect()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn set_rejected(&self, ids: impl IntoIterator<Item = String>) {
        *self.reject_ids.lock() = ids.into_iter().collect();
    }

    pub fn received(&self) -> Vec<RegistryRecord> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn batch_register_device(
        &self,
        records: Vec<RegistryRecord>,
    ) -> RegistryResult<Vec<RegisterDeviceResponse>> {
        let reject_ids = self.reject_ids.lock();
        let responses = records
            .iter()
            .map(|record| {
                if reject_ids.contains(&record.device_id) {
                    RegisterDeviceResponse {
                        status: RegisterStatus::BadRequest as i32,
                        device_id: record.device_id.clone(),
                        rpc_status_code: tonic::Code::InvalidArgument as u32,
                        rpc_status_message: "rejected by fake registry".to_string(),
                    }
                } else {
                    RegisterDeviceResponse {
                        status: RegisterStatus::Success as i32,
                        device_id: record.device_id.clone(),
                        rpc_status_code: tonic::Code::Ok as u32,
                        rpc_status_message: String::new(),
                    }
                }
            })
            .collect();
        self.received.lock().extend(records);
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> RegistryRecord {
        RegistryRecord {
            device_id: id.to_string(),
            sku: "sival".to_string(),
            version: 1,
            data: vec![1, 2, 3],
            auth_pubkey: vec![],
            auth_signature: vec![],
        }
    }

    #[tokio::test]
    async fn rejects_only_configured_ids() {
        let registry = FakeRegistry::rejecting(["4".to_string(), "5".to_string()]);
        let records = vec![record("1"), record("2"), record("3"), record("4"), record("5")];
        let responses = registry.batch_register_device(records).await.unwrap();
        let statuses: Vec<i32> = responses.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                RegisterStatus::Success as i32,
                RegisterStatus::Success as i32,
                RegisterStatus::Success as i32,
                RegisterStatus::BadRequest as i32,
                RegisterStatus::BadRequest as i32,
            ]
        );
    }
}
