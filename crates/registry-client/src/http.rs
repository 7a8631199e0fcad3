//! HTTP+JSON registry transport — one of the pluggable implementations
//! of the upstream registry interface. A build-time vendor shim can
//! implement the same [`Registry`] trait; this one is the default
//! non-gRPC binding.

use async_trait::async_trait;
use otpa_proto::common::v1::{RegisterDeviceResponse, RegisterStatus, RegistryRecord};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};
use crate::Registry;

#[derive(Serialize)]
struct RecordDto {
    device_id: String,
    sku: String,
    version: u32,
    data_hex: String,
    auth_pubkey_hex: String,
    auth_signature_hex: String,
}

impl From<&RegistryRecord> for RecordDto {
    fn from(record: &RegistryRecord) -> Self {
        Self {
            device_id: record.device_id.clone(),
            sku: record.sku.clone(),
            version: record.version,
            data_hex: hex::encode(&record.data),
            auth_pubkey_hex: hex::encode(&record.auth_pubkey),
            auth_signature_hex: hex::encode(&record.auth_signature),
        }
    }
}

#[derive(Serialize)]
struct BatchRequestDto {
    records: Vec<RecordDto>,
}

#[derive(Deserialize)]
struct ResponseDto {
    device_id: String,
    status: String,
    rpc_status_code: u32,
    #[serde(default)]
    rpc_status_message: String,
}

#[derive(Deserialize)]
struct BatchResponseDto {
    responses: Vec<ResponseDto>,
}

fn parse_status(raw: &str) -> RegisterStatus {
    match raw {
        "SUCCESS" => RegisterStatus::Success,
        "BAD_REQUEST" => RegisterStatus::BadRequest,
        "BUFFER_FULL" => RegisterStatus::BufferFull,
        _ => RegisterStatus::Unspecified,
    }
}

/// Posts batches to `{endpoint}/v1/devices:batchRegister` as JSON.
pub struct HttpRegistry {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRegistry {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn batch_register_device(
        &self,
        records: Vec<RegistryRecord>,
    ) -> RegistryResult<Vec<RegisterDeviceResponse>> {
        let body = BatchRequestDto {
            records: records.iter().map(RecordDto::from).collect(),
        };
        let url = format!("{}/v1/devices:batchRegister", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RegistryError::Unavailable(format!(
                "registry returned HTTP {}",
                response.status()
            )));
        }

        let parsed: BatchResponseDto = response
            .json()
            .await
            .map_err(|e| RegistryError::Internal(e.to_string()))?;

        if parsed.responses.len() != records.len() {
            return Err(RegistryError::Internal(format!(
                "expected {} responses, got {}",
                records.len(),
                parsed.responses.len()
            )));
        }

        Ok(parsed
            .responses
            .into_iter()
            .map(|r| RegisterDeviceResponse {
                status: parse_status(&r.status) as i32,
                device_id: r.device_id,
                rpc_status_code: r.rpc_status_code,
                rpc_status_message: r.rpc_status_message,
            })
            .collect())
    }
}
