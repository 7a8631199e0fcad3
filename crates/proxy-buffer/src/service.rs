//! gRPC surface for the Proxy Buffer.

use std::sync::Arc;

use prost::Message;
use tonic::{Request, Response, Status};
use tracing::instrument;

use otpa_proto::common::v1::{RegisterDeviceResponse, RegisterStatus, RegistryRecord};
use otpa_proto::pb::v1::proxy_buffer_server::ProxyBuffer;
use otpa_proto::pb::v1::{
    BatchRegisterDeviceRequest, BatchRegisterDeviceResponse, RegisterDeviceRequest,
};

use crate::error::StoreError;
use crate::store::ProxyBufferStore;

pub struct ProxyBufferService {
    store: Arc<ProxyBufferStore>,
}

impl ProxyBufferService {
    pub fn new(store: Arc<ProxyBufferStore>) -> Self {
        Self { store }
    }

    /// Validate and insert one record, never returning an `Err` — every
    /// outcome (including validation failure) is reported in the
    /// response so a batch's per-record failures never abort the batch
    ///.
    fn register_one(&self, record: Option<RegistryRecord>) -> RegisterDeviceResponse {
        let Some(record) = record else {
            return RegisterDeviceResponse {
                status: RegisterStatus::BadRequest as i32,
                device_id: String::new(),
                rpc_status_code: tonic::Code::InvalidArgument as u32,
                rpc_status_message: "missing record".to_string(),
            };
        };

        if record.device_id.is_empty() || record.sku.is_empty() || record.data.is_empty() {
            return RegisterDeviceResponse {
                status: RegisterStatus::BadRequest as i32,
                device_id: record.device_id,
                rpc_status_code: tonic::Code::InvalidArgument as u32,
                rpc_status_message: "device_id, sku and data must be non-empty".to_string(),
            };
        }

        let device_id = record.device_id.clone();
        let sku = record.sku.clone();
        let bytes = record.encode_to_vec();

        match self.store.insert(&device_id, &sku, bytes) {
            Ok(()) => RegisterDeviceResponse {
                status: RegisterStatus::Success as i32,
                device_id,
                rpc_status_code: tonic::Code::Ok as u32,
                rpc_status_message: String::new(),
            },
            Err(StoreError::AlreadyExists(_)) => RegisterDeviceResponse {
                status: RegisterStatus::BadRequest as i32,
                device_id,
                rpc_status_code: tonic::Code::AlreadyExists as u32,
                rpc_status_message: "device already registered".to_string(),
            },
            Err(StoreError::Full { capacity }) => RegisterDeviceResponse {
                status: RegisterStatus::BufferFull as i32,
                device_id,
                rpc_status_code: tonic::Code::ResourceExhausted as u32,
                rpc_status_message: format!("buffer at capacity {capacity}"),
            },
            Err(other) => RegisterDeviceResponse {
                status: RegisterStatus::BadRequest as i32,
                device_id,
                rpc_status_code: tonic::Code::Internal as u32,
                rpc_status_message: other.to_string(),
            },
        }
    }
}

#[tonic::async_trait]
impl ProxyBuffer for ProxyBufferService {
    #[instrument(skip_all)]
    async fn register_device(
        &self,
        request: Request<RegisterDeviceRequest>,
    ) -> Result<Response<RegisterDeviceResponse>, Status> {
        let record = request.into_inner().record;
        Ok(Response::new(self.register_one(record)))
    }

    #[instrument(skip_all, fields(batch_size))]
    async fn batch_register_device(
        &self,
        request: Request<BatchRegisterDeviceRequest>,
    ) -> Result<Response<BatchRegisterDeviceResponse>, Status> {
        let records = request.into_inner().records;
        tracing::Span::current().record("batch_size", records.len());
        let responses = records
            .into_iter()
            .map(|record| self.register_one(Some(record)))
            .collect();
        Ok(Response::new(BatchRegisterDeviceResponse { responses }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreCapacity;

    fn record(id: &str) -> RegistryRecord {
        RegistryRecord {
            device_id: id.to_string(),
            sku: "sival".to_string(),
            version: 1,
            data: vec![0xAB],
            auth_pubkey: vec![],
            auth_signature: vec![],
        }
    }

    #[tokio::test]
    async fn register_device_rejects_empty_device_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ProxyBufferStore::open(dir.path().join("buffer.json"), StoreCapacity(None)).unwrap(),
        );
        let service = ProxyBufferService::new(store);
        let mut bad = record("");
        bad.device_id = String::new();
        let response = service
            .register_device(Request::new(RegisterDeviceRequest { record: Some(bad) }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.status, RegisterStatus::BadRequest as i32);
    }

    #[tokio::test]
    async fn batch_register_device_reports_positional_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ProxyBufferStore::open(dir.path().join("buffer.json"), StoreCapacity(None)).unwrap(),
        );
        let service = ProxyBufferService::new(store);
        let mut bad = record("r2");
        bad.data = vec![];

        let response = service
            .batch_register_device(Request::new(BatchRegisterDeviceRequest {
                records: vec![record("r1"), bad, record("r3")],
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.responses.len(), 3);
        assert_eq!(response.responses[0].status, RegisterStatus::Success as i32);
        assert_eq!(response.responses[1].status, RegisterStatus::BadRequest as i32);
        assert_eq!(response.responses[1].device_id, "r2");
        assert_eq!(response.responses[2].status, RegisterStatus::Success as i32);
    }
}
