//! gRPC registry transport: the PA's binding of the same [`Registry`]
//! trait, applied to the PA→Proxy Buffer hop rather than the
//! PB→external-registry hop `http.rs` serves. The PA's registry shim and
//! the upstream registry interface have the identical shape, so one
//! trait covers both.

use async_trait::async_trait;
use tonic::transport::Channel;

use otpa_proto::common::v1::{RegisterDeviceResponse, RegistryRecord};
use otpa_proto::pb::v1::proxy_buffer_client::ProxyBufferClient;
use otpa_proto::pb::v1::BatchRegisterDeviceRequest;

use crate::error::{RegistryError, RegistryResult};
use crate::Registry;

pub struct GrpcRegistry {
    client: ProxyBufferClient<Channel>,
}

impl GrpcRegistry {
    /// Connect lazily: the underlying channel is established on first
    /// use rather than blocking construction, so the PA can start
    /// serving before the Proxy Buffer is reachable.
    pub fn connect_lazy(endpoint: impl Into<String>) -> RegistryResult<Self> {
        let endpoint = endpoint.into();
        let channel = Channel::from_shared(endpoint)
            .map_err(|e| RegistryError::Internal(e.to_string()))?
            .connect_lazy();
        Ok(Self {
            client: ProxyBufferClient::new(channel),
        })
    }
}

#[async_trait]
impl Registry for GrpcRegistry {
    async fn batch_register_device(
        &self,
        records: Vec<RegistryRecord>,
    ) -> RegistryResult<Vec<RegisterDeviceResponse>> {
        let mut client = self.client.clone();
        let response = client
            .batch_register_device(BatchRegisterDeviceRequest { records })
            .await
            .map_err(|status| RegistryError::Unavailable(status.to_string()))?;
        Ok(response.into_inner().responses)
    }
}
