//! `SecureProvisioningModule` gRPC surface.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::instrument;

use otpa_proto::spm::v1::secure_provisioning_module_server::SecureProvisioningModule;
use otpa_proto::spm::v1::{
    DeriveTokensRequest, DeriveTokensResponse, EndorseCertsRequest, EndorseCertsResponse,
    EndorseDataRequest, EndorseDataResponse, GetCaSubjectKeysRequest, GetCaSubjectKeysResponse,
    GetOwnerFwBootMessageRequest, GetOwnerFwBootMessageResponse, GetStoredTokensRequest,
    GetStoredTokensResponse, HashType, InitSessionRequest, InitSessionResponse,
    VerifyDeviceDataRequest, VerifyDeviceDataResponse,
};

use crate::certs;
use crate::device_data;
use crate::pools::SpmPools;
use crate::token;

pub struct SpmService {
    pools: Arc<SpmPools>,
}

impl SpmService {
    pub fn new(pools: Arc<SpmPools>) -> Self {
        Self { pools }
    }
}

#[tonic::async_trait]
impl SecureProvisioningModule for SpmService {
    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn init_session(
        &self,
        request: Request<InitSessionRequest>,
    ) -> Result<Response<InitSessionResponse>, Status> {
        let sku_name = request.into_inner().sku;
        let sku = self.pools.sku(&sku_name)?;
        // Preload the SKU's session pool now so the first real RPC the
        // PA forwards doesn't pay HSM login latency.
        self.pools.pool(&sku)?;
        let handle = otpa_support::token::generate_session_token().into_bytes();
        Ok(Response::new(InitSessionResponse {
            spm_session_handle: handle,
        }))
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku, count))]
    async fn derive_tokens(
        &self,
        request: Request<DeriveTokensRequest>,
    ) -> Result<Response<DeriveTokensResponse>, Status> {
        let request = request.into_inner();
        tracing::Span::current().record("count", request.params.len());
        let sku = self.pools.sku(&request.sku)?;
        let pool = self.pools.pool(&sku)?;

        let mut tokens = Vec::with_capacity(request.params.len());
        for params in &request.params {
            tokens.push(token::derive_token(&pool, &sku, params).await?);
        }
        Ok(Response::new(DeriveTokensResponse { tokens }))
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn get_stored_tokens(
        &self,
        request: Request<GetStoredTokensRequest>,
    ) -> Result<Response<GetStoredTokensResponse>, Status> {
        let request = request.into_inner();
        let sku = self.pools.sku(&request.sku)?;
        let pool = self.pools.pool(&sku)?;

        let mut tokens = Vec::with_capacity(request.token_labels.len());
        for label in request.token_labels {
            let label_owned = label.clone();
            let value = pool
                .with(move |session| session.get_stored_token(&label_owned))
                .await?;
            tokens.push(value);
        }
        Ok(Response::new(GetStoredTokensResponse { tokens }))
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku, count))]
    async fn endorse_certs(
        &self,
        request: Request<EndorseCertsRequest>,
    ) -> Result<Response<EndorseCertsResponse>, Status> {
        let request = request.into_inner();
        tracing::Span::current().record("count", request.bundles.len());
        let sku = self.pools.sku(&request.sku)?;
        let pool = self.pools.pool(&sku)?;

        let certs = certs::endorse_certs(&pool, &request.bundles, &request.diversifier, &request.mac).await?;
        Ok(Response::new(EndorseCertsResponse { certs }))
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn endorse_data(
        &self,
        request: Request<EndorseDataRequest>,
    ) -> Result<Response<EndorseDataResponse>, Status> {
        let request = request.into_inner();
        let sku = self.pools.sku(&request.sku)?;
        let pool = self.pools.pool(&sku)?;

        let (pubkey_der, signature_der) =
            certs::endorse_data(&pool, &request.key_label, &request.data).await?;
        Ok(Response::new(EndorseDataResponse {
            pubkey_der,
            signature_der,
        }))
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn get_ca_subject_keys(
        &self,
        request: Request<GetCaSubjectKeysRequest>,
    ) -> Result<Response<GetCaSubjectKeysResponse>, Status> {
        let request = request.into_inner();
        let sku = self.pools.sku(&request.sku)?;
        let key_ids = certs::ca_subject_keys(&sku, &request.cert_labels)?;
        Ok(Response::new(GetCaSubjectKeysResponse { key_ids }))
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn get_owner_fw_boot_message(
        &self,
        request: Request<GetOwnerFwBootMessageRequest>,
    ) -> Result<Response<GetOwnerFwBootMessageResponse>, Status> {
        let sku = self.pools.sku(&request.into_inner().sku)?;
        let message = sku
            .policy
            .firmware_boot_message
            .clone()
            .ok_or_else(|| Status::not_found("SKU has no configured firmware boot message"))?;
        Ok(Response::new(GetOwnerFwBootMessageResponse { message }))
    }

    #[instrument(skip_all)]
    async fn verify_device_data(
        &self,
        request: Request<VerifyDeviceDataRequest>,
    ) -> Result<Response<VerifyDeviceDataResponse>, Status> {
        let request = request.into_inner();
        let hash_type = HashType::try_from(request.hash_type).unwrap_or(HashType::Unspecified);
        device_data::verify_device_data(&request.device_data, hash_type, &request.certs_hash)?;
        Ok(Response::new(VerifyDeviceDataResponse { matched: true }))
    }
}
