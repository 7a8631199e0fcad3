//! `ProvisioningAppliance` gRPC surface: session issuance,
//! per-method auth, fan-out to the SPM and the registry shim.

use std::sync::Arc;

use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::instrument;

use otpa_proto::common::v1::{RegisterDeviceResponse, RegistryRecord};
use otpa_proto::pa::v1::provisioning_appliance_server::ProvisioningAppliance;
use otpa_proto::pa::v1::{
    CloseSessionRequest, CloseSessionResponse, InitSessionRequest, InitSessionResponse,
    RegisterDeviceRequest,
};
use otpa_proto::spm::v1::secure_provisioning_module_client::SecureProvisioningModuleClient;
use otpa_proto::spm::v1::{
    DeriveTokensRequest, DeriveTokensResponse, EndorseCertsRequest, EndorseCertsResponse,
    GetCaSubjectKeysRequest, GetCaSubjectKeysResponse, GetOwnerFwBootMessageRequest,
    GetOwnerFwBootMessageResponse, GetStoredTokensRequest, GetStoredTokensResponse,
    InitSessionRequest as SpmInitSessionRequest, VerifyDeviceDataRequest,
};

use registry_client::Registry;
use sku_config::SkuManager;

use crate::auth::authorize;
use crate::error::PaError;
use crate::peer_verify::verify_peer;
use crate::session::SessionMap;

const METHOD_DERIVE_TOKENS: &str = "DeriveTokens";
const METHOD_GET_CA_SUBJECT_KEYS: &str = "GetCaSubjectKeys";
const METHOD_ENDORSE_CERTS: &str = "EndorseCerts";
const METHOD_GET_OWNER_FW_BOOT_MESSAGE: &str = "GetOwnerFwBootMessage";
const METHOD_REGISTER_DEVICE: &str = "RegisterDevice";

pub struct PaService {
    manager: Arc<SkuManager>,
    sessions: Arc<SessionMap>,
    spm: SecureProvisioningModuleClient<Channel>,
    registry: Arc<dyn Registry>,
    pa_endpoint: String,
    peer_verification_enabled: bool,
}

impl PaService {
    pub fn new(
        manager: Arc<SkuManager>,
        sessions: Arc<SessionMap>,
        spm: SecureProvisioningModuleClient<Channel>,
        registry: Arc<dyn Registry>,
        pa_endpoint: String,
        peer_verification_enabled: bool,
    ) -> Self {
        Self {
            manager,
            sessions,
            spm,
            registry,
            pa_endpoint,
            peer_verification_enabled,
        }
    }

    fn check_peer<T>(&self, request: &Request<T>) -> Result<(), Status> {
        if self.peer_verification_enabled {
            verify_peer(request)?;
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl ProvisioningAppliance for PaService {
    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn init_session(
        &self,
        request: Request<InitSessionRequest>,
    ) -> Result<Response<InitSessionResponse>, Status> {
        self.check_peer(&request)?;
        let body = request.into_inner();
        let sku = self.manager.load(&body.sku).map_err(PaError::from)?;

        let verified = bcrypt::verify(&body.sku_auth, &sku.sku_auth_bcrypt_hash)
            .map_err(|_| PaError::BadPassword)?;
        if !verified {
            return Err(Status::from(PaError::BadPassword));
        }

        let mut spm = self.spm.clone();
        spm.init_session(SpmInitSessionRequest {
            sku: body.sku.clone(),
            sku_auth: body.sku_auth,
        })
        .await?;

        let token = otpa_support::token::generate_session_token();
        let auth_methods: Vec<String> = sku.authorized_methods.iter().cloned().collect();
        self.sessions.create(
            token.clone(),
            body.sku,
            sku.authorized_methods.clone(),
        );

        Ok(Response::new(InitSessionResponse {
            session_token: token,
            pa_endpoint: self.pa_endpoint.clone(),
            auth_methods,
        }))
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn close_session(
        &self,
        request: Request<CloseSessionRequest>,
    ) -> Result<Response<CloseSessionResponse>, Status> {
        let sku = request.get_ref().sku.clone();
        for value in request.metadata().get_all(otpa_proto::AUTH_TOKEN_HEADER).iter() {
            if let Ok(token) = value.to_str() {
                self.sessions.remove_for_sku(token, &sku);
            }
        }
        Ok(Response::new(CloseSessionResponse {}))
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn derive_tokens(
        &self,
        request: Request<DeriveTokensRequest>,
    ) -> Result<Response<DeriveTokensResponse>, Status> {
        self.check_peer(&request)?;
        let sku = request.get_ref().sku.clone();
        authorize(&self.sessions, request.metadata(), &sku, METHOD_DERIVE_TOKENS)?;
        let mut spm = self.spm.clone();
        let response = spm.derive_tokens(request.into_inner()).await?;
        Ok(response)
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn get_stored_tokens(
        &self,
        request: Request<GetStoredTokensRequest>,
    ) -> Result<Response<GetStoredTokensResponse>, Status> {
        self.check_peer(&request)?;
        let sku = request.get_ref().sku.clone();
        // GetStoredTokens carries no dedicated entry in the authorized-
        // method list; it travels under the same gate as DeriveTokens,
        // the nearest named token-retrieval method.
        authorize(&self.sessions, request.metadata(), &sku, METHOD_DERIVE_TOKENS)?;
        let mut spm = self.spm.clone();
        let response = spm.get_stored_tokens(request.into_inner()).await?;
        Ok(response)
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn endorse_certs(
        &self,
        request: Request<EndorseCertsRequest>,
    ) -> Result<Response<EndorseCertsResponse>, Status> {
        self.check_peer(&request)?;
        let sku = request.get_ref().sku.clone();
        authorize(&self.sessions, request.metadata(), &sku, METHOD_ENDORSE_CERTS)?;
        let mut spm = self.spm.clone();
        let response = spm.endorse_certs(request.into_inner()).await?;
        Ok(response)
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn get_ca_subject_keys(
        &self,
        request: Request<GetCaSubjectKeysRequest>,
    ) -> Result<Response<GetCaSubjectKeysResponse>, Status> {
        self.check_peer(&request)?;
        let sku = request.get_ref().sku.clone();
        authorize(&self.sessions, request.metadata(), &sku, METHOD_GET_CA_SUBJECT_KEYS)?;
        let mut spm = self.spm.clone();
        let response = spm.get_ca_subject_keys(request.into_inner()).await?;
        Ok(response)
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku))]
    async fn get_owner_fw_boot_message(
        &self,
        request: Request<GetOwnerFwBootMessageRequest>,
    ) -> Result<Response<GetOwnerFwBootMessageResponse>, Status> {
        self.check_peer(&request)?;
        let sku = request.get_ref().sku.clone();
        authorize(
            &self.sessions,
            request.metadata(),
            &sku,
            METHOD_GET_OWNER_FW_BOOT_MESSAGE,
        )?;
        let mut spm = self.spm.clone();
        let response = spm.get_owner_fw_boot_message(request.into_inner()).await?;
        Ok(response)
    }

    #[instrument(skip_all, fields(sku = %request.get_ref().sku, device_id = %request.get_ref().device_id))]
    async fn register_device(
        &self,
        request: Request<RegisterDeviceRequest>,
    ) -> Result<Response<RegisterDeviceResponse>, Status> {
        self.check_peer(&request)?;
        let sku = request.get_ref().sku.clone();
        authorize(&self.sessions, request.metadata(), &sku, METHOD_REGISTER_DEVICE)?;

        let body = request.into_inner();
        let mut spm = self.spm.clone();
        spm.verify_device_data(VerifyDeviceDataRequest {
            device_data: body.device_data.clone(),
            hash_type: body.hash_type,
            certs_hash: body.certs_hash,
        })
        .await?;

        let record = RegistryRecord {
            device_id: body.device_id,
            sku: body.sku,
            version: 1,
            data: body.device_data,
            auth_pubkey: vec![],
            auth_signature: vec![],
        };
        let mut responses = self
            .registry
            .batch_register_device(vec![record])
            .await
            .map_err(PaError::from)?;
        let response = responses
            .pop()
            .ok_or_else(|| Status::internal("registry shim returned no response for one record"))?;
        Ok(Response::new(response))
    }
}
