//! `VerifyDeviceData`.

use prost::Message;
use sha2::Sha256;
use sha3::{Digest, Sha3_256};

use otpa_proto::common::v1::{perso_object, DeviceData, LifecycleState};
use otpa_proto::spm::v1::HashType;

use crate::error::{SpmError, SpmResult};

fn well_formed(device_data: &DeviceData) -> SpmResult<()> {
    let device_id = device_data
        .device_id
        .as_ref()
        .ok_or_else(|| SpmError::MalformedDeviceData("missing device_id".to_string()))?;
    if device_id.hardware_origin.is_empty() {
        return Err(SpmError::MalformedDeviceData(
            "device_id.hardware_origin must not be empty".to_string(),
        ));
    }
    if device_id.sku_specific.len() != 16 {
        return Err(SpmError::MalformedDeviceData(
            "device_id.sku_specific must be 128 bits".to_string(),
        ));
    }
    if LifecycleState::try_from(device_data.lifecycle_state).unwrap_or(LifecycleState::Unspecified)
        == LifecycleState::Unspecified
    {
        return Err(SpmError::MalformedDeviceData(
            "lifecycle_state must be set".to_string(),
        ));
    }
    Ok(())
}

/// Hash of every preloaded certificate carried in `device_data`'s perso
/// objects, in order, under `hash_type`.
fn cert_bundle_hash(device_data: &DeviceData, hash_type: HashType) -> SpmResult<Vec<u8>> {
    let concatenated: Vec<u8> = device_data
        .perso_objects
        .iter()
        .filter_map(|object| match &object.kind {
            Some(perso_object::Kind::X509Cert(cert)) => Some(cert.cert_der.clone()),
            Some(perso_object::Kind::CwtCert(cert)) => Some(cert.cwt.clone()),
            _ => None,
        })
        .flatten()
        .collect();

    match hash_type {
        HashType::Sha256 => Ok(Sha256::digest(&concatenated).to_vec()),
        HashType::Sha3256 => Ok(Sha3_256::digest(&concatenated).to_vec()),
        HashType::Unspecified => Err(SpmError::InvalidArgument(
            "hash_type must be set".to_string(),
        )),
    }
}

/// Decode `device_data`, check lifecycle/ID well-formedness, and compare
/// the embedded certificate bundle's hash to `certs_hash`.
pub fn verify_device_data(device_data: &[u8], hash_type: HashType, certs_hash: &[u8]) -> SpmResult<()> {
    let device_data = DeviceData::decode(device_data)
        .map_err(|e| SpmError::MalformedDeviceData(e.to_string()))?;
    well_formed(&device_data)?;
    let computed = cert_bundle_hash(&device_data, hash_type)?;
    if computed != certs_hash {
        return Err(SpmError::HashMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use otpa_proto::common::v1::{perso_object, DeviceId, DeviceData, PersoObject, PersoObjectX509Cert};

    fn sample(cert_der: Vec<u8>) -> DeviceData {
        DeviceData {
            device_id: Some(DeviceId {
                hardware_origin: "lot7-x3-y9".to_string(),
                sku_specific: vec![0u8; 16],
            }),
            lifecycle_state: LifecycleState::Prod as i32,
            perso_fw_hash: vec![],
            wrapped_rma_unlock_token: vec![],
            perso_objects: vec![PersoObject {
                kind: Some(perso_object::Kind::X509Cert(PersoObjectX509Cert {
                    key_label: "device_cert".to_string(),
                    cert_der,
                })),
            }],
        }
    }

    #[test]
    fn matching_hash_succeeds() {
        let data = sample(vec![0xAA, 0xBB]);
        let expected = Sha256::digest([0xAA, 0xBB]).to_vec();
        let encoded = data.encode_to_vec();
        verify_device_data(&encoded, HashType::Sha256, &expected).unwrap();
    }

    #[test]
    fn mismatched_hash_fails_precondition() {
        let data = sample(vec![0xAA, 0xBB]);
        let encoded = data.encode_to_vec();
        let err = verify_device_data(&encoded, HashType::Sha256, &[0u8; 32]).unwrap_err();
        assert!(matches!(err, SpmError::HashMismatch));
    }

    #[test]
    fn missing_device_id_is_malformed() {
        let mut data = sample(vec![]);
        data.device_id = None;
        let encoded = data.encode_to_vec();
        let err = verify_device_data(&encoded, HashType::Sha256, &[]).unwrap_err();
        assert!(matches!(err, SpmError::MalformedDeviceData(_)));
    }
}
