//! `EndorseCerts`, `EndorseData`, `GetCaSubjectKeys`.
//!
//! Certificate assembly works directly against the `der`/`x509-cert`
//! ASN.1 types rather than through a `Signer`-trait builder, since the
//! private half of the signing key never leaves the HSM session lease —
//! the TBS bytes are handed to `HsmSession::sign` as an opaque blob and
//! the signature comes back as an opaque blob, then the two are stitched
//! into a `Certificate` ASN.1 sequence.

use der::asn1::{BitString, Null};
use der::{Any, Decode, DecodePem, Encode, Tag};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use spki::AlgorithmIdentifierOwned;
use subtle::ConstantTimeEq;
use x509_cert::{Certificate, TbsCertificate};

use hsm_core::{HsmPool, KeyClass, SignAlgorithm};
use sku_config::Sku;

use otpa_proto::spm::v1::{CertBundle, EndorsedCert};

use crate::error::{SpmError, SpmResult};
use crate::pools::hsm_result;

type HmacSha256 = Hmac<Sha256>;

const MAC_KEY_LABEL: &str = "mac_key";

/// OID for sha256WithRSAEncryption (1.2.840.113549.1.1.11), the only
/// signature algorithm the software and PKCS#11 HSM backends here
/// produce via [`SignAlgorithm::Sha256RsaPkcs1v15`].
fn sha256_with_rsa_encryption() -> SpmResult<AlgorithmIdentifierOwned> {
    let oid = const_oid::ObjectIdentifier::new("1.2.840.113549.1.1.11")
        .map_err(|e| SpmError::Cert(format!("signature algorithm OID: {e}")))?;
    let null_der = Null
        .to_der()
        .map_err(|e| SpmError::Cert(format!("NULL parameters: {e}")))?;
    let parameters =
        Any::new(Tag::Null, null_der).map_err(|e| SpmError::Cert(format!("NULL parameters: {e}")))?;
    Ok(AlgorithmIdentifierOwned {
        oid,
        parameters: Some(parameters),
    })
}

/// Re-derive the MAC key for `diversifier` and verify `mac` against the
/// concatenation of every bundle's TBS bytes, in constant time (spec
/// §4.3: "MAC failure ⇒ PermissionDenied").
async fn verify_mac(pool: &HsmPool, bundles: &[CertBundle], diversifier: &[u8], mac: &[u8]) -> SpmResult<()> {
    let diversifier_owned = diversifier.to_vec();
    let mac_key = hsm_result(
        pool.with(move |session| {
            let key = session.find_key(KeyClass::SecretKey, MAC_KEY_LABEL)?;
            session.kdf_derive(key, b"", &diversifier_owned, 32)
        })
        .await,
    )?;

    let mut hasher = HmacSha256::new_from_slice(&mac_key)
        .map_err(|e| SpmError::Cert(format!("MAC key init failed: {e}")))?;
    for bundle in bundles {
        hasher.update(&bundle.tbs);
    }
    let expected = hasher.finalize().into_bytes();

    let matches = expected.len() == mac.len() && bool::from(expected.as_slice().ct_eq(mac));
    if !matches {
        return Err(SpmError::MacMismatch);
    }
    Ok(())
}

/// Assemble a DER-encoded, fully signed X.509 certificate from TBS bytes
/// and a raw PKCS#1v1.5 signature over them.
fn assemble_signed_certificate(tbs_der: &[u8], signature: &[u8]) -> SpmResult<Vec<u8>> {
    let tbs_certificate = TbsCertificate::from_der(tbs_der)
        .map_err(|e| SpmError::Cert(format!("malformed TBS certificate: {e}")))?;
    let signature_algorithm = sha256_with_rsa_encryption()?;
    let signature = BitString::from_bytes(signature)
        .map_err(|e| SpmError::Cert(format!("signature encoding: {e}")))?;

    let certificate = Certificate {
        tbs_certificate,
        signature_algorithm,
        signature,
    };
    certificate
        .to_der()
        .map_err(|e| SpmError::Cert(format!("certificate encoding: {e}")))
}

/// Verify the DUT-supplied MAC, then sign and assemble each TBS blob
/// under its named CA key.
pub async fn endorse_certs(
    pool: &HsmPool,
    bundles: &[CertBundle],
    diversifier: &[u8],
    mac: &[u8],
) -> SpmResult<Vec<EndorsedCert>> {
    verify_mac(pool, bundles, diversifier, mac).await?;

    let mut out = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let tbs = bundle.tbs.clone();
        let ca_label = bundle.ca_key_label.clone();
        let signature = hsm_result(
            pool.with(move |session| {
                let key = session.find_key(KeyClass::PrivateKey, &ca_label)?;
                session.sign(key, SignAlgorithm::Sha256RsaPkcs1v15, &tbs)
            })
            .await,
        )?;
        let cert_der = assemble_signed_certificate(&bundle.tbs, &signature)?;
        out.push(EndorsedCert { cert: cert_der });
    }
    Ok(out)
}

/// Hash-then-sign `data` with the named private key; returns both the
/// signature and the signer's DER-encoded public key so a verifier
/// doesn't need out-of-band access to the SKU's key material.
pub async fn endorse_data(pool: &HsmPool, key_label: &str, data: &[u8]) -> SpmResult<(Vec<u8>, Vec<u8>)> {
    let label = key_label.to_string();
    let payload = data.to_vec();
    hsm_result(
        pool.with(move |session| {
            let key = session.find_key(KeyClass::PrivateKey, &label)?;
            let signature = session.sign(key, SignAlgorithm::Sha256RsaPkcs1v15, &payload)?;
            let pubkey_der = session.get_public_key_der(key)?;
            Ok((pubkey_der, signature))
        })
        .await,
    )
}

/// Read each named preloaded certificate and return its 20-byte
/// SubjectKeyIdentifier, in input order.
pub fn ca_subject_keys(sku: &Sku, cert_labels: &[String]) -> SpmResult<Vec<Vec<u8>>> {
    cert_labels
        .iter()
        .map(|label| {
            let path = sku
                .certs
                .get(label)
                .ok_or_else(|| SpmError::InvalidArgument(format!("no preloaded cert named '{label}'")))?;
            let pem = std::fs::read_to_string(path)
                .map_err(|e| SpmError::Cert(format!("reading cert '{label}': {e}")))?;
            let certificate = Certificate::from_pem(pem.as_bytes())
                .map_err(|e| SpmError::Cert(format!("parsing cert '{label}': {e}")))?;
            subject_key_identifier(&certificate)
        })
        .collect()
}

fn subject_key_identifier(certificate: &Certificate) -> SpmResult<Vec<u8>> {
    const SUBJECT_KEY_IDENTIFIER_OID: &str = "2.5.29.14";
    let extensions = certificate
        .tbs_certificate
        .extensions
        .as_ref()
        .ok_or_else(|| SpmError::Cert("certificate carries no extensions".to_string()))?;
    let extension = extensions
        .iter()
        .find(|ext| ext.extn_id.to_string() == SUBJECT_KEY_IDENTIFIER_OID)
        .ok_or_else(|| SpmError::Cert("certificate has no SubjectKeyIdentifier extension".to_string()))?;
    // extnValue is an OCTET STRING wrapping the extension's own DER
    // encoding; for SubjectKeyIdentifier that inner encoding is itself
    // an OCTET STRING of the key id, so one more DER decode unwraps it.
    let inner = der::asn1::OctetString::from_der(extension.extn_value.as_bytes())
        .map_err(|e| SpmError::Cert(format!("decoding SubjectKeyIdentifier: {e}")))?;
    Ok(inner.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsm_core::soft::SoftHsmSession;
    use hsm_core::HsmSession;

    fn test_pool() -> HsmPool {
        HsmPool::open(1, |_| Ok(Box::new(SoftHsmSession::new()) as Box<dyn HsmSession>)).unwrap()
    }

    #[tokio::test]
    async fn endorse_data_returns_a_verifiable_signature_and_matching_pubkey() {
        use rsa::pkcs1v15::{Signature, VerifyingKey};
        use rsa::pkcs8::DecodePublicKey;
        use rsa::signature::Verifier;
        use rsa::RsaPublicKey;

        let pool = test_pool();
        let (pubkey_der, signature) = endorse_data(&pool, "ca_key", b"hello").await.unwrap();
        let public = RsaPublicKey::from_public_key_der(&pubkey_der).unwrap();
        let verifying_key = VerifyingKey::<Sha256>::new(public);
        let signature = Signature::try_from(signature.as_slice()).unwrap();
        assert!(verifying_key.verify(b"hello", &signature).is_ok());
    }

    #[tokio::test]
    async fn endorse_certs_rejects_a_flipped_mac_bit() {
        let pool = test_pool();
        let bundles = vec![CertBundle {
            tbs: vec![0x30, 0x03, 0x02, 0x01, 0x01],
            ca_key_label: "ca_key".to_string(),
        }];
        let mut bad_mac = vec![0u8; 32];
        bad_mac[0] = 0xFF;
        let err = endorse_certs(&pool, &bundles, b"diversifier", &bad_mac)
            .await
            .unwrap_err();
        assert!(matches!(err, SpmError::MacMismatch));
    }
}
