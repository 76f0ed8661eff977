// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! Certificate authorities: creation, signing of CSRs, and status changes.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, CrlDistributionPoint,
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
    SanType, SerialNumber,
};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::backend::{self, EncryptionBackend};
use crate::chain;
use crate::csr;
use crate::db::models::{CertificateAuthority, NewCertificateAuthority, NewPrivateKey};
use crate::db::Tx;
use crate::error::{Error, Result};
use crate::revocation;
use crate::storage;
use crate::types::{CaParams, CaStatus, CaView, CsrStatus, Filter};

/// Validity of certificates and CRLs issued by Notary
pub const CA_MAX_EXPIRY_DAYS: i64 = 365;

pub(crate) fn max_expiry() -> Duration {
    Duration::days(CA_MAX_EXPIRY_DAYS)
}

/// Nanoseconds since the epoch, used for certificate serials and CRL numbers
pub(crate) fn time_serial() -> Result<u64> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Internal(format!("system time is before the epoch: {e}")))?
        .as_nanos();

    u64::try_from(nanos).map_err(|_| Error::Internal("system time out of range".to_string()))
}

/// URL under which the CRL of CA `ca_id` is published
pub fn crl_distribution_point(external_hostname: &str, ca_id: i32) -> String {
    format!("https://{external_hostname}/api/v1/certificate_authorities/{ca_id}/crl")
}

/// Load and decrypt the private key of `ca`
pub(crate) fn ca_private_key(
    tx: &mut Tx,
    backend: &dyn EncryptionBackend,
    ca: &CertificateAuthority,
) -> Result<KeyPair> {
    let key = tx.private_key_by_id(ca.private_key_id)?.ok_or_else(|| {
        Error::Internal(format!(
            "private key {} of CA {} is missing",
            ca.private_key_id, ca.certificate_authority_id
        ))
    })?;

    let pem = backend::unseal_string(backend, &key.private_key)?;

    KeyPair::from_pem(&pem).map_err(|e| {
        Error::Internal(format!(
            "private key of CA {} is unusable: {e}",
            ca.certificate_authority_id
        ))
    })
}

/// Store a CSR and an (encrypted) private key, and a pending CA for them
fn ca_insert_pending(
    tx: &mut Tx,
    backend: &dyn EncryptionBackend,
    csr_pem: &str,
    key: &KeyPair,
    owner_id: Option<i32>,
) -> Result<(CertificateAuthority, i32)> {
    let csr = csr::csr_create(tx, csr_pem, owner_id)?;
    chain::private_key_matches_csr(key, &csr.csr)?;

    // the ciphertext differs on every call, so compare public keys
    let fingerprint = chain::key_fingerprint(key);
    if let Some(existing) = tx.private_key_by_fingerprint(&fingerprint)? {
        return Err(Error::AlreadyExists(format!(
            "private key {} is already used by a CA",
            existing.private_key_id
        )));
    }

    let sealed = backend::seal(backend, key.serialize_pem().as_bytes())?;
    let private_key = tx.private_key_insert(NewPrivateKey {
        private_key: &sealed,
        fingerprint: &fingerprint,
    })?;

    let ca = tx.ca_insert(NewCertificateAuthority {
        crl: None,
        status: CaStatus::Pending.as_str(),
        private_key_id: private_key.private_key_id,
        certificate_id: None,
        csr_id: csr.csr_id,
    })?;

    Ok((ca, csr.csr_id))
}

/// Create a CA from a CSR and its private key.
///
/// With a non-empty `cert_chain_pem` (leaf first), the CA is active right
/// away and `crl_pem` must be given as well. Otherwise the CA is pending
/// until its CSR gets signed.
pub(crate) fn ca_create(
    tx: &mut Tx,
    backend: &dyn EncryptionBackend,
    csr_pem: &str,
    private_key_pem: &str,
    crl_pem: &str,
    cert_chain_pem: &str,
    owner_id: Option<i32>,
) -> Result<CertificateAuthority> {
    let key = chain::validate_private_key(private_key_pem)?;

    let with_chain = !cert_chain_pem.trim().is_empty();
    if with_chain {
        if crl_pem.trim().is_empty() {
            return Err(Error::invalid_input(
                "a CRL is required for a CA that is created with a certificate chain",
            ));
        }
        revocation::validate_crl(crl_pem)?;
    }

    let (mut ca, csr_id) = ca_insert_pending(tx, backend, csr_pem, &key, owner_id)?;

    if with_chain {
        let csr = csr::csr_attach_chain(tx, &Filter::Id(csr_id), cert_chain_pem)?;

        ca.crl = Some(crl_pem.to_string());
        ca.status = CaStatus::Active.as_str().to_string();
        ca.certificate_id = csr.certificate_id;
        tx.ca_update(&ca)?;
    }

    info!(
        "created certificate authority {} ({})",
        ca.certificate_authority_id, ca.status
    );

    Ok(ca)
}

fn distinguished_name(params: &CaParams) -> Result<DistinguishedName> {
    if params.common_name.trim().is_empty() {
        return Err(Error::invalid_input("a CA needs a common name"));
    }

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, params.common_name.as_str());

    let optional = [
        (DnType::OrganizationName, &params.organization),
        (DnType::OrganizationalUnitName, &params.organizational_unit),
        (DnType::CountryName, &params.country),
        (DnType::StateOrProvinceName, &params.state),
        (DnType::LocalityName, &params.locality),
    ];
    for (ty, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            dn.push(ty, value);
        }
    }

    Ok(dn)
}

fn subject_alt_names(sans: &[String]) -> Result<Vec<SanType>> {
    sans.iter()
        .map(|san| match san.parse::<IpAddr>() {
            Ok(ip) => Ok(SanType::IpAddress(ip)),
            Err(_) => Ia5String::try_from(san.as_str())
                .map(SanType::DnsName)
                .map_err(|e| Error::invalid_input(format!("invalid DNS name '{san}': {e}"))),
        })
        .collect()
}

/// Generate a key pair and CSR for a new CA.
///
/// If `params.self_signed` is set, the CA also gets a self-signed root
/// certificate and an empty CRL, and is active. Otherwise it is pending.
pub(crate) fn ca_generate(
    tx: &mut Tx,
    backend: &dyn EncryptionBackend,
    params: &CaParams,
    external_hostname: &str,
) -> Result<CertificateAuthority> {
    let mut cert_params = CertificateParams::default();
    cert_params.distinguished_name = distinguished_name(params)?;
    cert_params.subject_alt_names = subject_alt_names(&params.sans)?;

    let key = KeyPair::generate()
        .map_err(|e| Error::Internal(format!("failed to generate CA key: {e}")))?;

    let csr_pem = cert_params
        .serialize_request(&key)
        .and_then(|csr| csr.pem())
        .map_err(|e| Error::Internal(format!("failed to create CSR: {e}")))?;

    let (ca, _) = ca_insert_pending(tx, backend, &csr_pem, &key, None)?;

    if !params.self_signed {
        info!(
            "generated pending certificate authority {} for '{}'",
            ca.certificate_authority_id, params.common_name
        );
        return Ok(ca);
    }

    let now = OffsetDateTime::now_utc();
    let not_after = params.not_valid_after.unwrap_or(now + max_expiry());
    if not_after <= now {
        return Err(Error::invalid_input("expiry of the CA lies in the past"));
    }

    cert_params.serial_number = Some(SerialNumber::from(time_serial()?));
    cert_params.not_before = now;
    cert_params.not_after = not_after;
    cert_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    cert_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    cert_params.crl_distribution_points = vec![CrlDistributionPoint {
        uris: vec![crl_distribution_point(
            external_hostname,
            ca.certificate_authority_id,
        )],
    }];

    let root = cert_params
        .self_signed(&key)
        .map_err(|e| Error::Internal(format!("failed to create root certificate: {e}")))?
        .pem();

    let ca = ca_update_chain(
        tx,
        backend,
        &Filter::Id(ca.certificate_authority_id),
        &chain::join_chain(&[root.as_str(), root.as_str()]),
    )?;

    info!(
        "generated self-signed certificate authority {} for '{}'",
        ca.certificate_authority_id, params.common_name
    );

    Ok(ca)
}

/// Sign the CSR selected by `csr_filter` with the CA selected by `ca_filter`.
///
/// If the CSR belongs to a CA, that CA gets the new chain (and becomes
/// active). Otherwise the chain is attached to the CSR.
///
/// Returns the new certificate.
pub(crate) fn ca_sign_csr(
    tx: &mut Tx,
    backend: &dyn EncryptionBackend,
    csr_filter: &Filter,
    ca_filter: &Filter,
    external_hostname: &str,
) -> Result<String> {
    let target = storage::csr_by_filter(tx, csr_filter)?;
    let issuing_ca = storage::ca_by_filter(tx, ca_filter)?;

    let issuer_certificate_id = issuing_ca
        .certificate_id
        .ok_or_else(|| Error::invalid_input("CA has no certificate"))?;

    if storage::ca_status(&issuing_ca)? != CaStatus::Active {
        return Err(Error::invalid_input("CA is not enabled"));
    }

    let issuer_chain = storage::certificate_chain_get(tx, issuer_certificate_id)?;
    let issuer_cert = issuer_chain
        .first()
        .map(|c| c.certificate.clone())
        .ok_or_else(|| Error::invalid_input("CA has no certificate"))?;

    let now = OffsetDateTime::now_utc();

    let (_, issuer_not_after) = chain::leaf_serial_and_expiry(&issuer_cert)?;
    if issuer_not_after < now.unix_timestamp() {
        return Err(Error::invalid_input("CA certificate is expired"));
    }

    match storage::csr_status(&target)? {
        CsrStatus::Outstanding | CsrStatus::Active => {}
        status => {
            return Err(Error::invalid_input(format!(
                "can't sign a {status} certificate request"
            )))
        }
    }

    chain::verify_certificate_request_signature(&target.csr)?;
    let mut csr_params = CertificateSigningRequestParams::from_pem(&target.csr)
        .map_err(|e| Error::InvalidCertificateRequest(format!("CSR parsing failed: {e}")))?;

    let target_ca = tx.ca_by_csr_id(target.csr_id)?;

    let params = &mut csr_params.params;
    params.serial_number = Some(SerialNumber::from(time_serial()?));
    params.not_before = now;
    params.not_after = now + max_expiry();
    params.use_authority_key_identifier_extension = true;

    if target_ca.is_some() {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    } else {
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
    }

    params.crl_distribution_points = vec![CrlDistributionPoint {
        uris: vec![crl_distribution_point(
            external_hostname,
            issuing_ca.certificate_authority_id,
        )],
    }];

    let issuer_key = ca_private_key(tx, backend, &issuing_ca)?;
    let issuer = Issuer::from_ca_cert_pem(&issuer_cert, &issuer_key)
        .map_err(|e| Error::Internal(format!("failed to load CA certificate: {e}")))?;

    let cert_pem = csr_params
        .signed_by(&issuer)
        .map_err(|e| Error::Internal(format!("failed to sign certificate: {e}")))?
        .pem();

    let mut bundle = vec![cert_pem.clone()];
    bundle.extend(issuer_chain.into_iter().map(|c| c.certificate));
    let bundle = chain::join_chain(&bundle);

    match target_ca {
        Some(ca) => {
            debug!(
                "certificate request {} belongs to CA {}",
                target.csr_id, ca.certificate_authority_id
            );
            ca_update_chain(tx, backend, &Filter::Id(ca.certificate_authority_id), &bundle)?;
        }
        None => {
            csr::csr_attach_chain(tx, &Filter::Id(target.csr_id), &bundle)?;
        }
    }

    info!(
        "certificate authority {} signed certificate request {}",
        issuing_ca.certificate_authority_id, target.csr_id
    );

    Ok(cert_pem)
}

/// Set a new certificate chain (leaf first) for a CA.
///
/// The CA becomes active. Its CRL is re-signed by the new certificate and
/// keeps all entries of the previous CRL (a CA without a CRL gets an empty
/// one). The CA's CSR is marked active with the same certificate.
pub(crate) fn ca_update_chain(
    tx: &mut Tx,
    backend: &dyn EncryptionBackend,
    filter: &Filter,
    cert_chain_pem: &str,
) -> Result<CertificateAuthority> {
    let mut ca = storage::ca_by_filter(tx, filter)?;

    let mut csr = tx.csr_by_id(ca.csr_id)?.ok_or_else(|| {
        Error::Internal(format!(
            "CSR {} of CA {} is missing",
            ca.csr_id, ca.certificate_authority_id
        ))
    })?;

    match storage::csr_status(&csr)? {
        CsrStatus::Outstanding | CsrStatus::Active => {}
        status => {
            return Err(Error::invalid_input(format!(
                "the certificate request of CA {} is {status}",
                ca.certificate_authority_id
            )))
        }
    }

    chain::certificate_matches_csr(cert_chain_pem, &csr.csr)?;

    let certificate_id = storage::certificate_chain_insert(tx, cert_chain_pem)?;

    let leaf = chain::split_chain(cert_chain_pem)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidCertificate("empty certificate chain".to_string()))?;

    let key = ca_private_key(tx, backend, &ca)?;
    let revoked = match ca.crl.as_deref() {
        Some(crl) => revocation::crl_entries(crl)?,
        None => vec![],
    };
    let crl = revocation::crl_issue(&leaf, &key, revoked)?;

    ca.crl = Some(crl);
    ca.status = CaStatus::Active.as_str().to_string();
    ca.certificate_id = Some(certificate_id);
    tx.ca_update(&ca)?;

    csr.status = CsrStatus::Active.as_str().to_string();
    csr.certificate_id = Some(certificate_id);
    tx.csr_update(&csr)?;

    info!(
        "certificate authority {} has new certificate {}",
        ca.certificate_authority_id, certificate_id
    );

    Ok(ca)
}

pub(crate) fn ca_set_status(
    tx: &mut Tx,
    filter: &Filter,
    status: CaStatus,
) -> Result<CertificateAuthority> {
    let mut ca = storage::ca_by_filter(tx, filter)?;

    match (status, ca.certificate_id) {
        (CaStatus::Pending, Some(_)) => {
            return Err(Error::invalid_input(format!(
                "CA {} has a certificate, it can't be pending",
                ca.certificate_authority_id
            )))
        }
        (CaStatus::Active | CaStatus::Legacy | CaStatus::Expired, None) => {
            return Err(Error::invalid_input(format!(
                "CA {} has no certificate, it can't be {status}",
                ca.certificate_authority_id
            )))
        }
        _ => {}
    }

    ca.status = status.as_str().to_string();
    tx.ca_update(&ca)?;

    info!(
        "certificate authority {} set to {}",
        ca.certificate_authority_id, status
    );

    Ok(ca)
}

pub(crate) fn ca_set_enabled(
    tx: &mut Tx,
    filter: &Filter,
    enabled: bool,
) -> Result<CertificateAuthority> {
    let status = if enabled {
        CaStatus::Active
    } else {
        CaStatus::Legacy
    };

    ca_set_status(tx, filter, status)
}

/// Delete a CA, its CSR and its private key. Certificates stay.
pub(crate) fn ca_delete(tx: &mut Tx, filter: &Filter) -> Result<()> {
    let ca = storage::ca_by_filter(tx, filter)?;

    tx.ca_delete(ca.certificate_authority_id)?;
    tx.csr_delete(ca.csr_id)?;
    tx.private_key_delete(ca.private_key_id)?;

    info!("deleted certificate authority {}", ca.certificate_authority_id);

    Ok(())
}

pub(crate) fn ca_get(tx: &mut Tx, filter: &Filter) -> Result<CaView> {
    let ca = storage::ca_by_filter(tx, filter)?;
    storage::ca_view(tx, ca)
}

pub(crate) fn ca_list(tx: &mut Tx) -> Result<Vec<CaView>> {
    tx.cas()?
        .into_iter()
        .map(|ca| storage::ca_view(tx, ca))
        .collect()
}
