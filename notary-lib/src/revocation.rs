// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! Revocation of issued certificates, and the CRLs of managed CAs.

use rcgen::{
    CertificateRevocationListParams, Issuer, KeyIdMethod, KeyPair, RevokedCertParams,
    SerialNumber,
};
use time::OffsetDateTime;
use tracing::{info, warn};
use x509_parser::prelude::FromDer;
use x509_parser::revocation_list::CertificateRevocationList;

use crate::backend::EncryptionBackend;
use crate::ca;
use crate::chain;
use crate::db::Tx;
use crate::error::{Error, Result};
use crate::storage;
use crate::types::{CaStatus, CsrStatus, Filter};

const TAG_CRL: &str = "X509 CRL";

fn invalid_crl(msg: impl Into<String>) -> Error {
    Error::InvalidInput(format!("invalid CRL: {}", msg.into()))
}

fn parse_crl_block(crl_pem: &str) -> Result<pem::Pem> {
    let p = pem::parse(crl_pem).map_err(|e| invalid_crl(format!("PEM decoding failed: {e}")))?;

    if p.tag() != TAG_CRL {
        return Err(invalid_crl(format!(
            "expected a '{TAG_CRL}' PEM block, found '{}'",
            p.tag()
        )));
    }

    Ok(p)
}

/// Check that `crl_pem` is one PEM encoded X.509 CRL
pub(crate) fn validate_crl(crl_pem: &str) -> Result<()> {
    crl_entries(crl_pem).map(|_| ())
}

/// The entries of a CRL, as parameters for re-issuing it
pub(crate) fn crl_entries(crl_pem: &str) -> Result<Vec<RevokedCertParams>> {
    let p = parse_crl_block(crl_pem)?;

    let (_, crl) = CertificateRevocationList::from_der(p.contents())
        .map_err(|e| invalid_crl(format!("parsing failed: {e}")))?;

    crl.iter_revoked_certificates()
        .map(|revoked| {
            let revocation_time =
                OffsetDateTime::from_unix_timestamp(revoked.revocation_date.timestamp())
                    .map_err(|e| invalid_crl(format!("bad revocation date: {e}")))?;

            Ok(RevokedCertParams {
                serial_number: SerialNumber::from_slice(revoked.raw_serial()),
                revocation_time,
                reason_code: None,
                invalidity_date: None,
            })
        })
        .collect()
}

/// Serial numbers (lower case hex) of all certificates revoked by `crl_pem`
pub fn crl_revoked_serials(crl_pem: &str) -> Result<Vec<String>> {
    let p = parse_crl_block(crl_pem)?;

    let (_, crl) = CertificateRevocationList::from_der(p.contents())
        .map_err(|e| invalid_crl(format!("parsing failed: {e}")))?;

    Ok(crl
        .iter_revoked_certificates()
        .map(|revoked| hex::encode(revoked.raw_serial()))
        .collect())
}

/// Issue a CRL listing `revoked`, signed by the CA with certificate
/// `ca_cert_pem` and private key `ca_key`.
///
/// The CRL is valid for [`ca::CA_MAX_EXPIRY_DAYS`], its number is derived
/// from the current time.
pub(crate) fn crl_issue(
    ca_cert_pem: &str,
    ca_key: &KeyPair,
    revoked: Vec<RevokedCertParams>,
) -> Result<String> {
    let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key)
        .map_err(|e| Error::Internal(format!("failed to load CA certificate: {e}")))?;

    let now = OffsetDateTime::now_utc();

    let params = CertificateRevocationListParams {
        this_update: now,
        next_update: now + ca::max_expiry(),
        crl_number: SerialNumber::from(ca::time_serial()?),
        issuing_distribution_point: None,
        revoked_certs: revoked,
        key_identifier_method: KeyIdMethod::Sha256,
    };

    let crl = params
        .signed_by(&issuer)
        .map_err(|e| Error::Internal(format!("failed to sign CRL: {e}")))?;

    crl.pem()
        .map_err(|e| Error::Internal(format!("failed to encode CRL: {e}")))
}

/// Revoke the certificate of a CSR.
///
/// The CRL of the issuing CA gets a new entry for the certificate, the
/// certificate is removed from the store, and the CSR ends up `Revoked`
/// (as does any other CSR with the same certificate attached).
/// A CA that was certified by the revoked certificate is set to `legacy`.
pub(crate) fn revoke(
    tx: &mut Tx,
    backend: &dyn EncryptionBackend,
    csr_filter: &Filter,
) -> Result<()> {
    let mut csr = storage::csr_by_filter(tx, csr_filter)?;

    let certificate_id = csr.certificate_id.ok_or_else(|| {
        Error::invalid_input(format!(
            "certificate request {} has no certificate attached",
            csr.csr_id
        ))
    })?;

    let certs = storage::certificate_chain_get(tx, certificate_id)?;
    let (leaf, issuer) = match certs.as_slice() {
        [leaf, issuer, ..] => (leaf, issuer),
        _ => {
            warn!(
                "refusing to revoke self-signed certificate {} of certificate request {}",
                certificate_id, csr.csr_id
            );
            return Err(Error::invalid_input(
                "a self-signed certificate can't be revoked",
            ));
        }
    };

    let mut issuing_ca = match tx.ca_by_certificate_id(issuer.certificate_id)? {
        Some(ca) => ca,
        None => {
            warn!(
                "refusing to revoke certificate {}: issuer {} is not a managed CA",
                leaf.certificate_id, issuer.certificate_id
            );
            return Err(Error::invalid_input(
                "certificate must be issued by a managed CA",
            ));
        }
    };

    let ca_key = ca::ca_private_key(tx, backend, &issuing_ca)?;

    let mut revoked = match issuing_ca.crl.as_deref() {
        Some(crl) => crl_entries(crl)?,
        None => vec![],
    };
    let (serial, _) = chain::leaf_serial_and_expiry(&leaf.certificate)?;
    revoked.push(RevokedCertParams {
        serial_number: SerialNumber::from_slice(&serial),
        revocation_time: OffsetDateTime::now_utc(),
        reason_code: None,
        invalidity_date: None,
    });

    let crl = crl_issue(&issuer.certificate, &ca_key, revoked)?;

    tx.certificate_delete(leaf.certificate_id)?;

    issuing_ca.crl = Some(crl);
    tx.ca_update(&issuing_ca)?;

    // a CA that was certified by the revoked certificate can't sign anymore
    for mut ca in tx.cas()? {
        if ca.certificate_id == Some(leaf.certificate_id) {
            ca.status = CaStatus::Legacy.as_str().to_string();
            tx.ca_update(&ca)?;

            info!(
                "certificate authority {} set to legacy, its certificate was revoked",
                ca.certificate_authority_id
            );
        }
    }

    csr.status = CsrStatus::Revoked.as_str().to_string();
    csr.certificate_id = None;
    tx.csr_update(&csr)?;

    // other CSRs for the same key may have the same certificate attached
    for mut other in tx.csrs()? {
        if other.certificate_id == Some(leaf.certificate_id) {
            other.status = CsrStatus::Revoked.as_str().to_string();
            other.certificate_id = None;
            tx.csr_update(&other)?;

            info!(
                "certificate request {} revoked, it shares certificate {}",
                other.csr_id, leaf.certificate_id
            );
        }
    }

    info!(
        "revoked certificate {} (serial {}) of certificate request {}, issued by CA {}",
        leaf.certificate_id,
        hex::encode(&serial),
        csr.csr_id,
        issuing_ca.certificate_authority_id
    );

    Ok(())
}

/// The stored CRL of a CA
pub(crate) fn ca_crl(tx: &mut Tx, ca_filter: &Filter) -> Result<String> {
    let ca = storage::ca_by_filter(tx, ca_filter)?;

    ca.crl.ok_or_else(|| {
        Error::not_found(format!(
            "CRL of certificate authority {}",
            ca.certificate_authority_id
        ))
    })
}

