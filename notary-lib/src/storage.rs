// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! The shared certificate DAG, lookups by [`Filter`], and the views that
//! Notary hands out.
//!
//! Certificates are content-addressed (by SHA-256 fingerprint of the DER
//! encoding). Each row points at its issuer, `issuer_id == 0` marks a root.
//! Rows are shared between all requests and authorities whose chains pass
//! through them.

use std::str::FromStr;

use tracing::debug;

use crate::chain;
use crate::db::models::{self, Certificate, CertificateAuthority, CertificateRequest};
use crate::db::Tx;
use crate::error::{Error, Result};
use crate::types::{CaStatus, CaView, CsrStatus, CsrView, Filter};

/// Upper bound for the length of a stored chain
const MAX_CHAIN_DEPTH: usize = 32;

/// Issuer id of self-signed (root) certificates
pub(crate) const ROOT_ISSUER: i32 = 0;

/// Find a certificate by content, or insert it with `issuer_id`.
///
/// An existing row is returned unchanged, whatever its issuer.
pub(crate) fn certificate_upsert(tx: &mut Tx, issuer_id: i32, cert_pem: &str) -> Result<Certificate> {
    let fingerprint = chain::fingerprint(cert_pem)?;

    if let Some(existing) = tx.certificate_by_fingerprint(&fingerprint)? {
        debug!(
            "reusing certificate {} ({})",
            existing.certificate_id, fingerprint
        );
        return Ok(existing);
    }

    let cert = tx.certificate_insert(models::NewCertificate {
        issuer_id,
        certificate: cert_pem,
        fingerprint: &fingerprint,
    })?;

    debug!(
        "stored certificate {} ({}), issuer {}",
        cert.certificate_id, fingerprint, issuer_id
    );

    Ok(cert)
}

/// Store a (validated) certificate bundle, ordered leaf first.
///
/// Returns the id of the leaf certificate.
pub(crate) fn certificate_chain_insert(tx: &mut Tx, chain_pem: &str) -> Result<i32> {
    let bundle = chain::split_chain(chain_pem)?;

    if bundle.is_empty() {
        return Err(Error::InvalidCertificate(
            "no certificate PEM string was found".to_string(),
        ));
    }

    if chain::is_self_signed(&bundle) {
        let root = certificate_upsert(tx, ROOT_ISSUER, &bundle[0])?;
        return Ok(root.certificate_id);
    }

    let mut parent_id = ROOT_ISSUER;
    for cert_pem in bundle.iter().rev() {
        parent_id = certificate_upsert(tx, parent_id, cert_pem)?.certificate_id;
    }

    Ok(parent_id)
}

/// Walk the issuer pointers from `certificate_id` up to a root.
///
/// The result is ordered leaf first.
pub(crate) fn certificate_chain_get(tx: &mut Tx, certificate_id: i32) -> Result<Vec<Certificate>> {
    let mut chain: Vec<Certificate> = vec![];
    let mut next = certificate_id;

    loop {
        if chain.len() >= MAX_CHAIN_DEPTH {
            return Err(Error::Internal(format!(
                "certificate chain of {certificate_id} exceeds {MAX_CHAIN_DEPTH} entries"
            )));
        }

        let cert = tx
            .certificate_by_id(next)?
            .ok_or_else(|| Error::not_found(format!("certificate {next}")))?;

        if chain.iter().any(|c| c.certificate_id == cert.certificate_id) {
            return Err(Error::Internal(format!(
                "certificate chain of {certificate_id} contains a cycle"
            )));
        }

        next = cert.issuer_id;
        chain.push(cert);

        if next == ROOT_ISSUER {
            return Ok(chain);
        }
    }
}

/// The chain of `certificate_id` as one PEM bundle (empty for `None`)
pub(crate) fn certificate_chain_pem(tx: &mut Tx, certificate_id: Option<i32>) -> Result<String> {
    match certificate_id {
        None => Ok(String::new()),
        Some(id) => {
            let chain = certificate_chain_get(tx, id)?;
            let entries: Vec<&str> = chain.iter().map(|c| c.certificate.as_str()).collect();
            Ok(chain::join_chain(&entries))
        }
    }
}

/// Like [`certificate_chain_pem`], but a chain whose certificate was
/// revoked (and so removed from the DAG) shows as empty.
fn view_chain_pem(tx: &mut Tx, certificate_id: Option<i32>) -> Result<String> {
    match certificate_chain_pem(tx, certificate_id) {
        Err(Error::NotFound(msg)) => {
            debug!("chain of certificate {certificate_id:?} is incomplete: {msg}");
            Ok(String::new())
        }
        res => res,
    }
}

pub(crate) fn csr_by_filter(tx: &mut Tx, filter: &Filter) -> Result<CertificateRequest> {
    let csr = match filter {
        Filter::Id(id) => tx.csr_by_id(*id)?,
        Filter::Csr(pem) => tx.csr_by_pem(&chain::normalize_csr(pem)?)?,
    };

    csr.ok_or_else(|| Error::not_found(format!("certificate request with {filter}")))
}

pub(crate) fn ca_by_filter(tx: &mut Tx, filter: &Filter) -> Result<CertificateAuthority> {
    let ca = match filter {
        Filter::Id(id) => tx.ca_by_id(*id)?,
        Filter::Csr(pem) => match tx.csr_by_pem(&chain::normalize_csr(pem)?)? {
            Some(csr) => tx.ca_by_csr_id(csr.csr_id)?,
            None => None,
        },
    };

    ca.ok_or_else(|| Error::not_found(format!("certificate authority with {filter}")))
}

pub(crate) fn csr_status(csr: &CertificateRequest) -> Result<CsrStatus> {
    CsrStatus::from_str(&csr.status).map_err(|_| {
        Error::Internal(format!(
            "CSR {} has unexpected status '{}'",
            csr.csr_id, csr.status
        ))
    })
}

pub(crate) fn ca_status(ca: &CertificateAuthority) -> Result<CaStatus> {
    CaStatus::from_str(&ca.status).map_err(|_| {
        Error::Internal(format!(
            "CA {} has unexpected status '{}'",
            ca.certificate_authority_id, ca.status
        ))
    })
}

pub(crate) fn csr_view(tx: &mut Tx, csr: CertificateRequest) -> Result<CsrView> {
    let status = csr_status(&csr)?;
    let certificate_chain = view_chain_pem(tx, csr.certificate_id)?;

    Ok(CsrView {
        id: csr.csr_id,
        csr_pem: csr.csr,
        status,
        certificate_chain,
        owner_id: csr.user_id,
    })
}

pub(crate) fn ca_view(tx: &mut Tx, ca: CertificateAuthority) -> Result<CaView> {
    let status = ca_status(&ca)?;

    let csr = tx.csr_by_id(ca.csr_id)?.ok_or_else(|| {
        Error::Internal(format!(
            "CSR {} of CA {} is missing",
            ca.csr_id, ca.certificate_authority_id
        ))
    })?;

    let certificate_chain = view_chain_pem(tx, ca.certificate_id)?;

    Ok(CaView {
        id: ca.certificate_authority_id,
        status,
        enabled: status.enabled(),
        csr_pem: csr.csr,
        certificate_chain,
        crl: ca.crl,
        private_key_id: ca.private_key_id,
    })
}
