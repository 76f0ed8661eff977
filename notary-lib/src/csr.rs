// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! Certificate signing request lifecycle

use tracing::info;

use crate::chain;
use crate::db::models::{CertificateRequest, NewCertificateRequest};
use crate::db::Tx;
use crate::error::{Error, Result};
use crate::storage;
use crate::types::{CsrStatus, CsrView, Filter};

/// Validate and store a new CSR, in state `Outstanding`.
pub(crate) fn csr_create(
    tx: &mut Tx,
    csr_pem: &str,
    owner_id: Option<i32>,
) -> Result<CertificateRequest> {
    chain::validate_certificate_request(csr_pem)?;
    let csr_pem = chain::normalize_csr(csr_pem)?;

    if tx.csr_by_pem(&csr_pem)?.is_some() {
        return Err(Error::AlreadyExists(
            "a certificate request with this PEM exists".to_string(),
        ));
    }

    if let Some(owner) = owner_id {
        if tx.user_by_id(owner)?.is_none() {
            return Err(Error::not_found(format!("user {owner}")));
        }
    }

    let csr = tx.csr_insert(NewCertificateRequest {
        csr: &csr_pem,
        user_id: owner_id,
        status: CsrStatus::Outstanding.as_str(),
    })?;

    info!("created certificate request {}", csr.csr_id);

    Ok(csr)
}

/// Attach a certificate chain (leaf first) to an outstanding CSR.
///
/// An active CSR may get a new chain (renewal).
pub(crate) fn csr_attach_chain(
    tx: &mut Tx,
    filter: &Filter,
    chain_pem: &str,
) -> Result<CertificateRequest> {
    let mut csr = storage::csr_by_filter(tx, filter)?;

    match storage::csr_status(&csr)? {
        CsrStatus::Outstanding | CsrStatus::Active => {}
        status => {
            return Err(Error::invalid_input(format!(
                "can't attach a certificate to a {status} certificate request"
            )))
        }
    }

    chain::certificate_matches_csr(chain_pem, &csr.csr)?;

    let certificate_id = storage::certificate_chain_insert(tx, chain_pem)?;

    csr.status = CsrStatus::Active.as_str().to_string();
    csr.certificate_id = Some(certificate_id);
    tx.csr_update(&csr)?;

    info!(
        "attached certificate {} to certificate request {}",
        certificate_id, csr.csr_id
    );

    Ok(csr)
}

pub(crate) fn csr_reject(tx: &mut Tx, filter: &Filter) -> Result<CertificateRequest> {
    let mut csr = storage::csr_by_filter(tx, filter)?;

    let status = storage::csr_status(&csr)?;
    if status != CsrStatus::Outstanding {
        return Err(Error::invalid_input(format!(
            "only outstanding certificate requests can be rejected, this one is {status}"
        )));
    }

    csr.status = CsrStatus::Rejected.as_str().to_string();
    csr.certificate_id = None;
    tx.csr_update(&csr)?;

    info!("rejected certificate request {}", csr.csr_id);

    Ok(csr)
}

/// Delete a CSR. Certificates are never deleted along with it.
pub(crate) fn csr_delete(tx: &mut Tx, filter: &Filter) -> Result<()> {
    let csr = storage::csr_by_filter(tx, filter)?;

    if let Some(ca) = tx.ca_by_csr_id(csr.csr_id)? {
        return Err(Error::invalid_input(format!(
            "certificate request {} belongs to certificate authority {}, delete the CA instead",
            csr.csr_id, ca.certificate_authority_id
        )));
    }

    tx.csr_delete(csr.csr_id)?;

    info!("deleted certificate request {}", csr.csr_id);

    Ok(())
}

pub(crate) fn csr_get(tx: &mut Tx, filter: &Filter) -> Result<CsrView> {
    let csr = storage::csr_by_filter(tx, filter)?;
    storage::csr_view(tx, csr)
}

pub(crate) fn csr_list(tx: &mut Tx) -> Result<Vec<CsrView>> {
    tx.csrs()?
        .into_iter()
        .map(|csr| storage::csr_view(tx, csr))
        .collect()
}
