// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! Notary data types.

use std::fmt::Formatter;
use std::str::FromStr;

use time::OffsetDateTime;

use crate::error::Error;

/// Lifecycle state of a certificate signing request.
///
/// `Outstanding -> Active`, `Outstanding -> Rejected`, `Active -> Revoked`.
/// There is no transition out of `Rejected` or `Revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsrStatus {
    Outstanding,
    Active,
    Rejected,
    Revoked,
}

impl CsrStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            CsrStatus::Outstanding => "Outstanding",
            CsrStatus::Active => "Active",
            CsrStatus::Rejected => "Rejected",
            CsrStatus::Revoked => "Revoked",
        }
    }
}

impl std::fmt::Display for CsrStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CsrStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "outstanding" => Ok(CsrStatus::Outstanding),
            "active" => Ok(CsrStatus::Active),
            "rejected" => Ok(CsrStatus::Rejected),
            "revoked" => Ok(CsrStatus::Revoked),
            _ => Err(Error::InvalidInput(format!("unknown CSR status '{s}'"))),
        }
    }
}

/// Status of a certificate authority.
///
/// Only `Active` CAs sign. A CA is "enabled" exactly when it is `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaStatus {
    Pending,
    Active,
    Legacy,
    Expired,
}

impl CaStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            CaStatus::Pending => "pending",
            CaStatus::Active => "active",
            CaStatus::Legacy => "legacy",
            CaStatus::Expired => "expired",
        }
    }

    pub fn enabled(&self) -> bool {
        *self == CaStatus::Active
    }
}

impl std::fmt::Display for CaStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CaStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(CaStatus::Pending),
            "active" => Ok(CaStatus::Active),
            "legacy" => Ok(CaStatus::Legacy),
            "expired" => Ok(CaStatus::Expired),
            _ => Err(Error::InvalidInput(format!("unknown CA status '{s}'"))),
        }
    }
}

/// Selects one CSR (or the CA backed by that CSR)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Row id (CSR id, or CA id when selecting a CA)
    Id(i32),

    /// PEM text of the CSR
    Csr(String),
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Filter::Id(id) => write!(f, "id {id}"),
            Filter::Csr(_) => write!(f, "CSR (by PEM)"),
        }
    }
}

/// A certificate signing request, with its certificate chain (if any)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrView {
    pub id: i32,
    pub csr_pem: String,
    pub status: CsrStatus,

    /// PEM bundle, leaf first. Empty if no certificate is attached.
    pub certificate_chain: String,

    pub owner_id: Option<i32>,
}

/// A certificate authority. The private key is never part of this view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaView {
    pub id: i32,
    pub status: CaStatus,
    pub enabled: bool,
    pub csr_pem: String,

    /// PEM bundle, leaf first. Empty while the CA is pending.
    pub certificate_chain: String,

    pub crl: Option<String>,
    pub private_key_id: i32,
}

/// Subject and options for generating a new CA
#[derive(Debug, Clone, Default)]
pub struct CaParams {
    pub common_name: String,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,

    /// Subject alternative names (DNS names, or IP addresses)
    pub sans: Vec<String>,

    /// Issue a self-signed root certificate, instead of leaving the CA
    /// pending until another CA signs its CSR
    pub self_signed: bool,

    /// Expiry of the self-signed certificate (default: one year from now)
    pub not_valid_after: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_roundtrip() {
        for s in [
            CsrStatus::Outstanding,
            CsrStatus::Active,
            CsrStatus::Rejected,
            CsrStatus::Revoked,
        ] {
            assert_eq!(CsrStatus::from_str(s.as_str()).unwrap(), s);
        }

        for s in [
            CaStatus::Pending,
            CaStatus::Active,
            CaStatus::Legacy,
            CaStatus::Expired,
        ] {
            assert_eq!(CaStatus::from_str(s.as_str()).unwrap(), s);
        }

        assert!(CaStatus::from_str("disabled").is_err());
    }

    #[test]
    fn only_active_is_enabled() {
        assert!(CaStatus::Active.enabled());
        assert!(!CaStatus::Legacy.enabled());
        assert!(!CaStatus::Pending.enabled());
        assert!(!CaStatus::Expired.enabled());
    }
}
