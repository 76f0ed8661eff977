// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

use std::env;

use anyhow::{anyhow, Result};
use notary_lib::{Backend, CaParams, CaView, Notary, Uninit};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose, SerialNumber,
};
use rusqlite::Connection;
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

pub(crate) const HOSTNAME: &str = "host";

/// A fresh database in a temporary directory.
///
/// The directory is removed when the returned `TempDir` is dropped.
#[allow(dead_code)]
pub(crate) fn setup_db() -> Result<(TempDir, String)> {
    let dir = tempfile::tempdir()?;

    let mut path = dir.path().to_path_buf();
    path.push("notary.sqlite");

    let path = path
        .to_str()
        .ok_or_else(|| anyhow!("non-UTF-8 temp path"))?
        .to_string();

    Ok((dir, path))
}

#[allow(dead_code)]
pub(crate) fn setup_software() -> Result<(TempDir, String, Notary)> {
    let (dir, db) = setup_db()?;
    let notary = Uninit::new(Some(&db))?.init_software()?;

    Ok((dir, db, notary))
}

/// PKCS#11 settings for hardware tests, from NOTARY_PKCS11_MODULE,
/// NOTARY_PKCS11_PIN and NOTARY_PKCS11_KEY_ID (4 hex digits)
#[allow(dead_code)]
pub(crate) fn pkcs11_config() -> Result<Backend> {
    let module = env::var("NOTARY_PKCS11_MODULE")?;
    let pin = env::var("NOTARY_PKCS11_PIN")?;
    let key_id = env::var("NOTARY_PKCS11_KEY_ID")?;

    Ok(Backend::from_config(Some(&format!(
        "pkcs11;{module};{pin};{key_id}"
    )))?)
}

#[allow(dead_code)]
pub(crate) fn setup_pkcs11() -> Result<(TempDir, String, Notary)> {
    let (dir, db) = setup_db()?;

    let notary = match pkcs11_config()? {
        Backend::Pkcs11(config) => Uninit::new(Some(&db))?.init_pkcs11(&config)?,
        Backend::Software => return Err(anyhow!("expected a pkcs11 configuration")),
    };

    Ok((dir, db, notary))
}

#[allow(dead_code)]
pub(crate) fn sqlite(db: &str) -> Result<Connection> {
    Ok(Connection::open(db)?)
}

#[allow(dead_code)]
pub(crate) fn count_rows(db: &str, table: &str) -> Result<i64> {
    let sqlite = sqlite(db)?;
    Ok(sqlite.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
}

fn dn(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn
}

/// A new key pair and a CSR for it. Returns (csr, private key), both PEM.
#[allow(dead_code)]
pub(crate) fn make_csr(cn: &str, sans: &[&str]) -> Result<(String, String)> {
    let key = KeyPair::generate()?;

    let mut params =
        CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>())?;
    params.distinguished_name = dn(cn);

    let csr = params.serialize_request(&key)?.pem()?;

    Ok((csr, key.serialize_pem()))
}

/// A CSR for an existing key pair
#[allow(dead_code)]
pub(crate) fn csr_for_key(cn: &str, key: &KeyPair) -> Result<String> {
    let mut params = CertificateParams::default();
    params.distinguished_name = dn(cn);

    Ok(params.serialize_request(key)?.pem()?)
}

/// Key material of a self-signed CA that was created outside of Notary
#[allow(dead_code)]
pub(crate) struct ExternalRoot {
    pub key: KeyPair,
    pub params: CertificateParams,
    pub csr_pem: String,
    pub key_pem: String,
    pub cert_pem: String,
    pub crl_pem: String,
}

#[allow(dead_code)]
pub(crate) fn external_root(cn: &str) -> Result<ExternalRoot> {
    let key = KeyPair::generate()?;

    let mut params = CertificateParams::default();
    params.distinguished_name = dn(cn);

    let csr_pem = params.serialize_request(&key)?.pem()?;

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(30);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let cert_pem = params.self_signed(&key)?.pem();

    let crl_pem = CertificateRevocationListParams {
        this_update: now,
        next_update: now + Duration::days(30),
        crl_number: SerialNumber::from(1u64),
        issuing_distribution_point: None,
        revoked_certs: vec![],
        key_identifier_method: KeyIdMethod::Sha256,
    }
    .signed_by(&Issuer::from_params(&params, &key))?
    .pem()?;

    Ok(ExternalRoot {
        key_pem: key.serialize_pem(),
        key,
        params,
        csr_pem,
        cert_pem,
        crl_pem,
    })
}

/// Sign `csr_pem` with an external root, outside of Notary
#[allow(dead_code)]
pub(crate) fn external_sign(root: &ExternalRoot, csr_pem: &str, ca: bool) -> Result<String> {
    let mut csr = rcgen::CertificateSigningRequestParams::from_pem(csr_pem)?;
    if ca {
        csr.params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        csr.params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    }

    let issuer = Issuer::from_params(&root.params, &root.key);

    Ok(csr.signed_by(&issuer)?.pem())
}

/// A self-signed root CA, generated by Notary
#[allow(dead_code)]
pub(crate) fn generate_root(notary: &Notary, cn: &str) -> Result<CaView> {
    let params = CaParams {
        common_name: cn.to_string(),
        organization: Some("Example Org".to_string()),
        self_signed: true,
        ..Default::default()
    };

    Ok(notary.ca_generate(&params, HOSTNAME)?)
}

/// A pending CA, generated by Notary
#[allow(dead_code)]
pub(crate) fn generate_pending(notary: &Notary, cn: &str) -> Result<CaView> {
    let params = CaParams {
        common_name: cn.to_string(),
        ..Default::default()
    };

    Ok(notary.ca_generate(&params, HOSTNAME)?)
}

/// Split a PEM bundle into its entries
#[allow(dead_code)]
pub(crate) fn entries(chain: &str) -> Result<Vec<String>> {
    Ok(notary_lib::chain::split_chain(chain)?)
}

/// Serial number (lower case hex) of the first certificate in `cert_pem`
#[allow(dead_code)]
pub(crate) fn serial_hex(cert_pem: &str) -> Result<String> {
    let p = pem::parse(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(p.contents())?;

    Ok(hex::encode(cert.raw_serial()))
}

/// URIs of all CRL distribution points of the first certificate in `cert_pem`
#[allow(dead_code)]
pub(crate) fn crl_distribution_points(cert_pem: &str) -> Result<Vec<String>> {
    let p = pem::parse(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(p.contents())?;

    let mut uris = vec![];
    for ext in cert.extensions() {
        if let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() {
            for point in points.points.iter() {
                if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                    for name in names {
                        if let GeneralName::URI(uri) = name {
                            uris.push(uri.to_string());
                        }
                    }
                }
            }
        }
    }

    Ok(uris)
}

/// Is the first certificate in `cert_pem` a CA certificate?
#[allow(dead_code)]
pub(crate) fn is_ca_cert(cert_pem: &str) -> Result<bool> {
    let p = pem::parse(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(p.contents())?;

    Ok(matches!(cert.basic_constraints(), Ok(Some(bc)) if bc.value.ca))
}
