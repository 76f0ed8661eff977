// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! Parsing and verification of PEM encoded CSRs and certificate bundles.
//!
//! A certificate bundle is a sequence of PEM `CERTIFICATE` blocks, ordered
//! from the leaf towards the root. Bundles always contain at least two
//! entries: a self-signed certificate is represented as `[cert, cert]`, so
//! that every bundle can be checked pairwise (child, issuer).

use pem::{EncodeConfig, LineEnding, Pem};
use rcgen::{KeyPair, PublicKeyData};
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

use crate::error::{Error, Result};

const TAG_CERTIFICATE: &str = "CERTIFICATE";
const TAG_CERTIFICATE_REQUEST: &str = "CERTIFICATE REQUEST";

fn invalid_cert(msg: impl Into<String>) -> Error {
    Error::InvalidCertificate(msg.into())
}

fn invalid_csr(msg: impl Into<String>) -> Error {
    Error::InvalidCertificateRequest(msg.into())
}

/// Canonical text form of one PEM block (LF line endings, 64 column base64)
fn normalize(p: &Pem) -> String {
    pem::encode_config(p, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

fn parse_csr_block(csr_pem: &str) -> Result<Pem> {
    let p = pem::parse(csr_pem).map_err(|e| invalid_csr(format!("PEM decoding failed: {e}")))?;

    if p.tag() != TAG_CERTIFICATE_REQUEST {
        return Err(invalid_csr(format!(
            "expected a '{TAG_CERTIFICATE_REQUEST}' PEM block, found '{}'",
            p.tag()
        )));
    }

    Ok(p)
}

fn parse_certificate_blocks(chain_pem: &str) -> Result<Vec<Pem>> {
    let blocks =
        pem::parse_many(chain_pem).map_err(|e| invalid_cert(format!("PEM decoding failed: {e}")))?;

    if let Some(p) = blocks.iter().find(|p| p.tag() != TAG_CERTIFICATE) {
        return Err(invalid_cert(format!(
            "expected '{TAG_CERTIFICATE}' PEM blocks, found '{}'",
            p.tag()
        )));
    }

    Ok(blocks)
}

/// Check that `csr_pem` is one PEM encoded X.509 certificate signing request.
pub fn validate_certificate_request(csr_pem: &str) -> Result<()> {
    let p = parse_csr_block(csr_pem)?;

    X509CertificationRequest::from_der(p.contents())
        .map_err(|e| invalid_csr(format!("CSR parsing failed: {e}")))?;

    Ok(())
}

/// Check the self-signature of a CSR
pub(crate) fn verify_certificate_request_signature(csr_pem: &str) -> Result<()> {
    let p = parse_csr_block(csr_pem)?;

    let (_, csr) = X509CertificationRequest::from_der(p.contents())
        .map_err(|e| invalid_csr(format!("CSR parsing failed: {e}")))?;

    csr.verify_signature()
        .map_err(|e| invalid_csr(format!("CSR signature is invalid: {e}")))
}

/// Check a certificate bundle pairwise (child, issuer):
///
/// - the issuer must be a CA (basic constraints),
/// - the child's issuer name must be byte-identical to the issuer's subject,
/// - the child's signature must verify with the issuer's public key.
pub fn validate_certificate_chain(chain_pem: &str) -> Result<()> {
    let blocks = parse_certificate_blocks(chain_pem)?;

    if blocks.len() < 2 {
        return Err(invalid_cert(
            "less than 2 certificate PEM strings were found",
        ));
    }

    let certs = blocks
        .iter()
        .enumerate()
        .map(|(i, p)| {
            X509Certificate::from_der(p.contents())
                .map(|(_, cert)| cert)
                .map_err(|e| invalid_cert(format!("certificate {i} could not be parsed: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    for (i, pair) in certs.windows(2).enumerate() {
        let (child, issuer) = (&pair[0], &pair[1]);

        let issuer_is_ca = matches!(
            issuer.basic_constraints(),
            Ok(Some(bc)) if bc.value.ca
        );
        if !issuer_is_ca {
            return Err(invalid_cert(format!(
                "pair {i}: certificate {} is not a CA certificate",
                i + 1
            )));
        }

        if child.issuer().as_raw() != issuer.subject().as_raw() {
            return Err(invalid_cert(format!(
                "pair {i}: issuer of certificate {i} does not match subject of certificate {}",
                i + 1
            )));
        }

        child
            .verify_signature(Some(issuer.public_key()))
            .map_err(|e| {
                invalid_cert(format!(
                    "pair {i}: signature of certificate {i} does not verify with certificate {}: {e}",
                    i + 1
                ))
            })?;
    }

    Ok(())
}

/// Check that the leaf of `chain_pem` certifies the public key of `csr_pem`.
///
/// Both inputs are validated independently first.
pub fn certificate_matches_csr(chain_pem: &str, csr_pem: &str) -> Result<()> {
    validate_certificate_chain(chain_pem)?;
    validate_certificate_request(csr_pem)?;

    let csr_block = parse_csr_block(csr_pem)?;
    let (_, csr) = X509CertificationRequest::from_der(csr_block.contents())
        .map_err(|e| invalid_csr(format!("CSR parsing failed: {e}")))?;

    let blocks = parse_certificate_blocks(chain_pem)?;
    let (_, leaf) = X509Certificate::from_der(blocks[0].contents())
        .map_err(|e| invalid_cert(format!("certificate 0 could not be parsed: {e}")))?;

    if leaf.public_key().raw != csr.certification_request_info.subject_pki.raw {
        return Err(invalid_cert("certificate does not match CSR"));
    }

    Ok(())
}

/// A bundle is self-signed when its first two entries are identical.
pub fn is_self_signed(bundle: &[String]) -> bool {
    bundle.len() >= 2 && bundle[0] == bundle[1]
}

/// Split a certificate bundle into its normalized PEM entries.
pub fn split_chain(chain_pem: &str) -> Result<Vec<String>> {
    Ok(parse_certificate_blocks(chain_pem)?
        .iter()
        .map(normalize)
        .collect())
}

/// Concatenate PEM entries into one bundle.
pub fn join_chain<S: AsRef<str>>(entries: &[S]) -> String {
    entries.iter().map(|e| e.as_ref()).collect()
}

/// Normalized text form of a single CSR.
pub(crate) fn normalize_csr(csr_pem: &str) -> Result<String> {
    Ok(normalize(&parse_csr_block(csr_pem)?))
}

/// Content address of one PEM certificate: hex SHA-256 of its DER encoding.
pub(crate) fn fingerprint(cert_pem: &str) -> Result<String> {
    let p = pem::parse(cert_pem).map_err(|e| invalid_cert(format!("PEM decoding failed: {e}")))?;
    Ok(hex::encode(Sha256::digest(p.contents())))
}

/// Hex SHA-256 of the SubjectPublicKeyInfo of `key`.
///
/// Identifies a private key independent of its (encrypted) storage form.
pub(crate) fn key_fingerprint(key: &KeyPair) -> String {
    hex::encode(Sha256::digest(key.subject_public_key_info()))
}

/// Parse a PEM (PKCS#8) private key.
pub fn validate_private_key(key_pem: &str) -> Result<KeyPair> {
    KeyPair::from_pem(key_pem)
        .map_err(|e| Error::InvalidPrivateKey(format!("private key could not be parsed: {e}")))
}

/// Check that `key` is the private counterpart of the public key in `csr_pem`.
pub(crate) fn private_key_matches_csr(key: &KeyPair, csr_pem: &str) -> Result<()> {
    let p = parse_csr_block(csr_pem)?;
    let (_, csr) = X509CertificationRequest::from_der(p.contents())
        .map_err(|e| invalid_csr(format!("CSR parsing failed: {e}")))?;

    if key.subject_public_key_info() != csr.certification_request_info.subject_pki.raw {
        return Err(Error::InvalidPrivateKey(
            "private key does not match CSR".to_string(),
        ));
    }

    Ok(())
}

/// Serial number (big endian bytes) and `notAfter` (unix timestamp) of the
/// first certificate in `cert_pem`.
pub(crate) fn leaf_serial_and_expiry(cert_pem: &str) -> Result<(Vec<u8>, i64)> {
    let blocks = parse_certificate_blocks(cert_pem)?;
    let leaf = blocks
        .first()
        .ok_or_else(|| invalid_cert("no certificate PEM string was found"))?;

    let (_, cert) = X509Certificate::from_der(leaf.contents())
        .map_err(|e| invalid_cert(format!("certificate could not be parsed: {e}")))?;

    Ok((
        cert.raw_serial().to_vec(),
        cert.validity().not_after.timestamp(),
    ))
}
