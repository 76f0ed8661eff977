// SPDX-FileCopyrightText: 2022 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! Infrastructure for switchable encryption-at-rest backends.
//!
//! Private keys and the JWT secret are only ever stored as ciphertext that was
//! produced by one of these backends. The backend of an instance is chosen at
//! deployment time and described by a short configuration string, see
//! [`Backend::from_config`].

use std::fmt::Formatter;

use base64::{engine::general_purpose, Engine};

use crate::error::{Error, Result};

#[cfg(feature = "pkcs11")]
pub(crate) mod pkcs11;
pub(crate) mod software;

/// Encryption-at-rest configuration of a Notary instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// AES-256-GCM with a key-encrypting key that is kept in the database
    Software,

    /// AES-CBC with a secret key that never leaves a PKCS#11 token
    Pkcs11(Pkcs11),
}

const BACKEND_TYPE_PKCS11: &str = "pkcs11";

impl Backend {
    /// Parse a backend configuration string.
    ///
    /// No (or an empty) configuration selects the software backend,
    /// `pkcs11;<module path>;<user pin>;<key id as 4 hex digits>` selects
    /// the hardware backend.
    pub fn from_config(backend: Option<&str>) -> Result<Self> {
        match backend {
            None => Ok(Backend::Software),
            Some(b) if b.trim().is_empty() => Ok(Backend::Software),
            Some(backend) => {
                if let Some((bt, conf)) = backend.split_once(';') {
                    match bt {
                        BACKEND_TYPE_PKCS11 => Ok(Backend::Pkcs11(Pkcs11::from_config(conf)?)),
                        _ => Err(Error::InvalidInput(format!(
                            "Unsupported backend type: '{bt}'"
                        ))),
                    }
                } else {
                    Err(Error::InvalidInput(format!(
                        "Unexpected backend configuration format: '{backend}'"
                    )))
                }
            }
        }
    }

    pub fn to_config(&self) -> Option<String> {
        match self {
            Backend::Software => None,
            Backend::Pkcs11(p) => Some(format!("{};{}", BACKEND_TYPE_PKCS11, p.to_config())),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Software => write!(f, "Software (AES-256-GCM, key in Notary database)"),
            Backend::Pkcs11(p) => write!(f, "PKCS#11 {p}"),
        }
    }
}

/// Settings for the PKCS#11 backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkcs11 {
    pub module: String,
    pub pin: String,
    pub key_id: u16,
}

impl Pkcs11 {
    pub(crate) fn from_config(conf: &str) -> Result<Self> {
        let c: Vec<_> = conf.split(';').collect();
        if c.len() != 3 {
            return Err(Error::InvalidInput(format!(
                "Unexpected config setting for pkcs11 backend: '{conf}'."
            )));
        }

        let key_id = u16::from_str_radix(c[2].trim_start_matches("0x"), 16).map_err(|e| {
            Error::InvalidInput(format!("Invalid pkcs11 key id '{}': {e}", c[2]))
        })?;

        Ok(Pkcs11 {
            module: c[0].to_string(),
            pin: c[1].to_string(),
            key_id,
        })
    }

    pub(crate) fn to_config(&self) -> String {
        format!("{};{};{:04x}", self.module, self.pin, self.key_id)
    }
}

impl std::fmt::Display for Pkcs11 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // the PIN is deliberately not shown
        write!(f, "{} [key id {:04x}]", self.module, self.key_id)
    }
}

/// Encryption and decryption of opaque blobs
pub trait EncryptionBackend {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Encrypt `plaintext` with `backend`, encoded for a TEXT column
pub(crate) fn seal(backend: &dyn EncryptionBackend, plaintext: &[u8]) -> Result<String> {
    let ciphertext = backend.encrypt(plaintext)?;
    Ok(general_purpose::STANDARD.encode(ciphertext))
}

/// Inverse of [`seal`]
pub(crate) fn unseal(backend: &dyn EncryptionBackend, stored: &str) -> Result<Vec<u8>> {
    let ciphertext = general_purpose::STANDARD
        .decode(stored)
        .map_err(|e| Error::Internal(format!("stored ciphertext is not valid base64: {e}")))?;
    backend.decrypt(&ciphertext)
}

/// Like [`unseal`], for ciphertext of UTF-8 data (e.g. PEM private keys)
pub(crate) fn unseal_string(backend: &dyn EncryptionBackend, stored: &str) -> Result<String> {
    String::from_utf8(unseal(backend, stored)?)
        .map_err(|e| Error::Internal(format!("decrypted data is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_config_roundtrip() {
        assert_eq!(Backend::from_config(None).unwrap(), Backend::Software);
        assert_eq!(Backend::from_config(Some("")).unwrap(), Backend::Software);

        let b = Backend::from_config(Some("pkcs11;/usr/lib/softhsm/libsofthsm2.so;1234;0x0102"))
            .unwrap();
        assert_eq!(
            b,
            Backend::Pkcs11(Pkcs11 {
                module: "/usr/lib/softhsm/libsofthsm2.so".to_string(),
                pin: "1234".to_string(),
                key_id: 0x0102,
            })
        );

        assert_eq!(
            b.to_config().as_deref(),
            Some("pkcs11;/usr/lib/softhsm/libsofthsm2.so;1234;0102")
        );
        assert_eq!(Backend::from_config(b.to_config().as_deref()).unwrap(), b);
    }

    #[test]
    fn backend_config_errors() {
        assert!(matches!(
            Backend::from_config(Some("card;1234")),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Backend::from_config(Some("pkcs11")),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Backend::from_config(Some("pkcs11;/lib.so;1234")),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Backend::from_config(Some("pkcs11;/lib.so;1234;zz")),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn pin_is_not_displayed() {
        let b = Backend::from_config(Some("pkcs11;/lib.so;secretpin;0001")).unwrap();
        assert!(!b.to_string().contains("secretpin"));
    }
}
