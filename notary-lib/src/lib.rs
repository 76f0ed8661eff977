// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! Notary: a private X.509 certificate authority, as a library
//!
//! Example usage:
//! ```
//! # use notary_lib::{CaParams, Filter, Uninit};
//! # use tempfile;
//! // all state of a Notary instance is persisted in one SQLite database
//! let db_filename = "/tmp/notary.sqlite";
//! # // for Doc-tests we need a random database filename
//! # let file = tempfile::NamedTempFile::new().unwrap();
//! # let db_filename = file.path().to_str().unwrap();
//!
//! // Set up a new Notary database (implicitly creates the database file),
//! // with private keys encrypted by the software backend
//! let notary = Uninit::new(Some(db_filename))
//!     .expect("Failed to set up Notary")
//!     .init_software()
//!     .unwrap();
//!
//! // Create a self-signed root CA
//! let params = CaParams {
//!     common_name: "Example Root CA".to_string(),
//!     self_signed: true,
//!     ..Default::default()
//! };
//! let root = notary.ca_generate(&params, "ca.example.org").unwrap();
//!
//! let root = notary.ca_get(&Filter::Id(root.id)).unwrap();
//! assert!(root.enabled);
//! ```

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod backend;
mod ca;
pub mod chain;
mod csr;
mod db;
mod error;
mod revocation;
mod secret;
mod storage;
pub mod types;

use std::env;

use base64::{engine::general_purpose, Engine};
use tracing::{debug, info};

pub use crate::backend::Backend;
use crate::backend::EncryptionBackend;
pub use crate::ca::{crl_distribution_point, CA_MAX_EXPIRY_DAYS};
use crate::db::NotaryDb;
pub use crate::error::{Error, Result};
pub use crate::revocation::crl_revoked_serials;
pub use crate::secret::JWT_SECRET_LEN;
pub use crate::types::{CaParams, CaStatus, CaView, CsrStatus, CsrView, Filter};

/// Environment variable that configures the database, if none is passed explicitly
pub const ENV_DB: &str = "NOTARY_DB";

/// A Notary instance that has a database, but no encryption backend yet.
pub struct Uninit {
    db: NotaryDb,
}

/// An initialized Notary instance, with a configured encryption backend.
///
/// `Notary` exposes the main functionality of this crate. Each operation
/// runs in one database transaction.
pub struct Notary {
    db: NotaryDb,
    backend: Box<dyn EncryptionBackend + Send + Sync>,
    config: Backend,
}

impl Uninit {
    /// Instantiate a new Uninit object (with db, but without encryption backend).
    ///
    /// The SQLite backend filename can be configured:
    /// - explicitly via the db_url parameter, or
    /// - the environment variable NOTARY_DB.
    pub fn new(db_url: Option<&str>) -> Result<Self> {
        let db_url = if let Some(url) = db_url {
            url.to_owned()
        } else if let Ok(database) = env::var(ENV_DB) {
            database
        } else {
            return Err(Error::invalid_input("no database configuration found"));
        };

        let db = NotaryDb::new(&db_url)?;
        db.diesel_migrations_run()?;

        debug!("opened Notary database {}", db.url());

        Ok(Self { db })
    }

    /// Initialize with the encryption backend described by `backend`.
    pub fn init(self, backend: &Backend) -> Result<Notary> {
        match backend {
            Backend::Software => self.init_software(),
            Backend::Pkcs11(p) => self.init_pkcs11(p),
        }
    }

    /// Initialize with the software encryption backend.
    ///
    /// The key-encrypting key is generated and stored in the database on
    /// first use.
    pub fn init_software(self) -> Result<Notary> {
        let key = self.db.transaction(|tx| match tx.encryption_key()? {
            Some(stored) => general_purpose::STANDARD
                .decode(&stored.encryption_key)
                .map_err(|e| Error::Internal(format!("stored encryption key is not valid base64: {e}"))),
            None => {
                let key = backend::software::generate_key();
                tx.encryption_key_insert(&general_purpose::STANDARD.encode(key))?;

                info!("generated new encryption key");

                Ok(key.to_vec())
            }
        })?;

        let backend = backend::software::SoftwareBackend::new(&key)?;

        Ok(Notary {
            db: self.db,
            backend: Box::new(backend),
            config: Backend::Software,
        })
    }

    /// Initialize with a PKCS#11 encryption backend.
    #[cfg(feature = "pkcs11")]
    pub fn init_pkcs11(self, config: &backend::Pkcs11) -> Result<Notary> {
        let backend = backend::pkcs11::Pkcs11Backend::new(config);

        info!("using PKCS#11 backend {config}");

        Ok(Notary {
            db: self.db,
            backend: Box::new(backend),
            config: Backend::Pkcs11(config.clone()),
        })
    }

    /// Initialize with a PKCS#11 encryption backend.
    #[cfg(not(feature = "pkcs11"))]
    pub fn init_pkcs11(self, _config: &backend::Pkcs11) -> Result<Notary> {
        Err(Error::invalid_input(
            "this build of Notary has no PKCS#11 support (feature 'pkcs11')",
        ))
    }
}

impl Notary {
    /// Open a Notary instance.
    ///
    /// `db_url` falls back to the environment variable NOTARY_DB,
    /// `backend_config` is parsed by [`Backend::from_config`].
    pub fn open(db_url: Option<&str>, backend_config: Option<&str>) -> Result<Self> {
        let backend = Backend::from_config(backend_config)?;
        Uninit::new(db_url)?.init(&backend)
    }

    /// The encryption backend configuration of this instance
    pub fn backend(&self) -> &Backend {
        &self.config
    }

    fn secret(&self) -> &dyn EncryptionBackend {
        &*self.backend
    }

    // -------- users

    /// Add a user, returns the new user's id
    pub fn user_add(&self, username: &str) -> Result<i32> {
        let user = self
            .db
            .transaction(|tx| tx.user_insert(db::models::NewUser { username }))?;

        info!("added user {}", user.user_id);

        Ok(user.user_id)
    }

    /// Delete a user. CSRs owned by the user lose their owner.
    pub fn user_delete(&self, user_id: i32) -> Result<()> {
        self.db.transaction(|tx| {
            if tx.user_by_id(user_id)?.is_none() {
                return Err(Error::not_found(format!("user {user_id}")));
            }
            tx.user_delete(user_id)
        })?;

        info!("deleted user {user_id}");

        Ok(())
    }

    // -------- certificate signing requests

    pub fn csr_create(&self, csr_pem: &str, owner_id: Option<i32>) -> Result<CsrView> {
        self.db.transaction(|tx| {
            let csr = csr::csr_create(tx, csr_pem, owner_id)?;
            storage::csr_view(tx, csr)
        })
    }

    pub fn csr_list(&self) -> Result<Vec<CsrView>> {
        self.db.transaction(csr::csr_list)
    }

    pub fn csr_get(&self, filter: &Filter) -> Result<CsrView> {
        self.db.transaction(|tx| csr::csr_get(tx, filter))
    }

    pub fn csr_delete(&self, filter: &Filter) -> Result<()> {
        self.db.transaction(|tx| csr::csr_delete(tx, filter))
    }

    /// Attach a certificate chain (PEM, leaf first) to a CSR
    pub fn csr_attach_chain(&self, filter: &Filter, cert_chain_pem: &str) -> Result<CsrView> {
        self.db.transaction(|tx| {
            let csr = csr::csr_attach_chain(tx, filter, cert_chain_pem)?;
            storage::csr_view(tx, csr)
        })
    }

    pub fn csr_reject(&self, filter: &Filter) -> Result<CsrView> {
        self.db.transaction(|tx| {
            let csr = csr::csr_reject(tx, filter)?;
            storage::csr_view(tx, csr)
        })
    }

    /// Revoke the certificate of a CSR, and add it to the CRL of its issuer
    pub fn revoke(&self, csr_filter: &Filter) -> Result<()> {
        self.db
            .transaction(|tx| revocation::revoke(tx, self.secret(), csr_filter))
    }

    // -------- certificate authorities

    /// Create a CA from existing material.
    ///
    /// `cert_chain_pem` and `crl_pem` may be empty, then the CA is pending.
    pub fn ca_create(
        &self,
        csr_pem: &str,
        private_key_pem: &str,
        crl_pem: &str,
        cert_chain_pem: &str,
        owner_id: Option<i32>,
    ) -> Result<CaView> {
        self.db.transaction(|tx| {
            let ca = ca::ca_create(
                tx,
                self.secret(),
                csr_pem,
                private_key_pem,
                crl_pem,
                cert_chain_pem,
                owner_id,
            )?;
            storage::ca_view(tx, ca)
        })
    }

    /// Generate a new CA (key pair, CSR, and optionally a self-signed root)
    pub fn ca_generate(&self, params: &CaParams, external_hostname: &str) -> Result<CaView> {
        self.db.transaction(|tx| {
            let ca = ca::ca_generate(tx, self.secret(), params, external_hostname)?;
            storage::ca_view(tx, ca)
        })
    }

    pub fn ca_list(&self) -> Result<Vec<CaView>> {
        self.db.transaction(ca::ca_list)
    }

    pub fn ca_get(&self, filter: &Filter) -> Result<CaView> {
        self.db.transaction(|tx| ca::ca_get(tx, filter))
    }

    /// Delete a CA with its CSR and private key
    pub fn ca_delete(&self, filter: &Filter) -> Result<()> {
        self.db.transaction(|tx| ca::ca_delete(tx, filter))?;

        // don't leave the deleted private key in free pages of the database file
        self.db.vacuum()
    }

    pub fn ca_set_enabled(&self, filter: &Filter, enabled: bool) -> Result<CaView> {
        self.db.transaction(|tx| {
            let ca = ca::ca_set_enabled(tx, filter, enabled)?;
            storage::ca_view(tx, ca)
        })
    }

    pub fn ca_set_status(&self, filter: &Filter, status: CaStatus) -> Result<CaView> {
        self.db.transaction(|tx| {
            let ca = ca::ca_set_status(tx, filter, status)?;
            storage::ca_view(tx, ca)
        })
    }

    /// Replace the certificate chain (PEM, leaf first) of a CA
    pub fn ca_update_chain(&self, filter: &Filter, cert_chain_pem: &str) -> Result<CaView> {
        self.db.transaction(|tx| {
            let ca = ca::ca_update_chain(tx, self.secret(), filter, cert_chain_pem)?;
            storage::ca_view(tx, ca)
        })
    }

    /// Sign a CSR with a CA. Returns the new certificate (PEM).
    ///
    /// `external_hostname` goes into the CRL distribution point of the
    /// certificate.
    pub fn ca_sign_csr(
        &self,
        csr_filter: &Filter,
        ca_filter: &Filter,
        external_hostname: &str,
    ) -> Result<String> {
        self.db.transaction(|tx| {
            ca::ca_sign_csr(tx, self.secret(), csr_filter, ca_filter, external_hostname)
        })
    }

    /// The current CRL (PEM) of a CA
    pub fn ca_crl(&self, filter: &Filter) -> Result<String> {
        self.db.transaction(|tx| revocation::ca_crl(tx, filter))
    }

    // -------- secrets

    /// The secret for signing JWTs (created on first use)
    pub fn jwt_secret(&self) -> Result<Vec<u8>> {
        self.db
            .transaction(|tx| secret::jwt_secret(tx, self.secret()))
    }
}
