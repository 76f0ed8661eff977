// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! Notary database access and model.
//!
//! All access goes through [`NotaryDb::transaction`], which holds the
//! connection for the duration of one operation. The building block functions
//! live on [`Tx`], the handle that is passed into the transaction closure.

use std::sync::{Mutex, MutexGuard};

use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub mod models;
mod schema;

use models::*;
use schema::*;

use crate::error::{Error, Result};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Database access layer
pub(crate) struct NotaryDb {
    url: String,
    conn: Mutex<SqliteConnection>,
}

impl NotaryDb {
    pub(crate) fn new(db_url: &str) -> Result<Self> {
        let mut conn = SqliteConnection::establish(db_url).map_err(|e| {
            Error::Internal(format!("Error connecting to {db_url}: {e}"))
        })?;

        // Enable handling of foreign key constraints in sqlite
        diesel::sql_query("PRAGMA foreign_keys=1;")
            .execute(&mut conn)
            .map_err(|e| Error::Internal(format!("Couldn't set 'PRAGMA foreign_keys=1;': {e}")))?;

        Ok(NotaryDb {
            url: db_url.to_string(),
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    fn conn(&self) -> Result<MutexGuard<'_, SqliteConnection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Internal(format!("database connection lock poisoned: {e}")))
    }

    /// Run `f` in one database transaction.
    ///
    /// The transaction is rolled back if `f` returns an error.
    pub(crate) fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T>,
    {
        let mut conn = self.conn()?;
        conn.transaction(|conn| f(&mut Tx { conn }))
    }

    /// Runs the "VACUUM" command on the database, which:
    /// "rebuilds the database file, repacking it into a minimal amount of disk space".
    ///
    /// <https://www.sqlite.org/lang_vacuum.html>
    pub(crate) fn vacuum(&self) -> Result<()> {
        diesel::sql_query("VACUUM;")
            .execute(&mut *self.conn()?)
            .map_err(|e| Error::Internal(format!("Error while running 'VACUUM;': {e}")))?;

        Ok(())
    }

    pub(crate) fn diesel_migrations_run(&self) -> Result<()> {
        self.conn()?
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| Error::Internal(format!("failed to configure database: {e}")))?;

        Ok(())
    }
}

/// Handle on an open transaction
pub(crate) struct Tx<'c> {
    conn: &'c mut SqliteConnection,
}

impl Tx<'_> {
    // --- users ---

    pub(crate) fn user_insert(&mut self, user: NewUser) -> Result<User> {
        diesel::insert_into(users::table)
            .values(&user)
            .execute(self.conn)?;

        // retrieve our new row, including the generated id
        Ok(users::table
            .order(users::user_id.desc())
            .first::<User>(self.conn)?)
    }

    pub(crate) fn user_by_id(&mut self, id: i32) -> Result<Option<User>> {
        Ok(users::table
            .filter(users::user_id.eq(id))
            .first::<User>(self.conn)
            .optional()?)
    }

    pub(crate) fn user_delete(&mut self, id: i32) -> Result<()> {
        diesel::delete(users::table.filter(users::user_id.eq(id))).execute(self.conn)?;
        Ok(())
    }

    // --- certificates ---

    pub(crate) fn certificate_insert(&mut self, cert: NewCertificate) -> Result<Certificate> {
        let inserted_count = diesel::insert_into(certificates::table)
            .values(&cert)
            .execute(self.conn)?;

        if inserted_count != 1 {
            return Err(Error::Internal(
                "certificate_insert: insert should return count '1'".to_string(),
            ));
        }

        Ok(certificates::table
            .order(certificates::certificate_id.desc())
            .first::<Certificate>(self.conn)?)
    }

    pub(crate) fn certificate_by_id(&mut self, id: i32) -> Result<Option<Certificate>> {
        Ok(certificates::table
            .filter(certificates::certificate_id.eq(id))
            .first::<Certificate>(self.conn)
            .optional()?)
    }

    pub(crate) fn certificate_by_fingerprint(
        &mut self,
        fingerprint: &str,
    ) -> Result<Option<Certificate>> {
        Ok(certificates::table
            .filter(certificates::fingerprint.eq(fingerprint))
            .first::<Certificate>(self.conn)
            .optional()?)
    }

    pub(crate) fn certificate_delete(&mut self, id: i32) -> Result<()> {
        let deleted = diesel::delete(certificates::table.filter(certificates::certificate_id.eq(id)))
            .execute(self.conn)?;

        if deleted == 0 {
            return Err(Error::not_found(format!("certificate {id}")));
        }
        Ok(())
    }

    // --- certificate requests ---

    pub(crate) fn csr_insert(&mut self, csr: NewCertificateRequest) -> Result<CertificateRequest> {
        let inserted_count = diesel::insert_into(certificate_requests::table)
            .values(&csr)
            .execute(self.conn)?;

        if inserted_count != 1 {
            return Err(Error::Internal(
                "csr_insert: insert should return count '1'".to_string(),
            ));
        }

        Ok(certificate_requests::table
            .order(certificate_requests::csr_id.desc())
            .first::<CertificateRequest>(self.conn)?)
    }

    pub(crate) fn csr_by_id(&mut self, id: i32) -> Result<Option<CertificateRequest>> {
        Ok(certificate_requests::table
            .filter(certificate_requests::csr_id.eq(id))
            .first::<CertificateRequest>(self.conn)
            .optional()?)
    }

    pub(crate) fn csr_by_pem(&mut self, pem: &str) -> Result<Option<CertificateRequest>> {
        Ok(certificate_requests::table
            .filter(certificate_requests::csr.eq(pem))
            .first::<CertificateRequest>(self.conn)
            .optional()?)
    }

    pub(crate) fn csrs(&mut self) -> Result<Vec<CertificateRequest>> {
        Ok(certificate_requests::table
            .order(certificate_requests::csr_id)
            .load::<CertificateRequest>(self.conn)?)
    }

    pub(crate) fn csr_update(&mut self, csr: &CertificateRequest) -> Result<()> {
        diesel::update(csr).set(csr).execute(self.conn)?;
        Ok(())
    }

    pub(crate) fn csr_delete(&mut self, id: i32) -> Result<()> {
        let deleted = diesel::delete(
            certificate_requests::table.filter(certificate_requests::csr_id.eq(id)),
        )
        .execute(self.conn)?;

        if deleted == 0 {
            return Err(Error::not_found(format!("certificate request {id}")));
        }
        Ok(())
    }

    // --- private keys ---

    pub(crate) fn private_key_insert(&mut self, key: NewPrivateKey) -> Result<PrivateKey> {
        diesel::insert_into(private_keys::table)
            .values(&key)
            .execute(self.conn)?;

        Ok(private_keys::table
            .order(private_keys::private_key_id.desc())
            .first::<PrivateKey>(self.conn)?)
    }

    pub(crate) fn private_key_by_id(&mut self, id: i32) -> Result<Option<PrivateKey>> {
        Ok(private_keys::table
            .filter(private_keys::private_key_id.eq(id))
            .first::<PrivateKey>(self.conn)
            .optional()?)
    }

    pub(crate) fn private_key_by_fingerprint(
        &mut self,
        fingerprint: &str,
    ) -> Result<Option<PrivateKey>> {
        Ok(private_keys::table
            .filter(private_keys::fingerprint.eq(fingerprint))
            .first::<PrivateKey>(self.conn)
            .optional()?)
    }

    pub(crate) fn private_key_delete(&mut self, id: i32) -> Result<()> {
        diesel::delete(private_keys::table.filter(private_keys::private_key_id.eq(id)))
            .execute(self.conn)?;
        Ok(())
    }

    // --- certificate authorities ---

    pub(crate) fn ca_insert(
        &mut self,
        ca: NewCertificateAuthority,
    ) -> Result<CertificateAuthority> {
        let inserted_count = diesel::insert_into(certificate_authorities::table)
            .values(&ca)
            .execute(self.conn)?;

        if inserted_count != 1 {
            return Err(Error::Internal(
                "ca_insert: insert should return count '1'".to_string(),
            ));
        }

        Ok(certificate_authorities::table
            .order(certificate_authorities::certificate_authority_id.desc())
            .first::<CertificateAuthority>(self.conn)?)
    }

    pub(crate) fn ca_by_id(&mut self, id: i32) -> Result<Option<CertificateAuthority>> {
        Ok(certificate_authorities::table
            .filter(certificate_authorities::certificate_authority_id.eq(id))
            .first::<CertificateAuthority>(self.conn)
            .optional()?)
    }

    pub(crate) fn ca_by_csr_id(&mut self, csr_id: i32) -> Result<Option<CertificateAuthority>> {
        Ok(certificate_authorities::table
            .filter(certificate_authorities::csr_id.eq(csr_id))
            .first::<CertificateAuthority>(self.conn)
            .optional()?)
    }

    pub(crate) fn ca_by_certificate_id(
        &mut self,
        certificate_id: i32,
    ) -> Result<Option<CertificateAuthority>> {
        Ok(certificate_authorities::table
            .filter(certificate_authorities::certificate_id.eq(certificate_id))
            .order(certificate_authorities::certificate_authority_id)
            .first::<CertificateAuthority>(self.conn)
            .optional()?)
    }

    pub(crate) fn cas(&mut self) -> Result<Vec<CertificateAuthority>> {
        Ok(certificate_authorities::table
            .order(certificate_authorities::certificate_authority_id)
            .load::<CertificateAuthority>(self.conn)?)
    }

    pub(crate) fn ca_update(&mut self, ca: &CertificateAuthority) -> Result<()> {
        diesel::update(ca).set(ca).execute(self.conn)?;
        Ok(())
    }

    pub(crate) fn ca_delete(&mut self, id: i32) -> Result<()> {
        let deleted = diesel::delete(
            certificate_authorities::table
                .filter(certificate_authorities::certificate_authority_id.eq(id)),
        )
        .execute(self.conn)?;

        if deleted == 0 {
            return Err(Error::not_found(format!("certificate authority {id}")));
        }
        Ok(())
    }

    // --- singletons ---

    pub(crate) fn encryption_key(&mut self) -> Result<Option<EncryptionKey>> {
        Ok(encryption_keys::table
            .filter(encryption_keys::encryption_key_id.eq(1))
            .first::<EncryptionKey>(self.conn)
            .optional()?)
    }

    pub(crate) fn encryption_key_insert(&mut self, encryption_key: &str) -> Result<()> {
        let key = EncryptionKey {
            encryption_key_id: 1,
            encryption_key: encryption_key.to_string(),
        };
        diesel::insert_into(encryption_keys::table)
            .values(&key)
            .execute(self.conn)?;
        Ok(())
    }

    pub(crate) fn jwt_secret(&mut self) -> Result<Option<JwtSecret>> {
        Ok(jwt_secret::table
            .filter(jwt_secret::id.eq(1))
            .first::<JwtSecret>(self.conn)
            .optional()?)
    }

    pub(crate) fn jwt_secret_insert(&mut self, encrypted_secret: &str) -> Result<()> {
        let secret = JwtSecret {
            id: 1,
            encrypted_secret: encrypted_secret.to_string(),
        };
        diesel::insert_into(jwt_secret::table)
            .values(&secret)
            .execute(self.conn)?;
        Ok(())
    }
}
