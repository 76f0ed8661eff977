// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! Database model for Notary

use diesel::prelude::*;

use crate::db::schema::*;

/// A user, as far as CSR ownership is concerned
#[derive(Queryable, Identifiable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = users, primary_key(user_id))]
pub struct User {
    pub user_id: i32,
    pub username: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = users)]
pub(crate) struct NewUser<'a> {
    pub username: &'a str,
}

/// One node in the shared certificate DAG.
///
/// `issuer_id == 0` marks a self-signed root. Rows are content-addressed by
/// `fingerprint` and may be referenced by many requests and authorities.
#[derive(Queryable, Identifiable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = certificates, primary_key(certificate_id))]
pub struct Certificate {
    pub certificate_id: i32,
    pub issuer_id: i32,
    pub certificate: String,
    pub fingerprint: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = certificates)]
pub(crate) struct NewCertificate<'a> {
    pub issuer_id: i32,
    pub certificate: &'a str,
    pub fingerprint: &'a str,
}

/// A certificate signing request
#[derive(Queryable, Identifiable, AsChangeset, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = certificate_requests, primary_key(csr_id), treat_none_as_null = true)]
pub struct CertificateRequest {
    pub csr_id: i32,
    pub csr: String,
    pub certificate_id: Option<i32>, // set exactly when status is 'Active'
    pub user_id: Option<i32>,
    pub status: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = certificate_requests)]
pub(crate) struct NewCertificateRequest<'a> {
    pub csr: &'a str,
    pub user_id: Option<i32>,
    pub status: &'a str,
}

/// Encrypted private key material of one CA
#[derive(Queryable, Identifiable, Debug, Clone)]
#[diesel(table_name = private_keys, primary_key(private_key_id))]
pub(crate) struct PrivateKey {
    pub private_key_id: i32,
    pub private_key: String, // base64 of the backend ciphertext
    pub fingerprint: String, // of the public key
}

#[derive(Insertable, Debug)]
#[diesel(table_name = private_keys)]
pub(crate) struct NewPrivateKey<'a> {
    pub private_key: &'a str,
    pub fingerprint: &'a str,
}

#[derive(Queryable, Identifiable, AsChangeset, Debug, Clone, PartialEq, Eq)]
#[diesel(
    table_name = certificate_authorities,
    primary_key(certificate_authority_id),
    treat_none_as_null = true
)]
pub struct CertificateAuthority {
    pub certificate_authority_id: i32,
    pub crl: Option<String>,
    pub status: String,
    pub private_key_id: i32,
    pub certificate_id: Option<i32>, // None exactly while 'pending'
    pub csr_id: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = certificate_authorities)]
pub(crate) struct NewCertificateAuthority<'a> {
    pub crl: Option<&'a str>,
    pub status: &'a str,
    pub private_key_id: i32,
    pub certificate_id: Option<i32>,
    pub csr_id: i32,
}

/// Singleton row (id 1) holding the software backend's key-encrypting key
#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = encryption_keys)]
pub(crate) struct EncryptionKey {
    pub encryption_key_id: i32,
    pub encryption_key: String,
}

/// Singleton row (id 1) holding the encrypted JWT signing secret
#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = jwt_secret)]
pub(crate) struct JwtSecret {
    pub id: i32,
    pub encrypted_secret: String,
}
