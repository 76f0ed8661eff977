// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! The JWT signing secret of a Notary instance.
//!
//! The secret is generated once, and only stored encrypted.

use rand::RngCore;
use tracing::info;

use crate::backend::{self, EncryptionBackend};
use crate::db::Tx;
use crate::error::Result;

/// Length of the JWT signing secret, in bytes
pub const JWT_SECRET_LEN: usize = 64;

pub(crate) fn jwt_secret(tx: &mut Tx, backend: &dyn EncryptionBackend) -> Result<Vec<u8>> {
    if let Some(stored) = tx.jwt_secret()? {
        return backend::unseal(backend, &stored.encrypted_secret);
    }

    let mut secret = vec![0u8; JWT_SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut secret);

    tx.jwt_secret_insert(&backend::seal(backend, &secret)?)?;

    info!("generated new JWT secret");

    Ok(secret)
}
