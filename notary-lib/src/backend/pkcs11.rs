// SPDX-FileCopyrightText: 2022-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

//! A PKCS#11 (HSM) encryption backend.
//!
//! The secret key stays on the token. Each operation runs in its own session:
//! initialize the module, open a session on the first slot with a token,
//! log in with the user PIN, find the key by its `CKA_ID`, run the operation,
//! log out and finalize again.
//!
//! The sealed format is: `iv (16 bytes) || AES-CBC ciphertext (PKCS#7 padded)`.

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;
use rand::RngCore;
use tracing::debug;

use crate::backend::{self, EncryptionBackend};
use crate::error::{Error, Result};

const IV_SIZE: usize = 16;

fn hsm_err(e: cryptoki::error::Error) -> Error {
    Error::Internal(format!("PKCS#11 error: {e}"))
}

pub(crate) struct Pkcs11Backend {
    module: String,
    pin: String,
    key_id: [u8; 2],
}

impl Pkcs11Backend {
    pub(crate) fn new(config: &backend::Pkcs11) -> Self {
        Self {
            module: config.module.clone(),
            pin: config.pin.clone(),
            key_id: config.key_id.to_be_bytes(),
        }
    }

    /// Run `op` against the configured key, in a fresh logged-in session.
    fn with_key<T>(&self, op: impl FnOnce(&Session, ObjectHandle) -> Result<T>) -> Result<T> {
        let pkcs11 = Pkcs11::new(&self.module).map_err(hsm_err)?;
        pkcs11
            .initialize(CInitializeArgs::OsThreads)
            .map_err(hsm_err)?;

        let res = self.in_session(&pkcs11, op);

        pkcs11.finalize();
        debug!("closed PKCS#11 module {}", self.module);

        res
    }

    fn in_session<T>(
        &self,
        pkcs11: &Pkcs11,
        op: impl FnOnce(&Session, ObjectHandle) -> Result<T>,
    ) -> Result<T> {
        let slot = pkcs11
            .get_slots_with_token()
            .map_err(hsm_err)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("no PKCS#11 slot with a token found".to_string()))?;

        let session = pkcs11.open_ro_session(slot).map_err(hsm_err)?;
        session
            .login(UserType::User, Some(&AuthPin::new(self.pin.clone())))
            .map_err(hsm_err)?;

        let res = session
            .find_objects(&[
                Attribute::Class(ObjectClass::SECRET_KEY),
                Attribute::Id(self.key_id.to_vec()),
            ])
            .map_err(hsm_err)
            .and_then(|objects| {
                objects.into_iter().next().ok_or_else(|| {
                    Error::Internal(format!(
                        "no secret key with id {:02x}{:02x} on token",
                        self.key_id[0], self.key_id[1]
                    ))
                })
            })
            .and_then(|key| op(&session, key));

        session.logout().map_err(hsm_err)?;

        res
    }
}

impl EncryptionBackend for Pkcs11Backend {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = self.with_key(|session, key| {
            session
                .encrypt(&Mechanism::AesCbcPad(iv), key, plaintext)
                .map_err(hsm_err)
        })?;

        let mut sealed = Vec::with_capacity(IV_SIZE + ciphertext.len());
        sealed.extend_from_slice(&iv);
        sealed.extend_from_slice(&ciphertext);

        Ok(sealed)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < IV_SIZE {
            return Err(Error::Internal("encrypted data is too short".to_string()));
        }

        let (iv, ciphertext) = sealed.split_at(IV_SIZE);
        let iv: [u8; IV_SIZE] = iv
            .try_into()
            .map_err(|_| Error::Internal("invalid IV".to_string()))?;

        self.with_key(|session, key| {
            session
                .decrypt(&Mechanism::AesCbcPad(iv), key, ciphertext)
                .map_err(hsm_err)
        })
    }
}
