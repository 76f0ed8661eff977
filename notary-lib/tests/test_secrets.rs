// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

use anyhow::Result;
use base64::{engine::general_purpose, Engine};
use notary_lib::{Backend, Notary, Uninit, JWT_SECRET_LEN};

mod util;

#[test]
fn test_private_keys_at_rest_software() -> Result<()> {
    let (_dir, db, notary) = util::setup_software()?;

    test_private_keys_at_rest(notary, &db)
}

#[test]
#[cfg_attr(not(feature = "pkcs11"), ignore)]
fn test_private_keys_at_rest_pkcs11() -> Result<()> {
    let (_dir, db, notary) = util::setup_pkcs11()?;

    test_private_keys_at_rest(notary, &db)
}

/// The database never contains a private key in the clear.
fn test_private_keys_at_rest(notary: Notary, db: &str) -> Result<()> {
    util::generate_root(&notary, "Example Root CA")?;
    util::generate_pending(&notary, "Example Pending CA")?;

    let ext = util::external_root("Imported CA")?;
    notary.ca_create(&ext.csr_pem, &ext.key_pem, "", "", None)?;

    let sqlite = util::sqlite(db)?;
    let mut stmt = sqlite.prepare("SELECT private_key FROM private_keys")?;
    let stored = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    assert_eq!(stored.len(), 3);
    for key in &stored {
        assert!(!key.contains("PRIVATE KEY"));

        let ciphertext = general_purpose::STANDARD.decode(key)?;
        assert!(!ciphertext.is_empty());
        assert!(!String::from_utf8_lossy(&ciphertext).contains("PRIVATE KEY"));
    }

    // the imported key doesn't show up in plain text
    let body = ext
        .key_pem
        .lines()
        .find(|l| !l.starts_with("-----"))
        .unwrap_or_default()
        .to_string();
    assert!(!body.is_empty());

    let hits: i64 = sqlite.query_row(
        "SELECT COUNT(*) FROM private_keys WHERE private_key LIKE '%' || ?1 || '%'",
        [&body],
        |row| row.get(0),
    )?;
    assert_eq!(hits, 0);

    Ok(())
}

#[test]
fn test_software_key_is_persistent() -> Result<()> {
    let (_dir, db) = util::setup_db()?;

    let notary = Uninit::new(Some(&db))?.init_software()?;
    assert_eq!(notary.backend(), &Backend::Software);

    let root = util::generate_root(&notary, "Example Root CA")?;
    drop(notary);

    // a second instance on the same database can use the stored CA key
    let notary = Notary::open(Some(&db), None)?;
    let (csr_pem, _) = util::make_csr("www.example.org", &[])?;
    let csr = notary.csr_create(&csr_pem, None)?;
    notary.ca_sign_csr(
        &notary_lib::Filter::Id(csr.id),
        &notary_lib::Filter::Id(root.id),
        util::HOSTNAME,
    )?;

    assert_eq!(util::count_rows(&db, "encryption_keys")?, 1);

    Ok(())
}

#[test]
fn test_jwt_secret_software() -> Result<()> {
    let (_dir, db, notary) = util::setup_software()?;

    let secret = notary.jwt_secret()?;
    assert_eq!(secret.len(), JWT_SECRET_LEN);

    assert_eq!(notary.jwt_secret()?, secret);
    drop(notary);

    let notary = Uninit::new(Some(&db))?.init_software()?;
    assert_eq!(notary.jwt_secret()?, secret);

    // stored encrypted
    let sqlite = util::sqlite(&db)?;
    let stored: String =
        sqlite.query_row("SELECT encrypted_secret FROM jwt_secret", [], |row| row.get(0))?;
    assert_ne!(general_purpose::STANDARD.decode(stored)?, secret);

    // a different database has a different secret
    let (_dir2, _db2, other) = util::setup_software()?;
    assert_ne!(other.jwt_secret()?, secret);

    Ok(())
}

#[test]
#[cfg_attr(not(feature = "pkcs11"), ignore)]
fn test_jwt_secret_pkcs11() -> Result<()> {
    let (_dir, db, notary) = util::setup_pkcs11()?;

    let secret = notary.jwt_secret()?;
    assert_eq!(secret.len(), JWT_SECRET_LEN);
    drop(notary);

    let notary = Uninit::new(Some(&db))?.init(&util::pkcs11_config()?)?;
    assert_eq!(notary.jwt_secret()?, secret);

    Ok(())
}

#[test]
fn test_missing_database_config() {
    std::env::remove_var(notary_lib::ENV_DB);

    assert!(matches!(
        Uninit::new(None),
        Err(notary_lib::Error::InvalidInput(_))
    ));
}
