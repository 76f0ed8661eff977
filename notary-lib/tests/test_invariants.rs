// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

use anyhow::{anyhow, Result};
use notary_lib::{CaStatus, Error, Filter, Notary};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

mod util;

use util::{ExternalRoot, HOSTNAME};

/// Check the status/certificate pairing of all CSR and CA rows.
fn check_pairings(db: &str) -> Result<()> {
    let sqlite = util::sqlite(db)?;

    let bad_csrs: i64 = sqlite.query_row(
        "SELECT COUNT(*) FROM certificate_requests WHERE \
         (status = 'Active') != (certificate_id IS NOT NULL)",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(bad_csrs, 0);

    let bad_cas: i64 = sqlite.query_row(
        "SELECT COUNT(*) FROM certificate_authorities WHERE \
         (status = 'pending') != (certificate_id IS NULL)",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(bad_cas, 0);

    // an active CSR's certificate is never gone
    let dangling: i64 = sqlite.query_row(
        "SELECT COUNT(*) FROM certificate_requests r WHERE r.certificate_id IS NOT NULL AND \
         NOT EXISTS (SELECT 1 FROM certificates c WHERE c.certificate_id = r.certificate_id)",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(dangling, 0);

    // every CA has its CSR and private key
    let orphans: i64 = sqlite.query_row(
        "SELECT COUNT(*) FROM certificate_authorities a WHERE \
         NOT EXISTS (SELECT 1 FROM certificate_requests r WHERE r.csr_id = a.csr_id) OR \
         NOT EXISTS (SELECT 1 FROM private_keys k WHERE k.private_key_id = a.private_key_id)",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(orphans, 0);

    Ok(())
}

/// Operations may fail on bad preconditions, but never with an internal error.
fn expect_handled<T>(res: notary_lib::Result<T>) -> Result<()> {
    match res {
        Ok(_) => Ok(()),
        Err(Error::Internal(msg)) => Err(anyhow!("internal error: {msg}")),
        Err(_) => Ok(()),
    }
}

/// A chain for `csr_pem`, issued by a CA outside of Notary
fn external_chain(ext: &ExternalRoot, csr_pem: &str, ca: bool) -> Result<String> {
    let cert = util::external_sign(ext, csr_pem, ca)?;
    Ok(notary_lib::chain::join_chain(&[cert.as_str(), ext.cert_pem.as_str()]))
}

fn random_step(
    notary: &Notary,
    ext: &ExternalRoot,
    rng: &mut StdRng,
    step: usize,
) -> Result<()> {
    let csrs: Vec<i32> = notary.csr_list()?.iter().map(|c| c.id).collect();
    let cas: Vec<i32> = notary.ca_list()?.iter().map(|c| c.id).collect();

    let pick = |rng: &mut StdRng, ids: &[i32]| -> i32 {
        if ids.is_empty() {
            // some id that doesn't exist
            1000
        } else {
            ids[rng.gen_range(0..ids.len())]
        }
    };

    match rng.gen_range(0..18) {
        0 => {
            let cn = format!("ca{step}.example.org");
            expect_handled(notary.ca_generate(
                &notary_lib::CaParams {
                    common_name: cn,
                    self_signed: rng.gen_bool(0.5),
                    ..Default::default()
                },
                HOSTNAME,
            ))
        }
        1 | 2 => {
            let (csr_pem, _) = util::make_csr(&format!("host{step}.example.org"), &[])?;
            expect_handled(notary.csr_create(&csr_pem, None))
        }
        3 | 4 => {
            let csr = pick(rng, &csrs);
            let ca = pick(rng, &cas);
            expect_handled(notary.ca_sign_csr(&Filter::Id(csr), &Filter::Id(ca), HOSTNAME))
        }
        5 => expect_handled(notary.revoke(&Filter::Id(pick(rng, &csrs)))),
        6 => expect_handled(notary.csr_reject(&Filter::Id(pick(rng, &csrs)))),
        7 => expect_handled(notary.csr_delete(&Filter::Id(pick(rng, &csrs)))),
        8 => {
            let status = match rng.gen_range(0..4) {
                0 => CaStatus::Pending,
                1 => CaStatus::Active,
                2 => CaStatus::Legacy,
                _ => CaStatus::Expired,
            };
            expect_handled(notary.ca_set_status(&Filter::Id(pick(rng, &cas)), status))
        }
        9 => expect_handled(notary.ca_delete(&Filter::Id(pick(rng, &cas)))),
        10 => {
            // attach to its own CSR, or to some other one that doesn't match
            let (csr_pem, _) = util::make_csr(&format!("ext{step}.example.org"), &[])?;
            let chain = external_chain(ext, &csr_pem, false)?;
            if rng.gen_bool(0.5) {
                let csr = notary.csr_create(&csr_pem, None)?;
                expect_handled(notary.csr_attach_chain(&Filter::Id(csr.id), &chain))
            } else {
                expect_handled(notary.csr_attach_chain(&Filter::Id(pick(rng, &csrs)), &chain))
            }
        }
        11 => {
            let (csr_pem, key_pem) = util::make_csr(&format!("imported{step}"), &[])?;
            expect_handled(notary.ca_create(&csr_pem, &key_pem, "", "", None))
        }
        12 => {
            let (csr_pem, key_pem) = util::make_csr(&format!("imported{step}"), &[])?;
            let chain = external_chain(ext, &csr_pem, true)?;
            expect_handled(notary.ca_create(&csr_pem, &key_pem, &ext.crl_pem, &chain, None))
        }
        13 => match notary.ca_get(&Filter::Id(pick(rng, &cas))) {
            Ok(ca) => {
                let chain = external_chain(ext, &ca.csr_pem, true)?;
                expect_handled(notary.ca_update_chain(&Filter::Id(ca.id), &chain))
            }
            Err(e) => expect_handled::<()>(Err(e)),
        },
        14 => {
            let enabled = rng.gen_bool(0.5);
            expect_handled(notary.ca_set_enabled(&Filter::Id(pick(rng, &cas)), enabled))
        }
        15 => {
            let user = notary.user_add(&format!("user{step}"))?;
            let (csr_pem, _) = util::make_csr(&format!("owned{step}.example.org"), &[])?;
            expect_handled(notary.csr_create(&csr_pem, Some(user)))
        }
        16 => {
            // ids are handed out in order, some are gone already
            let user = rng.gen_range(1..=step as i32 + 1);
            expect_handled(notary.user_delete(user))
        }
        _ => {
            // a CSR's chain attached to another CSR
            let chains: Vec<String> = notary
                .csr_list()?
                .into_iter()
                .map(|c| c.certificate_chain)
                .filter(|c| !c.is_empty())
                .collect();
            match chains.first() {
                Some(chain) => {
                    expect_handled(notary.csr_attach_chain(&Filter::Id(pick(rng, &csrs)), chain))
                }
                None => Ok(()),
            }
        }
    }
}

#[test]
fn test_random_operations() -> Result<()> {
    let (_dir, db, notary) = util::setup_software()?;

    let mut rng = StdRng::seed_from_u64(0x6e6f74617279);

    // start with something to work on
    util::generate_root(&notary, "Example Root CA")?;
    let ext = util::external_root("External Root CA")?;

    for step in 0..120 {
        random_step(&notary, &ext, &mut rng, step)?;
        check_pairings(&db)?;

        // all views can be built, whatever happened before
        notary.csr_list()?;
        notary.ca_list()?;
    }

    Ok(())
}
