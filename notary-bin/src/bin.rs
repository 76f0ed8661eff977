// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches};
use notary_lib::{CaParams, CaStatus, CaView, CsrView, Filter, Notary};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli;

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_csr(csr: &CsrView) {
    println!("CSR {} [{}]", csr.id, csr.status);
    if let Some(owner) = csr.owner_id {
        println!("  owner: user {owner}");
    }
    println!("{}", csr.csr_pem);
    if !csr.certificate_chain.is_empty() {
        println!("{}", csr.certificate_chain);
    }
}

fn print_ca(ca: &CaView) {
    println!(
        "CA {} [{}{}]",
        ca.id,
        ca.status,
        if ca.enabled { ", enabled" } else { "" }
    );
    println!("{}", ca.csr_pem);
    if !ca.certificate_chain.is_empty() {
        println!("{}", ca.certificate_chain);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let version = format!(
        "{} (notary-lib {})",
        env!("CARGO_PKG_VERSION"),
        notary_lib::VERSION,
    );

    let cli = cli::Cli::command().version(version);

    let c = cli::Cli::from_arg_matches(&cli.get_matches())?;

    let notary = Notary::open(c.database.as_deref(), c.backend.as_deref())?;
    debug!("using encryption backend: {}", notary.backend());
    let hostname = c.hostname.as_str();

    match c.cmd {
        cli::Commands::Csr { cmd } => match cmd {
            cli::CsrCommand::Add { csr, owner } => {
                let csr = notary.csr_create(&read(&csr)?, owner)?;
                println!("Added CSR {}", csr.id);
            }
            cli::CsrCommand::List => {
                for csr in notary.csr_list()? {
                    let certified = if csr.certificate_chain.is_empty() {
                        ""
                    } else {
                        " (certificate attached)"
                    };
                    println!("{:>5} {}{}", csr.id, csr.status, certified);
                }
            }
            cli::CsrCommand::Show { id } => {
                print_csr(&notary.csr_get(&Filter::Id(id))?);
            }
            cli::CsrCommand::Reject { id } => {
                notary.csr_reject(&Filter::Id(id))?;
            }
            cli::CsrCommand::Delete { id } => {
                notary.csr_delete(&Filter::Id(id))?;
            }
            cli::CsrCommand::Attach { id, chain } => {
                notary.csr_attach_chain(&Filter::Id(id), &read(&chain)?)?;
            }
            cli::CsrCommand::Revoke { id } => {
                notary.revoke(&Filter::Id(id))?;
            }
        },
        cli::Commands::Ca { cmd } => match cmd {
            cli::CaCommand::Generate {
                common_name,
                organization,
                organizational_unit,
                country,
                state,
                locality,
                sans,
                self_signed,
            } => {
                let params = CaParams {
                    common_name,
                    organization,
                    organizational_unit,
                    country,
                    state,
                    locality,
                    sans,
                    self_signed,
                    not_valid_after: None,
                };

                let ca = notary.ca_generate(&params, hostname)?;
                println!("Generated CA {} [{}]", ca.id, ca.status);
            }
            cli::CaCommand::Import {
                csr,
                key,
                chain,
                crl,
            } => {
                let chain = chain.as_deref().map(read).transpose()?.unwrap_or_default();
                let crl = crl.as_deref().map(read).transpose()?.unwrap_or_default();

                let ca = notary.ca_create(&read(&csr)?, &read(&key)?, &crl, &chain, None)?;
                println!("Imported CA {} [{}]", ca.id, ca.status);
            }
            cli::CaCommand::List => {
                for ca in notary.ca_list()? {
                    println!("{:>5} {}", ca.id, ca.status);
                }
            }
            cli::CaCommand::Show { id } => {
                print_ca(&notary.ca_get(&Filter::Id(id))?);
            }
            cli::CaCommand::Sign { ca, csr } => {
                let cert = notary.ca_sign_csr(&Filter::Id(csr), &Filter::Id(ca), hostname)?;
                println!("{cert}");
            }
            cli::CaCommand::Enable { id } => {
                notary.ca_set_enabled(&Filter::Id(id), true)?;
            }
            cli::CaCommand::Disable { id } => {
                notary.ca_set_enabled(&Filter::Id(id), false)?;
            }
            cli::CaCommand::Status { id, status } => {
                notary.ca_set_status(&Filter::Id(id), CaStatus::from_str(&status)?)?;
            }
            cli::CaCommand::UpdateChain { id, chain } => {
                notary.ca_update_chain(&Filter::Id(id), &read(&chain)?)?;
            }
            cli::CaCommand::Delete { id } => {
                notary.ca_delete(&Filter::Id(id))?;
            }
            cli::CaCommand::Crl { id } => {
                println!("{}", notary.ca_crl(&Filter::Id(id))?);
            }
        },
    }

    Ok(())
}
