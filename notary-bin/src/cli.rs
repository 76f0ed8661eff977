// SPDX-FileCopyrightText: 2019-2023 Heiko Schaefer <heiko@schaefer.name>
// SPDX-License-Identifier: GPL-3.0-or-later
//
// This file is part of Notary

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "notary",
    author = "Heiko Schäfer <heiko@schaefer.name>",
    about = "Notary is a tool for running a private X.509 certificate authority.",
    disable_help_subcommand = true
)]
pub struct Cli {
    /// SQLite database file
    #[arg(value_name = "FILE", short = 'd', long = "database", env = "NOTARY_DB", global = true)]
    pub database: Option<String>,

    /// Encryption backend configuration (empty for software,
    /// or "pkcs11;<module>;<pin>;<key id>")
    #[arg(long = "backend", env = "NOTARY_BACKEND", hide_env_values = true, global = true)]
    pub backend: Option<String>,

    /// Hostname under which CRLs are published
    #[arg(
        long = "hostname",
        env = "NOTARY_EXTERNAL_HOSTNAME",
        default_value = "localhost",
        global = true
    )]
    pub hostname: String,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage certificate signing requests
    Csr {
        #[command(subcommand)]
        cmd: CsrCommand,
    },

    /// Manage certificate authorities
    Ca {
        #[command(subcommand)]
        cmd: CaCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum CsrCommand {
    /// Add a CSR (PEM file)
    Add {
        csr: PathBuf,

        /// Id of the owning user
        #[arg(long = "owner")]
        owner: Option<i32>,
    },

    /// List all CSRs
    List,

    /// Show a CSR and its certificate chain
    Show { id: i32 },

    /// Reject an outstanding CSR
    Reject { id: i32 },

    /// Delete a CSR
    Delete { id: i32 },

    /// Attach a certificate chain (PEM file, leaf first) to a CSR
    Attach { id: i32, chain: PathBuf },

    /// Revoke the certificate of a CSR
    Revoke { id: i32 },
}

#[derive(Subcommand, Debug)]
pub enum CaCommand {
    /// Generate a new CA
    Generate {
        /// Common name
        #[arg(long = "cn")]
        common_name: String,

        #[arg(long = "org")]
        organization: Option<String>,

        #[arg(long = "ou")]
        organizational_unit: Option<String>,

        #[arg(long = "country")]
        country: Option<String>,

        #[arg(long = "state")]
        state: Option<String>,

        #[arg(long = "locality")]
        locality: Option<String>,

        /// Subject alternative name (DNS name or IP address)
        #[arg(long = "san")]
        sans: Vec<String>,

        /// Create a self-signed root, instead of a pending CA
        #[arg(long = "self-signed")]
        self_signed: bool,
    },

    /// Import a CA from existing CSR, private key, and (optionally) chain and CRL
    Import {
        #[arg(long = "csr")]
        csr: PathBuf,

        #[arg(long = "key")]
        key: PathBuf,

        #[arg(long = "chain", requires = "crl")]
        chain: Option<PathBuf>,

        #[arg(long = "crl")]
        crl: Option<PathBuf>,
    },

    /// List all CAs
    List,

    /// Show a CA
    Show { id: i32 },

    /// Sign a CSR with a CA
    Sign {
        /// Id of the signing CA
        #[arg(long = "ca")]
        ca: i32,

        /// Id of the CSR to sign
        #[arg(long = "csr")]
        csr: i32,
    },

    /// Enable a CA (status 'active')
    Enable { id: i32 },

    /// Disable a CA (status 'legacy')
    Disable { id: i32 },

    /// Set the status of a CA (pending, active, legacy, expired)
    Status { id: i32, status: String },

    /// Set a new certificate chain (PEM file, leaf first) for a CA
    UpdateChain { id: i32, chain: PathBuf },

    /// Delete a CA, its CSR and its private key
    Delete { id: i32 },

    /// Print the CRL of a CA
    Crl { id: i32 },
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_sign() {
        let cli = Cli::parse_from([
            "notary", "-d", "/tmp/n.sqlite", "ca", "sign", "--ca", "1", "--csr", "2",
        ]);

        assert_eq!(cli.database.as_deref(), Some("/tmp/n.sqlite"));
        assert!(matches!(
            cli.cmd,
            Commands::Ca {
                cmd: CaCommand::Sign { ca: 1, csr: 2 }
            }
        ));
    }

    #[test]
    fn import_chain_requires_crl() {
        let res = Cli::try_parse_from([
            "notary", "ca", "import", "--csr", "ca.csr", "--key", "ca.key", "--chain", "chain.pem",
        ]);
        assert!(res.is_err());
    }
}
