//! Operator key generator and agreement signer for sourcing-gateway.
//!
//! `generate` creates a new operator key for registry writes and saves it to
//! a file. `sign` plays the wallet: it signs the agreement message for a
//! nonce and prints a request body ready for `POST /verify`.
//!
//! Usage:
//!   gateway-keygen generate [output-dir]
//!   gateway-keygen sign --key <hex> --nonce <nonce> [--tx-hash <hash>]

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use sourcing_gateway::chain::parse_operator_key;
use sourcing_gateway::identity::{agreement_message, canonical_address};
use sourcing_gateway::VerifyRequest;
use std::fs;
use std::path::PathBuf;

/// Key utility for sourcing-gateway operators.
#[derive(Parser, Debug)]
#[command(name = "gateway-keygen")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new operator key.
    Generate {
        /// Directory to write `operator.key` into.
        output_dir: Option<PathBuf>,
    },
    /// Sign the agreement message for a nonce.
    Sign {
        /// Hex private key of the signing wallet.
        #[arg(long, env = "GATEWAY_SIGNING_KEY", hide_env_values = true)]
        key: String,
        /// Agreement nonce.
        #[arg(long)]
        nonce: String,
        /// Payment transaction to reference.
        #[arg(long)]
        tx_hash: Option<String>,
    },
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    match Cli::parse().command {
        Command::Generate { output_dir } => generate(output_dir),
        Command::Sign {
            key,
            nonce,
            tx_hash,
        } => sign(&key, nonce, tx_hash),
    }
}

fn generate(output_dir: Option<PathBuf>) -> color_eyre::Result<()> {
    let output_dir = match output_dir {
        Some(dir) => dir,
        None => std::env::current_dir().wrap_err("Failed to get current directory")?,
    };
    fs::create_dir_all(&output_dir).wrap_err("Failed to create output directory")?;

    let signer = PrivateKeySigner::random();
    let key_hex = format!("0x{}", hex::encode(signer.to_bytes()));

    let key_path = output_dir.join("operator.key");
    if key_path.exists() {
        return Err(eyre!("{} already exists, refusing to overwrite", key_path.display()));
    }
    fs::write(&key_path, &key_hex).wrap_err("Failed to write operator key")?;

    println!("Operator address: {}", canonical_address(&signer.address()));
    println!("Private key saved to: {}", key_path.display());
    println!("  WARNING: Keep this file secure! It controls registry writes.");
    println!("\nFund the operator address with gas, then start the gateway with:");
    println!("  GATEWAY_OPERATOR_KEY=$(cat {}) sourcing-gateway", key_path.display());
    Ok(())
}

fn sign(key: &str, nonce: String, tx_hash: Option<String>) -> color_eyre::Result<()> {
    let signer = parse_operator_key(key)?;
    let signature = signer
        .sign_message_sync(agreement_message(&nonce).as_bytes())
        .wrap_err("Failed to sign agreement")?;

    let request = VerifyRequest {
        address: canonical_address(&signer.address()),
        signature: format!("0x{}", hex::encode(signature.as_bytes())),
        nonce,
        tx_hash,
    };
    println!("{}", serde_json::to_string_pretty(&request)?);
    Ok(())
}
