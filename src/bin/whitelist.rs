//! Offline tooling for whitelist content files.
//!
//!   whitelist build  --input list.csv --output content.json [--ether] [--append]
//!   whitelist verify --content content.json
//!   whitelist proof  --content content.json --address 0x.. [--address 0x..]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use whitelist_tree::adapters::memory_store::InMemoryDatastore;
use whitelist_tree::domain::leaf::{parse_account, parse_amount};
use whitelist_tree::domain::record::{read_content, write_content};
use whitelist_tree::domain::tree::WhitelistTree;
use whitelist_tree::resolver::EntitlementResolver;
use whitelist_tree::server::routes::AmountAndProof;
use whitelist_tree::store::TreeStore;

#[derive(Parser)]
#[command(name = "whitelist", about = "Build, check and query whitelist content files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a tree from `address,amount` rows and write it as a content file
    Build {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Amounts are decimal ether and get converted to wei
        #[arg(long)]
        ether: bool,
        /// Add the tree to an existing content file instead of replacing it
        #[arg(long)]
        append: bool,
    },

    /// Rebuild every tree in a content file and check its root
    Verify {
        #[arg(long)]
        content: PathBuf,
    },

    /// Print the entitlement and proof of each address as JSON
    Proof {
        #[arg(long)]
        content: PathBuf,
        #[arg(long = "address", required = true)]
        addresses: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Build {
            input,
            output,
            ether,
            append,
        } => build(&input, &output, ether, append),
        Commands::Verify { content } => verify(&content),
        Commands::Proof { content, addresses } => proof(&content, addresses).await,
    }
}

fn build(input: &Path, output: &Path, ether: bool, append: bool) -> Result<()> {
    let csv = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let entries = parse_rows(&csv, ether)?;
    let tree = WhitelistTree::from_entries(&entries)?;
    tree.self_check()?;

    let mut trees = if append && output.exists() {
        read_content(output).with_context(|| format!("reading {}", output.display()))?
    } else {
        Vec::new()
    };
    if trees.iter().any(|t| t.root() == tree.root()) {
        bail!("{} already contains root {}", output.display(), tree.root());
    }
    trees.push(tree);
    write_content(output, &trees)?;

    let tree = &trees[trees.len() - 1];
    info!(root = %tree.root(), leaves = tree.len(), depth = tree.merkle().depth(), "tree written");
    println!("{}", tree.root());
    Ok(())
}

fn verify(content: &Path) -> Result<()> {
    // read_content rebuilds each tree and rejects a claimed root that differs.
    let trees = read_content(content).with_context(|| format!("checking {}", content.display()))?;
    for tree in &trees {
        tree.self_check()?;
        println!("{}  {} leaves  ok", tree.root(), tree.len());
    }
    info!(trees = trees.len(), "content file verified");
    Ok(())
}

async fn proof(content: &Path, addresses: Vec<String>) -> Result<()> {
    let trees = read_content(content).with_context(|| format!("reading {}", content.display()))?;

    let store = Arc::new(TreeStore::new(InMemoryDatastore::new()));
    for tree in &trees {
        store.publish_if_absent(tree).await?;
    }
    let resolver = Arc::new(EntitlementResolver::new(store));

    let results = resolver.resolve_many(addresses.clone()).await;
    let mut answers = Vec::with_capacity(results.len());
    for (address, result) in addresses.iter().zip(results) {
        let answer: AmountAndProof = result
            .with_context(|| format!("resolving {address}"))?
            .into();
        answers.push(serde_json::json!({ "address": address, "result": answer }));
    }
    println!("{}", serde_json::to_string_pretty(&answers)?);
    Ok(())
}

/// Parse `address,amount` rows. Blank lines and `#` comments are skipped, as
/// is a leading header row.
fn parse_rows(csv: &str, ether: bool) -> Result<Vec<(Address, U256)>> {
    let mut entries = Vec::new();
    for (i, line) in csv.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((account, amount)) = line.split_once(',') else {
            bail!("line {}: expected `address,amount`", i + 1);
        };
        let (account, amount) = (account.trim(), amount.trim());
        if entries.is_empty() && account.eq_ignore_ascii_case("address") {
            continue;
        }

        let account = parse_account(account).with_context(|| format!("line {}", i + 1))?;
        let amount = if ether {
            parse_ether(amount).with_context(|| format!("line {}: invalid ether amount", i + 1))?
        } else {
            parse_amount(amount).with_context(|| format!("line {}", i + 1))?
        };
        entries.push((account, amount));
    }

    if entries.is_empty() {
        bail!("no rows to build a tree from");
    }
    Ok(entries)
}
