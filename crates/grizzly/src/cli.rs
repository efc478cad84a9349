//! Subcommand handlers

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use grizzly::cluster::{LocalParticipant, ParticipantServer};
use grizzly::common::config::Config;
use grizzly::storage::wal::{apply_entries, read_log};
use grizzly::storage::{BackendRegistry, BlockStore, Table};
use grizzly::Engine;

async fn recovered(config: Config) -> Result<Engine> {
    let mut engine = Engine::open(config).await?;
    engine.recover().await?;
    Ok(engine)
}

/// Recover the data directory and serve its tables until ctrl-c
pub async fn serve(config: Config, listen: &str) -> Result<()> {
    let engine = recovered(config).await?;
    let tables: HashMap<String, Table> = engine
        .tables()
        .into_iter()
        .filter_map(|name| engine.table(name).map(|t| (name.to_string(), t.clone())))
        .collect();
    info!("Serving {} tables", tables.len());

    let server = ParticipantServer::bind(listen).await?;
    let handler = Arc::new(LocalParticipant::with_tables(tables));
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
    };
    server.run_until(handler, shutdown).await?;
    Ok(())
}

pub async fn query(config: Config, text: &str, format: &str) -> Result<String> {
    let engine = recovered(config).await?;
    let result = engine.query(text);
    let output = match format {
        "table" => result.to_table(),
        "json" => serde_json::to_string_pretty(&result.to_json())?,
        other => bail!("unknown output format {:?}", other),
    };
    if let Some(e) = result.error() {
        bail!("{}\n{}", output, e);
    }
    Ok(output)
}

/// Recovery verifies every chain before trusting it
pub async fn verify(config: Config) -> Result<String> {
    let engine = recovered(config).await?;
    let mut lines = Vec::new();
    for name in engine.tables() {
        let (blocks, head) = engine
            .chain(name)
            .map_or((0, String::new()), |c| (c.len(), c.head_hash().to_string()));
        lines.push(format!("{}: {} blocks, head {}", name, blocks, head));
    }
    lines.push("all chains verified".to_string());
    Ok(lines.join("\n"))
}

/// Load one chain directory and verify it without touching the WAL
pub async fn verify_dir(dir: &str) -> Result<String> {
    let store = BlockStore::load(Path::new(dir)).await?;
    store
        .verify_chain()
        .with_context(|| format!("chain in {} failed verification", dir))?;
    Ok(format!(
        "{}: {} blocks, head {}",
        dir,
        store.len(),
        store.head_hash()
    ))
}

/// Replay a log on top of the last checkpointed chain heads and summarize
/// the result
pub async fn replay(config: &Config, wal: Option<&str>) -> Result<String> {
    let path = wal.map_or_else(|| config.storage.wal_path(), Into::into);
    let entries = read_log(&path, &config.storage.wal)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let mut kinds: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in &entries {
        *kinds.entry(entry.op.kind()).or_default() += 1;
    }

    let backend = BackendRegistry::with_defaults().resolve(&config.storage)?;
    let mut catalog: HashMap<String, Table> = HashMap::new();
    for name in backend.chains().await? {
        if let Some(head) = backend.restore(&name).await?.head() {
            catalog.insert(name, head.data().clone());
        }
    }
    let applied = apply_entries(&entries, &mut catalog, None)?;

    let mut lines = vec![format!("{} entries, {} applied", entries.len(), applied)];
    lines.extend(kinds.iter().map(|(kind, n)| format!("  {}: {}", kind, n)));
    let mut names: Vec<&String> = catalog.keys().collect();
    names.sort();
    for name in names {
        lines.push(format!("{}: {} rows", name, catalog[name].num_rows()));
    }
    Ok(lines.join("\n"))
}
