use std::sync::Arc;

use anyhow::{bail, Context, Result};

use studio_uplink::manager::{FileSpec, UploadEvent, UploadManager, UploadManagerConfig};
use studio_uplink::protocol::HttpStorageClient;
use studio_uplink::session::LedgerStore;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let base_url = match args.next() {
        Some(url) => url,
        None => {
            eprintln!("Usage: uplink <backend-base-url> <file> [file...]");
            eprintln!();
            eprintln!("Environment:");
            eprintln!("  UPLINK_TOKEN    bearer token for the backend");
            eprintln!("  UPLINK_PROJECT  destination project id");
            eprintln!("  UPLINK_DB       sqlite path for resumable ledgers");
            std::process::exit(2);
        }
    };
    let paths: Vec<String> = args.collect();
    if paths.is_empty() {
        bail!("no files to upload");
    }

    println!("studio-uplink");
    println!("=============\n");

    let mut client = HttpStorageClient::new(&base_url);
    if let Ok(token) = std::env::var("UPLINK_TOKEN") {
        client = client.with_bearer_token(token);
    }

    let store = match std::env::var("UPLINK_DB") {
        Ok(path) => Some(Arc::new(
            LedgerStore::new(&path)
                .await
                .context("failed to open ledger store")?,
        )),
        Err(_) => None,
    };

    let config = UploadManagerConfig {
        project_id: std::env::var("UPLINK_PROJECT").ok(),
        ..Default::default()
    };

    let manager = UploadManager::new(Arc::new(client), config, store.clone());
    let mut events = manager
        .take_events()
        .context("event stream already taken")?;

    if store.is_some() {
        let recovered = manager.recover().await?;
        for snapshot in &recovered {
            println!(
                "↻ Recovered {} ({}/{} parts), resuming",
                snapshot.file_name, snapshot.uploaded_parts, snapshot.total_chunks
            );
            manager.resume(&snapshot.id).await?;
        }
    }

    let mut specs = Vec::new();
    for path in &paths {
        specs.push(
            FileSpec::from_path(path)
                .await
                .with_context(|| format!("cannot read {path}"))?,
        );
    }

    let admission = manager.admit(specs).await;
    for rejected in &admission.rejected {
        eprintln!("✗ {} rejected: {}", rejected.file_name, rejected.reason);
    }
    if manager.session_count() == 0 {
        bail!("no files accepted");
    }

    println!("✓ {} file(s) queued\n", admission.accepted.len());

    let mut remaining = manager.session_count();
    while remaining > 0 {
        match events.recv().await {
            Some(UploadEvent::SessionProgress { snapshot }) => {
                let eta = snapshot
                    .eta_seconds
                    .map(|s| format!(" (~{s:.0}s left)"))
                    .unwrap_or_default();
                println!(
                    "  {} {:5.1}%  {}/{} parts{eta}",
                    snapshot.file_name,
                    snapshot.progress_percent,
                    snapshot.uploaded_parts,
                    snapshot.total_chunks
                );
            }
            Some(UploadEvent::SessionCompleted { session_id: _, asset }) => {
                println!("✓ Completed: {} -> {}", asset.asset_id, asset.storage_path);
                remaining -= 1;
            }
            Some(UploadEvent::SessionFailed { session_id, reason }) => {
                eprintln!("✗ Failed ({session_id}): {reason}");
                remaining -= 1;
            }
            Some(UploadEvent::BatchCompleted { items }) => {
                println!("\n✓ Batch complete: {} asset(s) stored", items.len());
            }
            Some(_) => {}
            None => break,
        }
    }

    let progress = manager.overall_progress();
    println!(
        "\nDone: {} completed, {} failed, {} bytes uploaded",
        progress.completed, progress.failed, progress.bytes_uploaded
    );

    if progress.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
