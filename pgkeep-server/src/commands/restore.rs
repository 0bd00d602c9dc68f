use pgkeep::catalog::Catalog;
use pgkeep::encryption::Encryptor;
use pgkeep::lock::RestoreLock;
use pgkeep::process::ToolCommand;
use pgkeep::remote::RcloneConnector;
use pgkeep::restore::{BackupSelector, Restore};
use pgkeep::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub async fn run(
    config: Config,
    source: &str,
    selector: BackupSelector,
    timeout: Duration,
) -> anyhow::Result<()> {
    let catalog = Arc::new(Catalog::from_config(&config, Arc::new(RcloneConnector::new())));
    let encryptor = Encryptor::from_key(config.encryption_key())?;
    let restore = Restore::new(
        catalog,
        Arc::new(RestoreLock::new()),
        ToolCommand::pg_restore(&config.database),
        encryptor,
    );

    let file = restore.run(source, &selector, Instant::now() + timeout).await?;
    println!(
        "Restored {} [{}] from {} into {}",
        file.name, file.short_id, source, config.database.name
    );
    Ok(())
}
