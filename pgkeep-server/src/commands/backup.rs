use pgkeep::coordinator::{Collaborators, Coordinator};
use pgkeep::utils::{format_bytes, format_duration};
use pgkeep::Config;
use std::time::Duration;

/// Manual backup: local by default, or to `provider` (plus local with `also_local`).
pub async fn run(
    config: Config,
    provider: Option<String>,
    also_local: bool,
    timeout: Duration,
) -> anyhow::Result<()> {
    let collaborators = Collaborators::from_config(&config);
    let coordinator = Coordinator::new(config, collaborators)?;

    if provider.is_none() || also_local {
        let artifact = coordinator.backup_local(timeout).await?;
        println!(
            "Local backup written: {} ({}, {})",
            artifact.path.display(),
            format_bytes(artifact.size),
            format_duration(artifact.duration)
        );
        if artifact.pruned > 0 {
            println!("Retention removed {} old backup(s)", artifact.pruned);
        }
    }

    if let Some(provider) = provider {
        let upload = coordinator.backup_remote(&provider, timeout).await?;
        println!(
            "Uploaded to {}: {} ({}, {})",
            upload.provider,
            upload.remote_path,
            format_bytes(upload.size),
            format_duration(upload.duration)
        );
    }

    Ok(())
}
