use pgkeep::artifact::BackupFile;
use pgkeep::catalog::Catalog;
use pgkeep::remote::RcloneConnector;
use pgkeep::utils::format_bytes;
use pgkeep::Config;
use std::sync::Arc;

pub async fn run(config: Config, source: &str) -> anyhow::Result<()> {
    let timezone = config.timezone()?;
    let catalog = Catalog::from_config(&config, Arc::new(RcloneConnector::new()));
    let files = catalog.list(source).await?;

    if files.is_empty() {
        println!("No backups in {}", source);
        return Ok(());
    }

    println!("{}", render(&files, |file| {
        file.mod_time
            .with_timezone(&timezone)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string()
    }));
    Ok(())
}

/// Fixed-width table, one backup per row.
fn render(files: &[BackupFile], when: impl Fn(&BackupFile) -> String) -> String {
    let name_width = files
        .iter()
        .map(|f| f.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut out = format!(
        "{:<8}  {:<name_width$}  {:>10}  {:<23}  {}",
        "ID", "NAME", "SIZE", "MODIFIED", "ENCRYPTED"
    );
    for file in files {
        out.push('\n');
        out.push_str(&format!(
            "{:<8}  {:<name_width$}  {:>10}  {:<23}  {}",
            file.short_id,
            file.name,
            format_bytes(file.size),
            when(file),
            if file.encrypted { "yes" } else { "no" }
        ));
    }
    out
}
