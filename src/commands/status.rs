use anyhow::Result;

use crate::receipts::{InstallReceipt, Receipts};
use crate::ui;

pub(super) fn execute() -> Result<()> {
    let path = Receipts::default_path()?;
    let receipts = Receipts::load(&path)?;

    if receipts.receipts.is_empty() {
        ui::info("No tools installed by oneclick yet");
        return Ok(());
    }

    for receipt in &receipts.receipts {
        ui::success(&receipt.tool, describe(receipt));
    }
    Ok(())
}

fn describe(receipt: &InstallReceipt) -> String {
    let when = chrono::DateTime::parse_from_rfc3339(&receipt.installed_at)
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| receipt.installed_at.clone());

    let mut line = format!("{} from {} endpoints, {when}", receipt.resolved, receipt.region);
    if let Some(dir) = &receipt.install_dir {
        line.push_str(&format!("\n{}", dir.display()));
    }
    if let Some(sha256) = &receipt.sha256 {
        line.push_str(&format!("\nsha256 {sha256}"));
    }
    line
}
