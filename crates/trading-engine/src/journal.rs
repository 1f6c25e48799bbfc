use std::path::PathBuf;

use engine_types::TradeRecord;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Append-only NDJSON trade journal. Best-effort: a write failure is
/// logged and swallowed rather than propagated, since a missed journal line
/// must never block the monitor pass that produced it.
pub struct TradeJournal {
    path: PathBuf,
}

impl TradeJournal {
    pub fn new(data_dir: &str) -> Self {
        Self { path: PathBuf::from(data_dir).join("trade_journal.ndjson") }
    }

    pub async fn append(&self, record: &TradeRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize trade record for journal");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(error = %e, path = %parent.display(), "failed to create journal directory");
                return;
            }
        }
        let result = OpenOptions::new().create(true).append(true).open(&self.path).await;
        let mut file = match result {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "failed to open trade journal");
                return;
            }
        };
        if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
            tracing::warn!(error = %e, "failed to append to trade journal");
        }
    }
}
