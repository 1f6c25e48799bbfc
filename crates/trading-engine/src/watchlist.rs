use std::path::PathBuf;

use engine_types::Symbol;

/// Reads and writes the daily-built watchlist, the upstream input the
/// working-set refresh scores down into tradeable candidates.
/// One ticker per row, header `symbol`, same shape the corpus's CSV-backed
/// stores use for anything it persists between runs.
pub struct WatchlistStore {
    path: PathBuf,
}

impl WatchlistStore {
    pub fn new(data_dir: &str) -> Self {
        Self { path: PathBuf::from(data_dir).join("watchlist").join("dynamic_watchlist.csv") }
    }

    /// Best-effort load. Returns an empty watchlist (not an error) when the
    /// file is missing or malformed — the 07:00 ET build pass repopulates
    /// it on the next cycle.
    pub fn load(&self) -> Vec<Symbol> {
        let Ok(mut reader) = csv::Reader::from_path(&self.path) else {
            tracing::info!(path = %self.path.display(), "no persisted watchlist found, starting empty");
            return Vec::new();
        };
        let mut symbols = Vec::new();
        for record in reader.records().flatten() {
            if let Some(raw) = record.get(0) {
                if let Some(symbol) = Symbol::new(raw) {
                    symbols.push(symbol);
                }
            }
        }
        symbols
    }

    pub fn save(&self, symbols: &[Symbol]) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(error = %e, path = %parent.display(), "failed to create watchlist directory");
                return;
            }
        }
        let result = (|| -> Result<(), Box<dyn std::error::Error>> {
            let mut writer = csv::Writer::from_path(&self.path)?;
            writer.write_record(["symbol"])?;
            for symbol in symbols {
                writer.write_record([symbol.as_str()])?;
            }
            writer.flush()?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to persist watchlist");
        }
    }
}
