//! Delta feed runs: sparse price/stock updates applied in place. Token structures are never touched.

use crate::config::FeedConfig;
use crate::download::{Downloader, FeedSource};
use crate::error::FeedError;
use crate::format::FeedFormat;
use crate::parse;
use crate::transform;
use serde::{Deserialize, Serialize};
use shop_core::{DeltaOutcome, EngineError, SearchEngine};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaReport {
    pub items_updated: usize,
    pub items_unchanged: usize,
    /// Ids not present in the live index.
    pub items_skipped: usize,
    pub items_rejected: usize,
    /// The feed's generation was not newer than the last one applied.
    pub stale: bool,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct DeltaFeedProcessor {
    engine: Arc<SearchEngine>,
    downloader: Arc<Downloader>,
    max_products: usize,
}

impl DeltaFeedProcessor {
    pub fn new(engine: Arc<SearchEngine>, downloader: Arc<Downloader>, config: &FeedConfig) -> Self {
        Self { engine, downloader, max_products: config.max_products }
    }

    pub async fn process(&self, project: &str, source: &FeedSource, format: FeedFormat) -> Result<DeltaReport, FeedError> {
        let started = Instant::now();
        let bytes = self.downloader.fetch(source).await?;
        let this = self.clone();
        let project = project.to_string();
        let mut report = tokio::task::spawn_blocking(move || this.apply_bytes(&project, &bytes, format))
            .await
            .map_err(|err| FeedError::IndexSwap(format!("delta task failed: {err}")))??;
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    pub fn apply_bytes(&self, project: &str, bytes: &[u8], format: FeedFormat) -> Result<DeltaReport, FeedError> {
        let started = Instant::now();
        let parsed = parse::parse(format, bytes, self.max_products)?;
        let transformed = transform::to_updates(&parsed.records, format.mapping());
        for rejected in &transformed.rejected {
            debug!(project, %rejected, "update rejected");
        }

        let outcome = match self.engine.apply_updates(project, parsed.generation, &transformed.items) {
            Ok(outcome) => outcome,
            // nothing indexed yet, so every id is absent
            Err(EngineError::ProjectNotFound(_)) => {
                DeltaOutcome { skipped: transformed.items.len(), ..DeltaOutcome::default() }
            }
            Err(err) => return Err(err.into()),
        };
        let report = DeltaReport {
            items_updated: outcome.updated,
            items_unchanged: outcome.unchanged,
            items_skipped: outcome.skipped,
            items_rejected: transformed.rejected.len(),
            stale: outcome.stale,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            project,
            updated = report.items_updated,
            skipped = report.items_skipped,
            rejected = report.items_rejected,
            stale = report.stale,
            "delta feed applied"
        );
        Ok(report)
    }
}
