//! Full feed runs: download, parse, validate, build a new generation, swap it in.

use crate::config::FeedConfig;
use crate::download::{Downloader, FeedSource};
use crate::error::FeedError;
use crate::format::FeedFormat;
use crate::parse;
use crate::transform;
use serde::{Deserialize, Serialize};
use shop_core::SearchEngine;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullReport {
    pub items_indexed: usize,
    pub items_rejected: usize,
    /// Documents of the previous generation absent from this feed.
    pub items_removed: usize,
    pub generation: u64,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct FullFeedProcessor {
    engine: Arc<SearchEngine>,
    downloader: Arc<Downloader>,
    max_products: usize,
}

impl FullFeedProcessor {
    pub fn new(engine: Arc<SearchEngine>, downloader: Arc<Downloader>, config: &FeedConfig) -> Self {
        Self { engine, downloader, max_products: config.max_products }
    }

    pub async fn process(&self, project: &str, source: &FeedSource, format: FeedFormat) -> Result<FullReport, FeedError> {
        let started = Instant::now();
        let bytes = self.downloader.fetch(source).await?;
        let this = self.clone();
        let project = project.to_string();
        let mut report = tokio::task::spawn_blocking(move || this.index_bytes(&project, &bytes, format))
            .await
            .map_err(|err| FeedError::IndexSwap(format!("indexing task failed: {err}")))??;
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Parse and publish an already fetched feed. A feed without a single valid record
    /// fails rather than emptying the index.
    pub fn index_bytes(&self, project: &str, bytes: &[u8], format: FeedFormat) -> Result<FullReport, FeedError> {
        let started = Instant::now();
        let parsed = parse::parse(format, bytes, self.max_products)?;
        let total = parsed.records.len();
        let transformed = transform::to_documents(&parsed.records, format.mapping());
        for rejected in &transformed.rejected {
            debug!(project, %rejected, "record rejected");
        }
        if transformed.items.is_empty() {
            return Err(FeedError::Parse(format!("no valid records among {total}")));
        }
        if !transformed.rejected.is_empty() {
            warn!(project, rejected = transformed.rejected.len(), total, "feed records rejected");
        }

        let items_rejected = transformed.rejected.len();
        let outcome = self.engine.publish(project, transformed.items)?;
        let report = FullReport {
            items_indexed: outcome.documents,
            items_rejected,
            items_removed: outcome.removed,
            generation: outcome.generation,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            project,
            items = report.items_indexed,
            rejected = report.items_rejected,
            removed = report.items_removed,
            took_ms = report.duration_ms,
            "full feed indexed"
        );
        Ok(report)
    }
}
