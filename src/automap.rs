// Automap: propose a target for every unmapped row of a task by searching
// the terminology server with the source display.

use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use crate::api::{ApiError, MappingApi};
use crate::config::AutomapConfig;
use crate::mapping::{
    MapViewFilter, Mapping, MappingRowView, MappingStatus, Relationship, TargetRow,
};
use crate::shutdown::CancellationToken;
use crate::telemetry::{create_mapping_span, generate_correlation_id};

const CANDIDATE_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutomapReport {
    pub matched: usize,
    pub unmatched: usize,
    pub failed: usize,
    /// Rows whose target was created but whose move to DRAFT failed.
    pub partial: usize,
    /// Rows that already had a target, were no-map, or were not UNMAPPED.
    pub skipped: usize,
    /// Rows never started because the run was cancelled.
    pub not_started: usize,
    pub cancelled: bool,
    /// Targets created, to fold back into loaded row views.
    pub saved: Vec<TargetRow>,
    /// Targets created for `partial` rows. Their DRAFT status still has to
    /// be sent.
    pub pending_status: Vec<TargetRow>,
}

impl AutomapReport {
    fn merge(&mut self, other: AutomapReport) {
        self.matched += other.matched;
        self.unmatched += other.unmatched;
        self.failed += other.failed;
        self.partial += other.partial;
        self.skipped += other.skipped;
        self.not_started += other.not_started;
        self.cancelled |= other.cancelled;
        self.saved.extend(other.saved);
        self.pending_status.extend(other.pending_status);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutomapProgress {
    pub processed: usize,
    pub total: usize,
}

enum RowOutcome {
    Matched(TargetRow),
    /// Target created, status update rejected.
    Partial(TargetRow, ApiError),
    Unmatched,
}

pub struct AutomapRunner<A: MappingApi> {
    api: Arc<A>,
    config: AutomapConfig,
    cancel: CancellationToken,
}

impl<A: MappingApi> AutomapRunner<A> {
    pub fn new(api: Arc<A>, config: AutomapConfig, cancel: CancellationToken) -> Self {
        Self { api, config, cancel }
    }

    /// All rows of the task still waiting for a first target.
    pub async fn collect_candidates(&self, task_id: u64) -> Result<Vec<MappingRowView>, ApiError> {
        let mut filter = MapViewFilter {
            size: CANDIDATE_PAGE_SIZE,
            status: vec![MappingStatus::Unmapped],
            no_map: Some(false),
            ..Default::default()
        };

        let mut rows = Vec::new();
        loop {
            let page = self.api.task_view(task_id, &filter).await?;
            for row in page.content {
                let view = MappingRowView::try_from(row)
                    .map_err(|e| ApiError::decode(e.to_string()))?;
                rows.push(view);
            }
            if filter.page + 1 >= page.page.total_pages {
                break;
            }
            filter.page += 1;
        }
        debug!(task_id, candidates = rows.len(), "Collected automap candidates");
        Ok(rows)
    }

    /// Process `rows` in `config.chunks` concurrent chunks. Rows in a chunk
    /// run one after another; a failing row is counted and the chunk moves on.
    pub async fn run(
        &self,
        mapping: &Mapping,
        rows: Vec<MappingRowView>,
        progress: Option<&(dyn Fn(AutomapProgress) + Send + Sync)>,
    ) -> AutomapReport {
        let correlation_id = generate_correlation_id();
        let span = create_mapping_span("automap", Some(mapping.id), None, Some(&correlation_id));

        async {
            let mut report = AutomapReport::default();
            let (eligible, skipped): (Vec<_>, Vec<_>) =
                rows.into_iter().partition(is_automap_candidate);
            report.skipped = skipped.len();

            let total = eligible.len();
            let chunk_count = self.config.chunks.max(1);
            let mut chunks: Vec<Vec<MappingRowView>> = vec![Vec::new(); chunk_count];
            for (index, row) in eligible.into_iter().enumerate() {
                chunks[index % chunk_count].push(row);
            }

            info!(total, chunks = chunk_count, "Automap started");
            let processed = AtomicUsize::new(0);
            let results = join_all(
                chunks
                    .into_iter()
                    .filter(|chunk| !chunk.is_empty())
                    .map(|chunk| self.run_chunk(mapping, chunk, &processed, total, progress)),
            )
            .await;

            for partial in results {
                report.merge(partial);
            }
            info!(
                matched = report.matched,
                unmatched = report.unmatched,
                failed = report.failed,
                partial = report.partial,
                skipped = report.skipped,
                cancelled = report.cancelled,
                "Automap finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn run_chunk(
        &self,
        mapping: &Mapping,
        chunk: Vec<MappingRowView>,
        processed: &AtomicUsize,
        total: usize,
        progress: Option<&(dyn Fn(AutomapProgress) + Send + Sync)>,
    ) -> AutomapReport {
        let mut report = AutomapReport::default();
        let chunk_len = chunk.len();

        for (position, row) in chunk.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.not_started += chunk_len - position;
                break;
            }

            match self.map_row(mapping, &row).await {
                Ok(RowOutcome::Matched(target)) => {
                    report.matched += 1;
                    report.saved.push(target);
                }
                Ok(RowOutcome::Partial(target, e)) => {
                    warn!(
                        row_id = row.row_id,
                        error = %e,
                        "Automap target saved but row left out of DRAFT"
                    );
                    report.partial += 1;
                    report.pending_status.push(target);
                }
                Ok(RowOutcome::Unmatched) => report.unmatched += 1,
                Err(e) => {
                    warn!(row_id = row.row_id, error = %e, "Automap failed for row");
                    report.failed += 1;
                }
            }

            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(callback) = progress {
                callback(AutomapProgress { processed: done, total });
            }
        }
        report
    }

    async fn map_row(
        &self,
        mapping: &Mapping,
        row: &MappingRowView,
    ) -> Result<RowOutcome, ApiError> {
        let concepts = self
            .api
            .search_concepts(
                &mapping.to_scope,
                &mapping.to_version,
                &row.source_display,
                self.config.search_count.max(1),
            )
            .await?;

        let Some(concept) = concepts.into_iter().next() else {
            debug!(row_id = row.row_id, "No automap suggestion");
            return Ok(RowOutcome::Unmatched);
        };

        let relationship = if concept.display.to_lowercase() == row.source_display.to_lowercase() {
            Relationship::Equivalent
        } else {
            Relationship::Inexact
        };

        let target = TargetRow {
            id: None,
            row_id: row.row_id,
            target_code: Some(concept.code),
            target_display: Some(concept.display),
            relationship: Some(relationship),
            flagged: false,
        };
        let saved = self.api.create_target(&target).await?;
        if let Err(e) = self.api.update_status(row.row_id, MappingStatus::Draft).await {
            return Ok(RowOutcome::Partial(saved, e));
        }
        debug!(row_id = row.row_id, ?relationship, "Automapped row");
        Ok(RowOutcome::Matched(saved))
    }
}

fn is_automap_candidate(row: &MappingRowView) -> bool {
    row.status() == MappingStatus::Unmapped && !row.live.no_map && row.live.target_code.is_none()
}
