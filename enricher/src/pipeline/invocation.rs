use std::{collections::HashSet, sync::Arc};

use anyhow::Context;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{
    input::InputSupplier,
    orchestrator::BatchOrchestrator,
    types::{InputEntry, RunRequest, RunSummary},
};
use crate::{
    budget::RunBudget,
    delivery::ReportDelivery,
    enricher_config::BudgetConfig,
    error::EnricherError,
    prompt::ReasoningService,
    report::{build_report, ReportPolicy},
    store::{EnrichmentStore, CURRENT_SCHEMA_VERSION},
    youtube::MetadataSource,
};

/// One end-to-end invocation: load input, run the orchestrator under a
/// fresh budget, build the cumulative report and deliver it.
pub struct Invocation<S, M, R> {
    orchestrator: BatchOrchestrator<S, M, R>,
    input: Arc<dyn InputSupplier>,
    delivery: Arc<dyn ReportDelivery>,
    policy: ReportPolicy,
    budget: BudgetConfig,
    reanalyze_stale: bool,
}

impl<S, M, R> Invocation<S, M, R>
where
    S: EnrichmentStore,
    M: MetadataSource,
    R: ReasoningService,
{
    pub fn new(
        orchestrator: BatchOrchestrator<S, M, R>,
        input: Arc<dyn InputSupplier>,
        delivery: Arc<dyn ReportDelivery>,
        policy: ReportPolicy,
        budget: BudgetConfig,
    ) -> Self {
        Self {
            orchestrator,
            input,
            delivery,
            policy,
            budget,
            reanalyze_stale: false,
        }
    }

    /// Also re-run every stored channel written under an older schema.
    pub fn with_reanalyze_stale(mut self, reanalyze_stale: bool) -> Self {
        self.reanalyze_stale = reanalyze_stale;
        self
    }

    pub async fn run_once(&self, shutdown: &CancellationToken) -> anyhow::Result<RunSummary> {
        let entries = self.input.load().await.map_err(EnricherError::Input)?;
        let request = self.build_request(entries).await?;

        let budget = RunBudget::new(
            self.budget.quota_units,
            Duration::from_secs(self.budget.time_limit_secs),
            Duration::from_secs(self.budget.safety_margin_secs),
        );
        let summary = self.orchestrator.run(request, &budget, shutdown).await?;

        let mut report = build_report(self.orchestrator.store().as_ref(), &self.policy)
            .await
            .map_err(EnricherError::Store)?;
        report.annotate_weights(&summary.weights);

        if let Err(e) = self.delivery.deliver(&report, &summary).await {
            tracing::error!("Report delivery failed for run {}: {:?}", summary.run_id, e);
        }

        Ok(summary)
    }

    async fn build_request(&self, mut entries: Vec<InputEntry>) -> anyhow::Result<RunRequest> {
        if !self.reanalyze_stale {
            return Ok(RunRequest::new(entries));
        }

        let stale = self
            .orchestrator
            .store()
            .stale_channels(CURRENT_SCHEMA_VERSION)
            .await
            .context("Could not list stale records")?;
        tracing::info!(
            "Re-analyzing {} records older than schema v{}",
            stale.len(),
            CURRENT_SCHEMA_VERSION
        );

        // Stale channels missing from this input still need an entry to be picked up
        entries.extend(stale.iter().map(|c| InputEntry::new(c.as_str(), 0)));
        let mut request = RunRequest::new(entries);
        request.force_refresh = stale.into_iter().collect::<HashSet<_>>();
        Ok(request)
    }
}
