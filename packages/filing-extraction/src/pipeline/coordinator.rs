//! Two-stage pipeline coordinator.
//!
//! ```text
//! work queue ──► fetch workers ──► bounded hand-off ──► analysis workers
//!                 (fetch, parse)      (backpressure)      (extract, store)
//! ```
//!
//! The work queue is filled once and closed. Fetch workers exit when it
//! drains; once they have all finished the last hand-off sender is dropped,
//! which ends the analysis workers. Unit-level failures are recorded in the
//! store and never stop the run. Store failures are fatal: the failing
//! worker cancels the run token, the other workers stop taking new units,
//! and [`Pipeline::run`] returns the error once both pools have drained.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::extract::{ExtractionRequest, InsightExtractor};
use crate::sections::SectionExtractor;
use crate::traits::{Analyst, FilingFetcher, InsightStore};
use crate::types::{
    PipelineConfig, ProcessingStatus, Provenance, SectionLimits, Universe, UnitKey, WorkUnit,
};

/// Enumerate pending work units.
///
/// Order is year descending, then tier and ticker in configuration order.
/// Units below a ticker's IPO floor and units in `done` are left out.
pub fn enumerate_units(universe: &Universe, done: &HashSet<UnitKey>) -> Vec<WorkUnit> {
    let assignments = universe.assignments();
    let mut units = Vec::new();

    for year in universe.years_descending() {
        for &(ticker, tier) in &assignments {
            if !universe.is_listed(ticker, year) {
                continue;
            }
            if done.contains(&UnitKey::new(ticker, year)) {
                continue;
            }
            units.push(WorkUnit::new(ticker, tier, year, universe.form_type(ticker)));
        }
    }

    units
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Units enumerated for this run
    pub pending: usize,

    pub no_filing: usize,

    /// Units whose fetch or parse failed
    pub parse_failures: usize,

    pub extracted: usize,

    /// Units that fell back to the null skeleton
    pub fallbacks: usize,

    /// Highest hand-off occupancy observed
    pub peak_handoff_depth: usize,

    pub done_before: usize,
    pub done_after: usize,
}

impl RunSummary {
    /// Units that reached `extracted` during this run.
    pub fn new_extractions(&self) -> usize {
        self.done_after.saturating_sub(self.done_before)
    }
}

#[derive(Default)]
struct RunCounters {
    no_filing: AtomicUsize,
    parse_failures: AtomicUsize,
    extracted: AtomicUsize,
    fallbacks: AtomicUsize,
    peak_handoff_depth: AtomicUsize,
}

impl RunCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A parsed unit waiting for analysis.
struct ParsedUnit {
    unit: WorkUnit,
    request: ExtractionRequest,
    mda_chars: usize,
    risk_chars: usize,
}

/// Everything a worker needs, shared across both pools.
struct Shared<S, F, A: Analyst> {
    store: Arc<S>,
    fetcher: Arc<F>,
    extractor: Arc<InsightExtractor<A>>,
    sections: Arc<SectionExtractor>,
    counters: RunCounters,
    cancel: CancellationToken,
}

/// Resumable two-stage extraction pipeline.
pub struct Pipeline<S, F, A: Analyst> {
    store: Arc<S>,
    fetcher: Arc<F>,
    extractor: Arc<InsightExtractor<A>>,
    sections: Arc<SectionExtractor>,
    config: PipelineConfig,
}

impl<S, F, A> Pipeline<S, F, A>
where
    S: InsightStore + 'static,
    F: FilingFetcher + 'static,
    A: Analyst + 'static,
{
    pub fn new(store: Arc<S>, fetcher: Arc<F>, extractor: InsightExtractor<A>) -> Self {
        Self {
            store,
            fetcher,
            extractor: Arc::new(extractor),
            sections: Arc::new(SectionExtractor::default()),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_section_limits(mut self, limits: SectionLimits) -> Self {
        self.sections = Arc::new(SectionExtractor::new(limits));
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Process every pending unit of `universe` and report what happened.
    pub async fn run(&self, universe: &Universe) -> Result<RunSummary> {
        self.config.validate()?;

        let done_before = self.store.done_set().await?;
        let units = enumerate_units(universe, &done_before);
        let pending = units.len();

        info!(
            pending,
            done = done_before.len(),
            fetch_workers = self.config.fetch_workers,
            analysis_workers = self.config.analysis_workers,
            "Pipeline starting"
        );

        let shared = Arc::new(Shared {
            store: self.store.clone(),
            fetcher: self.fetcher.clone(),
            extractor: self.extractor.clone(),
            sections: self.sections.clone(),
            counters: RunCounters::default(),
            cancel: CancellationToken::new(),
        });

        // Work queue: filled once, then closed
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        for unit in units {
            // Receiver is alive in this scope, so send cannot fail
            let _ = work_tx.send(unit);
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let (handoff_tx, handoff_rx) = mpsc::channel::<ParsedUnit>(self.config.handoff_capacity);
        let handoff_rx = Arc::new(Mutex::new(handoff_rx));

        let mut analysis_pool = JoinSet::new();
        for worker_id in 0..self.config.analysis_workers {
            analysis_pool.spawn(analysis_worker(worker_id, shared.clone(), handoff_rx.clone()));
        }
        drop(handoff_rx);

        let mut fetch_pool = JoinSet::new();
        for worker_id in 0..self.config.fetch_workers {
            fetch_pool.spawn(fetch_worker(
                worker_id,
                shared.clone(),
                work_rx.clone(),
                handoff_tx.clone(),
            ));
        }

        let mut first_error = drain_pool(&mut fetch_pool, &shared.cancel).await;

        // Every fetch worker is done; closing the hand-off ends analysis
        drop(handoff_tx);

        if let Some(e) = drain_pool(&mut analysis_pool, &shared.cancel).await {
            first_error.get_or_insert(e);
        }

        if let Some(e) = first_error {
            error!(error = %e, "Pipeline stopped on fatal error");
            return Err(e);
        }

        let done_after = self.store.done_set().await?.len();
        let counters = &shared.counters;
        let summary = RunSummary {
            pending,
            no_filing: counters.no_filing.load(Ordering::Relaxed),
            parse_failures: counters.parse_failures.load(Ordering::Relaxed),
            extracted: counters.extracted.load(Ordering::Relaxed),
            fallbacks: counters.fallbacks.load(Ordering::Relaxed),
            peak_handoff_depth: counters.peak_handoff_depth.load(Ordering::Relaxed),
            done_before: done_before.len(),
            done_after,
        };

        info!(
            no_filing = summary.no_filing,
            parse_failures = summary.parse_failures,
            fallbacks = summary.fallbacks,
            peak_handoff_depth = summary.peak_handoff_depth,
            "Pipeline complete. New extractions: {} | Total done: {}",
            summary.new_extractions(),
            summary.done_after
        );

        Ok(summary)
    }
}

/// Wait for every task in `pool`, keeping the first error.
async fn drain_pool(
    pool: &mut JoinSet<Result<()>>,
    cancel: &CancellationToken,
) -> Option<PipelineError> {
    let mut first_error = None;
    while let Some(joined) = pool.join_next().await {
        let err = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) => PipelineError::Join(e),
        };
        cancel.cancel();
        first_error.get_or_insert(err);
    }
    first_error
}

async fn fetch_worker<S, F, A>(
    worker_id: usize,
    shared: Arc<Shared<S, F, A>>,
    work_rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkUnit>>>,
    handoff_tx: mpsc::Sender<ParsedUnit>,
) -> Result<()>
where
    S: InsightStore,
    F: FilingFetcher,
    A: Analyst,
{
    loop {
        let next = {
            let mut rx = work_rx.lock().await;
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => None,
                unit = rx.recv() => unit,
            }
        };
        let Some(unit) = next else { break };

        let parsed = match fetch_and_parse(&shared, unit).await {
            Ok(Some(parsed)) => parsed,
            Ok(None) => continue,
            Err(e) => {
                shared.cancel.cancel();
                return Err(e);
            }
        };

        // Blocks while the hand-off is full
        let permit = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            permit = handoff_tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        permit.send(parsed);

        let depth = handoff_tx.max_capacity() - handoff_tx.capacity();
        shared
            .counters
            .peak_handoff_depth
            .fetch_max(depth, Ordering::Relaxed);
    }

    debug!(worker_id, "Fetch worker finished");
    Ok(())
}

/// Fetch and parse one unit. Unit-level failures are recorded and yield
/// `Ok(None)`; only store errors are returned.
async fn fetch_and_parse<S, F, A>(
    shared: &Shared<S, F, A>,
    unit: WorkUnit,
) -> Result<Option<ParsedUnit>>
where
    S: InsightStore,
    F: FilingFetcher,
    A: Analyst,
{
    let key = unit.key();

    let path = match shared.fetcher.fetch(&unit).await {
        Ok(Some(path)) => path,
        Ok(None) => {
            info!(ticker = %unit.ticker, year = unit.fiscal_year, "No filing found");
            shared
                .store
                .record_status(&key, ProcessingStatus::NoFiling, None)
                .await?;
            RunCounters::bump(&shared.counters.no_filing);
            return Ok(None);
        }
        Err(e) => {
            return record_parse_failure(shared, &unit, &e.to_string()).await;
        }
    };

    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) => {
            return record_parse_failure(shared, &unit, &e.to_string()).await;
        }
    };

    let extractor = shared.sections.clone();
    let sections = match tokio::task::spawn_blocking(move || extractor.extract(&raw)).await {
        Ok(sections) => sections,
        Err(e) => {
            return record_parse_failure(shared, &unit, &e.to_string()).await;
        }
    };

    debug!(
        ticker = %unit.ticker,
        year = unit.fiscal_year,
        mda_chars = sections.mda_chars,
        risk_chars = sections.risk_chars,
        "Parsed filing"
    );
    shared
        .store
        .record_status(&key, ProcessingStatus::Parsed, None)
        .await?;

    let mda_chars = sections.mda_chars;
    let risk_chars = sections.risk_chars;
    let request = ExtractionRequest::from_sections(&unit, sections);

    Ok(Some(ParsedUnit {
        unit,
        request,
        mda_chars,
        risk_chars,
    }))
}

async fn record_parse_failure<S, F, A>(
    shared: &Shared<S, F, A>,
    unit: &WorkUnit,
    reason: &str,
) -> Result<Option<ParsedUnit>>
where
    S: InsightStore,
    A: Analyst,
{
    error!(ticker = %unit.ticker, year = unit.fiscal_year, error = %reason, "Fetch/parse failed");
    shared
        .store
        .record_status(&unit.key(), ProcessingStatus::Failed, Some(reason))
        .await?;
    RunCounters::bump(&shared.counters.parse_failures);
    Ok(None)
}

async fn analysis_worker<S, F, A>(
    worker_id: usize,
    shared: Arc<Shared<S, F, A>>,
    handoff_rx: Arc<Mutex<mpsc::Receiver<ParsedUnit>>>,
) -> Result<()>
where
    S: InsightStore,
    F: FilingFetcher,
    A: Analyst,
{
    loop {
        let next = {
            let mut rx = handoff_rx.lock().await;
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => None,
                parsed = rx.recv() => parsed,
            }
        };
        let Some(parsed) = next else { break };

        if let Err(e) = analyze(&shared, parsed).await {
            shared.cancel.cancel();
            return Err(e);
        }
    }

    debug!(worker_id, "Analysis worker finished");
    Ok(())
}

async fn analyze<S, F, A>(shared: &Shared<S, F, A>, parsed: ParsedUnit) -> Result<()>
where
    S: InsightStore,
    F: FilingFetcher,
    A: Analyst,
{
    let ParsedUnit {
        unit,
        request,
        mda_chars,
        risk_chars,
    } = parsed;
    let key = unit.key();

    let outcome = shared.extractor.extract(&request).await;
    let provenance = Provenance::new(shared.extractor.model(), mda_chars, risk_chars);

    shared
        .store
        .upsert_insight(&unit.tier, &outcome.record, &provenance)
        .await?;

    match &outcome.fallback_reason {
        Some(reason) => {
            warn!(
                ticker = %unit.ticker,
                year = unit.fiscal_year,
                attempts = outcome.attempts,
                "Stored null skeleton"
            );
            shared
                .store
                .record_status(&key, ProcessingStatus::Failed, Some(reason))
                .await?;
            RunCounters::bump(&shared.counters.fallbacks);
        }
        None => {
            shared.store.append_audit(&outcome.record).await?;
            shared
                .store
                .record_status(&key, ProcessingStatus::Extracted, None)
                .await?;
            RunCounters::bump(&shared.counters.extracted);
            info!(
                ticker = %unit.ticker,
                year = unit.fiscal_year,
                sentiment = outcome.record.mda_sentiment_score,
                attempts = outcome.attempts,
                "Extracted OK"
            );
        }
    }

    Ok(())
}
