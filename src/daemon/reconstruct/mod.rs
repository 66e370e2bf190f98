//! Turns the day's delta samples back into discrete play periods.
//!
//! Batches are scoped by the UTC date of the sample instants so that sessions
//! straddling Eastern midnight are never missed; the per-period local date is
//! computed from each period's own start. Periods are keyed by
//! (title, UTC day, sequence index), which makes re-running a processed day a
//! no-op and makes the explicit recompute mode a deterministic replacement.

pub mod blocks;

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use anyhow::{bail, Result};
use blocks::{merge_blocks, snap_samples};
use chrono::{Duration, NaiveDate};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    store::{
        entities::{PeriodRecord, SampleRecord},
        record_store::RecordStore,
    },
    utils::{
        clock::Clock,
        time::{eastern_date, eastern_instant, next_reconstruct_instant},
    },
};

pub struct Reconstructor<S> {
    store: S,
}

impl<S: RecordStore> Reconstructor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Reconstructs periods for one UTC processing day. Returns the number of
    /// period records now stored for that day.
    ///
    /// Without `recompute`, titles that already have periods for the day are
    /// skipped; with it, the whole day is re-derived from the immutable
    /// samples and replaced.
    pub async fn run_day(&self, day: NaiveDate, recompute: bool) -> Result<usize> {
        let samples = self.store.samples_for_utc_day(day).await?;
        let mut by_title = BTreeMap::<Arc<str>, Vec<SampleRecord>>::new();
        for sample in samples {
            by_title.entry(sample.title.clone()).or_default().push(sample);
        }

        if recompute {
            let mut all = Vec::new();
            for (title, samples) in &by_title {
                all.extend(build_periods(title.clone(), day, samples));
            }
            let count = all.len();
            self.store.replace_periods(day, all).await?;
            info!("Recomputed {count} periods for {day}");
            return Ok(count);
        }

        let existing = self.store.periods_for_utc_day(day).await?;
        let done = existing
            .iter()
            .map(|p| p.title.clone())
            .collect::<HashSet<_>>();

        let mut written = existing.len();
        let mut failed = 0usize;
        for (title, samples) in &by_title {
            if done.contains(title) {
                debug!("Periods for {title} on {day} already reconstructed");
                continue;
            }
            let periods = build_periods(title.clone(), day, samples);
            if periods.is_empty() {
                continue;
            }
            let count = periods.len();
            match self.store.append_periods(day, periods).await {
                Ok(()) => {
                    info!("Wrote {count} periods for {title} on {day}");
                    written += count;
                }
                // Other titles keep going; the next invocation retries this
                // one since its keys were never written.
                Err(e) => {
                    error!("Failed to write periods for {title} on {day}: {e:?}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            bail!("Reconstruction of {day} failed for {failed} titles");
        }
        Ok(written)
    }
}

/// Derives the period records for one title from its samples for the day.
/// Pure aside from the grid snap, so the same samples always produce the same
/// records.
fn build_periods(title: Arc<str>, day: NaiveDate, samples: &[SampleRecord]) -> Vec<PeriodRecord> {
    let blocks = snap_samples(samples);
    merge_blocks(&blocks)
        .into_iter()
        .enumerate()
        .map(|(seq, span)| PeriodRecord {
            title: title.clone(),
            utc_day: day,
            seq: seq as u32,
            start: span.start,
            end: span.end,
            start_eastern: eastern_instant(span.start),
            end_eastern: eastern_instant(span.end),
            duration_minutes: (span.end - span.start).num_minutes(),
            local_date: eastern_date(span.start),
        })
        .collect()
}

/// Daily schedule around [Reconstructor]: fires shortly after Eastern
/// midnight and processes the UTC day that most recently completed.
pub struct ReconstructModule<S> {
    reconstructor: Reconstructor<S>,
    shutdown: CancellationToken,
    clock: Box<dyn Clock>,
}

impl<S: RecordStore> ReconstructModule<S> {
    pub fn new(store: S, shutdown: CancellationToken, clock: Box<dyn Clock>) -> Self {
        Self {
            reconstructor: Reconstructor::new(store),
            shutdown,
            clock,
        }
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let now = self.clock.time();
            let next = next_reconstruct_instant(now);
            let wait = (next - now).to_std().unwrap_or_default();
            debug!("Next reconstruction at {next}");

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.clock.sleep(wait) => ()
            }

            let day = self.clock.time().date_naive() - Duration::days(1);
            match self.reconstructor.run_day(day, false).await {
                Ok(count) => info!("Reconstructed day {day}: {count} periods"),
                Err(e) => error!("Reconstruction for {day} failed: {e:?}"),
            }
        }
    }
}
