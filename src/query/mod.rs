//! Read-only access to reconstructed periods by Eastern calendar date.
//!
//! Period files are scoped by UTC processing day while queries are scoped by
//! local date. Eastern time is behind UTC, so a period labelled with local
//! date `d` can only live in the UTC day file for `d` or `d + 1`; scans cover
//! exactly that extra day.

use std::{future, sync::Arc};

use anyhow::{ensure, Result};
use chrono::{Duration, NaiveDate};
use futures::{stream, Stream, StreamExt, TryStreamExt};
use tracing::error;

use crate::store::{entities::PeriodRecord, record_store::RecordStore};

pub struct QueryService<S> {
    store: Arc<S>,
}

impl<S: RecordStore + Send + Sync + 'static> QueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// All periods whose local date is `date`, regardless of which UTC batch
    /// produced them. A date with no data is an empty result, never an error.
    pub async fn periods_for_date(&self, date: NaiveDate) -> Result<Vec<PeriodRecord>> {
        self.periods_for_range(date, date).await
    }

    /// All periods with local date in `[start, end]`, sorted by start instant
    /// within title and date.
    pub async fn periods_for_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PeriodRecord>> {
        ensure!(start <= end, "Range start {start} is after end {end}");

        let mut periods: Vec<PeriodRecord> =
            scan_utc_days(self.store.clone(), start, end + Duration::days(1))
                .try_filter(|p| future::ready(p.local_date >= start && p.local_date <= end))
                .try_collect()
                .await?;

        periods.sort_by(|a, b| {
            (a.local_date, &a.title, a.start).cmp(&(b.local_date, &b.title, b.start))
        });
        Ok(periods)
    }

    /// Last `days` local dates ending today.
    pub async fn periods_for_last_days(
        &self,
        today: NaiveDate,
        days: i64,
    ) -> Result<Vec<PeriodRecord>> {
        self.periods_for_range(today - Duration::days(days - 1), today)
            .await
    }
}

/// Sum of period durations, for summary lines.
pub fn total_minutes(periods: &[PeriodRecord]) -> i64 {
    periods.iter().map(|p| p.duration_minutes).sum()
}

/// Streams every period stored under the UTC day files in `[first, last]`.
fn scan_utc_days<S: RecordStore + Send + Sync + 'static>(
    store: Arc<S>,
    first: NaiveDate,
    last: NaiveDate,
) -> impl Stream<Item = Result<PeriodRecord>> {
    date_range(first, last)
        .map(move |day| {
            let store = store.clone();
            async move { (day, store.periods_for_utc_day(day).await) }
        })
        .buffered(4)
        .flat_map(|(day, data)| match data {
            Ok(data) => stream::iter(data).map(Ok).boxed(),
            Err(e) => {
                error!("Failed to read periods for {day}: {e}");
                stream::once(future::ready(Err(e))).boxed()
            }
        })
}

/// Returns a stream of dates between start (inclusive) and end (inclusive).
fn date_range(start: NaiveDate, end: NaiveDate) -> impl Stream<Item = NaiveDate> {
    stream::unfold((start, end), |(mut current, end)| {
        future::ready({
            if current <= end {
                let last_current = current;
                current = current.succ_opt().expect("End of time should never happen");
                Some((last_current, (current, end)))
            } else {
                None
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::{DateTime, NaiveDate, Utc};
    use tempfile::tempdir;

    use crate::{
        store::{
            entities::PeriodRecord,
            record_store::{FsRecordStore, RecordStore},
        },
        utils::time::{eastern_date, eastern_instant},
    };

    use super::{total_minutes, QueryService};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn period(title: &str, utc_day: &str, seq: u32, start: &str, end: &str) -> PeriodRecord {
        let (start, end) = (at(start), at(end));
        PeriodRecord {
            title: title.into(),
            utc_day: day(utc_day),
            seq,
            start,
            end,
            start_eastern: eastern_instant(start),
            end_eastern: eastern_instant(end),
            duration_minutes: (end - start).num_minutes(),
            local_date: eastern_date(start),
        }
    }

    async fn seeded_store(dir: &std::path::Path) -> Result<Arc<FsRecordStore>> {
        let store = Arc::new(FsRecordStore::new(dir.to_owned())?);
        // Morning session of Jan 21st, batched under UTC day Jan 21st.
        store
            .append_periods(
                day("2026-01-21"),
                vec![period(
                    "celeste",
                    "2026-01-21",
                    0,
                    "2026-01-21T15:00:00Z",
                    "2026-01-21T16:00:00Z",
                )],
            )
            .await?;
        // Evening session of Jan 21st, batched under UTC day Jan 22nd.
        store
            .append_periods(
                day("2026-01-22"),
                vec![
                    period(
                        "hades",
                        "2026-01-22",
                        0,
                        "2026-01-22T02:30:00Z",
                        "2026-01-22T04:00:00Z",
                    ),
                    // Morning session of Jan 22nd in the same batch.
                    period(
                        "hades",
                        "2026-01-22",
                        1,
                        "2026-01-22T15:00:00Z",
                        "2026-01-22T15:30:00Z",
                    ),
                ],
            )
            .await?;
        Ok(store)
    }

    #[tokio::test]
    async fn test_date_query_spans_utc_batches() -> Result<()> {
        let dir = tempdir()?;
        let query = QueryService::new(seeded_store(dir.path()).await?);

        let periods = query.periods_for_date(day("2026-01-21")).await?;
        assert_eq!(periods.len(), 2);
        // Sorted by title within the date: celeste before hades.
        assert_eq!(&*periods[0].title, "celeste");
        assert_eq!(&*periods[1].title, "hades");
        assert_eq!(periods[1].utc_day, day("2026-01-22"));
        assert_eq!(total_minutes(&periods), 150);
        Ok(())
    }

    #[tokio::test]
    async fn test_range_query_sorted_and_filtered() -> Result<()> {
        let dir = tempdir()?;
        let query = QueryService::new(seeded_store(dir.path()).await?);

        let periods = query
            .periods_for_range(day("2026-01-21"), day("2026-01-22"))
            .await?;
        assert_eq!(periods.len(), 3);
        assert!(periods.windows(2).all(|w| {
            (w[0].local_date, &w[0].title, w[0].start) <= (w[1].local_date, &w[1].title, w[1].start)
        }));

        let periods = query.periods_for_date(day("2026-01-22")).await?;
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].local_date, day("2026-01-22"));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_date_is_empty_not_error() -> Result<()> {
        let dir = tempdir()?;
        let query = QueryService::new(seeded_store(dir.path()).await?);

        let periods = query.periods_for_date(day("2026-03-01")).await?;
        assert!(periods.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_last_days_window() -> Result<()> {
        let dir = tempdir()?;
        let query = QueryService::new(seeded_store(dir.path()).await?);

        let periods = query.periods_for_last_days(day("2026-01-22"), 7).await?;
        assert_eq!(periods.len(), 3);

        // A later window only sees the local dates inside it.
        let periods = query.periods_for_last_days(day("2026-01-28"), 7).await?;
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].local_date, day("2026-01-22"));

        let periods = query.periods_for_last_days(day("2026-02-28"), 7).await?;
        assert!(periods.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_inverted_range_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let query = QueryService::new(seeded_store(dir.path()).await?);

        assert!(query
            .periods_for_range(day("2026-01-22"), day("2026-01-21"))
            .await
            .is_err());
        Ok(())
    }
}
