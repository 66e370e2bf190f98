use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    store::{
        entities::{PointerRecord, SampleRecord},
        record_store::RecordStore,
    },
    upstream::GameLibrary,
    utils::{clock::Clock, time::eastern_date},
};

const WRITE_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Polls the upstream library on a fixed interval and turns cumulative
/// counter movement into delta samples. One tick is stateless: everything it
/// needs is the pointer table and the upstream response.
pub struct SamplerModule<S> {
    store: S,
    library: Box<dyn GameLibrary>,
    shutdown: CancellationToken,
    sample_interval: Duration,
    clock: Box<dyn Clock>,
}

impl<S: RecordStore> SamplerModule<S> {
    pub fn new(
        store: S,
        library: Box<dyn GameLibrary>,
        shutdown: CancellationToken,
        sample_interval: Duration,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            store,
            library,
            shutdown,
            sample_interval,
            clock,
        }
    }

    /// Executes the sampler event loop. A failed tick is logged and retried
    /// at the next scheduled point, never within the same tick.
    pub async fn run(self) -> Result<()> {
        let mut tick_point = self.clock.instant();
        loop {
            match self.sample_once().await {
                Ok(sampled) => info!("Sampler tick recorded {sampled} samples"),
                Err(e) => error!("Sampler tick failed: {e:?}"),
            }

            tick_point += self.sample_interval;
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.clock.sleep_until(tick_point) => ()
            }
        }
    }

    /// One sampling pass over every tracked title. Titles are independent; a
    /// write failure skips only that title and leaves its pointer untouched
    /// so the minutes are recovered on the next tick.
    pub async fn sample_once(&self) -> Result<usize> {
        let titles = self
            .library
            .playtimes()
            .await
            .context("Upstream library unavailable")?;
        let mut pointers = self
            .store
            .load_pointers()
            .await
            .context("Record store unavailable")?;

        let now = self.clock.time();
        let today = now.date_naive();
        let mut sampled = 0usize;

        for title in titles {
            if title.id.is_empty() || title.minutes < 0 {
                warn!("Skipping malformed upstream record {title:?}");
                continue;
            }
            if title.minutes == 0 {
                continue;
            }

            let previous = pointers
                .get(&title.id)
                .map(|p| p.cumulative_minutes)
                // First observation: no minutes attributable yet, but the
                // pointer below still gets created.
                .unwrap_or(title.minutes);

            // A counter reset upstream shows up as a decrease. Clamp rather
            // than ever recording negative play.
            let delta = (title.minutes - previous).max(0);

            if delta > 0 {
                let sample = SampleRecord {
                    title: title.id.clone(),
                    instant: now,
                    delta_minutes: delta,
                    eastern_date: eastern_date(now),
                    utc_date: today,
                };
                if let Err(e) = self.append_with_retry(&sample).await {
                    error!("Giving up on sample for {}: {e:?}", title.id);
                    continue;
                }
                sampled += 1;
            }

            pointers.insert(
                title.id.clone(),
                PointerRecord {
                    cumulative_minutes: title.minutes,
                    sampled_at: now,
                },
            );
        }

        self.store.save_pointers(&pointers).await?;
        Ok(sampled)
    }

    async fn append_with_retry(&self, sample: &SampleRecord) -> Result<()> {
        let mut attempt = 1u32;
        loop {
            match self
                .store
                .append_samples(sample.utc_date, vec![sample.clone()])
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    warn!(
                        "Sample write for {} failed on attempt {attempt}: {e:?}",
                        sample.title
                    );
                    self.clock.sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::{
        store::record_store::{FsRecordStore, RecordStore},
        upstream::{MockGameLibrary, TitlePlaytime},
        utils::clock::Clock,
    };

    use super::SamplerModule;

    /// Advances the reported time by one poll interval per tick, so
    /// consecutive [SamplerModule::sample_once] calls look like real polls.
    struct SteppingClock {
        start: DateTime<Utc>,
        ticks: Mutex<i64>,
    }

    impl SteppingClock {
        fn new(start: DateTime<Utc>) -> Self {
            Self {
                start,
                ticks: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Clock for SteppingClock {
        fn time(&self) -> DateTime<Utc> {
            let mut ticks = self.ticks.lock().unwrap();
            let time = self.start + chrono::Duration::minutes(30 * *ticks);
            *ticks += 1;
            time
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep(&self, _duration: Duration) {}

        async fn sleep_until(&self, _instant: Instant) {}
    }

    fn title(id: &str, minutes: i64) -> TitlePlaytime {
        TitlePlaytime {
            id: id.into(),
            minutes,
        }
    }

    fn sampler(
        store: Arc<FsRecordStore>,
        library: MockGameLibrary,
        start: DateTime<Utc>,
    ) -> SamplerModule<Arc<FsRecordStore>> {
        SamplerModule::new(
            store,
            Box::new(library),
            CancellationToken::new(),
            Duration::from_secs(30 * 60),
            Box::new(SteppingClock::new(start)),
        )
    }

    fn test_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 22, 14, 2, 0).unwrap()
    }

    #[tokio::test]
    async fn test_first_observation_creates_pointer_without_sample() -> Result<()> {
        let dir = tempdir()?;
        let store = Arc::new(FsRecordStore::new(dir.path().to_owned())?);
        let mut library = MockGameLibrary::new();
        library
            .expect_playtimes()
            .returning(|| Ok(vec![title("hades", 500)]));

        let sampler = sampler(store.clone(), library, test_start());
        assert_eq!(sampler.sample_once().await?, 0);

        let pointers = store.load_pointers().await?;
        assert_eq!(pointers["hades"].cumulative_minutes, 500);
        assert!(store.samples_for_utc_day(test_start().date_naive()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_counter_movement_yields_delta_sample() -> Result<()> {
        let dir = tempdir()?;
        let store = Arc::new(FsRecordStore::new(dir.path().to_owned())?);
        let mut library = MockGameLibrary::new();
        let mut responses = vec![vec![title("hades", 500)], vec![title("hades", 530)]].into_iter();
        library
            .expect_playtimes()
            .times(2)
            .returning(move || Ok(responses.next().unwrap()));

        let sampler = sampler(store.clone(), library, test_start());
        assert_eq!(sampler.sample_once().await?, 0);
        assert_eq!(sampler.sample_once().await?, 1);

        let samples = store.samples_for_utc_day(test_start().date_naive()).await?;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].delta_minutes, 30);
        assert_eq!(samples[0].instant, test_start() + chrono::Duration::minutes(30));

        let pointers = store.load_pointers().await?;
        assert_eq!(pointers.values().next().unwrap().cumulative_minutes, 530);
        Ok(())
    }

    #[tokio::test]
    async fn test_counter_reset_clamps_delta_and_advances_pointer() -> Result<()> {
        let dir = tempdir()?;
        let store = Arc::new(FsRecordStore::new(dir.path().to_owned())?);
        let mut library = MockGameLibrary::new();
        let mut responses = vec![vec![title("hades", 500)], vec![title("hades", 10)]].into_iter();
        library
            .expect_playtimes()
            .times(2)
            .returning(move || Ok(responses.next().unwrap()));

        let sampler = sampler(store.clone(), library, test_start());
        sampler.sample_once().await?;
        assert_eq!(sampler.sample_once().await?, 0);

        assert!(store.samples_for_utc_day(test_start().date_naive()).await?.is_empty());
        let pointers = store.load_pointers().await?;
        assert_eq!(pointers.values().next().unwrap().cumulative_minutes, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_idle_and_malformed_titles_are_skipped() -> Result<()> {
        let dir = tempdir()?;
        let store = Arc::new(FsRecordStore::new(dir.path().to_owned())?);
        let mut library = MockGameLibrary::new();
        library.expect_playtimes().returning(|| {
            Ok(vec![
                title("", 120),
                title("broken", -5),
                title("untouched", 0),
                title("hades", 500),
            ])
        });

        let sampler = sampler(store.clone(), library, test_start());
        sampler.sample_once().await?;

        let pointers = store.load_pointers().await?;
        assert_eq!(pointers.len(), 1);
        assert!(pointers.contains_key("hades"));
        Ok(())
    }

    #[tokio::test]
    async fn test_upstream_failure_aborts_tick_without_writes() -> Result<()> {
        let dir = tempdir()?;
        let store = Arc::new(FsRecordStore::new(dir.path().to_owned())?);
        let mut library = MockGameLibrary::new();
        library
            .expect_playtimes()
            .returning(|| Err(anyhow!("connection refused")));

        let sampler = sampler(store.clone(), library, test_start());
        assert!(sampler.sample_once().await.is_err());
        assert!(store.load_pointers().await?.is_empty());
        Ok(())
    }
}
