use std::{env, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reconstruct::ReconstructModule;
use sampler::SamplerModule;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
    store::record_store::FsRecordStore,
    upstream::http::HttpGameLibrary,
    utils::{
        clock::{Clock, DefaultClock},
        dir::create_application_default_path,
    },
};

pub mod args;
pub mod reconstruct;
pub mod sampler;

const DEFAULT_SAMPLE_INTERVAL_MINUTES: u64 = 30;

pub struct DaemonConfig {
    pub dir: PathBuf,
    pub sample_interval: Duration,
    pub api_url: String,
    pub api_token: String,
}

impl DaemonConfig {
    /// Fills unset options from the environment. The upstream url is the one
    /// thing with no usable default.
    pub fn resolve(
        dir: Option<PathBuf>,
        interval_minutes: Option<u64>,
        api_url: Option<String>,
        api_token: Option<String>,
    ) -> Result<Self> {
        let dir = dir.map_or_else(create_application_default_path, Ok)?;
        let api_url = api_url
            .or_else(|| env::var("PLAYLOG_API_URL").ok())
            .context("No upstream library url: pass --api-url or set PLAYLOG_API_URL")?;
        let api_token = api_token
            .or_else(|| env::var("PLAYLOG_API_TOKEN").ok())
            .unwrap_or_default();
        let minutes = interval_minutes.unwrap_or(DEFAULT_SAMPLE_INTERVAL_MINUTES);

        Ok(Self {
            dir,
            sample_interval: Duration::from_secs(minutes * 60),
            api_url,
            api_token,
        })
    }
}

/// Represents the starting point for the daemon: the sampler tick loop and
/// the nightly reconstruction schedule over one shared record store.
pub async fn start_daemon(config: DaemonConfig) -> Result<()> {
    let store = Arc::new(FsRecordStore::new(config.dir.join("records"))?);
    let library = HttpGameLibrary::new(config.api_url, config.api_token)?;

    let shutdown_token = CancellationToken::new();

    let sampler = create_sampler(
        store.clone(),
        Box::new(library),
        &shutdown_token,
        config.sample_interval,
        DefaultClock,
    );
    let reconstructor = ReconstructModule::new(store, shutdown_token.clone(), Box::new(DefaultClock));

    let (_, sampler_result, reconstruct_result) = tokio::join!(
        detect_shutdown(shutdown_token),
        sampler.run(),
        reconstructor.run(),
    );

    if let Err(sampler_result) = sampler_result {
        error!("Sampler module got an error {:?}", sampler_result);
    }

    if let Err(reconstruct_result) = reconstruct_result {
        error!("Reconstruct module got an error {:?}", reconstruct_result);
    }

    Ok(())
}

fn create_sampler(
    store: Arc<FsRecordStore>,
    library: Box<dyn crate::upstream::GameLibrary>,
    shutdown_token: &CancellationToken,
    sample_interval: Duration,
    clock: impl Clock,
) -> SamplerModule<Arc<FsRecordStore>> {
    SamplerModule::new(
        store,
        library,
        shutdown_token.clone(),
        sample_interval,
        Box::new(clock),
    )
}

/// Cancels the modules on ctrl-c, or on SIGTERM where that exists. The `stop`
/// command terminates the daemon with SIGTERM, so it must be a clean
/// shutdown, not a kill.
async fn detect_shutdown(cancelation: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                };
            }
            Err(e) => {
                error!("Couldn't install SIGTERM handler: {e:?}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    cancelation.cancel();
}

#[cfg(test)]
mod daemon_tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::create_sampler,
        store::record_store::{FsRecordStore, RecordStore},
        upstream::{MockGameLibrary, TitlePlaytime},
        utils::{clock::Clock, logging::TEST_LOGGING},
    };

    #[derive(Clone)]
    struct TestClock {
        start_time: DateTime<Utc>,
        reference: Instant,
    }

    #[async_trait]
    impl Clock for TestClock {
        fn time(&self) -> DateTime<Utc> {
            self.start_time + self.reference.elapsed()
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep(&self, duration: Duration) {
            tokio::time::sleep(duration).await;
        }

        async fn sleep_until(&self, instant: tokio::time::Instant) {
            tokio::time::sleep_until(instant).await;
        }
    }

    /// Very simple smoke test: a sampler loop against a mocked library keeps
    /// producing delta samples until cancelled.
    #[tokio::test]
    async fn smoke_test_sampler_loop() -> Result<()> {
        *TEST_LOGGING;
        let mut library = MockGameLibrary::new();
        let mut minutes = 470i64;
        library.expect_playtimes().times(..8).returning(move || {
            minutes += 30;
            Ok(vec![TitlePlaytime {
                id: "hades".into(),
                minutes,
            }])
        });

        let shutdown_token = CancellationToken::new();
        let start_time = Utc.with_ymd_and_hms(2026, 1, 22, 14, 0, 0).unwrap();
        let test_clock = TestClock {
            start_time,
            reference: Instant::now(),
        };

        let dir = tempdir()?;
        let store = Arc::new(FsRecordStore::new(dir.path().to_path_buf())?);
        let sampler = create_sampler(
            store.clone(),
            Box::new(library),
            &shutdown_token,
            Duration::from_millis(100),
            test_clock,
        );

        let (_, sampler_result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(350)).await;
                shutdown_token.cancel()
            },
            sampler.run(),
        );
        sampler_result?;

        // First poll only seeds the pointer, the following ones yield deltas.
        let samples = store.samples_for_utc_day(start_time.date_naive()).await?;
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.delta_minutes == 30));

        let pointers = store.load_pointers().await?;
        assert!(pointers["hades"].cumulative_minutes >= 500);
        Ok(())
    }
}
