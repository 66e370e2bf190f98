use std::{
    collections::{BTreeMap, HashSet},
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use chrono::NaiveDate;
use fs4::tokio::AsyncFileExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, warn};

use crate::utils::time::date_to_record_name;

use super::entities::{PeriodRecord, PointerRecord, SampleRecord};

/// Interface for the durable record store. Every write is keyed by an
/// identity the record itself carries (title+instant for samples,
/// title+day+seq for periods), so rewriting an existing key is a no-op and
/// duplicate invocations stay idempotent.
pub trait RecordStore {
    /// Reads the per-title pointer table. An absent table is an empty map.
    fn load_pointers(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<Arc<str>, PointerRecord>>> + Send;

    /// Overwrites the whole pointer table.
    fn save_pointers(
        &self,
        pointers: &BTreeMap<Arc<str>, PointerRecord>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Appends samples to the given UTC day's record file. Samples whose
    /// identity is already present are silently dropped.
    fn append_samples(
        &self,
        day: NaiveDate,
        samples: Vec<SampleRecord>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn samples_for_utc_day(
        &self,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<SampleRecord>>> + Send;

    fn periods_for_utc_day(
        &self,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<PeriodRecord>>> + Send;

    /// Appends periods to a UTC processing day, deduplicated by identity.
    fn append_periods(
        &self,
        day: NaiveDate,
        periods: Vec<PeriodRecord>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Replaces the whole day with a deterministic recomputation.
    fn replace_periods(
        &self,
        day: NaiveDate,
        periods: Vec<PeriodRecord>,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<T: Deref + Sync> RecordStore for T
where
    T::Target: RecordStore + Sync,
{
    fn load_pointers(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<Arc<str>, PointerRecord>>> + Send {
        self.deref().load_pointers()
    }

    fn save_pointers(
        &self,
        pointers: &BTreeMap<Arc<str>, PointerRecord>,
    ) -> impl Future<Output = Result<()>> + Send {
        self.deref().save_pointers(pointers)
    }

    fn append_samples(
        &self,
        day: NaiveDate,
        samples: Vec<SampleRecord>,
    ) -> impl Future<Output = Result<()>> + Send {
        self.deref().append_samples(day, samples)
    }

    fn samples_for_utc_day(
        &self,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<SampleRecord>>> + Send {
        self.deref().samples_for_utc_day(day)
    }

    fn periods_for_utc_day(
        &self,
        day: NaiveDate,
    ) -> impl Future<Output = Result<Vec<PeriodRecord>>> + Send {
        self.deref().periods_for_utc_day(day)
    }

    fn append_periods(
        &self,
        day: NaiveDate,
        periods: Vec<PeriodRecord>,
    ) -> impl Future<Output = Result<()>> + Send {
        self.deref().append_periods(day, periods)
    }

    fn replace_periods(
        &self,
        day: NaiveDate,
        periods: Vec<PeriodRecord>,
    ) -> impl Future<Output = Result<()>> + Send {
        self.deref().replace_periods(day, periods)
    }
}

/// The main realization of [RecordStore]: JSON Lines files under the
/// application directory, one file per UTC day per record kind, plus a single
/// pointer table. Advisory file locks guard concurrent invocations.
pub struct FsRecordStore {
    samples_dir: PathBuf,
    periods_dir: PathBuf,
    pointers_path: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        let samples_dir = root.join("samples");
        let periods_dir = root.join("periods");
        std::fs::create_dir_all(&samples_dir)?;
        std::fs::create_dir_all(&periods_dir)?;

        Ok(Self {
            samples_dir,
            periods_dir,
            pointers_path: root.join("pointers.json"),
        })
    }

    fn day_path(dir: &Path, day: NaiveDate) -> PathBuf {
        dir.join(format!("{}.jsonl", date_to_record_name(day)))
    }

    async fn read_day<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let mut file = match File::open(path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;
        let result = Self::read_with_file(&mut file, path).await;
        file.unlock_async().await?;
        result
    }

    async fn read_with_file<T: DeserializeOwned>(file: &mut File, path: &Path) -> Result<Vec<T>> {
        debug!("Extracting {path:?}");
        let mut content = String::new();
        file.read_to_string(&mut content).await?;

        let mut records = vec![];
        for line in content.lines() {
            match serde_json::from_str::<T>(line) {
                Ok(v) => records.push(v),
                Err(e) => {
                    // Illegal lines can appear after shutdowns cut a write
                    // short. Skip them rather than failing the whole read.
                    warn!("During parsing in path {path:?} found illegal json string {line}: {e}")
                }
            }
        }
        Ok(records)
    }

    async fn append_day<T, F>(path: &Path, records: Vec<T>, identity: F) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&T) -> String,
    {
        let mut file = File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(path)
            .await?;

        file.lock_exclusive()?;
        let result = Self::append_with_file(&mut file, records, identity).await;
        file.unlock_async().await?;
        result
    }

    async fn append_with_file<T, F>(file: &mut File, records: Vec<T>, identity: F) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&T) -> String,
    {
        let mut content = String::new();
        file.read_to_string(&mut content).await?;

        let existing = content
            .lines()
            .filter_map(|line| match serde_json::from_str::<T>(line) {
                Ok(v) => Some(identity(&v)),
                Err(e) => {
                    warn!("Skipping corrupted record line during append: {e}");
                    None
                }
            })
            .collect::<HashSet<_>>();

        let mut buffer = Vec::<u8>::new();
        // A write cut short by a shutdown can leave the file without a
        // trailing newline.
        if !content.is_empty() && !content.ends_with('\n') {
            buffer.push(b'\n');
        }

        let mut appended = 0usize;
        for record in records {
            let id = identity(&record);
            if existing.contains(&id) {
                debug!("Record {id} already stored, skipping");
                continue;
            }
            serde_json::to_writer(&mut buffer, &record)?;
            buffer.push(b'\n');
            appended += 1;
        }

        if appended == 0 {
            return Ok(());
        }

        file.seek(std::io::SeekFrom::End(0)).await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }

    async fn overwrite(path: &Path, content: &[u8]) -> Result<()> {
        let mut file = File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(path)
            .await?;

        file.lock_exclusive()?;
        let result = Self::overwrite_with_file(&mut file, content).await;
        file.unlock_async().await?;
        result
    }

    async fn overwrite_with_file(file: &mut File, content: &[u8]) -> Result<()> {
        file.set_len(0).await?;
        file.seek(std::io::SeekFrom::Start(0)).await?;
        file.write_all(content).await?;
        file.flush().await?;
        Ok(())
    }
}

impl RecordStore for FsRecordStore {
    async fn load_pointers(&self) -> Result<BTreeMap<Arc<str>, PointerRecord>> {
        let mut file = match File::open(&self.pointers_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;
        let mut content = String::new();
        let read = file.read_to_string(&mut content).await;
        file.unlock_async().await?;
        read?;

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn save_pointers(&self, pointers: &BTreeMap<Arc<str>, PointerRecord>) -> Result<()> {
        let content = serde_json::to_vec(pointers)?;
        Self::overwrite(&self.pointers_path, &content).await
    }

    async fn append_samples(&self, day: NaiveDate, samples: Vec<SampleRecord>) -> Result<()> {
        let path = Self::day_path(&self.samples_dir, day);
        Self::append_day(&path, samples, SampleRecord::record_id).await
    }

    async fn samples_for_utc_day(&self, day: NaiveDate) -> Result<Vec<SampleRecord>> {
        Self::read_day(&Self::day_path(&self.samples_dir, day)).await
    }

    async fn periods_for_utc_day(&self, day: NaiveDate) -> Result<Vec<PeriodRecord>> {
        Self::read_day(&Self::day_path(&self.periods_dir, day)).await
    }

    async fn append_periods(&self, day: NaiveDate, periods: Vec<PeriodRecord>) -> Result<()> {
        let path = Self::day_path(&self.periods_dir, day);
        Self::append_day(&path, periods, PeriodRecord::record_id).await
    }

    async fn replace_periods(&self, day: NaiveDate, periods: Vec<PeriodRecord>) -> Result<()> {
        let mut buffer = Vec::<u8>::new();
        for period in &periods {
            serde_json::to_writer(&mut buffer, period)?;
            buffer.push(b'\n');
        }
        let path = Self::day_path(&self.periods_dir, day);
        Self::overwrite(&path, &buffer).await
    }
}
