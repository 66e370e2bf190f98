use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::Parser;

use crate::{
    query::{total_minutes, QueryService},
    store::record_store::FsRecordStore,
    utils::{dir::create_application_default_path, time::eastern_date},
};

#[derive(Debug, Parser)]
pub struct ShowCommand {
    #[arg(long, help = "Local (Eastern) date to display, YYYY-MM-DD. Defaults to today")]
    date: Option<NaiveDate>,
    #[arg(
        long = "last-days",
        conflicts_with = "date",
        help = "Window of recent local dates ending today, e.g. 7 or 30"
    )]
    last_days: Option<i64>,
    #[arg(long)]
    dir: Option<PathBuf>,
}

/// Prints reconstructed play periods to the terminal. Reads go through the
/// same query service the HTTP api uses.
pub async fn process_show_command(
    ShowCommand {
        date,
        last_days,
        dir,
    }: ShowCommand,
) -> Result<()> {
    let dir = dir.map_or_else(create_application_default_path, Ok)?;
    let store = Arc::new(FsRecordStore::new(dir.join("records"))?);
    let query = QueryService::new(store);

    let today = eastern_date(Utc::now());
    let periods = match (date, last_days) {
        (Some(date), _) => query.periods_for_date(date).await?,
        (None, Some(days)) => query.periods_for_last_days(today, days.max(1)).await?,
        (None, None) => query.periods_for_date(today).await?,
    };

    for period in &periods {
        println!(
            "{}\t{} - {}\t{} min\t{}",
            period.local_date,
            period.start_eastern.format("%H:%M"),
            period.end_eastern.format("%H:%M"),
            period.duration_minutes,
            period.title,
        );
    }
    println!(
        "Total: {} min over {} periods",
        total_minutes(&periods),
        periods.len()
    );
    Ok(())
}
