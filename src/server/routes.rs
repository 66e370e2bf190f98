use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    query::total_minutes,
    store::entities::PeriodRecord,
    utils::time::eastern_date,
};

use super::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(query_periods))
}

/// Standard API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Carries errors out of handlers as `{error}` JSON with a non-2xx status.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::anyhow!(message.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.error.to_string(),
        });
        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    date: Option<NaiveDate>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    period: Option<String>,
}

#[derive(Serialize)]
pub struct PeriodView {
    pub title: Arc<str>,
    pub local_date: NaiveDate,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub duration_minutes: i64,
}

impl From<PeriodRecord> for PeriodView {
    fn from(record: PeriodRecord) -> Self {
        Self {
            title: record.title,
            local_date: record.local_date,
            start: record.start_eastern,
            end: record.end_eastern,
            duration_minutes: record.duration_minutes,
        }
    }
}

#[derive(Serialize)]
pub struct PeriodsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    pub total_minutes: i64,
    pub period_count: usize,
    pub periods: Vec<PeriodView>,
}

/// The requested local-date window, resolved from the query string.
#[derive(Debug, PartialEq, Eq)]
enum Window {
    Date(NaiveDate),
    Range(NaiveDate, NaiveDate),
}

fn resolve_window(params: &QueryParams, today: NaiveDate) -> Result<Window, AppError> {
    match params {
        QueryParams {
            date: Some(date),
            start: None,
            end: None,
            period: None,
        } => Ok(Window::Date(*date)),
        QueryParams {
            date: None,
            start: Some(start),
            end: Some(end),
            period: None,
        } => {
            if start > end {
                return Err(AppError::bad_request(format!(
                    "start {start} is after end {end}"
                )));
            }
            Ok(Window::Range(*start, *end))
        }
        QueryParams {
            date: None,
            start: None,
            end: None,
            period: Some(period),
        } => {
            let days = match period.as_str() {
                "week" => 7,
                "month" => 30,
                other => {
                    return Err(AppError::bad_request(format!(
                        "Unknown period {other:?}, expected week or month"
                    )))
                }
            };
            Ok(Window::Range(today - Duration::days(days - 1), today))
        }
        _ => Err(AppError::bad_request(
            "Pass either date=, start=&end=, or period=week|month",
        )),
    }
}

/// GET / - reconstructed periods for a local date, range, or relative window
async fn query_periods(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Json<PeriodsResponse>, AppError> {
    let today = eastern_date(Utc::now());
    let window = resolve_window(&params, today)?;

    let (date, start, end, records) = match window {
        Window::Date(date) => {
            let records = state.query().periods_for_date(date).await?;
            (Some(date), None, None, records)
        }
        Window::Range(start, end) => {
            let records = state.query().periods_for_range(start, end).await?;
            (None, Some(start), Some(end), records)
        }
    };

    Ok(Json(PeriodsResponse {
        date,
        start,
        end,
        total_minutes: total_minutes(&records),
        period_count: records.len(),
        periods: records.into_iter().map(PeriodView::from).collect(),
    }))
}
