use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::ActivityAggregator;
use crate::attribution::EventAttributor;
use crate::civil::FetchWindow;
use crate::quality::{QualityFlag, check_redemptions};
use crate::request::DashboardRequest;
use crate::series::{Series, SeriesBuilder};
use crate::source::{ActivitySource, FetchNotice, fetch_all};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardReport {
    pub timezone: String,
    pub generated_at: DateTime<Utc>,
    pub request: DashboardRequest,
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    pub window: FetchWindow,
    pub series: Series,
    pub quality: Vec<QualityFlag>,
    pub notices: Vec<FetchNotice>,
}

impl DashboardReport {
    /// True when at least one query failed and its numbers are missing.
    pub fn is_degraded(&self) -> bool {
        !self.notices.is_empty()
    }
}

/// Runs the whole pipeline for one request: fetch, bucket, accumulate,
/// attribute, derive.
///
/// Never fails. Queries that error are logged and reported in
/// [`DashboardReport::notices`]; the remaining numbers stay valid.
#[tracing::instrument(skip(source, tz), fields(timezone = %tz))]
pub fn build_dashboard(
    source: &dyn ActivitySource,
    tz: &Tz,
    request: &DashboardRequest,
    now: DateTime<Utc>,
) -> DashboardReport {
    let (first_day, last_day) = request.civil_range(now, tz);
    let window = FetchWindow::for_days(first_day, last_day, tz);
    let fetched = fetch_all(source, &window);

    let mut aggregator =
        ActivityAggregator::new(*tz, request.granularity).restrict_to(first_day, last_day);
    aggregator.fold_batch(&fetched.activity);
    let aggregation = aggregator.finish();

    let attributor = EventAttributor::new(&fetched.calendar, &fetched.artist_names);
    let series = SeriesBuilder::new(&aggregation, &attributor, first_day, last_day)
        .metric(request.metric)
        .top_n(request.top_n)
        .build();

    let quality = check_redemptions(
        &fetched.activity.redemptions,
        &fetched.activity.vip_scans,
        tz,
    );

    if !fetched.notices.is_empty() {
        warn!(failed = fetched.notices.len(), "dashboard built from partial data");
    }
    info!(
        first = %first_day,
        last = %last_day,
        periods = series.periods.len(),
        quality_flags = quality.len(),
        "dashboard built"
    );

    DashboardReport {
        timezone: tz.name().to_string(),
        generated_at: now,
        request: *request,
        first_day,
        last_day,
        window,
        series,
        quality,
        notices: fetched.notices,
    }
}
