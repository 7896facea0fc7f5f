use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::warn;

use crate::civil::{add_days_civil, today_in};
use crate::config::Config;
use crate::period::Granularity;

pub const DEFAULT_TOP_N: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeLength {
    Today,
    Week,
    Month,
    Quarter,
}

impl RangeLength {
    pub const DEFAULT: Self = Self::Week;

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "1" | "today" | "1d" => Some(Self::Today),
            "7" | "7d" | "week" => Some(Self::Week),
            "30" | "30d" | "month" => Some(Self::Month),
            "90" | "90d" | "quarter" => Some(Self::Quarter),
            _ => None,
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            Self::Today => 1,
            Self::Week => 7,
            Self::Month => 30,
            Self::Quarter => 90,
        }
    }
}

/// Which head count ranks periods, days and artists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMetric {
    Total,
    Vip,
    Guest,
}

impl RankMetric {
    pub const DEFAULT: Self = Self::Total;

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "total" | "people" | "all" => Some(Self::Total),
            "vip" | "vips" => Some(Self::Vip),
            "guest" | "guests" => Some(Self::Guest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::Vip => "vip",
            Self::Guest => "guest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardRequest {
    pub range: RangeLength,
    pub granularity: Granularity,
    pub metric: RankMetric,
    pub top_n: usize,
}

impl Default for DashboardRequest {
    fn default() -> Self {
        Self {
            range: RangeLength::DEFAULT,
            granularity: Granularity::Day,
            metric: RankMetric::DEFAULT,
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl DashboardRequest {
    /// Builds a request from raw parameter strings.
    ///
    /// Missing or unrecognized values fall back to their defaults with a
    /// warning; this never fails.
    #[tracing::instrument]
    pub fn from_params(
        range: Option<&str>,
        granularity: Option<&str>,
        metric: Option<&str>,
        top_n: Option<&str>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            range: parse_or_default("range", range, RangeLength::parse, defaults.range),
            granularity: parse_or_default(
                "group",
                granularity,
                Granularity::parse,
                defaults.granularity,
            ),
            metric: parse_or_default("metric", metric, RankMetric::parse, defaults.metric),
            top_n: parse_or_default(
                "top",
                top_n,
                |raw| raw.trim().parse::<usize>().ok().filter(|n| *n > 0),
                defaults.top_n,
            ),
        }
    }

    /// Reads `report.*` keys from the config, with explicit values taking
    /// precedence.
    pub fn from_config(
        cfg: &Config,
        range: Option<&str>,
        granularity: Option<&str>,
        metric: Option<&str>,
        top_n: Option<&str>,
    ) -> Self {
        let range = range.map(ToString::to_string).or_else(|| cfg.get("report.range"));
        let granularity = granularity
            .map(ToString::to_string)
            .or_else(|| cfg.get("report.group"));
        let metric = metric.map(ToString::to_string).or_else(|| cfg.get("report.metric"));
        let top_n = top_n.map(ToString::to_string).or_else(|| cfg.get("report.top"));
        Self::from_params(
            range.as_deref(),
            granularity.as_deref(),
            metric.as_deref(),
            top_n.as_deref(),
        )
    }

    /// Inclusive civil-date range ending on the venue's current day.
    pub fn civil_range(&self, now: DateTime<Utc>, tz: &Tz) -> (NaiveDate, NaiveDate) {
        let today = today_in(now, tz);
        (add_days_civil(today, 1 - self.range.days()), today)
    }
}

fn parse_or_default<T, F>(name: &str, raw: Option<&str>, parse: F, default: T) -> T
where
    T: Copy + std::fmt::Debug,
    F: Fn(&str) -> Option<T>,
{
    let Some(raw) = raw else {
        return default;
    };
    match parse(raw) {
        Some(value) => value,
        None => {
            warn!(parameter = name, value = %raw, fallback = ?default, "unrecognized parameter; using default");
            default
        }
    }
}
