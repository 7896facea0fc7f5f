use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Serialize, Serializer};

use crate::civil::add_days_civil;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" | "d" => Some(Self::Day),
            "week" | "weekly" | "w" => Some(Self::Week),
            "month" | "monthly" | "m" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// Bucket identity: the granularity plus the first civil day it covers.
///
/// Ordering is chronological within one granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodKey {
    pub granularity: Granularity,
    pub start: NaiveDate,
}

impl PeriodKey {
    /// Last civil day covered by this bucket.
    pub fn end(&self) -> NaiveDate {
        match self.granularity {
            Granularity::Day => self.start,
            Granularity::Week => add_days_civil(self.start, 6),
            Granularity::Month => {
                let (year, month) = if self.start.month() == 12 {
                    (self.start.year() + 1, 1)
                } else {
                    (self.start.year(), self.start.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(self.start)
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end()
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.granularity {
            Granularity::Day | Granularity::Week => {
                write!(f, "{}", self.start.format("%Y-%m-%d"))
            }
            Granularity::Month => write!(f, "{}", self.start.format("%Y-%m")),
        }
    }
}

impl Serialize for PeriodKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Period {
    pub key: PeriodKey,
    pub granularity: Granularity,
    pub label: String,
}

impl Period {
    pub fn for_date(date: NaiveDate, granularity: Granularity) -> Self {
        let key = key_for(date, granularity);
        Self {
            key,
            granularity,
            label: label_for(&key),
        }
    }
}

// Days to step back from each weekday to reach its Monday.
fn days_since_monday(weekday: Weekday) -> i64 {
    match weekday {
        Weekday::Mon => 0,
        Weekday::Tue => 1,
        Weekday::Wed => 2,
        Weekday::Thu => 3,
        Weekday::Fri => 4,
        Weekday::Sat => 5,
        Weekday::Sun => 6,
    }
}

pub fn key_for(date: NaiveDate, granularity: Granularity) -> PeriodKey {
    let start = match granularity {
        Granularity::Day => date,
        Granularity::Week => add_days_civil(date, -days_since_monday(date.weekday())),
        Granularity::Month => date.with_day(1).unwrap_or(date),
    };
    PeriodKey { granularity, start }
}

/// Display label: `Mar 9`, `Week of Mar 4` or `March 2024`.
pub fn label_for(key: &PeriodKey) -> String {
    match key.granularity {
        Granularity::Day => key.start.format("%b %-d").to_string(),
        Granularity::Week => format!("Week of {}", key.start.format("%b %-d")),
        Granularity::Month => key.start.format("%B %Y").to_string(),
    }
}
