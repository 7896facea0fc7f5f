//! Data-quality checks layered on the raw activity lists.
//!
//! These are policy rules, kept apart from aggregation: they read the same
//! records the dashboard folds but never change its numbers.

use std::collections::HashSet;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use crate::activity::{Redemption, VipScan};
use crate::civil::instant_to_civil_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    MissingFields,
    NonPositivePoints,
    NoSameDayCheckin,
}

impl QualityIssue {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::MissingFields => "redemption is missing user or reward",
            Self::NonPositivePoints => "redemption spent no points",
            Self::NoSameDayCheckin => "redeemed without a check-in that day",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityFlag {
    pub date: NaiveDate,
    pub issue: QualityIssue,
    pub user_id: String,
    pub reward_name: String,
}

/// Flags suspicious redemptions.
///
/// A redemption missing its user or reward is reported as
/// [`QualityIssue::MissingFields`] only; the same-day check-in rule needs a
/// user to match against.
#[tracing::instrument(skip_all, fields(redemptions = redemptions.len(), scans = scans.len()))]
pub fn check_redemptions(redemptions: &[Redemption], scans: &[VipScan], tz: &Tz) -> Vec<QualityFlag> {
    let checked_in: HashSet<(NaiveDate, &str)> = scans
        .iter()
        .filter(|scan| !scan.user_id.trim().is_empty())
        .map(|scan| {
            let date = scan
                .civil_date
                .unwrap_or_else(|| instant_to_civil_date(scan.scanned_at, tz));
            (date, scan.user_id.trim())
        })
        .collect();

    let mut flags = Vec::new();
    for redemption in redemptions {
        let date = instant_to_civil_date(redemption.created_at, tz);
        let user_id = redemption.user_id.trim();
        let flag = |issue| QualityFlag {
            date,
            issue,
            user_id: user_id.to_string(),
            reward_name: redemption.reward_name.clone(),
        };

        if user_id.is_empty() || redemption.reward_name.trim().is_empty() {
            flags.push(flag(QualityIssue::MissingFields));
            continue;
        }
        if redemption.points_spent <= 0 {
            flags.push(flag(QualityIssue::NonPositivePoints));
        }
        if !checked_in.contains(&(date, user_id)) {
            flags.push(flag(QualityIssue::NoSameDayCheckin));
        }
    }

    flags.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.issue.cmp(&b.issue))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    debug!(flags = flags.len(), "checked redemptions");
    flags
}
