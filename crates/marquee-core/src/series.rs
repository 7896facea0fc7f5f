use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::aggregate::{Aggregation, PeriodAggregate};
use crate::attribution::{EMPTY_LABEL, EventAttributor};
use crate::civil::days_between;
use crate::period::{Granularity, Period, PeriodKey, key_for, label_for};
use crate::request::RankMetric;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub key: PeriodKey,
    pub label: String,
    pub attributed_label: String,
    pub attributed_day: Option<NaiveDate>,
    pub unique_vip_count: usize,
    pub unique_guest_count: usize,
    pub total_people: usize,
    pub scan_count: u64,
    pub points_earned: i64,
    pub conversion_count: usize,
    pub conversion_rate: f64,
    pub redemption_count: u64,
    pub points_spent: i64,
}

impl PeriodSummary {
    fn from_aggregate(period: Period, aggregate: &PeriodAggregate) -> Self {
        Self {
            key: period.key,
            label: period.label,
            attributed_label: EMPTY_LABEL.to_string(),
            attributed_day: None,
            unique_vip_count: aggregate.unique_vips(),
            unique_guest_count: aggregate.unique_guests(),
            total_people: aggregate.total_people(),
            scan_count: aggregate.scan_count,
            points_earned: aggregate.points_earned,
            conversion_count: aggregate.conversions(),
            conversion_rate: ratio(aggregate.conversions(), aggregate.unique_guests()),
            redemption_count: aggregate.redemption_count,
            points_spent: aggregate.points_spent,
        }
    }

    pub fn metric(&self, metric: RankMetric) -> usize {
        metric_value(metric, self.total_people, self.unique_vip_count, self.unique_guest_count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub label: String,
    pub attributed_label: String,
    pub unique_vip_count: usize,
    pub unique_guest_count: usize,
    pub total_people: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPeriod {
    pub key: PeriodKey,
    pub label: String,
    pub value: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistRollup {
    pub artist_id: String,
    pub artist_name: String,
    pub nights: usize,
    pub avg_people: f64,
    pub vip_share_pct: f64,
    pub conversion_pct: f64,
    pub best_night: NaiveDate,
    pub best_night_people: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesTotals {
    pub periods: usize,
    pub total_people: usize,
    pub unique_vips_in_range: usize,
    pub unique_guests_in_range: usize,
    pub scan_count: u64,
    pub points_earned: i64,
    pub conversion_count: usize,
    pub conversion_rate: f64,
    pub redemption_count: u64,
    pub points_spent: i64,
    pub avg_people_per_period: f64,
    pub avg_vips_per_period: f64,
    pub avg_guests_per_period: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub granularity: Granularity,
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    pub metric: RankMetric,
    pub periods: Vec<PeriodSummary>,
    pub totals: SeriesTotals,
    pub best_period: Option<RankedPeriod>,
    pub top_days: Vec<DaySummary>,
    pub top_artists: Vec<ArtistRollup>,
}

/// Chronological, gap-free period keys covering `[first, last]`.
pub fn period_keys(first: NaiveDate, last: NaiveDate, granularity: Granularity) -> Vec<PeriodKey> {
    let mut seen = HashSet::new();
    days_between(first, last)
        .into_iter()
        .map(|day| key_for(day, granularity))
        .filter(|key| seen.insert(*key))
        .collect()
}

/// Assembles the presentation series from an aggregation.
#[derive(Debug, Clone)]
pub struct SeriesBuilder<'a> {
    aggregation: &'a Aggregation,
    attributor: &'a EventAttributor<'a>,
    first_day: NaiveDate,
    last_day: NaiveDate,
    metric: RankMetric,
    top_n: usize,
}

impl<'a> SeriesBuilder<'a> {
    pub fn new(
        aggregation: &'a Aggregation,
        attributor: &'a EventAttributor<'a>,
        first_day: NaiveDate,
        last_day: NaiveDate,
    ) -> Self {
        Self {
            aggregation,
            attributor,
            first_day: first_day.min(last_day),
            last_day: first_day.max(last_day),
            metric: RankMetric::DEFAULT,
            top_n: crate::request::DEFAULT_TOP_N,
        }
    }

    pub fn metric(mut self, metric: RankMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    #[tracing::instrument(skip(self), fields(first = %self.first_day, last = %self.last_day))]
    pub fn build(&self) -> Series {
        let granularity = self.aggregation.granularity;
        let empty = PeriodAggregate::default();

        let periods: Vec<PeriodSummary> =
            period_keys(self.first_day, self.last_day, granularity)
                .into_iter()
                .map(|key| {
                    let aggregate = self.aggregation.period(&key).unwrap_or(&empty);
                    let period = Period {
                        key,
                        granularity,
                        label: label_for(&key),
                    };
                    let mut summary = PeriodSummary::from_aggregate(period, aggregate);
                    if let Some(attribution) = self.attributor.attribute_period(
                        &key,
                        self.aggregation,
                        self.first_day,
                        self.last_day,
                    ) {
                        summary.attributed_label = attribution.label;
                        summary.attributed_day = Some(attribution.date);
                    }
                    summary
                })
                .collect();

        let totals = self.totals(&periods);
        let best_period = best_period(&periods, self.metric);
        let top_days = self.top_days();
        let top_artists = self.artist_rollup();

        debug!(
            periods = periods.len(),
            total_people = totals.total_people,
            top_days = top_days.len(),
            top_artists = top_artists.len(),
            "built series"
        );

        Series {
            granularity,
            first_day: self.first_day,
            last_day: self.last_day,
            metric: self.metric,
            periods,
            totals,
            best_period,
            top_days,
            top_artists,
        }
    }

    fn totals(&self, periods: &[PeriodSummary]) -> SeriesTotals {
        let range = &self.aggregation.range;
        let count = periods.len();
        let total_people: usize = periods.iter().map(|p| p.total_people).sum();
        let vips: usize = periods.iter().map(|p| p.unique_vip_count).sum();
        let guests: usize = periods.iter().map(|p| p.unique_guest_count).sum();

        SeriesTotals {
            periods: count,
            total_people,
            unique_vips_in_range: range.unique_vips(),
            unique_guests_in_range: range.unique_guests(),
            scan_count: periods.iter().map(|p| p.scan_count).sum(),
            points_earned: periods.iter().map(|p| p.points_earned).sum(),
            conversion_count: periods.iter().map(|p| p.conversion_count).sum(),
            conversion_rate: ratio(range.conversions(), range.unique_guests()),
            redemption_count: periods.iter().map(|p| p.redemption_count).sum(),
            points_spent: periods.iter().map(|p| p.points_spent).sum(),
            avg_people_per_period: ratio(total_people, count),
            avg_vips_per_period: ratio(vips, count),
            avg_guests_per_period: ratio(guests, count),
        }
    }

    fn top_days(&self) -> Vec<DaySummary> {
        let mut days: Vec<DaySummary> = days_between(self.first_day, self.last_day)
            .into_iter()
            .filter_map(|date| {
                let aggregate = self.aggregation.day(date)?;
                if aggregate.total_people() == 0 {
                    return None;
                }
                Some(DaySummary {
                    date,
                    label: label_for(&key_for(date, Granularity::Day)),
                    attributed_label: self.attributor.label_day(date),
                    unique_vip_count: aggregate.unique_vips(),
                    unique_guest_count: aggregate.unique_guests(),
                    total_people: aggregate.total_people(),
                })
            })
            .filter(|day| self.day_metric(day) > 0)
            .collect();

        days.sort_by(|a, b| {
            self.day_metric(b)
                .cmp(&self.day_metric(a))
                .then_with(|| a.date.cmp(&b.date))
        });
        days.truncate(self.top_n);
        days
    }

    fn day_metric(&self, day: &DaySummary) -> usize {
        metric_value(
            self.metric,
            day.total_people,
            day.unique_vip_count,
            day.unique_guest_count,
        )
    }

    /// Groups attributed nights by headline artist and ranks them by average
    /// attendance. Nights with zero attendance still count toward the average.
    fn artist_rollup(&self) -> Vec<ArtistRollup> {
        #[derive(Default)]
        struct Nights {
            nights: usize,
            people: usize,
            vips: usize,
            guests: usize,
            conversions: usize,
            best: Option<(NaiveDate, usize)>,
        }

        let mut by_artist: BTreeMap<String, Nights> = BTreeMap::new();
        for date in days_between(self.first_day, self.last_day) {
            let attribution = self.attributor.attribute_day(date, self.aggregation);
            let Some(artist_id) = attribution.artist_id else {
                continue;
            };
            let (vips, guests, conversions) = self
                .aggregation
                .day(date)
                .map(|day| (day.unique_vips(), day.unique_guests(), day.conversions()))
                .unwrap_or((0, 0, 0));

            let entry = by_artist.entry(artist_id).or_default();
            entry.nights += 1;
            entry.people += attribution.day_people;
            entry.vips += vips;
            entry.guests += guests;
            entry.conversions += conversions;
            match entry.best {
                Some((_, best_people)) if attribution.day_people <= best_people => {}
                _ => entry.best = Some((date, attribution.day_people)),
            }
        }

        let mut rollup: Vec<ArtistRollup> = by_artist
            .into_iter()
            .filter_map(|(artist_id, nights)| {
                let (best_night, best_night_people) = nights.best?;
                let artist_name = self
                    .attributor
                    .artist_name(&artist_id)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| artist_id.clone());
                Some(ArtistRollup {
                    artist_name,
                    nights: nights.nights,
                    avg_people: ratio(nights.people, nights.nights),
                    vip_share_pct: ratio(nights.vips, nights.people) * 100.0,
                    conversion_pct: ratio(nights.conversions, nights.guests) * 100.0,
                    best_night,
                    best_night_people,
                    artist_id,
                })
            })
            .collect();

        rollup.sort_by(|a, b| {
            b.avg_people
                .partial_cmp(&a.avg_people)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.nights.cmp(&a.nights))
                .then_with(|| a.artist_name.cmp(&b.artist_name))
        });
        rollup.truncate(self.top_n);
        rollup
    }
}

/// Highest period by `metric`, earliest on ties. `None` when every period is
/// zero.
pub fn best_period(periods: &[PeriodSummary], metric: RankMetric) -> Option<RankedPeriod> {
    let mut best: Option<&PeriodSummary> = None;
    for period in periods {
        match best {
            Some(current) if period.metric(metric) <= current.metric(metric) => {}
            _ => best = Some(period),
        }
    }
    best.filter(|period| period.metric(metric) > 0)
        .map(|period| RankedPeriod {
            key: period.key,
            label: period.label.clone(),
            value: period.metric(metric),
        })
}

fn metric_value(metric: RankMetric, total: usize, vips: usize, guests: usize) -> usize {
    match metric {
        RankMetric::Total => total,
        RankMetric::Vip => vips,
        RankMetric::Guest => guests,
    }
}

/// `numerator / denominator`, or 0 when the denominator is 0.
pub fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
