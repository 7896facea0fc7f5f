use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::{debug, trace};

use crate::activity::{ActivityBatch, ActivityEvent};
use crate::period::{Granularity, PeriodKey, key_for};

/// Unique sets and raw counters for one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodAggregate {
    pub vip_ids: HashSet<String>,
    pub guest_ids: HashSet<String>,
    pub conversion_ids: HashSet<String>,
    pub scan_count: u64,
    pub guest_rows: u64,
    pub points_earned: i64,
    pub redemption_count: u64,
    pub points_spent: i64,
}

impl PeriodAggregate {
    pub fn apply(&mut self, event: &ActivityEvent) {
        match event {
            ActivityEvent::VipScan(scan) => {
                insert_id(&mut self.vip_ids, &scan.user_id);
                self.scan_count += 1;
                self.points_earned = self.points_earned.saturating_add(scan.points);
            }
            ActivityEvent::GuestCheckin(checkin) => {
                insert_id(&mut self.guest_ids, &checkin.device_id);
                self.guest_rows += 1;
            }
            ActivityEvent::Conversion(conversion) => {
                insert_id(&mut self.conversion_ids, &conversion.device_id);
            }
            ActivityEvent::Redemption(redemption) => {
                self.redemption_count += 1;
                self.points_spent = self.points_spent.saturating_add(redemption.points_spent);
            }
        }
    }

    pub fn unique_vips(&self) -> usize {
        self.vip_ids.len()
    }

    pub fn unique_guests(&self) -> usize {
        self.guest_ids.len()
    }

    pub fn conversions(&self) -> usize {
        self.conversion_ids.len()
    }

    /// VIP and guest identities live in separate id spaces, so this is a plain sum.
    pub fn total_people(&self) -> usize {
        self.unique_vips() + self.unique_guests()
    }
}

fn insert_id(set: &mut HashSet<String>, id: &str) {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        trace!("record without entity id; counted but not deduplicated");
        return;
    }
    set.insert(trimmed.to_string());
}

/// Folds activity events into period, day and range buckets.
#[derive(Debug, Clone)]
pub struct ActivityAggregator {
    tz: Tz,
    granularity: Granularity,
    bounds: Option<(NaiveDate, NaiveDate)>,
    periods: BTreeMap<PeriodKey, PeriodAggregate>,
    days: BTreeMap<NaiveDate, PeriodAggregate>,
    range: PeriodAggregate,
    folded: usize,
    skipped: usize,
}

impl ActivityAggregator {
    pub fn new(tz: Tz, granularity: Granularity) -> Self {
        Self {
            tz,
            granularity,
            bounds: None,
            periods: BTreeMap::new(),
            days: BTreeMap::new(),
            range: PeriodAggregate::default(),
            folded: 0,
            skipped: 0,
        }
    }

    /// Ignore events whose civil date falls outside `[first, last]`.
    pub fn restrict_to(mut self, first: NaiveDate, last: NaiveDate) -> Self {
        self.bounds = Some((first.min(last), first.max(last)));
        self
    }

    pub fn fold(&mut self, event: &ActivityEvent) {
        let date = event.civil_date(&self.tz);
        if let Some((first, last)) = self.bounds
            && (date < first || date > last)
        {
            trace!(kind = event.kind(), %date, "event outside requested days; skipped");
            self.skipped += 1;
            return;
        }

        let key = key_for(date, self.granularity);
        self.periods.entry(key).or_default().apply(event);
        self.days.entry(date).or_default().apply(event);
        self.range.apply(event);
        self.folded += 1;
    }

    #[tracing::instrument(skip(self, batch), fields(records = batch.len()))]
    pub fn fold_batch(&mut self, batch: &ActivityBatch) {
        for event in batch.events() {
            self.fold(&event);
        }
    }

    pub fn finish(self) -> Aggregation {
        debug!(
            granularity = self.granularity.as_str(),
            folded = self.folded,
            skipped = self.skipped,
            periods = self.periods.len(),
            days = self.days.len(),
            "aggregation finished"
        );
        Aggregation {
            granularity: self.granularity,
            periods: self.periods,
            days: self.days,
            range: self.range,
        }
    }
}

/// Result of folding one request's events. Buckets that received no events
/// are absent.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub granularity: Granularity,
    pub periods: BTreeMap<PeriodKey, PeriodAggregate>,
    pub days: BTreeMap<NaiveDate, PeriodAggregate>,
    pub range: PeriodAggregate,
}

impl Aggregation {
    pub fn period(&self, key: &PeriodKey) -> Option<&PeriodAggregate> {
        self.periods.get(key)
    }

    pub fn day(&self, date: NaiveDate) -> Option<&PeriodAggregate> {
        self.days.get(&date)
    }

    pub fn day_people(&self, date: NaiveDate) -> usize {
        self.day(date).map(PeriodAggregate::total_people).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use chrono_tz::America::New_York;

    use super::{ActivityAggregator, Aggregation};
    use crate::activity::{ActivityEvent, Conversion, GuestCheckin, Redemption, VipScan};
    use crate::period::{Granularity, key_for};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn vip(user: &str, y: i32, m: u32, d: u32, hour: u32, points: i64) -> ActivityEvent {
        ActivityEvent::VipScan(VipScan {
            id: format!("{user}-{d}-{hour}"),
            user_id: user.to_string(),
            points,
            scanned_at: Utc
                .with_ymd_and_hms(y, m, d, hour, 0, 0)
                .single()
                .expect("valid instant"),
            civil_date: None,
        })
    }

    fn guest(device: &str, day: NaiveDate) -> ActivityEvent {
        ActivityEvent::GuestCheckin(GuestCheckin {
            id: String::new(),
            device_id: device.to_string(),
            civil_date: day,
        })
    }

    fn sample() -> Vec<ActivityEvent> {
        vec![
            vip("A", 2024, 3, 9, 23, 10),
            vip("B", 2024, 3, 9, 23, 5),
            vip("A", 2024, 3, 10, 23, 10),
            vip("C", 2024, 3, 10, 23, -3),
            guest("g1", date(2024, 3, 9)),
            guest("g1", date(2024, 3, 10)),
            guest("", date(2024, 3, 10)),
            ActivityEvent::Conversion(Conversion {
                device_id: "g1".to_string(),
                linked_at: Utc
                    .with_ymd_and_hms(2024, 3, 11, 1, 0, 0)
                    .single()
                    .expect("valid instant"),
            }),
            ActivityEvent::Redemption(Redemption {
                user_id: "A".to_string(),
                reward_name: "Free drink".to_string(),
                points_spent: 50,
                created_at: Utc
                    .with_ymd_and_hms(2024, 3, 10, 2, 0, 0)
                    .single()
                    .expect("valid instant"),
            }),
        ]
    }

    fn fold_all(events: &[ActivityEvent], granularity: Granularity) -> Aggregation {
        let mut aggregator = ActivityAggregator::new(New_York, granularity);
        for event in events {
            aggregator.fold(event);
        }
        aggregator.finish()
    }

    #[test]
    fn weekly_vips_dedupe_across_spring_forward() {
        let aggregation = fold_all(&sample(), Granularity::Week);
        assert_eq!(aggregation.periods.len(), 1);

        let week = aggregation
            .period(&key_for(date(2024, 3, 4), Granularity::Week))
            .expect("week bucket");
        assert_eq!(week.unique_vips(), 3);
        assert_eq!(week.scan_count, 4);
        assert_eq!(week.points_earned, 22);
        assert_eq!(week.unique_guests(), 1);
        assert_eq!(week.guest_rows, 3);
        assert_eq!(week.total_people(), 4);
        assert_eq!(week.conversions(), 1);
        assert_eq!(week.redemption_count, 1);
        assert_eq!(week.points_spent, 50);
    }

    #[test]
    fn daily_buckets_use_venue_dates() {
        let aggregation = fold_all(&sample(), Granularity::Day);
        assert_eq!(aggregation.day_people(date(2024, 3, 9)), 2 + 1);
        let tenth = aggregation.day(date(2024, 3, 10)).expect("tenth");
        assert_eq!(tenth.total_people(), 2 + 1);
        assert_eq!(tenth.guest_rows, 2);
        // 01:00Z on Mar 11 is the evening of Mar 10 in New York.
        assert_eq!(tenth.conversions(), 1);
        // 02:00Z on Mar 10 is still the evening of Mar 9.
        let ninth = aggregation.day(date(2024, 3, 9)).expect("ninth");
        assert_eq!(ninth.redemption_count, 1);
        assert!(aggregation.day(date(2024, 3, 11)).is_none());
        assert_eq!(aggregation.day_people(date(2024, 3, 20)), 0);
    }

    #[test]
    fn processing_order_does_not_matter() {
        let events = sample();
        let forward = fold_all(&events, Granularity::Week);

        let mut reversed = events.clone();
        reversed.reverse();
        let backward = fold_all(&reversed, Granularity::Week);
        assert_eq!(forward.periods, backward.periods);
        assert_eq!(forward.days, backward.days);

        for shift in 1..events.len() {
            let mut rotated = events.clone();
            rotated.rotate_left(shift);
            let result = fold_all(&rotated, Granularity::Week);
            assert_eq!(forward.periods, result.periods);
            assert_eq!(forward.range, result.range);
        }
    }

    #[test]
    fn same_entity_counts_once_per_period() {
        let aggregation = fold_all(&sample(), Granularity::Day);
        let ninth = aggregation.day(date(2024, 3, 9)).expect("ninth");
        assert!(ninth.guest_ids.contains("g1"));
        let tenth = aggregation.day(date(2024, 3, 10)).expect("tenth");
        assert!(tenth.guest_ids.contains("g1"));
        assert_eq!(aggregation.range.unique_guests(), 1);
    }

    #[test]
    fn bounds_skip_out_of_range_events() {
        let mut aggregator = ActivityAggregator::new(New_York, Granularity::Day)
            .restrict_to(date(2024, 3, 10), date(2024, 3, 10));
        for event in sample() {
            aggregator.fold(&event);
        }
        let aggregation = aggregator.finish();
        assert!(aggregation.day(date(2024, 3, 9)).is_none());
        assert_eq!(aggregation.days.len(), 1);
        assert_eq!(aggregation.range.unique_vips(), 2);
    }
}
