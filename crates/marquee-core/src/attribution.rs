use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::trace;

use crate::activity::CalendarEvent;
use crate::aggregate::Aggregation;
use crate::civil::days_between;
use crate::period::PeriodKey;

pub const EMPTY_LABEL: &str = "—";
pub const VENUE_EVENT_LABEL: &str = "Venue Event";

/// The calendar attribution of a single venue day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayAttribution {
    pub date: NaiveDate,
    pub day_people: usize,
    pub artist_id: Option<String>,
    pub label: String,
    pub event_count: usize,
}

/// Labels days and periods from the venue calendar.
#[derive(Debug, Clone)]
pub struct EventAttributor<'a> {
    schedule: BTreeMap<NaiveDate, Vec<&'a CalendarEvent>>,
    artist_names: &'a HashMap<String, String>,
}

impl<'a> EventAttributor<'a> {
    pub fn new(calendar: &'a [CalendarEvent], artist_names: &'a HashMap<String, String>) -> Self {
        let mut schedule: BTreeMap<NaiveDate, Vec<&'a CalendarEvent>> = BTreeMap::new();
        for event in calendar.iter().filter(|event| !event.cancelled) {
            schedule.entry(event.civil_date).or_default().push(event);
        }
        // Stable: events sharing a start time keep their input order.
        for events in schedule.values_mut() {
            events.sort_by_key(|event| (event.start_time.is_none(), event.start_time));
        }
        Self {
            schedule,
            artist_names,
        }
    }

    pub fn artist_name(&self, artist_id: &str) -> Option<&'a str> {
        self.artist_names
            .get(artist_id.trim())
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
    }

    fn events_on(&self, date: NaiveDate) -> &[&'a CalendarEvent] {
        self.schedule.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    fn primary_artist(&self, date: NaiveDate) -> Option<String> {
        self.events_on(date)
            .first()
            .and_then(|event| event.artist_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
    }

    pub fn label_day(&self, date: NaiveDate) -> String {
        let events = self.events_on(date);
        let Some(primary) = events.first() else {
            return EMPTY_LABEL.to_string();
        };

        let artist_name = primary
            .artist_id
            .as_deref()
            .and_then(|id| self.artist_name(id));

        let mut label = match artist_name {
            Some(name) => name.to_string(),
            None => match primary.title.as_deref().map(str::trim) {
                Some(title) if !title.is_empty() => format!("{VENUE_EVENT_LABEL} ({title})"),
                _ => VENUE_EVENT_LABEL.to_string(),
            },
        };

        if events.len() > 1 {
            label.push_str(&format!(" (+{} more)", events.len() - 1));
        }
        label
    }

    pub fn attribute_day(&self, date: NaiveDate, aggregation: &Aggregation) -> DayAttribution {
        DayAttribution {
            date,
            day_people: aggregation.day_people(date),
            artist_id: self.primary_artist(date),
            label: self.label_day(date),
            event_count: self.events_on(date).len(),
        }
    }

    /// Attributes a period to its busiest day within `[first, last]`.
    ///
    /// Returns `None` only when the period shares no day with the range.
    pub fn attribute_period(
        &self,
        key: &PeriodKey,
        aggregation: &Aggregation,
        first: NaiveDate,
        last: NaiveDate,
    ) -> Option<DayAttribution> {
        let peak = peak_day(key, aggregation, first, last)?;
        let attribution = self.attribute_day(peak, aggregation);
        trace!(
            period = %key,
            day = %peak,
            people = attribution.day_people,
            label = %attribution.label,
            "attributed period"
        );
        Some(attribution)
    }
}

/// The day of `key` inside `[first, last]` with the most people; ties go to
/// the earliest day.
pub fn peak_day(
    key: &PeriodKey,
    aggregation: &Aggregation,
    first: NaiveDate,
    last: NaiveDate,
) -> Option<NaiveDate> {
    let start = key.start.max(first);
    let end = key.end().min(last);

    let mut best: Option<(NaiveDate, usize)> = None;
    for day in days_between(start, end) {
        let people = aggregation.day_people(day);
        match best {
            Some((_, best_people)) if people <= best_people => {}
            _ => best = Some((day, people)),
        }
    }
    best.map(|(day, _)| day)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{NaiveDate, NaiveTime};
    use chrono_tz::America::New_York;

    use super::{EMPTY_LABEL, EventAttributor, peak_day};
    use crate::activity::{ActivityEvent, CalendarEvent, GuestCheckin};
    use crate::aggregate::ActivityAggregator;
    use crate::period::{Granularity, key_for};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn event(
        id: &str,
        day: NaiveDate,
        artist: Option<&str>,
        title: Option<&str>,
        start: Option<(u32, u32)>,
    ) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            artist_id: artist.map(ToString::to_string),
            civil_date: day,
            start_time: start.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0)),
            title: title.map(ToString::to_string),
            cancelled: false,
        }
    }

    fn names() -> HashMap<String, String> {
        HashMap::from([("X".to_string(), "The Xylophones".to_string())])
    }

    #[test]
    fn earliest_event_is_primary() {
        let day = date(2024, 3, 9);
        let calendar = vec![
            event("e1", day, Some("X"), None, Some((20, 0))),
            event("e2", day, None, Some("Open Mic"), Some((19, 0))),
        ];
        let names = names();
        let attributor = EventAttributor::new(&calendar, &names);
        assert_eq!(attributor.label_day(day), "Venue Event (Open Mic) (+1 more)");
    }

    #[test]
    fn resolvable_artist_names_the_day() {
        let day = date(2024, 3, 9);
        let calendar = vec![
            event("e1", day, Some("X"), Some("Headliner"), Some((21, 0))),
            event("e2", day, None, Some("Late set"), None),
        ];
        let names = names();
        let attributor = EventAttributor::new(&calendar, &names);
        assert_eq!(attributor.label_day(day), "The Xylophones (+1 more)");
    }

    #[test]
    fn unresolvable_artist_falls_back_to_generic_label() {
        let day = date(2024, 3, 9);
        let calendar = vec![event("e1", day, Some("missing"), None, Some((21, 0)))];
        let names = names();
        let attributor = EventAttributor::new(&calendar, &names);
        assert_eq!(attributor.label_day(day), "Venue Event");
    }

    #[test]
    fn cancelled_events_and_empty_days() {
        let day = date(2024, 3, 9);
        let mut cancelled = event("e1", day, Some("X"), None, Some((21, 0)));
        cancelled.cancelled = true;
        let calendar = vec![cancelled];
        let names = names();
        let attributor = EventAttributor::new(&calendar, &names);
        assert_eq!(attributor.label_day(day), EMPTY_LABEL);
        assert_eq!(attributor.label_day(date(2024, 3, 10)), EMPTY_LABEL);
    }

    #[test]
    fn untimed_events_sort_last() {
        let day = date(2024, 3, 9);
        let calendar = vec![
            event("e1", day, None, Some("Trivia"), None),
            event("e2", day, Some("X"), None, Some((23, 30))),
        ];
        let names = names();
        let attributor = EventAttributor::new(&calendar, &names);
        assert_eq!(attributor.label_day(day), "The Xylophones (+1 more)");
    }

    #[test]
    fn peak_ties_resolve_to_earliest_day() {
        let mut aggregator = ActivityAggregator::new(New_York, Granularity::Week);
        for (device, day) in [
            ("a", date(2024, 3, 5)),
            ("b", date(2024, 3, 7)),
            ("c", date(2024, 3, 7)),
            ("d", date(2024, 3, 9)),
            ("e", date(2024, 3, 9)),
        ] {
            aggregator.fold(&ActivityEvent::GuestCheckin(GuestCheckin {
                id: String::new(),
                device_id: device.to_string(),
                civil_date: day,
            }));
        }
        let aggregation = aggregator.finish();
        let key = key_for(date(2024, 3, 5), Granularity::Week);
        assert_eq!(
            peak_day(&key, &aggregation, date(2024, 3, 1), date(2024, 3, 31)),
            Some(date(2024, 3, 7))
        );
        // Clipped to the range, Mar 9 is the only busy day left.
        assert_eq!(
            peak_day(&key, &aggregation, date(2024, 3, 8), date(2024, 3, 31)),
            Some(date(2024, 3, 9))
        );
        assert_eq!(
            peak_day(&key, &aggregation, date(2024, 4, 1), date(2024, 4, 30)),
            None
        );
    }

    #[test]
    fn period_attribution_carries_artist_of_peak_day() {
        let busy = date(2024, 3, 8);
        let mut aggregator = ActivityAggregator::new(New_York, Granularity::Week);
        aggregator.fold(&ActivityEvent::GuestCheckin(GuestCheckin {
            id: String::new(),
            device_id: "g".to_string(),
            civil_date: busy,
        }));
        let aggregation = aggregator.finish();
        let calendar = vec![
            event("e1", date(2024, 3, 6), None, Some("Quiet night"), None),
            event("e2", busy, Some("X"), None, Some((20, 0))),
        ];
        let names = names();
        let attributor = EventAttributor::new(&calendar, &names);
        let attribution = attributor
            .attribute_period(
                &key_for(busy, Granularity::Week),
                &aggregation,
                date(2024, 3, 4),
                date(2024, 3, 10),
            )
            .expect("attribution");
        assert_eq!(attribution.date, busy);
        assert_eq!(attribution.artist_id.as_deref(), Some("X"));
        assert_eq!(attribution.label, "The Xylophones");
        assert_eq!(attribution.day_people, 1);
    }
}
