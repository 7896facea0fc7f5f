use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::civil::instant_to_civil_date;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VipScan {
    #[serde(default, deserialize_with = "lenient::id")]
    pub id: String,

    #[serde(default, deserialize_with = "lenient::id")]
    pub user_id: String,

    #[serde(default, deserialize_with = "lenient::points")]
    pub points: i64,

    pub scanned_at: DateTime<Utc>,

    #[serde(default)]
    pub civil_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuestCheckin {
    #[serde(default, deserialize_with = "lenient::id")]
    pub id: String,

    #[serde(default, deserialize_with = "lenient::id")]
    pub device_id: String,

    pub civil_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversion {
    #[serde(default, deserialize_with = "lenient::id")]
    pub device_id: String,

    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Redemption {
    #[serde(default, deserialize_with = "lenient::id")]
    pub user_id: String,

    #[serde(default, deserialize_with = "lenient::id")]
    pub reward_name: String,

    #[serde(default, deserialize_with = "lenient::points")]
    pub points_spent: i64,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEvent {
    #[serde(default, deserialize_with = "lenient::id")]
    pub id: String,

    #[serde(default, deserialize_with = "lenient::optional_id")]
    pub artist_id: Option<String>,

    pub civil_date: NaiveDate,

    #[serde(default, deserialize_with = "lenient::clock_time")]
    pub start_time: Option<NaiveTime>,

    #[serde(default, deserialize_with = "lenient::optional_id")]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artist {
    pub id: String,
    pub display_name: String,
}

/// One activity record of any kind, as folded by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    VipScan(VipScan),
    GuestCheckin(GuestCheckin),
    Conversion(Conversion),
    Redemption(Redemption),
}

impl ActivityEvent {
    /// The venue day this event belongs to.
    ///
    /// Records carrying a civil date use it; the rest derive it from their
    /// instant in `tz`.
    pub fn civil_date(&self, tz: &Tz) -> NaiveDate {
        match self {
            Self::VipScan(scan) => scan
                .civil_date
                .unwrap_or_else(|| instant_to_civil_date(scan.scanned_at, tz)),
            Self::GuestCheckin(checkin) => checkin.civil_date,
            Self::Conversion(conversion) => instant_to_civil_date(conversion.linked_at, tz),
            Self::Redemption(redemption) => instant_to_civil_date(redemption.created_at, tz),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::VipScan(_) => "vip_scan",
            Self::GuestCheckin(_) => "guest_checkin",
            Self::Conversion(_) => "conversion",
            Self::Redemption(_) => "redemption",
        }
    }
}

/// Raw record lists for one request, as returned by the fetch layer.
#[derive(Debug, Clone, Default)]
pub struct ActivityBatch {
    pub vip_scans: Vec<VipScan>,
    pub guest_checkins: Vec<GuestCheckin>,
    pub conversions: Vec<Conversion>,
    pub redemptions: Vec<Redemption>,
}

impl ActivityBatch {
    pub fn len(&self) -> usize {
        self.vip_scans.len()
            + self.guest_checkins.len()
            + self.conversions.len()
            + self.redemptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn events(&self) -> impl Iterator<Item = ActivityEvent> + '_ {
        self.vip_scans
            .iter()
            .cloned()
            .map(ActivityEvent::VipScan)
            .chain(self.guest_checkins.iter().cloned().map(ActivityEvent::GuestCheckin))
            .chain(self.conversions.iter().cloned().map(ActivityEvent::Conversion))
            .chain(self.redemptions.iter().cloned().map(ActivityEvent::Redemption))
    }
}

/// Field decoders that never reject a record over a bad value.
///
/// Hosted-store exports mix strings, numbers and nulls in the same column;
/// anything unusable decodes to the empty/zero value.
pub mod lenient {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use crate::civil::parse_clock_time;

    pub fn id<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(match raw {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        })
    }

    /// Like [`id`], but blank or unusable values become `None`.
    pub fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = id(deserializer)?;
        Ok(Some(raw).filter(|s| !s.is_empty()))
    }

    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(match &raw {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "1" | "y"
            ),
            _ => false,
        })
    }

    pub fn points<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let parsed = match &raw {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
            Value::String(s) => s.trim().parse::<f64>().ok().and_then(|f| {
                if f.is_finite() {
                    Some(f.round() as i64)
                } else {
                    None
                }
            }),
            _ => None,
        };
        if parsed.is_none() && !raw.is_null() {
            tracing::debug!(value = %raw, "non-numeric points value; counting as 0");
        }
        Ok(parsed.unwrap_or(0))
    }

    pub fn clock_time<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let parsed = match &raw {
            Value::String(s) => parse_clock_time(s),
            _ => None,
        };
        if parsed.is_none() && !raw.is_null() {
            tracing::debug!(value = %raw, "unusable start time; treating as unscheduled");
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use chrono_tz::America::New_York;

    use super::{ActivityEvent, CalendarEvent, Conversion, Redemption, VipScan};

    #[test]
    fn lenient_fields_never_reject_records() {
        let scan: VipScan = serde_json::from_str(
            r#"{"id":7,"user_id":null,"points":"12.6","scanned_at":"2024-03-09T23:10:00Z"}"#,
        )
        .expect("decode scan");
        assert_eq!(scan.id, "7");
        assert_eq!(scan.user_id, "");
        assert_eq!(scan.points, 13);
        assert_eq!(scan.civil_date, None);

        let redemption: Redemption = serde_json::from_str(
            r#"{"user_id":"u1","points_spent":"lots","created_at":"2024-03-09T23:10:00Z"}"#,
        )
        .expect("decode redemption");
        assert_eq!(redemption.points_spent, 0);
        assert_eq!(redemption.reward_name, "");
    }

    #[test]
    fn calendar_start_time_accepts_short_forms() {
        let event: CalendarEvent = serde_json::from_str(
            r#"{"id":"e1","civil_date":"2024-03-09","start_time":"8:30pm","title":"Jazz"}"#,
        )
        .expect("decode event");
        assert_eq!(event.start_time, NaiveTime::from_hms_opt(20, 30, 0));
        assert!(!event.cancelled);
        assert_eq!(event.artist_id, None);
    }

    #[test]
    fn calendar_fields_tolerate_odd_values() {
        let event: CalendarEvent = serde_json::from_str(
            r#"{"id":"e2","artist_id":42,"civil_date":"2024-03-09","start_time":2000,"title":null,"cancelled":null}"#,
        )
        .expect("decode event");
        assert_eq!(event.artist_id.as_deref(), Some("42"));
        assert_eq!(event.start_time, None);
        assert_eq!(event.title, None);
        assert!(!event.cancelled);

        let event: CalendarEvent = serde_json::from_str(
            r#"{"id":"e3","artist_id":"","civil_date":"2024-03-09","cancelled":"true"}"#,
        )
        .expect("decode event");
        assert_eq!(event.artist_id, None);
        assert!(event.cancelled);
    }

    #[test]
    fn civil_date_comes_from_instant_in_venue_zone() {
        // 02:30Z on Mar 10 is still the evening of Mar 9 in New York.
        let conversion = ActivityEvent::Conversion(Conversion {
            device_id: "d1".to_string(),
            linked_at: Utc
                .with_ymd_and_hms(2024, 3, 10, 2, 30, 0)
                .single()
                .expect("valid instant"),
        });
        assert_eq!(
            conversion.civil_date(&New_York),
            NaiveDate::from_ymd_opt(2024, 3, 9).expect("valid date")
        );
    }

    #[test]
    fn embedded_civil_date_wins_over_instant() {
        let scan = ActivityEvent::VipScan(VipScan {
            id: "s1".to_string(),
            user_id: "A".to_string(),
            points: 10,
            scanned_at: Utc
                .with_ymd_and_hms(2024, 3, 10, 2, 30, 0)
                .single()
                .expect("valid instant"),
            civil_date: NaiveDate::from_ymd_opt(2024, 3, 10),
        });
        assert_eq!(
            scan.civil_date(&New_York),
            NaiveDate::from_ymd_opt(2024, 3, 10).expect("valid date")
        );
    }
}
