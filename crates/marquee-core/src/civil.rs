use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Offset,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Serialize;

const TIMEZONE_ENV_VAR: &str =
  "MARQUEE_TIMEZONE";
pub const DEFAULT_VENUE_TIMEZONE: &str =
  "America/New_York";

/// Resolves the venue timezone.
///
/// Sources are tried in order: the explicit value (CLI flag), the
/// `MARQUEE_TIMEZONE` environment variable, the rc-configured value and
/// finally [`DEFAULT_VENUE_TIMEZONE`]. A source holding an unknown zone id is
/// logged and skipped.
pub fn resolve_timezone(
  explicit: Option<&str>,
  configured: Option<&str>
) -> Tz {
  if let Some(raw) = explicit
    && let Some(tz) =
      parse_timezone(raw, "cli")
  {
    return tz;
  }

  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "rc")
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_VENUE_TIMEZONE,
    "DEFAULT_VENUE_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured venue timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Converts a venue wall-clock value to the instant it denotes.
///
/// Ambiguous wall times (the repeated hour when clocks fall back) resolve to
/// the earliest instant. Wall times inside a spring-forward gap do not exist;
/// for those the offset in effect at the fields read as UTC is subtracted.
#[must_use]
pub fn civil_date_to_instant(
  date: NaiveDate,
  time_of_day: NaiveTime,
  tz: &Tz
) -> DateTime<Utc> {
  let local_naive =
    date.and_time(time_of_day);
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      local_dt.with_timezone(&Utc)
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      chosen.with_timezone(&Utc)
    }
    | LocalResult::None => {
      tracing::debug!(
        local = %local_naive,
        timezone = %tz,
        "local datetime falls in a gap; probing offset"
      );
      probe_offset_instant(
        local_naive,
        tz
      )
    }
  }
}

fn probe_offset_instant(
  local_naive: NaiveDateTime,
  tz: &Tz
) -> DateTime<Utc> {
  // A day earlier, read as UTC, is safely before any gap on this date.
  let before_gap = local_naive
    .checked_sub_signed(
      Duration::days(1)
    )
    .unwrap_or(local_naive);
  let offset_secs = tz
    .offset_from_utc_datetime(
      &before_gap
    )
    .fix()
    .local_minus_utc();
  let shifted = local_naive
    .checked_sub_signed(
      Duration::seconds(i64::from(
        offset_secs
      ))
    )
    .unwrap_or(local_naive);
  Utc.from_utc_datetime(&shifted)
}

#[must_use]
pub fn instant_to_civil_date(
  instant: DateTime<Utc>,
  tz: &Tz
) -> NaiveDate {
  instant.with_timezone(tz).date_naive()
}

/// Shifts a civil date by `n` calendar days.
///
/// Works on the date itself, never on an instant, so a DST change between the
/// two dates cannot move the result. Saturates at the supported range.
#[must_use]
pub fn add_days_civil(
  date: NaiveDate,
  n: i64
) -> NaiveDate {
  Duration::try_days(n)
    .and_then(|delta| {
      date.checked_add_signed(delta)
    })
    .unwrap_or(if n < 0 {
      NaiveDate::MIN
    } else {
      NaiveDate::MAX
    })
}

/// First instant of `date` in the venue timezone.
#[must_use]
pub fn civil_start(
  date: NaiveDate,
  tz: &Tz
) -> DateTime<Utc> {
  civil_date_to_instant(
    date,
    NaiveTime::MIN,
    tz
  )
}

#[must_use]
pub fn today_in(
  now: DateTime<Utc>,
  tz: &Tz
) -> NaiveDate {
  instant_to_civil_date(now, tz)
}

/// Every civil day in `[start, end]`, ascending. Empty when `end < start`.
#[must_use]
pub fn days_between(
  start: NaiveDate,
  end: NaiveDate
) -> Vec<NaiveDate> {
  start
    .iter_days()
    .take_while(|day| *day <= end)
    .collect()
}

/// Instant range covering whole venue days.
///
/// `start` is the first instant of `first_day` and `end` the first instant of
/// the day after `last_day`; `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FetchWindow {
  pub first_day: NaiveDate,
  pub last_day:  NaiveDate,
  pub start:     DateTime<Utc>,
  pub end:       DateTime<Utc>
}

impl FetchWindow {
  #[tracing::instrument(skip(tz))]
  pub fn for_days(
    first_day: NaiveDate,
    last_day: NaiveDate,
    tz: &Tz
  ) -> Self {
    let (first_day, last_day) =
      if first_day <= last_day {
        (first_day, last_day)
      } else {
        (last_day, first_day)
      };
    let start =
      civil_start(first_day, tz);
    let end = civil_start(
      add_days_civil(last_day, 1),
      tz
    );
    tracing::debug!(
      start = %start,
      end = %end,
      "computed fetch window"
    );
    Self {
      first_day,
      last_day,
      start,
      end
    }
  }

  #[must_use]
  pub fn contains_instant(
    &self,
    instant: DateTime<Utc>
  ) -> bool {
    instant >= self.start
      && instant < self.end
  }

  #[must_use]
  pub fn contains_date(
    &self,
    date: NaiveDate
  ) -> bool {
    date >= self.first_day
      && date <= self.last_day
  }
}

/// Parses a wall-clock token such as `20:00`, `19:30:00` or `7:30pm`.
pub fn parse_clock_time(
  token: &str
) -> Option<NaiveTime> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})(?::(?P<second>\d{2}))?\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let second = match captures
    .name("second")
  {
    | Some(m) => {
      m.as_str().parse::<u32>().ok()?
    }
    | None => 0
  };

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    let ampm = ampm_match
      .as_str()
      .to_ascii_lowercase();
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm.as_str() {
      | "am" => raw_hour % 12,
      | "pm" => raw_hour % 12 + 12,
      | _ => return None
    }
  } else {
    raw_hour
  };

  NaiveTime::from_hms_opt(
    hour, minute, second
  )
}
