use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::thread::ScopedJoinHandle;

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::activity::{
    ActivityBatch, Artist, CalendarEvent, Conversion, GuestCheckin, Redemption, VipScan,
};
use crate::civil::FetchWindow;

/// Read queries against the venue's record store.
///
/// Each range query returns the records of one kind that fall inside the
/// window. Implementations must be shareable across threads; the range
/// queries are issued concurrently.
pub trait ActivitySource: Send + Sync {
    fn vip_scans(&self, window: &FetchWindow) -> anyhow::Result<Vec<VipScan>>;

    fn guest_checkins(&self, window: &FetchWindow) -> anyhow::Result<Vec<GuestCheckin>>;

    fn conversions(&self, window: &FetchWindow) -> anyhow::Result<Vec<Conversion>>;

    fn redemptions(&self, window: &FetchWindow) -> anyhow::Result<Vec<Redemption>>;

    fn calendar_events(&self, window: &FetchWindow) -> anyhow::Result<Vec<CalendarEvent>>;

    fn artist_names(&self, ids: &[String]) -> anyhow::Result<HashMap<String, String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    VipScans,
    GuestCheckins,
    Conversions,
    Redemptions,
    Calendar,
    Artists,
}

impl Query {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VipScans => "vip_scans",
            Self::GuestCheckins => "guest_checkins",
            Self::Conversions => "conversions",
            Self::Redemptions => "redemptions",
            Self::Calendar => "calendar",
            Self::Artists => "artists",
        }
    }
}

/// A query that failed and was replaced by an empty result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchNotice {
    pub query: Query,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedData {
    pub activity: ActivityBatch,
    pub calendar: Vec<CalendarEvent>,
    pub artist_names: HashMap<String, String>,
    pub notices: Vec<FetchNotice>,
}

/// Runs every query for `window`.
///
/// The five range queries run on scoped threads and are joined before
/// anything is returned; the artist lookup follows for the ids the calendar
/// references. A failed query contributes an empty list and a notice.
#[tracing::instrument(skip(source), fields(first = %window.first_day, last = %window.last_day))]
pub fn fetch_all(source: &dyn ActivitySource, window: &FetchWindow) -> FetchedData {
    let (vip_scans, guest_checkins, conversions, redemptions, calendar) =
        std::thread::scope(|scope| {
            let vip_scans = scope.spawn(|| source.vip_scans(window));
            let guest_checkins = scope.spawn(|| source.guest_checkins(window));
            let conversions = scope.spawn(|| source.conversions(window));
            let redemptions = scope.spawn(|| source.redemptions(window));
            let calendar = scope.spawn(|| source.calendar_events(window));
            (
                joined(vip_scans),
                joined(guest_checkins),
                joined(conversions),
                joined(redemptions),
                joined(calendar),
            )
        });

    let mut notices = Vec::new();
    let activity = ActivityBatch {
        vip_scans: settle(Query::VipScans, vip_scans, &mut notices),
        guest_checkins: settle(Query::GuestCheckins, guest_checkins, &mut notices),
        conversions: settle(Query::Conversions, conversions, &mut notices),
        redemptions: settle(Query::Redemptions, redemptions, &mut notices),
    };
    let calendar = settle(Query::Calendar, calendar, &mut notices);

    let artist_ids: Vec<String> = calendar
        .iter()
        .filter_map(|event| event.artist_id.as_deref())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let artist_names = if artist_ids.is_empty() {
        HashMap::new()
    } else {
        settle(Query::Artists, source.artist_names(&artist_ids), &mut notices)
    };

    info!(
        records = activity.len(),
        calendar = calendar.len(),
        artists = artist_names.len(),
        failed = notices.len(),
        "fetched activity"
    );

    FetchedData {
        activity,
        calendar,
        artist_names,
        notices,
    }
}

fn joined<T>(handle: ScopedJoinHandle<'_, anyhow::Result<T>>) -> anyhow::Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("query worker panicked")))
}

fn settle<T: Default>(
    query: Query,
    result: anyhow::Result<T>,
    notices: &mut Vec<FetchNotice>,
) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            let message = format!("{err:#}");
            warn!(query = query.as_str(), error = %message, "query failed; continuing without it");
            notices.push(FetchNotice { query, message });
            T::default()
        }
    }
}

/// Whether a record belongs to a fetch window.
///
/// Records carrying a civil date are matched by date; instant-only records
/// by the window's half-open instant range.
pub trait Windowed {
    fn in_window(&self, window: &FetchWindow) -> bool;
}

impl Windowed for VipScan {
    fn in_window(&self, window: &FetchWindow) -> bool {
        match self.civil_date {
            Some(date) => window.contains_date(date),
            None => window.contains_instant(self.scanned_at),
        }
    }
}

impl Windowed for GuestCheckin {
    fn in_window(&self, window: &FetchWindow) -> bool {
        window.contains_date(self.civil_date)
    }
}

impl Windowed for Conversion {
    fn in_window(&self, window: &FetchWindow) -> bool {
        window.contains_instant(self.linked_at)
    }
}

impl Windowed for Redemption {
    fn in_window(&self, window: &FetchWindow) -> bool {
        window.contains_instant(self.created_at)
    }
}

impl Windowed for CalendarEvent {
    fn in_window(&self, window: &FetchWindow) -> bool {
        window.contains_date(self.civil_date)
    }
}

fn within<T: Windowed + Clone>(records: &[T], window: &FetchWindow) -> Vec<T> {
    records
        .iter()
        .filter(|record| record.in_window(window))
        .cloned()
        .collect()
}

fn resolve_names(artists: &[Artist], ids: &[String]) -> HashMap<String, String> {
    artists
        .iter()
        .filter(|artist| ids.iter().any(|id| id == &artist.id))
        .map(|artist| (artist.id.clone(), artist.display_name.clone()))
        .collect()
}

/// Record export directory with one JSON-lines file per record kind.
#[derive(Debug)]
pub struct JsonlStore {
    pub data_dir: PathBuf,
    pub vip_scans_path: PathBuf,
    pub guest_checkins_path: PathBuf,
    pub conversions_path: PathBuf,
    pub redemptions_path: PathBuf,
    pub calendar_path: PathBuf,
    pub artists_path: PathBuf,
}

impl JsonlStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        if !data_dir.is_dir() {
            return Err(anyhow!(
                "data directory does not exist: {}",
                data_dir.display()
            ));
        }

        let store = Self {
            vip_scans_path: data_dir.join("vip_scans.data"),
            guest_checkins_path: data_dir.join("guest_checkins.data"),
            conversions_path: data_dir.join("conversions.data"),
            redemptions_path: data_dir.join("redemptions.data"),
            calendar_path: data_dir.join("calendar.data"),
            artists_path: data_dir.join("artists.data"),
            data_dir,
        };

        info!(data_dir = %store.data_dir.display(), "opened record store");
        Ok(store)
    }
}

impl ActivitySource for JsonlStore {
    fn vip_scans(&self, window: &FetchWindow) -> anyhow::Result<Vec<VipScan>> {
        let all: Vec<VipScan> =
            load_jsonl(&self.vip_scans_path).context("failed to load vip_scans.data")?;
        Ok(within(&all, window))
    }

    fn guest_checkins(&self, window: &FetchWindow) -> anyhow::Result<Vec<GuestCheckin>> {
        let all: Vec<GuestCheckin> = load_jsonl(&self.guest_checkins_path)
            .context("failed to load guest_checkins.data")?;
        Ok(within(&all, window))
    }

    fn conversions(&self, window: &FetchWindow) -> anyhow::Result<Vec<Conversion>> {
        let all: Vec<Conversion> =
            load_jsonl(&self.conversions_path).context("failed to load conversions.data")?;
        Ok(within(&all, window))
    }

    fn redemptions(&self, window: &FetchWindow) -> anyhow::Result<Vec<Redemption>> {
        let all: Vec<Redemption> =
            load_jsonl(&self.redemptions_path).context("failed to load redemptions.data")?;
        Ok(within(&all, window))
    }

    fn calendar_events(&self, window: &FetchWindow) -> anyhow::Result<Vec<CalendarEvent>> {
        let all: Vec<CalendarEvent> =
            load_jsonl(&self.calendar_path).context("failed to load calendar.data")?;
        Ok(within(&all, window))
    }

    fn artist_names(&self, ids: &[String]) -> anyhow::Result<HashMap<String, String>> {
        let all: Vec<Artist> =
            load_jsonl(&self.artists_path).context("failed to load artists.data")?;
        Ok(resolve_names(&all, ids))
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    if !path.exists() {
        debug!(file = %path.display(), "record file missing; treating as empty");
        return Ok(Vec::new());
    }

    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

/// In-memory record set with the same window filtering as [`JsonlStore`].
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub vip_scans: Vec<VipScan>,
    pub guest_checkins: Vec<GuestCheckin>,
    pub conversions: Vec<Conversion>,
    pub redemptions: Vec<Redemption>,
    pub calendar: Vec<CalendarEvent>,
    pub artists: Vec<Artist>,
    pub failing: Vec<Query>,
}

impl MemorySource {
    /// Makes `query` fail on every call.
    pub fn fail(mut self, query: Query) -> Self {
        self.failing.push(query);
        self
    }

    fn check(&self, query: Query) -> anyhow::Result<()> {
        if self.failing.contains(&query) {
            return Err(anyhow!("{} unavailable", query.as_str()));
        }
        Ok(())
    }
}

impl ActivitySource for MemorySource {
    fn vip_scans(&self, window: &FetchWindow) -> anyhow::Result<Vec<VipScan>> {
        self.check(Query::VipScans)?;
        Ok(within(&self.vip_scans, window))
    }

    fn guest_checkins(&self, window: &FetchWindow) -> anyhow::Result<Vec<GuestCheckin>> {
        self.check(Query::GuestCheckins)?;
        Ok(within(&self.guest_checkins, window))
    }

    fn conversions(&self, window: &FetchWindow) -> anyhow::Result<Vec<Conversion>> {
        self.check(Query::Conversions)?;
        Ok(within(&self.conversions, window))
    }

    fn redemptions(&self, window: &FetchWindow) -> anyhow::Result<Vec<Redemption>> {
        self.check(Query::Redemptions)?;
        Ok(within(&self.redemptions, window))
    }

    fn calendar_events(&self, window: &FetchWindow) -> anyhow::Result<Vec<CalendarEvent>> {
        self.check(Query::Calendar)?;
        Ok(within(&self.calendar, window))
    }

    fn artist_names(&self, ids: &[String]) -> anyhow::Result<HashMap<String, String>> {
        self.check(Query::Artists)?;
        Ok(resolve_names(&self.artists, ids))
    }
}
