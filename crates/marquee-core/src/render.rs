use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::dashboard::DashboardReport;
use crate::quality::QualityFlag;
use crate::series::{ArtistRollup, DaySummary, PeriodSummary};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    #[tracing::instrument(skip_all)]
    pub fn write_summary<W: Write>(
        &self,
        out: &mut W,
        report: &DashboardReport,
    ) -> anyhow::Result<()> {
        let series = &report.series;
        writeln!(
            out,
            "{} to {} ({}, by {})",
            report.first_day,
            report.last_day,
            report.timezone,
            series.granularity.as_str()
        )?;
        self.write_notices(out, report)?;
        writeln!(out)?;

        let headers = [
            "Period", "Event", "VIPs", "Guests", "People", "Scans", "Points", "Conv", "Rate",
            "Redeemed", "Spent",
        ]
        .map(ToString::to_string)
        .to_vec();
        let rows = series
            .periods
            .iter()
            .map(|period| self.period_row(period))
            .collect();
        write_table(&mut *out, headers, rows)?;

        let totals = &series.totals;
        writeln!(out)?;
        writeln!(
            out,
            "people     {} (avg {:.1} per {})",
            totals.total_people,
            totals.avg_people_per_period,
            series.granularity.as_str()
        )?;
        writeln!(
            out,
            "unique     {} VIPs, {} guests",
            totals.unique_vips_in_range, totals.unique_guests_in_range
        )?;
        writeln!(
            out,
            "converted  {} ({:.1}%)",
            totals.conversion_count,
            totals.conversion_rate * 100.0
        )?;
        writeln!(
            out,
            "points     {} earned, {} spent in {} redemptions",
            totals.points_earned, totals.points_spent, totals.redemption_count
        )?;
        match &series.best_period {
            Some(best) => writeln!(
                out,
                "best       {} ({} {})",
                self.paint(&best.label, "32"),
                best.value,
                series.metric.as_str()
            )?,
            None => writeln!(out, "best       -")?,
        }
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn write_days<W: Write>(&self, out: &mut W, days: &[DaySummary]) -> anyhow::Result<()> {
        let headers = ["Date", "Day", "Event", "VIPs", "Guests", "People"]
            .map(ToString::to_string)
            .to_vec();
        let rows = days
            .iter()
            .map(|day| {
                vec![
                    self.paint(&day.date.to_string(), "33"),
                    day.label.clone(),
                    day.attributed_label.clone(),
                    day.unique_vip_count.to_string(),
                    day.unique_guest_count.to_string(),
                    day.total_people.to_string(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all)]
    pub fn write_artists<W: Write>(
        &self,
        out: &mut W,
        artists: &[ArtistRollup],
    ) -> anyhow::Result<()> {
        let headers = ["Artist", "Nights", "Avg", "VIP%", "Conv%", "Best night", "Best"]
            .map(ToString::to_string)
            .to_vec();
        let rows = artists
            .iter()
            .map(|artist| {
                vec![
                    self.paint(&artist.artist_name, "36"),
                    artist.nights.to_string(),
                    format!("{:.1}", artist.avg_people),
                    format!("{:.1}", artist.vip_share_pct),
                    format!("{:.1}", artist.conversion_pct),
                    artist.best_night.to_string(),
                    artist.best_night_people.to_string(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all)]
    pub fn write_quality<W: Write>(
        &self,
        out: &mut W,
        flags: &[QualityFlag],
    ) -> anyhow::Result<()> {
        if flags.is_empty() {
            writeln!(out, "no data-quality issues")?;
            return Ok(());
        }
        let headers = ["Date", "Issue", "User", "Reward"]
            .map(ToString::to_string)
            .to_vec();
        let rows = flags
            .iter()
            .map(|flag| {
                vec![
                    flag.date.to_string(),
                    self.paint(flag.issue.describe(), "31"),
                    flag.user_id.clone(),
                    flag.reward_name.clone(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    pub fn write_config<W: Write>(&self, out: &mut W, cfg: &Config) -> anyhow::Result<()> {
        for (key, value) in cfg.entries() {
            writeln!(out, "{key} = {value}")?;
        }
        for file in &cfg.loaded_files {
            writeln!(out, "# loaded {}", file.display())?;
        }
        Ok(())
    }

    fn write_notices<W: Write>(&self, out: &mut W, report: &DashboardReport) -> anyhow::Result<()> {
        for notice in &report.notices {
            writeln!(
                out,
                "{}",
                self.paint(
                    &format!("warning: {} unavailable; figures exclude it", notice.query.as_str()),
                    "31"
                )
            )?;
        }
        Ok(())
    }

    fn period_row(&self, period: &PeriodSummary) -> Vec<String> {
        vec![
            self.paint(&period.label, "33"),
            period.attributed_label.clone(),
            period.unique_vip_count.to_string(),
            period.unique_guest_count.to_string(),
            period.total_people.to_string(),
            period.scan_count.to_string(),
            period.points_earned.to_string(),
            period.conversion_count.to_string(),
            format!("{:.1}%", period.conversion_rate * 100.0),
            period.redemption_count.to_string(),
            period.points_spent.to_string(),
        ]
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        write!(writer, "{:width$} ", header, width = *width)?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{strip_ansi, write_table};

    #[test]
    fn table_pads_by_visible_width() {
        let mut out = Vec::new();
        write_table(
            &mut out,
            vec!["Event".to_string(), "N".to_string()],
            vec![
                vec!["\x1b[33m—\x1b[0m".to_string(), "12".to_string()],
                vec!["Open Mic".to_string(), "3".to_string()],
            ],
        )
        .expect("write table");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Event    N  ");
        assert_eq!(lines[1], "-------- -- ");
        assert_eq!(strip_ansi(lines[2]), "—        12 ");
        assert_eq!(lines[3], "Open Mic 3  ");
    }
}
