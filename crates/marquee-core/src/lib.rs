pub mod activity;
pub mod aggregate;
pub mod attribution;
pub mod civil;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod period;
pub mod quality;
pub mod render;
pub mod request;
pub mod series;
pub mod source;

use std::ffi::OsString;
use std::io::{self, Write};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::cli::Command;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting marquee CLI"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .rc_overrides
      .into_iter()
      .map(|kv| (kv.key, kv.value))
  );

  let renderer =
    render::Renderer::new(&cfg)?;
  let command =
    cli.command.unwrap_or_default();
  let mut out = io::stdout().lock();

  if command == Command::Config {
    renderer
      .write_config(&mut out, &cfg)?;
    return Ok(());
  }

  let tz = civil::resolve_timezone(
    cli.timezone.as_deref(),
    cfg.get("timezone").as_deref()
  );
  let request =
    request::DashboardRequest::from_config(
      &cfg,
      cli.report.range.as_deref(),
      cli.report.group.as_deref(),
      cli.report.metric.as_deref(),
      cli.report.top.as_deref()
    );
  let now =
    cli.now.unwrap_or_else(Utc::now);
  debug!(?request, %now, timezone = %tz, "resolved request");

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    source::JsonlStore::open(&data_dir)
      .with_context(|| {
        format!(
          "failed to open record store \
           at {}",
          data_dir.display()
        )
      })?;

  let report =
    dashboard::build_dashboard(
      &store, &tz, &request, now
    );

  match command {
    | Command::Summary => {
      renderer
        .write_summary(&mut out, &report)?
    }
    | Command::Days => {
      renderer.write_days(
        &mut out,
        &report.series.top_days
      )?
    }
    | Command::Artists => {
      renderer.write_artists(
        &mut out,
        &report.series.top_artists
      )?
    }
    | Command::Quality => {
      renderer.write_quality(
        &mut out,
        &report.quality
      )?
    }
    | Command::Json => {
      serde_json::to_writer_pretty(
        &mut out, &report
      )
      .context(
        "failed to serialize report"
      )?;
      writeln!(out)?;
    }
    // handled before the store is opened
    | Command::Config => {}
  }

  info!("done");
  Ok(())
}
