//! `simulate` command handler.
//!
//! Ticks the configured intersections offline, without a clock or a
//! backend, and prints the final records. The output depends only on the
//! seeds and the tick count.

use crate::api::IntersectionView;
use crate::cli::args::{OutputFormat, SimulateArgs};
use crate::error::{ConfigError, SignalError};
use crate::signal::intersection::seed_intersections;
use crate::store::IntersectionStore;

/// Runs `args.ticks` ticks and prints the result.
///
/// # Errors
///
/// Returns a config error if the configuration or a seed is invalid.
pub fn run(args: &SimulateArgs) -> Result<(), SignalError> {
    let config = super::load_config(args.config.as_deref())?;
    let seeds = config
        .intersections
        .clone()
        .unwrap_or_else(seed_intersections);
    let store = IntersectionStore::with_intersections(config.control, seeds)
        .map_err(|(id, source)| ConfigError::InvalidIntersection { id, source })?;

    let mut transitions = 0usize;
    for _ in 0..args.ticks {
        transitions += store.tick_all().advances.len();
    }
    tracing::info!(ticks = args.ticks, transitions, "simulation finished");

    let views: Vec<IntersectionView> = store
        .snapshot()
        .into_iter()
        .map(IntersectionView::from)
        .collect();
    match args.format {
        OutputFormat::Human => {
            for line in render_table(&views) {
                println!("{line}");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&views)?),
    }
    Ok(())
}

fn render_table(views: &[IntersectionView]) -> Vec<String> {
    let name_width = views
        .iter()
        .map(|v| v.intersection.record.name.len())
        .max()
        .unwrap_or(0);
    views
        .iter()
        .map(|v| {
            let rec = &v.intersection.record;
            format!(
                "{:<4} {:<name_width$}  {:<11}  {:<9}  {:>3}s  NS {:<6} EW {}",
                v.intersection.id.as_str(),
                rec.name,
                rec.status.as_str(),
                rec.current_phase,
                rec.time_remaining,
                v.aspects.north_south.as_str(),
                v.aspects.east_west.as_str(),
            )
        })
        .collect()
}
