//! `seed` command handler.

use crate::cli::args::{SeedArgs, SeedFormat};
use crate::error::SignalError;
use crate::signal::intersection::seed_intersections;

/// Prints the built-in seed intersections.
///
/// # Errors
///
/// Returns a serialization error if the records cannot be encoded.
pub fn run(args: &SeedArgs) -> Result<(), SignalError> {
    let seeds = seed_intersections();
    match args.format {
        SeedFormat::Human => {
            for item in &seeds {
                println!(
                    "{}  {} ({}, {}, {} {}s)",
                    item.id,
                    item.record.name,
                    item.record.status,
                    item.record.mode,
                    item.record.current_phase,
                    item.record.time_remaining
                );
            }
        }
        SeedFormat::Json => println!("{}", serde_json::to_string_pretty(&seeds)?),
        SeedFormat::Yaml => print!("{}", serde_yaml::to_string(&seeds)?),
    }
    Ok(())
}
