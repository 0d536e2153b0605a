// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use parcel_settlement::{
    Currency, ParcelBooking, SettledItem, SettlementCalculator, SettlementConfig, SettlementError,
    SettlementReport, export_file_name, ledger, partition_bookings, write_settled_csv,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV_VAR: &str = "PARCEL_SETTLEMENT_LOG";

/// Parcel Settlement - settle COD parcels and report payouts
///
/// Reads a JSON array of parcel bookings and writes settlement CSVs or status
/// listings to stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "parcel-settlement")]
#[command(about = "Settles cash-on-delivery parcels into per-currency payouts", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute settled parcels and export them as CSV
    Settle {
        /// Path to a JSON array of bookings
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// JSON settlement configuration (exchange rate, default commission, currencies)
        #[arg(long)]
        config: Option<PathBuf>,

        /// First delivery date to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last delivery date to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Directory to write settled_parcels_<date>.csv into instead of stdout
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Print the effective status and dashboard group of every booking
    Status {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// List in-transit items with their age in days
    Aging {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

/// One line of the status listing.
#[derive(Debug, Serialize)]
struct StatusRow<'a> {
    id: &'a str,
    effective_status: &'static str,
    group: &'static str,
}

/// One line of the in-transit aging listing.
#[derive(Debug, Serialize)]
struct AgingRow<'a> {
    booking: &'a str,
    item: &'a str,
    tracking_code: &'a str,
    entered_at: String,
    age_days: i64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args.command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Settle {
            input,
            config,
            from,
            to,
            out,
        } => {
            let config = load_config(config.as_deref())?;
            let bookings = load_bookings(open(&input)?)?;
            let rows = settle(&bookings, &config, from, to)?;

            let report = SettlementReport::aggregate(&rows)?;
            for currency in Currency::ALL {
                eprintln!("{}", report.totals(currency));
            }

            match out {
                Some(dir) => {
                    let path = dir.join(export_file_name(export_date(to, Utc::now())));
                    write_settled_csv(&rows, BufWriter::new(File::create(&path)?))?;
                    tracing::info!(path = %path.display(), rows = rows.len(), "settlement exported");
                }
                None => write_settled_csv(&rows, std::io::stdout())?,
            }
        }
        Command::Status { input } => {
            let bookings = load_bookings(open(&input)?)?;
            write_status(&bookings, std::io::stdout())?;
        }
        Command::Aging { input } => {
            let bookings = load_bookings(open(&input)?)?;
            write_aging(&bookings, Utc::now(), std::io::stdout())?;
        }
    }
    Ok(())
}

fn open(path: &Path) -> Result<BufReader<File>, std::io::Error> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}

/// Loads the settlement configuration and applies environment overrides.
fn load_config(path: Option<&Path>) -> Result<SettlementConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => SettlementConfig::from_json_reader(open(path)?)?,
        None => SettlementConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

/// Parses a JSON array of booking documents and validates every booking.
fn load_bookings<R: Read>(reader: R) -> Result<Vec<ParcelBooking>, Box<dyn std::error::Error>> {
    let bookings: Vec<ParcelBooking> = serde_json::from_reader(reader)?;
    for booking in &bookings {
        booking
            .validate()
            .map_err(|e| format!("booking {}: {e}", booking.id))?;
    }
    Ok(bookings)
}

/// Date stamped on an exported file: the end of the range, or today.
fn export_date(to: Option<NaiveDate>, now: DateTime<Utc>) -> NaiveDate {
    to.unwrap_or_else(|| now.date_naive())
}

/// Settles all bookings, or only those delivered within the given dates.
fn settle(
    bookings: &[ParcelBooking],
    config: &SettlementConfig,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<SettledItem>, SettlementError> {
    let calculator = SettlementCalculator::new(config);
    if from.is_none() && to.is_none() {
        let mut rows = Vec::new();
        for booking in bookings {
            rows.extend(calculator.settle_booking(booking)?);
        }
        return Ok(rows);
    }
    calculator.settle_range(
        bookings,
        from.unwrap_or(NaiveDate::MIN),
        to.unwrap_or(NaiveDate::MAX),
    )
}

/// Writes `id,effective_status,group` for every booking.
fn write_status<W: Write>(bookings: &[ParcelBooking], writer: W) -> Result<(), csv::Error> {
    let groups = partition_bookings(bookings);
    let mut wtr = csv::Writer::from_writer(writer);
    for (group, members) in [("active", &groups.active), ("history", &groups.history)] {
        for booking in members {
            wtr.serialize(StatusRow {
                id: booking.id.as_str(),
                effective_status: booking.effective_status().as_str(),
                group,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Writes every in-transit item with its age in days, oldest first.
fn write_aging<W: Write>(
    bookings: &[ParcelBooking],
    now: DateTime<Utc>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for entry in ledger::in_transit_aging(bookings, now) {
        wtr.serialize(AgingRow {
            booking: entry.booking_id.as_str(),
            item: entry.item_id.as_str(),
            tracking_code: &entry.tracking_code,
            entered_at: entry.entered_at.to_rfc3339(),
            age_days: entry.age_days,
        })?;
    }
    wtr.flush()?;
    Ok(())
}
