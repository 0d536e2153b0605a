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

//! Settlement reporting.
//!
//! Settled rows are folded into per-currency totals. USD and KHR are kept in
//! separate buckets and every addition goes through [`Money::try_add`], so an
//! amount can never be added into another currency's total.
//!
//! Rows are exported as CSV:
//!
//! ```csv
//! Date,Tracking Code,Customer,Customer Phone,Receiver,COD Amount,COD Currency,Fee,Fee Currency,Net Payout
//! "2025-01-10","TRK1","Dara","012345678","Sokha","40000","KHR","20500","KHR","19500"
//! ```

use crate::base::CustomerId;
use crate::error::SettlementError;
use crate::money::{Currency, Money};
use crate::settlement::SettledItem;
use chrono::NaiveDate;
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

/// Header line of the settled parcels export.
pub const CSV_HEADER: &str = "Date,Tracking Code,Customer,Customer Phone,Receiver,COD Amount,COD Currency,Fee,Fee Currency,Net Payout";

/// Totals of one currency bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyTotals {
    pub count: usize,
    pub cod: Money,
    pub fee: Money,
    pub net: Money,
}

impl CurrencyTotals {
    pub fn zero(currency: Currency) -> Self {
        Self {
            count: 0,
            cod: Money::zero(currency),
            fee: Money::zero(currency),
            net: Money::zero(currency),
        }
    }

    pub fn currency(&self) -> Currency {
        self.cod.currency()
    }

    /// Adds one row.
    ///
    /// # Errors
    ///
    /// [`SettlementError::CurrencyMismatch`] if any of the row's amounts is in
    /// another currency than this bucket.
    pub fn add(&mut self, item: &SettledItem) -> Result<(), SettlementError> {
        let cod = self.cod.try_add(item.cod())?;
        let fee = self.fee.try_add(item.fee())?;
        let net = self.net.try_add(item.net())?;
        self.cod = cod;
        self.fee = fee;
        self.net = net;
        self.count += 1;
        Ok(())
    }
}

impl fmt::Display for CurrencyTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} items, COD {}, fees {}, net {}",
            self.currency(),
            self.count,
            self.cod.amount(),
            self.fee.amount(),
            self.net.amount()
        )
    }
}

/// Settlement totals bucketed by currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    totals: BTreeMap<Currency, CurrencyTotals>,
}

impl SettlementReport {
    /// Folds settled rows into per-currency totals.
    pub fn aggregate<'a, I>(items: I) -> Result<Self, SettlementError>
    where
        I: IntoIterator<Item = &'a SettledItem>,
    {
        let mut report = Self::default();
        for item in items {
            report.add(item)?;
        }
        Ok(report)
    }

    pub fn add(&mut self, item: &SettledItem) -> Result<(), SettlementError> {
        self.totals
            .entry(item.cod_currency)
            .or_insert_with(|| CurrencyTotals::zero(item.cod_currency))
            .add(item)
    }

    /// Totals for `currency`, zero when no row used it.
    pub fn totals(&self, currency: Currency) -> CurrencyTotals {
        self.totals
            .get(&currency)
            .copied()
            .unwrap_or_else(|| CurrencyTotals::zero(currency))
    }

    pub fn usd(&self) -> CurrencyTotals {
        self.totals(Currency::Usd)
    }

    pub fn khr(&self) -> CurrencyTotals {
        self.totals(Currency::Khr)
    }

    pub fn count(&self) -> usize {
        self.totals.values().map(|t| t.count).sum()
    }

    /// Totals per customer and currency.
    pub fn by_customer<'a, I>(
        items: I,
    ) -> Result<BTreeMap<(CustomerId, Currency), CurrencyTotals>, SettlementError>
    where
        I: IntoIterator<Item = &'a SettledItem>,
    {
        let mut buckets: BTreeMap<(CustomerId, Currency), CurrencyTotals> = BTreeMap::new();
        for item in items {
            buckets
                .entry((item.customer_id.clone(), item.cod_currency))
                .or_insert_with(|| CurrencyTotals::zero(item.cod_currency))
                .add(item)?;
        }
        Ok(buckets)
    }
}

/// Export file name for a report generated on `date`.
pub fn export_file_name(date: NaiveDate) -> String {
    format!("settled_parcels_{}.csv", date.format("%Y-%m-%d"))
}

#[derive(Serialize)]
struct CsvRow<'a> {
    date: String,
    tracking_code: &'a str,
    customer: &'a str,
    customer_phone: &'a str,
    receiver: &'a str,
    cod_amount: String,
    cod_currency: &'static str,
    fee: String,
    fee_currency: &'static str,
    net_payout: String,
}

impl<'a> From<&'a SettledItem> for CsvRow<'a> {
    fn from(item: &'a SettledItem) -> Self {
        Self {
            date: item.delivery_date.format("%Y-%m-%d").to_string(),
            tracking_code: &item.tracking_code,
            customer: &item.customer_name,
            customer_phone: &item.customer_phone,
            receiver: &item.receiver_name,
            cod_amount: item.cod_amount.to_string(),
            cod_currency: item.cod_currency.code(),
            fee: item.fee.to_string(),
            fee_currency: item.fee_currency.code(),
            net_payout: item.net_payout.to_string(),
        }
    }
}

/// Writes settled rows as UTF-8 CSV: a plain header line, then one fully
/// quoted row per item.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_settled_csv<W: Write>(items: &[SettledItem], mut writer: W) -> Result<(), csv::Error> {
    writer.write_all(CSV_HEADER.as_bytes())?;
    writer.write_all(b"\n")?;

    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(writer);

    for item in items {
        wtr.serialize(CsvRow::from(item))?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_uses_iso_date() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 4).unwrap();
        assert_eq!(export_file_name(date), "settled_parcels_2025-07-04.csv");
    }

    #[test]
    fn empty_report_has_zero_totals() {
        let report = SettlementReport::aggregate(&[]).unwrap();
        assert_eq!(report.count(), 0);
        assert_eq!(report.usd(), CurrencyTotals::zero(Currency::Usd));
        assert_eq!(report.khr().currency(), Currency::Khr);
    }

    #[test]
    fn empty_export_is_header_only() {
        let mut out = Vec::new();
        write_settled_csv(&[], &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("{CSV_HEADER}\n"));
    }
}
