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

//! Settlement configuration.
//!
//! Configuration is an explicit value passed to every calculator, never an
//! ambient lookup. Settlement always uses the configuration current at
//! calculation time, not the one shown when a booking was edited, so a rate
//! change between edit and report is expected to change the report.
//!
//! # JSON format
//!
//! ```json
//! {
//!   "commissionExchangeRate": "4100",
//!   "defaultCommissionPercent": "70",
//!   "currencies": [
//!     { "code": "USD", "symbol": "$", "exchangeRate": "1", "isBase": true },
//!     { "code": "KHR", "symbol": "៛", "exchangeRate": "4100", "isBase": false }
//!   ]
//! }
//! ```
//!
//! Every key is optional; missing keys take the defaults above.

use crate::error::{ConfigWarning, SettlementError};
use crate::money::{Currency, ExchangeRate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::str::FromStr;

/// Environment variable overriding the commission exchange rate.
pub const COMMISSION_RATE_ENV_VAR: &str = "PARCEL_COMMISSION_RATE";
/// Environment variable overriding the default commission percentage.
pub const DEFAULT_COMMISSION_ENV_VAR: &str = "PARCEL_DEFAULT_COMMISSION";

/// Display and conversion settings of one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyConfig {
    pub code: Currency,
    pub symbol: String,
    /// Units of this currency per unit of the base currency.
    pub exchange_rate: Decimal,
    #[serde(default)]
    pub is_base: bool,
}

impl CurrencyConfig {
    /// Built-in settings used when a currency is missing from configuration.
    pub fn builtin(code: Currency) -> Self {
        match code {
            Currency::Usd => Self {
                code,
                symbol: "$".into(),
                exchange_rate: Decimal::ONE,
                is_base: true,
            },
            Currency::Khr => Self {
                code,
                symbol: "៛".into(),
                exchange_rate: ExchangeRate::DEFAULT_USD_TO_KHR,
                is_base: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettlementConfig {
    /// USD→KHR multiplier for commission and settlement fee conversion.
    pub commission_exchange_rate: ExchangeRate,
    /// Percentage of the fee paid when no commission rule matches.
    pub default_commission_percent: Decimal,
    pub currencies: Vec<CurrencyConfig>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            commission_exchange_rate: ExchangeRate::default(),
            default_commission_percent: dec!(70),
            currencies: Currency::ALL.into_iter().map(CurrencyConfig::builtin).collect(),
        }
    }
}

impl SettlementConfig {
    /// Reads and validates a JSON configuration document.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, SettlementError> {
        let config: Self = serde_json::from_reader(reader)
            .map_err(|e| SettlementError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_exchange_rate(mut self, usd_to_khr: Decimal) -> Result<Self, SettlementError> {
        self.commission_exchange_rate = ExchangeRate::new(usd_to_khr)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), SettlementError> {
        if self.commission_exchange_rate.usd_to_khr() <= Decimal::ZERO {
            return Err(SettlementError::InvalidExchangeRate);
        }
        if self.default_commission_percent < Decimal::ZERO
            || self.default_commission_percent > dec!(100)
        {
            return Err(SettlementError::InvalidPercentage);
        }
        if self
            .currencies
            .iter()
            .any(|currency| currency.exchange_rate <= Decimal::ZERO)
        {
            return Err(SettlementError::InvalidExchangeRate);
        }
        Ok(())
    }

    /// Applies overrides from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SettlementError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(COMMISSION_RATE_ENV_VAR) {
            let rate = parse_override(COMMISSION_RATE_ENV_VAR, &raw)?;
            self.commission_exchange_rate = ExchangeRate::new(rate)?;
        }
        if let Some(raw) = lookup(DEFAULT_COMMISSION_ENV_VAR) {
            self.default_commission_percent = parse_override(DEFAULT_COMMISSION_ENV_VAR, &raw)?;
        }
        self.validate()
    }

    /// Looks up a currency's settings, falling back to the built-in ones.
    pub fn currency(&self, code: Currency) -> (CurrencyConfig, Option<ConfigWarning>) {
        match self.currencies.iter().find(|c| c.code == code) {
            Some(found) => (found.clone(), None),
            None => {
                let warning = ConfigWarning::CurrencyMissing(code.to_string());
                tracing::warn!(%warning, "using built-in currency settings");
                (CurrencyConfig::builtin(code), Some(warning))
            }
        }
    }

    /// The configured base currency, USD when none is flagged.
    pub fn base_currency(&self) -> Currency {
        self.currencies
            .iter()
            .find(|c| c.is_base)
            .map(|c| c.code)
            .unwrap_or(Currency::Usd)
    }
}

fn parse_override(name: &str, raw: &str) -> Result<Decimal, SettlementError> {
    Decimal::from_str(raw.trim())
        .map_err(|_| SettlementError::InvalidConfig(format!("{name}={raw} is not a number")))
}
