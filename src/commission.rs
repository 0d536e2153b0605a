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

//! Driver commission rules.
//!
//! # Rule selection
//!
//! For a delivery or pickup event, candidate rules are those whose
//! `commission_for` matches the event and whose salary type is either the
//! driver's classification or `ALL`. Candidates are ranked by:
//!
//! 1. exact salary-type match over `ALL`;
//! 2. a non-default rule for the event's zone over the default rule;
//! 3. most recently updated, then lowest id (tolerates racing defaults).
//!
//! When nothing matches, the configured default percentage (70% unless
//! configured otherwise) of the fee applies and a [`ConfigWarning`] is returned
//! for the caller to surface.
//!
//! # Example
//!
//! ```
//! use parcel_settlement::{
//!     CommissionEvent, CommissionFor, DriverSalaryType, Money, SettlementConfig,
//!     compute_commission,
//! };
//! use rust_decimal_macros::dec;
//!
//! let event = CommissionEvent {
//!     kind: CommissionFor::Delivery,
//!     zone: Some("Phnom Penh"),
//!     salary_type: DriverSalaryType::WithoutBaseSalary,
//!     fee: Money::usd(dec!(2.00)),
//! };
//! let outcome = compute_commission(&event, &[], &SettlementConfig::default()).unwrap();
//! assert_eq!(outcome.commission, Money::usd(dec!(1.40)));
//! assert!(outcome.warning.is_some());
//! ```

use crate::base::RuleId;
use crate::config::SettlementConfig;
use crate::error::{ConfigWarning, SettlementError};
use crate::money::{Currency, Money, ensure_non_negative};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use std::fmt;

/// Event a commission is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionFor {
    Delivery,
    Pickup,
}

impl fmt::Display for CommissionFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommissionFor::Delivery => f.write_str("DELIVERY"),
            CommissionFor::Pickup => f.write_str("PICKUP"),
        }
    }
}

/// Driver salary classification a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverSalaryType {
    All,
    WithBaseSalary,
    WithoutBaseSalary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionType {
    Percentage,
    FixedAmount,
}

/// A configured driver commission rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverCommissionRule {
    pub id: RuleId,
    pub zone_name: String,
    pub commission_for: CommissionFor,
    #[serde(default = "default_salary_type")]
    pub driver_salary_type: DriverSalaryType,
    #[serde(rename = "type")]
    pub commission_type: CommissionType,
    pub value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_salary_type() -> DriverSalaryType {
    DriverSalaryType::All
}

impl DriverCommissionRule {
    /// Rejects rules that cannot be stored.
    pub fn validate(&self) -> Result<(), SettlementError> {
        if self.zone_name.trim().is_empty() {
            return Err(SettlementError::EmptyField("zone name"));
        }
        ensure_non_negative(self.value, "commission value")?;
        match self.commission_type {
            CommissionType::Percentage if self.value > dec!(100) => {
                Err(SettlementError::InvalidPercentage)
            }
            CommissionType::FixedAmount if self.currency.is_none() => {
                Err(SettlementError::MissingRuleCurrency)
            }
            _ => Ok(()),
        }
    }

    fn matches_zone(&self, zone: Option<&str>) -> bool {
        zone.is_some_and(|zone| self.zone_name.trim().eq_ignore_ascii_case(zone.trim()))
    }
}

/// What a commission is computed for.
#[derive(Debug, Clone, Copy)]
pub struct CommissionEvent<'a> {
    pub kind: CommissionFor,
    pub zone: Option<&'a str>,
    /// The assigned driver's classification (`WITH_BASE_SALARY` or `WITHOUT_BASE_SALARY`).
    pub salary_type: DriverSalaryType,
    /// The fee the commission is taken from.
    pub fee: Money,
}

/// Snapshot of the rule a commission was computed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCommission {
    /// `None` when the built-in default percentage was used.
    pub rule_id: Option<RuleId>,
    #[serde(rename = "type")]
    pub commission_type: CommissionType,
    pub value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    pub amount: Money,
}

impl AppliedCommission {
    pub fn is_fallback(&self) -> bool {
        self.rule_id.is_none()
    }
}

/// Result of a commission computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionOutcome {
    pub commission: Money,
    pub applied: AppliedCommission,
    pub warning: Option<ConfigWarning>,
}

/// The rule selected for an event, if any, and any warning raised on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleResolution<'a> {
    pub rule: Option<&'a DriverCommissionRule>,
    pub warning: Option<ConfigWarning>,
}

fn rank(
    rule: &DriverCommissionRule,
    salary_type: DriverSalaryType,
) -> (bool, bool, Reverse<Option<DateTime<Utc>>>) {
    // Lower sorts first: exact salary match, zone-specific, newest.
    (
        rule.driver_salary_type != salary_type,
        rule.is_default,
        Reverse(rule.updated_at),
    )
}

/// Selects the commission rule for an event from a raw rule list.
pub fn resolve_rule<'a>(
    rules: &'a [DriverCommissionRule],
    kind: CommissionFor,
    zone: Option<&str>,
    salary_type: DriverSalaryType,
) -> RuleResolution<'a> {
    let mut candidates: Vec<&DriverCommissionRule> = rules
        .iter()
        .filter(|rule| rule.commission_for == kind)
        .filter(|rule| {
            rule.driver_salary_type == salary_type
                || rule.driver_salary_type == DriverSalaryType::All
        })
        .filter(|rule| rule.is_default || rule.matches_zone(zone))
        .collect();

    candidates.sort_by(|a, b| {
        rank(a, salary_type)
            .cmp(&rank(b, salary_type))
            .then_with(|| a.id.cmp(&b.id))
    });

    let Some(chosen) = candidates.first().copied() else {
        return RuleResolution {
            rule: None,
            warning: None,
        };
    };

    let mut warning = None;
    if chosen.is_default {
        let contenders = candidates
            .iter()
            .filter(|rule| {
                rule.is_default
                    && rank(rule, salary_type).0 == rank(chosen, salary_type).0
            })
            .count();
        if contenders > 1 {
            let conflict = ConfigWarning::MultipleDefaults {
                scope: kind.to_string(),
                count: contenders,
                chosen: chosen.id.to_string(),
            };
            tracing::warn!(%conflict, "conflicting default commission rules");
            warning = Some(conflict);
        }
    }

    tracing::debug!(rule = %chosen.id, %kind, ?zone, "commission rule selected");
    RuleResolution {
        rule: Some(chosen),
        warning,
    }
}

/// Computes the driver commission for an event.
///
/// Percentage rules take `value`% of the fee in the fee's currency. Fixed
/// rules pay `value` in the rule's currency, converted to the fee's currency
/// with the configured commission exchange rate. The result is rounded once,
/// in the fee's currency.
///
/// # Errors
///
/// [`SettlementError::MissingRuleCurrency`] for a fixed rule stored without a currency.
pub fn compute_commission(
    event: &CommissionEvent<'_>,
    rules: &[DriverCommissionRule],
    config: &SettlementConfig,
) -> Result<CommissionOutcome, SettlementError> {
    let resolution = resolve_rule(rules, event.kind, event.zone, event.salary_type);

    let Some(rule) = resolution.rule else {
        let percent = config.default_commission_percent;
        let warning = ConfigWarning::CommissionRuleMissing {
            scope: event.kind.to_string(),
            percent: percent.to_string(),
        };
        tracing::warn!(%warning, "falling back to default commission");
        let commission = event.fee.scale(percent / dec!(100)).rounded();
        return Ok(CommissionOutcome {
            commission,
            applied: AppliedCommission {
                rule_id: None,
                commission_type: CommissionType::Percentage,
                value: percent,
                currency: None,
                amount: commission,
            },
            warning: Some(warning),
        });
    };

    let commission = match rule.commission_type {
        CommissionType::Percentage => event.fee.scale(rule.value / dec!(100)),
        CommissionType::FixedAmount => {
            let currency = rule.currency.ok_or(SettlementError::MissingRuleCurrency)?;
            config
                .commission_exchange_rate
                .convert(Money::new(rule.value, currency), event.fee.currency())
        }
    }
    .rounded();

    Ok(CommissionOutcome {
        commission,
        applied: AppliedCommission {
            rule_id: Some(rule.id.clone()),
            commission_type: rule.commission_type,
            value: rule.value,
            currency: rule.currency,
            amount: commission,
        },
        warning: resolution.warning,
    })
}

/// Commission rules with at most one default per scope.
///
/// Writes go through [`CommissionRuleBook::upsert`], which demotes the previous
/// default of the same scope within the same call, so the one-default
/// invariant holds after every write.
#[derive(Debug, Clone, Default)]
pub struct CommissionRuleBook {
    rules: Vec<DriverCommissionRule>,
    defaults: HashMap<CommissionFor, RuleId>,
}

impl CommissionRuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a book from stored rules that may carry racing defaults.
    ///
    /// Per scope the most recently updated default (ties: lowest id) survives;
    /// the rest are demoted.
    pub fn from_rules(rules: Vec<DriverCommissionRule>) -> Self {
        let mut book = Self {
            rules,
            defaults: HashMap::new(),
        };
        let mut order: Vec<usize> = (0..book.rules.len()).collect();
        order.sort_by(|&a, &b| newest_first(&book.rules[a], &book.rules[b]));

        for index in order {
            let rule = &mut book.rules[index];
            if !rule.is_default {
                continue;
            }
            if book.defaults.contains_key(&rule.commission_for) {
                tracing::warn!(rule = %rule.id, scope = %rule.commission_for, "demoting duplicate default rule");
                rule.is_default = false;
            } else {
                book.defaults.insert(rule.commission_for, rule.id.clone());
            }
        }
        book
    }

    pub fn rules(&self) -> &[DriverCommissionRule] {
        &self.rules
    }

    pub fn get(&self, id: &RuleId) -> Option<&DriverCommissionRule> {
        self.rules.iter().find(|rule| &rule.id == id)
    }

    pub fn default_for(&self, kind: CommissionFor) -> Option<&DriverCommissionRule> {
        self.defaults.get(&kind).and_then(|id| self.get(id))
    }

    /// Inserts or replaces a rule by id.
    ///
    /// Returns the id of a rule demoted from default by this write, if any.
    ///
    /// # Errors
    ///
    /// Validation failures from [`DriverCommissionRule::validate`]; the book is
    /// unchanged on error.
    pub fn upsert(
        &mut self,
        rule: DriverCommissionRule,
    ) -> Result<Option<RuleId>, SettlementError> {
        rule.validate()?;

        self.defaults.retain(|_, id| id != &rule.id);

        let mut demoted = None;
        if rule.is_default {
            if let Some(previous) = self.defaults.insert(rule.commission_for, rule.id.clone()) {
                if let Some(old) = self.rules.iter_mut().find(|r| r.id == previous) {
                    old.is_default = false;
                }
                demoted = Some(previous);
            }
        }

        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
        Ok(demoted)
    }

    pub fn remove(&mut self, id: &RuleId) -> Option<DriverCommissionRule> {
        let position = self.rules.iter().position(|rule| &rule.id == id)?;
        self.defaults.retain(|_, default_id| default_id != id);
        Some(self.rules.remove(position))
    }

    pub fn resolve(
        &self,
        kind: CommissionFor,
        zone: Option<&str>,
        salary_type: DriverSalaryType,
    ) -> RuleResolution<'_> {
        resolve_rule(&self.rules, kind, zone, salary_type)
    }

    pub fn compute(
        &self,
        event: &CommissionEvent<'_>,
        config: &SettlementConfig,
    ) -> Result<CommissionOutcome, SettlementError> {
        compute_commission(event, &self.rules, config)
    }
}

fn newest_first(a: &DriverCommissionRule, b: &DriverCommissionRule) -> Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, zone: &str, commission_type: CommissionType, value: Decimal) -> DriverCommissionRule {
        DriverCommissionRule {
            id: RuleId::new(id),
            zone_name: zone.into(),
            commission_for: CommissionFor::Delivery,
            driver_salary_type: DriverSalaryType::All,
            commission_type,
            value,
            currency: None,
            is_default: false,
            updated_at: None,
        }
    }

    #[test]
    fn validate_rejects_blank_zone() {
        let r = rule("r1", "  ", CommissionType::Percentage, dec!(50));
        assert_eq!(r.validate(), Err(SettlementError::EmptyField("zone name")));
    }

    #[test]
    fn validate_rejects_percentage_over_hundred() {
        let r = rule("r1", "A", CommissionType::Percentage, dec!(101));
        assert_eq!(r.validate(), Err(SettlementError::InvalidPercentage));
    }

    #[test]
    fn validate_requires_currency_for_fixed_amount() {
        let r = rule("r1", "A", CommissionType::FixedAmount, dec!(1));
        assert_eq!(r.validate(), Err(SettlementError::MissingRuleCurrency));
    }

    #[test]
    fn zone_match_ignores_case_and_padding() {
        let r = rule("r1", " Zone A ", CommissionType::Percentage, dec!(80));
        assert!(r.matches_zone(Some("zone a")));
        assert!(!r.matches_zone(Some("Zone B")));
        assert!(!r.matches_zone(None));
    }
}
