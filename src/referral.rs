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

//! Referral rewards.
//!
//! A referral rule fires for a referee when their completed-order count reaches
//! the rule's threshold exactly: 1 for `FIRST_ORDER`, `milestoneCount` for
//! `ORDER_MILESTONE`. When `expiryDays` is non-zero the triggering order must
//! complete within that many days of the referee's registration; otherwise the
//! rule silently does not fire.
//!
//! A firing produces two [`RewardInstruction`]s, one for the referrer and one
//! for the referee. Crediting them is the wallet service's job. The
//! [`ReferralLedger`] remembers which (rule, referee) pairs have been awarded so
//! repeated evaluations of the same history never award twice.

use crate::base::{BookingId, CustomerId, RuleId};
use crate::error::SettlementError;
use crate::money::{Currency, Money, ensure_non_negative};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferralTrigger {
    FirstOrder,
    OrderMilestone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralRule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    pub trigger: ReferralTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_count: Option<u32>,
    /// Zero means the reward never expires.
    #[serde(default)]
    pub expiry_days: u32,
    pub referrer_amount: Decimal,
    pub referrer_currency: Currency,
    pub referee_amount: Decimal,
    pub referee_currency: Currency,
}

impl ReferralRule {
    /// Completed-order count at which the rule fires.
    pub fn threshold(&self) -> usize {
        match self.trigger {
            ReferralTrigger::FirstOrder => 1,
            ReferralTrigger::OrderMilestone => self.milestone_count.unwrap_or(1) as usize,
        }
    }

    pub fn validate(&self) -> Result<(), SettlementError> {
        if self.name.trim().is_empty() {
            return Err(SettlementError::EmptyField("rule name"));
        }
        ensure_non_negative(self.referrer_amount, "referrer amount")?;
        ensure_non_negative(self.referee_amount, "referee amount")?;
        if self.trigger == ReferralTrigger::OrderMilestone && self.milestone_count == Some(0) {
            return Err(SettlementError::InvalidMilestone);
        }
        Ok(())
    }
}

/// A referee's completed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedOrder {
    pub order_id: BookingId,
    pub completed_at: DateTime<Utc>,
}

/// What the resolver needs to know about a referred customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefereeHistory {
    pub referee_id: CustomerId,
    pub referrer_id: CustomerId,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_orders: Vec<CompletedOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardRole {
    Referrer,
    Referee,
}

/// An amount the wallet service should credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardInstruction {
    pub beneficiary: CustomerId,
    pub role: RewardRole,
    pub amount: Money,
    /// Stable per (rule, referee, role); the wallet service deduplicates on it.
    pub idempotency_key: String,
}

/// Both rewards issued by one rule firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralAward {
    pub rule_id: RuleId,
    pub referee_id: CustomerId,
    pub triggering_order: BookingId,
    pub referrer: RewardInstruction,
    pub referee: RewardInstruction,
}

/// Last instant the triggering order may complete. `None` when the rule never
/// expires or the window reaches past the representable calendar.
fn expiry_deadline(rule: &ReferralRule, history: &RefereeHistory) -> Option<DateTime<Utc>> {
    if rule.expiry_days == 0 {
        return None;
    }
    Duration::try_days(i64::from(rule.expiry_days))
        .and_then(|window| history.registered_at.checked_add_signed(window))
}

/// Decides whether `rule` fires for `history`, without memory of past awards.
pub fn evaluate_rule(rule: &ReferralRule, history: &RefereeHistory) -> Option<ReferralAward> {
    if !rule.is_active {
        return None;
    }

    let threshold = rule.threshold();
    if threshold == 0 || history.completed_orders.len() != threshold {
        return None;
    }

    let mut completed: Vec<&CompletedOrder> = history.completed_orders.iter().collect();
    completed.sort_by_key(|order| order.completed_at);
    let triggering = completed[threshold - 1];

    if let Some(deadline) = expiry_deadline(rule, history) {
        if triggering.completed_at > deadline {
            tracing::debug!(
                rule = %rule.id,
                referee = %history.referee_id,
                %deadline,
                "referral window expired"
            );
            return None;
        }
    }

    let instruction = |beneficiary: &CustomerId, role: RewardRole, amount: Money| {
        let suffix = match role {
            RewardRole::Referrer => "referrer",
            RewardRole::Referee => "referee",
        };
        RewardInstruction {
            beneficiary: beneficiary.clone(),
            role,
            amount: amount.rounded(),
            idempotency_key: format!("{}:{}:{}", rule.id, history.referee_id, suffix),
        }
    };

    Some(ReferralAward {
        rule_id: rule.id.clone(),
        referee_id: history.referee_id.clone(),
        triggering_order: triggering.order_id.clone(),
        referrer: instruction(
            &history.referrer_id,
            RewardRole::Referrer,
            Money::new(rule.referrer_amount, rule.referrer_currency),
        ),
        referee: instruction(
            &history.referee_id,
            RewardRole::Referee,
            Money::new(rule.referee_amount, rule.referee_currency),
        ),
    })
}

/// Remembers issued awards so each (rule, referee) pair is awarded once.
#[derive(Debug, Clone, Default)]
pub struct ReferralLedger {
    issued: HashSet<(RuleId, CustomerId)>,
}

impl ReferralLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a ledger from previously issued awards.
    pub fn from_issued<I>(issued: I) -> Self
    where
        I: IntoIterator<Item = (RuleId, CustomerId)>,
    {
        Self {
            issued: issued.into_iter().collect(),
        }
    }

    pub fn is_issued(&self, rule_id: &RuleId, referee_id: &CustomerId) -> bool {
        self.issued
            .contains(&(rule_id.clone(), referee_id.clone()))
    }

    /// Evaluates every rule for a referee, recording and returning new awards.
    pub fn evaluate(
        &mut self,
        rules: &[ReferralRule],
        history: &RefereeHistory,
    ) -> Vec<ReferralAward> {
        let mut awards = Vec::new();
        for rule in rules {
            if self.is_issued(&rule.id, &history.referee_id) {
                continue;
            }
            if let Some(award) = evaluate_rule(rule, history) {
                tracing::info!(rule = %rule.id, referee = %history.referee_id, "referral reward issued");
                self.issued
                    .insert((rule.id.clone(), history.referee_id.clone()));
                awards.push(award);
            }
        }
        awards
    }
}
