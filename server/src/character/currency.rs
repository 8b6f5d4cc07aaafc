//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Currency manager

use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::RecordMap;
use crate::persistence::table::Table;
use crate::reference::ReferenceData;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyAmount {
    pub quantity: u32,
    /// Gained since the last weekly reset
    #[serde(default)]
    pub weekly: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Currencies {
    amounts: RecordMap<u32, CurrencyAmount>,
}

impl Currencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quantity(&self, currency: u32) -> u32 {
        self.amounts.get(&currency).map_or(0, |amount| amount.quantity)
    }

    pub fn get(&self, currency: u32) -> Option<&CurrencyAmount> {
        self.amounts.get(&currency)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &CurrencyAmount)> {
        self.amounts.active()
    }

    /// Apply a signed change, clamped to zero and to the currency's caps.
    /// Returns the new quantity, or `None` for an unknown currency.
    pub fn modify(&mut self, currency: u32, delta: i64, reference: &ReferenceData) -> Option<u32> {
        let rule = reference.currencies.get(&currency)?;
        let current = self.get(currency).copied().unwrap_or_default();

        let mut gain = delta.max(0) as u64;
        if rule.weekly_cap > 0 {
            gain = gain.min(u64::from(rule.weekly_cap.saturating_sub(current.weekly)));
        }
        let loss = delta.min(0).unsigned_abs();
        let mut quantity = (u64::from(current.quantity) + gain).saturating_sub(loss);
        if rule.max_amount > 0 {
            quantity = quantity.min(u64::from(rule.max_amount));
        }
        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        // Only what actually landed under the cap counts toward the week
        let weekly = current
            .weekly
            .saturating_add(quantity.saturating_sub(current.quantity));

        let updated = CurrencyAmount { quantity, weekly };
        if updated == current && self.amounts.contains(&currency) {
            return Some(quantity);
        }
        if self.amounts.contains(&currency) {
            self.amounts.update(&currency, |amount| *amount = updated);
        } else {
            self.amounts.insert(currency, updated);
        }
        Some(quantity)
    }

    /// Clear weekly counters
    pub fn reset_weekly(&mut self) {
        let gained: Vec<u32> = self
            .amounts
            .active()
            .filter(|(_, amount)| amount.weekly > 0)
            .map(|(currency, _)| *currency)
            .collect();
        for currency in gained {
            self.amounts.update(&currency, |amount| amount.weekly = 0);
        }
    }

    pub fn load(&mut self, currency: u32, amount: CurrencyAmount) -> bool {
        self.amounts.load(currency, amount)
    }

    pub fn discard(&mut self, currency: u32, amount: CurrencyAmount) {
        self.amounts.load_discarded(currency, amount);
    }

    /// Clamp a loaded amount to its cap; true when it changed
    pub fn clamp(&mut self, currency: u32, max_amount: u32) -> bool {
        if max_amount == 0 || self.quantity(currency) <= max_amount {
            return false;
        }
        self.amounts
            .update(&currency, |amount| amount.quantity = max_amount)
            .is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.amounts.is_dirty()
    }

    pub fn save(&mut self, phase: SavePhase, owner: Uuid, scope: &mut TransactionScope) -> usize {
        self.amounts.save(phase, Table::CharacterCurrency, owner, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::table::StoreTarget;
    use crate::reference::fixtures;

    #[test]
    fn test_modify_caps() {
        let reference = fixtures::reference();
        let mut currencies = Currencies::new();

        assert_eq!(currencies.modify(fixtures::HONOR, 100, &reference), Some(100));
        assert_eq!(currencies.modify(fixtures::HONOR, -250, &reference), Some(0));
        assert_eq!(currencies.modify(fixtures::HONOR, 1_000_000, &reference), Some(4000));
        assert_eq!(currencies.modify(9999, 10, &reference), None);
    }

    #[test]
    fn test_weekly_cap() {
        let reference = fixtures::reference();
        let mut currencies = Currencies::new();

        assert_eq!(currencies.modify(fixtures::VALOR, 800, &reference), Some(800));
        assert_eq!(currencies.modify(fixtures::VALOR, 800, &reference), Some(1000));
        currencies.reset_weekly();
        assert_eq!(currencies.modify(fixtures::VALOR, 300, &reference), Some(1300));
    }

    #[test]
    fn test_capped_gain_spends_only_what_landed() {
        let reference = fixtures::reference();
        let mut currencies = Currencies::new();
        currencies.load(fixtures::VALOR, CurrencyAmount { quantity: 4900, weekly: 0 });

        assert_eq!(currencies.modify(fixtures::VALOR, 500, &reference), Some(5000));
        assert_eq!(currencies.get(fixtures::VALOR).map(|a| a.weekly), Some(100));

        // Nothing fits, so nothing is spent
        assert_eq!(currencies.modify(fixtures::VALOR, 500, &reference), Some(5000));
        assert_eq!(currencies.get(fixtures::VALOR).map(|a| a.weekly), Some(100));
    }

    #[test]
    fn test_unchanged_amount_is_not_dirty() {
        let reference = fixtures::reference();
        let mut currencies = Currencies::new();
        currencies.load(fixtures::HONOR, CurrencyAmount { quantity: 4000, weekly: 0 });

        assert_eq!(currencies.modify(fixtures::HONOR, 10, &reference), Some(4000));
        assert!(!currencies.is_dirty());

        assert_eq!(currencies.modify(fixtures::HONOR, -10, &reference), Some(3990));
        assert!(currencies.is_dirty());
        let mut scope = TransactionScope::new(StoreTarget::Character);
        currencies.save(SavePhase::Upsert, Uuid::nil(), &mut scope);
        assert_eq!(currencies.modify(fixtures::HONOR, 0, &reference), Some(3990));
        assert!(!currencies.is_dirty());
    }
}
