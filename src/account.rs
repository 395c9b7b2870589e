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

//! Money accounts.
//!
//! The balance only changes through [`Account::debit`] and
//! [`Account::credit`], which the [`BalanceLedger`] calls inside a unit of
//! work. A debit never overdraws.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use marketplace_settlement::{Account, AccountId, UserId};
//!
//! let account = Account::new(AccountId(1), UserId(1), "ACC-0001", dec!(100.00)).unwrap();
//! assert_eq!(account.balance(), dec!(100.00));
//! ```
//!
//! [`BalanceLedger`]: crate::BalanceLedger

use crate::SettlementError;
use crate::base::{AccountId, UserId};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// A user's money account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub owner: UserId,
    /// Unique human-facing account number.
    pub number: String,
    balance: Decimal,
    /// Soft-deleted accounts are invisible to settlement.
    pub deleted: bool,
}

impl Account {
    const DECIMAL_PRECISION: u32 = 4;

    /// Opens an account with an initial balance.
    ///
    /// # Errors
    ///
    /// [`SettlementError::InvalidAmount`] if `balance` is negative.
    pub fn new(
        id: AccountId,
        owner: UserId,
        number: impl Into<String>,
        balance: Decimal,
    ) -> Result<Self, SettlementError> {
        if balance < Decimal::ZERO {
            return Err(SettlementError::InvalidAmount(balance));
        }
        Ok(Self {
            id,
            owner,
            number: number.into(),
            balance,
            deleted: false,
        })
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }

    /// Decreases the balance.
    pub(crate) fn debit(&mut self, amount: Decimal) -> Result<(), SettlementError> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount(amount));
        }
        if self.deleted {
            return Err(SettlementError::AccountNotFound(self.id));
        }
        if self.balance < amount {
            return Err(SettlementError::InsufficientFunds { account: self.id });
        }
        self.balance -= amount;
        self.assert_invariants();
        Ok(())
    }

    /// Increases the balance. Never fails for balance reasons.
    pub(crate) fn credit(&mut self, amount: Decimal) -> Result<(), SettlementError> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount(amount));
        }
        if self.deleted {
            return Err(SettlementError::AccountNotFound(self.id));
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(SettlementError::BalanceOverflow(self.id))?;
        self.assert_invariants();
        Ok(())
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Account", 5)?;
        state.serialize_field("account", &self.id)?;
        state.serialize_field("owner", &self.owner)?;
        state.serialize_field("number", &self.number)?;
        state.serialize_field(
            "balance",
            &self.balance.round_dp(Account::DECIMAL_PRECISION),
        )?;
        state.serialize_field("deleted", &self.deleted)?;
        state.end()
    }
}
