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

//! Account balance ledger.
//!
//! Balances never go negative. Soft-deleted accounts cannot be debited or
//! credited and are reported as missing.

use super::within;
use crate::SettlementError;
use crate::base::AccountId;
use crate::storage::{Storage, UnitOfWork};
use rust_decimal::Decimal;
use tracing::trace;

/// Debits `amount`. Returns the new balance.
///
/// # Errors
///
/// - [`SettlementError::AccountNotFound`] - No such account, or it is deleted.
/// - [`SettlementError::InvalidAmount`] - `amount` is not positive.
/// - [`SettlementError::InsufficientFunds`] - The debit would overdraw.
pub fn debit<U>(uow: &mut U, id: AccountId, amount: Decimal) -> Result<Decimal, SettlementError>
where
    U: UnitOfWork + ?Sized,
{
    let mut account = uow
        .lock_account(id)?
        .ok_or(SettlementError::AccountNotFound(id))?;
    account.debit(amount)?;
    let balance = account.balance();
    uow.put_account(account)?;
    trace!(account = %id, %amount, %balance, "account debited");
    Ok(balance)
}

/// Credits `amount`. Returns the new balance.
pub fn credit<U>(uow: &mut U, id: AccountId, amount: Decimal) -> Result<Decimal, SettlementError>
where
    U: UnitOfWork + ?Sized,
{
    let mut account = uow
        .lock_account(id)?
        .ok_or(SettlementError::AccountNotFound(id))?;
    account.credit(amount)?;
    let balance = account.balance();
    uow.put_account(account)?;
    trace!(account = %id, %amount, %balance, "account credited");
    Ok(balance)
}

/// Moves `amount` from `from` to `to`.
///
/// Both rows are locked in ascending id order before either is touched. A
/// failed credit leaves the debit staged in `uow`, so the caller must drop
/// the unit of work on error.
pub fn transfer<U>(
    uow: &mut U,
    from: AccountId,
    to: AccountId,
    amount: Decimal,
) -> Result<(), SettlementError>
where
    U: UnitOfWork + ?Sized,
{
    if amount <= Decimal::ZERO {
        return Err(SettlementError::InvalidAmount(amount));
    }
    let (first, second) = if from <= to { (from, to) } else { (to, from) };
    uow.lock_account(first)?;
    uow.lock_account(second)?;

    debit(uow, from, amount)?;
    credit(uow, to, amount)?;
    trace!(%from, %to, %amount, "transfer staged");
    Ok(())
}

/// Balance ledger bound to a storage, one unit of work per call.
#[derive(Debug)]
pub struct BalanceLedger<'s, S: ?Sized> {
    storage: &'s S,
}

impl<'s, S: Storage + ?Sized> BalanceLedger<'s, S> {
    pub fn new(storage: &'s S) -> Self {
        Self { storage }
    }

    pub fn debit(&self, id: AccountId, amount: Decimal) -> Result<Decimal, SettlementError> {
        within(self.storage, |uow| debit(uow, id, amount))
    }

    pub fn credit(&self, id: AccountId, amount: Decimal) -> Result<Decimal, SettlementError> {
        within(self.storage, |uow| credit(uow, id, amount))
    }

    /// Transfers atomically: a failed credit rolls back the debit.
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<(), SettlementError> {
        within(self.storage, |uow| transfer(uow, from, to, amount))
    }
}
