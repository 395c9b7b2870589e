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

//! Ledgers own the two numeric quantities settlement mutates: product stock
//! and account balances. Neither may go negative.
//!
//! Each ledger operation comes in two forms. The free functions in
//! [`stock`] and [`balance`] run inside a caller's [`UnitOfWork`], which is
//! how the engine composes them. [`StockLedger`] and [`BalanceLedger`] wrap
//! the same functions in a unit of work of their own.

pub mod balance;
pub mod stock;

pub use balance::BalanceLedger;
pub use stock::StockLedger;

use crate::SettlementError;
use crate::storage::{Storage, UnitOfWork};

/// Runs `op` in a fresh unit of work and commits it if `op` succeeds.
pub(crate) fn within<'s, S, T>(
    storage: &'s S,
    op: impl FnOnce(&mut (dyn UnitOfWork + 's)) -> Result<T, SettlementError>,
) -> Result<T, SettlementError>
where
    S: Storage + ?Sized,
{
    let mut uow = storage.begin()?;
    let value = op(uow.as_mut())?;
    uow.commit()?;
    Ok(value)
}
