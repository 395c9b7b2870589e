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

//! Predicates checked before any state is mutated.

use crate::SettlementError;
use crate::account::Account;
use crate::base::{AddressId, UserId};
use crate::directory::Address;
use crate::order::Order;
use crate::storage::UnitOfWork;

/// Accepts `1..=max`.
pub fn check_quantity(quantity: u32, max: u32) -> Result<(), SettlementError> {
    if quantity == 0 || quantity > max {
        return Err(SettlementError::QuantityOutOfRange { quantity, max });
    }
    Ok(())
}

/// Loads an address that `owner` may deliver to.
///
/// # Errors
///
/// - [`SettlementError::AddressNotFound`] - Missing or soft-deleted.
/// - [`SettlementError::PermissionDenied`] - Belongs to another user.
pub fn owned_address<U>(uow: &U, id: AddressId, owner: UserId) -> Result<Address, SettlementError>
where
    U: UnitOfWork + ?Sized,
{
    let address = uow
        .address(id)?
        .filter(|address| !address.deleted)
        .ok_or(SettlementError::AddressNotFound(id))?;
    if address.owner != owner {
        return Err(SettlementError::PermissionDenied);
    }
    Ok(address)
}

pub fn check_order_owner(order: &Order, buyer: UserId) -> Result<(), SettlementError> {
    if order.buyer != buyer {
        return Err(SettlementError::PermissionDenied);
    }
    Ok(())
}

pub fn check_account_owner(account: &Account, owner: UserId) -> Result<(), SettlementError> {
    if account.owner != owner {
        return Err(SettlementError::PermissionDenied);
    }
    Ok(())
}
