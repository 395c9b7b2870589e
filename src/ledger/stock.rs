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

//! Product stock ledger.
//!
//! Every operation locks the product row before reading `amount`, so
//! concurrent reservations on one product are serialized and the
//! check-then-write never races.

use super::within;
use crate::SettlementError;
use crate::base::ProductId;
use crate::storage::{Storage, UnitOfWork};
use tracing::trace;

/// Takes `quantity` units out of stock. Returns the remaining amount.
///
/// # Errors
///
/// - [`SettlementError::ProductNotFound`] - No such product.
/// - [`SettlementError::InvalidQuantity`] - `quantity` is zero.
/// - [`SettlementError::InsufficientStock`] - Fewer than `quantity` units left.
pub fn reserve<U>(uow: &mut U, id: ProductId, quantity: u32) -> Result<u32, SettlementError>
where
    U: UnitOfWork + ?Sized,
{
    let mut product = uow
        .lock_product(id)?
        .ok_or(SettlementError::ProductNotFound(id))?;
    product.take(quantity)?;
    let remaining = product.amount();
    uow.put_product(product)?;
    trace!(product = %id, quantity, remaining, "stock reserved");
    Ok(remaining)
}

/// Returns `quantity` units to stock. Returns the new amount.
pub fn release<U>(uow: &mut U, id: ProductId, quantity: u32) -> Result<u32, SettlementError>
where
    U: UnitOfWork + ?Sized,
{
    let mut product = uow
        .lock_product(id)?
        .ok_or(SettlementError::ProductNotFound(id))?;
    product.put_back(quantity)?;
    let remaining = product.amount();
    uow.put_product(product)?;
    trace!(product = %id, quantity, remaining, "stock released");
    Ok(remaining)
}

/// Applies a signed change: positive returns stock, negative reserves more.
/// Zero still locks the row but writes nothing.
pub fn adjust<U>(uow: &mut U, id: ProductId, delta: i64) -> Result<u32, SettlementError>
where
    U: UnitOfWork + ?Sized,
{
    let mut product = uow
        .lock_product(id)?
        .ok_or(SettlementError::ProductNotFound(id))?;
    if delta == 0 {
        return Ok(product.amount());
    }
    product.shift(delta)?;
    let remaining = product.amount();
    uow.put_product(product)?;
    trace!(product = %id, delta, remaining, "stock adjusted");
    Ok(remaining)
}

/// Stock ledger bound to a storage, one unit of work per call.
#[derive(Debug)]
pub struct StockLedger<'s, S: ?Sized> {
    storage: &'s S,
}

impl<'s, S: Storage + ?Sized> StockLedger<'s, S> {
    pub fn new(storage: &'s S) -> Self {
        Self { storage }
    }

    pub fn reserve(&self, id: ProductId, quantity: u32) -> Result<u32, SettlementError> {
        within(self.storage, |uow| reserve(uow, id, quantity))
    }

    pub fn release(&self, id: ProductId, quantity: u32) -> Result<u32, SettlementError> {
        within(self.storage, |uow| release(uow, id, quantity))
    }

    pub fn adjust(&self, id: ProductId, delta: i64) -> Result<u32, SettlementError> {
        within(self.storage, |uow| adjust(uow, id, delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::StoreId;
    use crate::product::Product;
    use crate::storage::MemoryStorage;
    use rust_decimal_macros::dec;

    fn storage(amount: u32) -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .insert_product(
                Product::new(ProductId(1), StoreId(1), "Kettle", dec!(10.00), amount).unwrap(),
            )
            .unwrap();
        storage
    }

    fn amount(storage: &MemoryStorage) -> u32 {
        storage.products()[0].amount()
    }

    #[test]
    fn reserve_decrements() {
        let storage = storage(5);
        let ledger = StockLedger::new(&storage);
        assert_eq!(ledger.reserve(ProductId(1), 3), Ok(2));
        assert_eq!(amount(&storage), 2);
    }

    #[test]
    fn reserve_more_than_available_changes_nothing() {
        let storage = storage(2);
        let ledger = StockLedger::new(&storage);
        assert_eq!(
            ledger.reserve(ProductId(1), 3),
            Err(SettlementError::InsufficientStock {
                product: ProductId(1),
                requested: 3,
                available: 2,
            })
        );
        assert_eq!(amount(&storage), 2);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let storage = storage(2);
        let ledger = StockLedger::new(&storage);
        assert_eq!(
            ledger.reserve(ProductId(1), 0),
            Err(SettlementError::InvalidQuantity)
        );
        assert_eq!(
            ledger.release(ProductId(1), 0),
            Err(SettlementError::InvalidQuantity)
        );
    }

    #[test]
    fn release_overflow_is_rejected() {
        let storage = storage(u32::MAX);
        let ledger = StockLedger::new(&storage);
        assert_eq!(
            ledger.release(ProductId(1), 1),
            Err(SettlementError::StockOverflow(ProductId(1)))
        );
        assert_eq!(amount(&storage), u32::MAX);
    }

    #[test]
    fn adjust_both_directions() {
        let storage = storage(5);
        let ledger = StockLedger::new(&storage);
        assert_eq!(ledger.adjust(ProductId(1), -5), Ok(0));
        assert_eq!(ledger.adjust(ProductId(1), 2), Ok(2));
        assert_eq!(ledger.adjust(ProductId(1), 0), Ok(2));
        assert!(matches!(
            ledger.adjust(ProductId(1), -3),
            Err(SettlementError::InsufficientStock { .. })
        ));
        assert_eq!(amount(&storage), 2);
    }

    #[test]
    fn unknown_product() {
        let storage = storage(5);
        let ledger = StockLedger::new(&storage);
        assert_eq!(
            ledger.reserve(ProductId(9), 1),
            Err(SettlementError::ProductNotFound(ProductId(9)))
        );
    }

    #[test]
    fn composed_operations_share_one_unit_of_work() {
        let storage = storage(5);
        let mut uow = storage.begin().unwrap();
        reserve(uow.as_mut(), ProductId(1), 4).unwrap();
        // Second reservation sees the first one's staged amount
        let result = reserve(uow.as_mut(), ProductId(1), 2);
        assert!(matches!(result, Err(SettlementError::InsufficientStock { available: 1, .. })));
        drop(uow);
        assert_eq!(amount(&storage), 5);
    }
}
