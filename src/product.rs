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

//! Product rows and their stock counter.
//!
//! The stock counter (`amount`) is private. It only changes through the
//! crate-internal stock primitives, which the [`StockLedger`] drives inside
//! a unit of work.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use marketplace_settlement::{Product, ProductId, StoreId};
//!
//! let product = Product::new(ProductId(1), StoreId(1), "Kettle", dec!(10.00), 5).unwrap();
//! assert_eq!(product.amount(), 5);
//! assert_eq!(product.price_for(3).unwrap(), dec!(30.00));
//! ```
//!
//! Products serialize for reports but cannot be deserialized, so a stock
//! count can only come from [`Product::new`] and the ledger:
//!
//! ```compile_fail
//! use marketplace_settlement::Product;
//!
//! let forged: Product = serde_json::from_str(r#"{"amount": 1000000}"#).unwrap();
//! ```
//!
//! [`StockLedger`]: crate::StockLedger

use crate::SettlementError;
use crate::base::{AccountId, CategoryId, ProductId, StoreId};
use rust_decimal::Decimal;
use serde::Serialize;

/// A product listed by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub store: StoreId,
    pub category: Option<CategoryId>,
    pub title: String,
    pub description: String,
    /// Unit price, always positive.
    price: Decimal,
    /// Units available for reservation.
    amount: u32,
    pub views: u64,
    /// Account that receives payments for this product, overriding the
    /// store owner's accounts.
    pub default_account: Option<AccountId>,
}

impl Product {
    /// Creates a product with the given unit price and stock.
    ///
    /// # Errors
    ///
    /// [`SettlementError::InvalidAmount`] if `price` is not positive.
    pub fn new(
        id: ProductId,
        store: StoreId,
        title: impl Into<String>,
        price: Decimal,
        amount: u32,
    ) -> Result<Self, SettlementError> {
        if price <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount(price));
        }
        Ok(Self {
            id,
            store,
            category: None,
            title: title.into(),
            description: String::new(),
            price,
            amount,
            views: 0,
            default_account: None,
        })
    }

    pub fn with_category(mut self, category: CategoryId) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default_account(mut self, account: AccountId) -> Self {
        self.default_account = Some(account);
        self
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    /// Changes the unit price. Existing orders keep their captured price.
    pub fn set_price(&mut self, price: Decimal) -> Result<(), SettlementError> {
        if price <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount(price));
        }
        self.price = price;
        Ok(())
    }

    /// Unit price × `quantity`, in exact decimal arithmetic.
    pub fn price_for(&self, quantity: u32) -> Result<Decimal, SettlementError> {
        self.price
            .checked_mul(Decimal::from(quantity))
            .ok_or(SettlementError::PriceOverflow(self.id))
    }

    /// Decreases stock by `quantity`.
    pub(crate) fn take(&mut self, quantity: u32) -> Result<(), SettlementError> {
        if quantity == 0 {
            return Err(SettlementError::InvalidQuantity);
        }
        if self.amount < quantity {
            return Err(SettlementError::InsufficientStock {
                product: self.id,
                requested: quantity,
                available: self.amount,
            });
        }
        self.amount -= quantity;
        Ok(())
    }

    /// Increases stock by `quantity`.
    pub(crate) fn put_back(&mut self, quantity: u32) -> Result<(), SettlementError> {
        if quantity == 0 {
            return Err(SettlementError::InvalidQuantity);
        }
        self.amount = self
            .amount
            .checked_add(quantity)
            .ok_or(SettlementError::StockOverflow(self.id))?;
        Ok(())
    }

    /// Applies a signed change to stock. Zero is a no-op.
    pub(crate) fn shift(&mut self, delta: i64) -> Result<(), SettlementError> {
        match delta {
            0 => Ok(()),
            d if d > 0 => {
                let quantity = u32::try_from(d).map_err(|_| SettlementError::StockOverflow(self.id))?;
                self.put_back(quantity)
            }
            d => {
                let requested = d.unsigned_abs();
                match u32::try_from(requested) {
                    Ok(quantity) => self.take(quantity),
                    Err(_) => Err(SettlementError::InsufficientStock {
                        product: self.id,
                        requested: u32::MAX,
                        available: self.amount,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kettle(amount: u32) -> Product {
        Product::new(ProductId(1), StoreId(1), "Kettle", dec!(10.00), amount).unwrap()
    }

    #[test]
    fn rejects_non_positive_price() {
        let result = Product::new(ProductId(1), StoreId(1), "Free", Decimal::ZERO, 1);
        assert_eq!(result, Err(SettlementError::InvalidAmount(Decimal::ZERO)));

        let mut product = kettle(1);
        assert!(product.set_price(dec!(-1)).is_err());
        assert_eq!(product.price(), dec!(10.00));
    }

    #[test]
    fn take_decrements_stock() {
        let mut product = kettle(5);
        product.take(3).unwrap();
        assert_eq!(product.amount(), 2);
    }

    #[test]
    fn take_beyond_stock_leaves_amount_unchanged() {
        let mut product = kettle(2);
        let result = product.take(3);
        assert_eq!(
            result,
            Err(SettlementError::InsufficientStock {
                product: ProductId(1),
                requested: 3,
                available: 2,
            })
        );
        assert_eq!(product.amount(), 2);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut product = kettle(2);
        assert_eq!(product.take(0), Err(SettlementError::InvalidQuantity));
        assert_eq!(product.put_back(0), Err(SettlementError::InvalidQuantity));
    }

    #[test]
    fn put_back_overflow_is_rejected() {
        let mut product = kettle(u32::MAX);
        assert_eq!(product.put_back(1), Err(SettlementError::StockOverflow(ProductId(1))));
        assert_eq!(product.amount(), u32::MAX);
    }

    #[test]
    fn shift_applies_signed_delta() {
        let mut product = kettle(5);
        product.shift(2).unwrap();
        assert_eq!(product.amount(), 7);
        product.shift(-7).unwrap();
        assert_eq!(product.amount(), 0);
        product.shift(0).unwrap();
        assert_eq!(product.amount(), 0);
        assert!(matches!(
            product.shift(-1),
            Err(SettlementError::InsufficientStock { .. })
        ));
        assert!(matches!(
            product.shift(i64::MIN),
            Err(SettlementError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn price_for_is_exact() {
        let product = Product::new(ProductId(1), StoreId(1), "Pen", dec!(0.10), 100).unwrap();
        // 0.1 * 3 drifts in binary floating point
        assert_eq!(product.price_for(3).unwrap(), dec!(0.30));
    }

    #[test]
    fn price_for_overflow_is_reported() {
        let product = Product::new(ProductId(1), StoreId(1), "Yacht", Decimal::MAX, 1).unwrap();
        assert_eq!(product.price_for(2), Err(SettlementError::PriceOverflow(ProductId(1))));
    }
}
