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

//! Error types for settlement operations.
//!
//! Every failure carries an [`ErrorKind`] and an [`Outcome`]. The kind says
//! how a caller should react. The outcome says whether the caller can rely
//! on nothing having been applied.

use crate::base::{AccountId, AddressId, OrderId, PaymentId, ProductId, StoreId};
use crate::order::OrderStatus;
use crate::storage::StorageError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Settlement processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("address {0} not found")]
    AddressNotFound(AddressId),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("payment {0} not found")]
    PaymentNotFound(PaymentId),

    #[error("store {0} not found")]
    StoreNotFound(StoreId),

    /// Neither the product nor the store owner has an active account to
    /// receive the money.
    #[error("store {0} has no account to receive payments")]
    NoSellerAccount(StoreId),

    /// Reservation or adjustment would drive stock below zero
    #[error("insufficient stock for product {product}: requested {requested}, available {available}")]
    InsufficientStock {
        product: ProductId,
        requested: u32,
        available: u32,
    },

    /// Debit would overdraw the account
    #[error("insufficient funds in account {account}")]
    InsufficientFunds { account: AccountId },

    /// The order already has a settled payment
    #[error("order {0} is already paid")]
    OrderAlreadyPaid(OrderId),

    /// The order is cancelled and can no longer change
    #[error("order {0} is cancelled")]
    OrderClosed(OrderId),

    #[error("order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Requested quantity is zero or above the configured bound
    #[error("quantity {quantity} out of range (1..={max})")]
    QuantityOutOfRange { quantity: u32, max: u32 },

    /// Ledger quantity must be positive
    #[error("invalid quantity (must be positive)")]
    InvalidQuantity,

    /// Amount is zero or negative
    #[error("invalid amount {0} (must be positive)")]
    InvalidAmount(Decimal),

    /// Releasing stock would overflow the product counter
    #[error("stock overflow on product {0}")]
    StockOverflow(ProductId),

    /// Crediting would overflow the decimal range
    #[error("balance overflow on account {0}")]
    BalanceOverflow(AccountId),

    /// Unit price × quantity does not fit a decimal
    #[error("price overflow for product {0}")]
    PriceOverflow(ProductId),

    /// Caller does not own the order, address or account being acted on
    #[error("permission denied")]
    PermissionDenied,

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// Coarse classification of a [`SettlementError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    PermissionDenied,
    Persistence,
}

/// What a caller may assume about storage after a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation was rejected or rolled back. Nothing was applied.
    NotApplied,
    /// The commit was attempted but could not be confirmed. The operation
    /// may or may not have been applied.
    Unknown,
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OrderNotFound(_)
            | Self::ProductNotFound(_)
            | Self::AddressNotFound(_)
            | Self::AccountNotFound(_)
            | Self::PaymentNotFound(_)
            | Self::StoreNotFound(_)
            | Self::NoSellerAccount(_) => ErrorKind::NotFound,
            Self::InsufficientStock { .. }
            | Self::InsufficientFunds { .. }
            | Self::OrderAlreadyPaid(_)
            | Self::OrderClosed(_)
            | Self::InvalidTransition { .. }
            | Self::QuantityOutOfRange { .. }
            | Self::InvalidQuantity
            | Self::InvalidAmount(_)
            | Self::StockOverflow(_)
            | Self::BalanceOverflow(_)
            | Self::PriceOverflow(_) => ErrorKind::Conflict,
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::Storage(_) => ErrorKind::Persistence,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Storage(StorageError::CommitUnconfirmed(_)) => Outcome::Unknown,
            _ => Outcome::NotApplied,
        }
    }

    /// Whether retrying the whole operation may succeed.
    ///
    /// Only storage failures that are known to have rolled back qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(StorageError::Unavailable(_) | StorageError::CommitFailed(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            SettlementError::OrderNotFound(OrderId(3)).to_string(),
            "order 3 not found"
        );
        assert_eq!(
            SettlementError::InsufficientStock {
                product: ProductId(1),
                requested: 3,
                available: 2,
            }
            .to_string(),
            "insufficient stock for product 1: requested 3, available 2"
        );
        assert_eq!(
            SettlementError::InsufficientFunds {
                account: AccountId(4)
            }
            .to_string(),
            "insufficient funds in account 4"
        );
        assert_eq!(
            SettlementError::OrderAlreadyPaid(OrderId(8)).to_string(),
            "order 8 is already paid"
        );
        assert_eq!(
            SettlementError::InvalidTransition {
                from: OrderStatus::Cancelled,
                to: OrderStatus::Paid,
            }
            .to_string(),
            "order cannot move from cancelled to paid"
        );
        assert_eq!(
            SettlementError::QuantityOutOfRange {
                quantity: 1001,
                max: 1000
            }
            .to_string(),
            "quantity 1001 out of range (1..=1000)"
        );
        assert_eq!(
            SettlementError::InvalidAmount(dec!(-1.50)).to_string(),
            "invalid amount -1.50 (must be positive)"
        );
        assert_eq!(SettlementError::PermissionDenied.to_string(), "permission denied");
    }

    #[test]
    fn kinds_classify_variants() {
        assert_eq!(
            SettlementError::AccountNotFound(AccountId(1)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SettlementError::NoSellerAccount(StoreId(1)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SettlementError::OrderAlreadyPaid(OrderId(1)).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            SettlementError::PermissionDenied.kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            SettlementError::Storage(StorageError::CommitFailed("disk".into())).kind(),
            ErrorKind::Persistence
        );
    }

    #[test]
    fn only_unconfirmed_commits_have_unknown_outcome() {
        let unconfirmed = SettlementError::Storage(StorageError::CommitUnconfirmed("timeout".into()));
        assert_eq!(unconfirmed.outcome(), Outcome::Unknown);
        assert!(!unconfirmed.is_retryable());

        let failed = SettlementError::Storage(StorageError::CommitFailed("disk".into()));
        assert_eq!(failed.outcome(), Outcome::NotApplied);
        assert!(failed.is_retryable());

        assert_eq!(
            SettlementError::InsufficientFunds {
                account: AccountId(1)
            }
            .outcome(),
            Outcome::NotApplied
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = SettlementError::OrderClosed(OrderId(2));
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
