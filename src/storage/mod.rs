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

//! Persistence seam.
//!
//! The settlement engine never touches storage directly. It asks a
//! [`Storage`] for a [`UnitOfWork`] at the start of every public operation,
//! runs all reads and writes through it, and either commits it or drops it.
//! Dropping an uncommitted unit of work rolls it back.
//!
//! # Locking
//!
//! `lock_*` reads take a row lock that is held until the unit of work ends,
//! so read-check-write sequences on one row are serialized across
//! concurrent units of work. Snapshot reads (`product`, `account`, ...) see
//! the last committed value, or this unit of work's own staged value.
//!
//! Callers lock rows in this order to stay deadlock free:
//!
//! 1. the order,
//! 2. the product,
//! 3. accounts, in ascending id order.
//!
//! # Writes
//!
//! `put_*` writes are staged and only become visible on [`UnitOfWork::commit`].
//! A row must be locked before it can be written.
//!
//! Product stock and account balances are private fields that only the
//! crate's stock and balance ledgers can change, so `put_product` and
//! `put_account` can only write back values the ledgers produced. Go
//! through [`StockLedger`](crate::StockLedger) and
//! [`BalanceLedger`](crate::BalanceLedger) (or the functions in
//! [`ledger`](crate::ledger)) rather than staging products and accounts by
//! hand.

mod journal;
mod memory;

pub use journal::{CommitJournal, CommitRecord, DEFAULT_JOURNAL_CAPACITY};
pub use memory::{MemoryStorage, MemoryUnitOfWork};

use crate::account::Account;
use crate::base::{AccountId, AddressId, OrderId, PaymentId, ProductId, StoreId, UserId};
use crate::directory::{Address, Store};
use crate::order::Order;
use crate::payment::Payment;
use crate::product::Product;
use thiserror::Error;

/// Storage failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store could not be reached or a lock could not be acquired in
    /// time. Nothing was applied.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A write targeted a row this unit of work does not hold.
    #[error("row not locked for write: {0}")]
    NotLocked(String),

    /// A uniqueness constraint rejected the write. Nothing was applied.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The commit failed and was rolled back.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// The commit was sent but its result is unknown.
    #[error("commit unconfirmed: {0}")]
    CommitUnconfirmed(String),
}

/// Source of units of work.
pub trait Storage: Send + Sync {
    /// Opens a unit of work.
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StorageError>;
}

/// One transactional scope.
///
/// See the [module documentation](self) for locking and visibility rules.
pub trait UnitOfWork {
    /// Locks and reads a product.
    fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StorageError>;

    /// Locks and reads an account.
    fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StorageError>;

    /// Locks and reads an order.
    fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StorageError>;

    fn product(&self, id: ProductId) -> Result<Option<Product>, StorageError>;

    fn account(&self, id: AccountId) -> Result<Option<Account>, StorageError>;

    /// All accounts owned by `owner`, ordered by id.
    fn accounts_of(&self, owner: UserId) -> Result<Vec<Account>, StorageError>;

    fn address(&self, id: AddressId) -> Result<Option<Address>, StorageError>;

    fn store(&self, id: StoreId) -> Result<Option<Store>, StorageError>;

    fn order(&self, id: OrderId) -> Result<Option<Order>, StorageError>;

    /// All orders placed by `buyer`, ordered by id.
    fn orders_of(&self, buyer: UserId) -> Result<Vec<Order>, StorageError>;

    fn payment(&self, id: PaymentId) -> Result<Option<Payment>, StorageError>;

    fn payment_for_order(&self, order: OrderId) -> Result<Option<Payment>, StorageError>;

    /// All payments made by `buyer`, ordered by id.
    fn payments_of(&self, buyer: UserId) -> Result<Vec<Payment>, StorageError>;

    /// Stages a locked product. Stock changes belong to the stock ledger.
    fn put_product(&mut self, product: Product) -> Result<(), StorageError>;

    /// Stages a locked account. Balance changes belong to the balance ledger.
    fn put_account(&mut self, account: Account) -> Result<(), StorageError>;

    fn put_order(&mut self, order: Order) -> Result<(), StorageError>;

    /// Allocates an order id. Ids are never reused, even on rollback.
    fn next_order_id(&mut self) -> Result<OrderId, StorageError>;

    fn insert_order(&mut self, order: Order) -> Result<(), StorageError>;

    /// Deletes a locked order.
    fn delete_order(&mut self, id: OrderId) -> Result<(), StorageError>;

    /// Allocates a payment id. Ids are never reused, even on rollback.
    fn next_payment_id(&mut self) -> Result<PaymentId, StorageError>;

    /// Stages a payment. At most one payment may exist per order.
    fn insert_payment(&mut self, payment: Payment) -> Result<(), StorageError>;

    /// Applies every staged write atomically and releases all row locks.
    fn commit(self: Box<Self>) -> Result<(), StorageError>;
}
