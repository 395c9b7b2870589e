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

//! # Marketplace Settlement
//!
//! Order and payment settlement for a marketplace: stock is reserved when an
//! order is placed, money moves from buyer to seller when it is paid, and
//! both are unwound on cancellation. Every operation is one atomic unit of
//! work against a pluggable [`Storage`].
//!
//! ## Core Components
//!
//! - [`SettlementEngine`]: Runs the order and payment operations
//! - [`StockLedger`] / [`BalanceLedger`]: Own product stock and account balances
//! - [`OrderStatus`]: Order lifecycle with an explicit transition table
//! - [`Storage`] / [`UnitOfWork`]: Persistence seam, with [`MemoryStorage`] built in
//! - [`SettlementError`]: Error types, classified by [`ErrorKind`] and [`Outcome`]
//!
//! ## Example
//!
//! ```
//! use marketplace_settlement::{
//!     Account, AccountId, Address, AddressId, MemoryStorage, OrderStatus, Product, ProductId,
//!     SettlementConfig, SettlementEngine, Store, StoreId, UserId,
//! };
//! use rust_decimal_macros::dec;
//!
//! let buyer = UserId(1);
//! let seller = UserId(2);
//!
//! let storage = MemoryStorage::new();
//! storage.insert_store(Store::new(StoreId(1), seller, "Kitchen")).unwrap();
//! storage
//!     .insert_product(Product::new(ProductId(1), StoreId(1), "Kettle", dec!(10.00), 5).unwrap())
//!     .unwrap();
//! storage.insert_address(Address::new(AddressId(1), buyer, "Home")).unwrap();
//! storage
//!     .insert_account(Account::new(AccountId(1), buyer, "B-1", dec!(100.00)).unwrap())
//!     .unwrap();
//! storage
//!     .insert_account(Account::new(AccountId(2), seller, "S-1", dec!(50.00)).unwrap())
//!     .unwrap();
//!
//! let engine = SettlementEngine::new(storage, SettlementConfig::default());
//!
//! let order = engine.create_order(buyer, ProductId(1), AddressId(1), 3).unwrap();
//! engine.create_payment(buyer, order, AccountId(1)).unwrap();
//!
//! assert_eq!(engine.order(buyer, order).unwrap().status(), OrderStatus::Paid);
//! assert_eq!(engine.storage().products()[0].amount(), 2);
//! ```
//!
//! ## Thread Safety
//!
//! Storage rows are locked for the life of a unit of work, in a fixed
//! order (order, product, accounts by ascending id), so operations on
//! different rows run in parallel and operations on the same row serialize.

pub mod account;
mod base;
pub mod config;
mod directory;
mod engine;
pub mod error;
pub mod ledger;
pub mod order;
mod payment;
mod product;
pub mod storage;
pub mod validation;

pub use account::Account;
pub use base::{AccountId, AddressId, CategoryId, OrderId, PaymentId, ProductId, StoreId, UserId};
pub use config::SettlementConfig;
pub use directory::{Address, Store};
pub use engine::SettlementEngine;
pub use error::{ErrorKind, Outcome, SettlementError};
pub use ledger::{BalanceLedger, StockLedger};
pub use order::{Order, OrderLine, OrderStatus, UnknownStatus};
pub use payment::Payment;
pub use product::Product;
pub use storage::{MemoryStorage, Storage, StorageError, UnitOfWork};
