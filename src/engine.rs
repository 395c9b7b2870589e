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

//! Settlement engine.
//!
//! The [`SettlementEngine`] runs every public operation in one unit of work
//! taken from its [`Storage`]. Validation happens before any write, the
//! ledgers stage stock and balance changes, and a single commit applies
//! everything. Any early return drops the unit of work and rolls it back.
//!
//! # Operations
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`create_order`](SettlementEngine::create_order) | Reserves stock, persists a `Created` order |
//! | [`update_order`](SettlementEngine::update_order) | Re-prices and adjusts stock, or cancels |
//! | [`delete_order`](SettlementEngine::delete_order) | Returns reserved stock, deletes the order |
//! | [`create_payment`](SettlementEngine::create_payment) | Transfers the captured price, marks the order `Paid` |
//! | [`advance_order`](SettlementEngine::advance_order) | Moves a settled order through fulfilment |
//!
//! # Thread Safety
//!
//! The engine holds no mutable state of its own. Share it behind an `Arc`
//! and call it from as many threads as needed; storage row locks serialize
//! conflicting work.

use crate::account::Account;
use crate::base::{AccountId, AddressId, OrderId, PaymentId, ProductId, UserId};
use crate::config::SettlementConfig;
use crate::error::ErrorKind;
use crate::ledger::{balance, stock};
use crate::order::{Order, OrderLine, OrderStatus};
use crate::payment::Payment;
use crate::product::Product;
use crate::storage::{Storage, UnitOfWork};
use crate::validation::{check_account_owner, check_order_owner, check_quantity, owned_address};
use crate::SettlementError;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

/// Order and payment settlement over a [`Storage`].
///
/// # Invariants
///
/// - Product stock and account balances never go negative.
/// - An order has at most one payment.
/// - Money is only moved by [`create_payment`](Self::create_payment), and
///   the amount is always the order's captured price.
/// - An order's `reserved` quantity is held against stock exactly once.
#[derive(Debug)]
pub struct SettlementEngine<S> {
    storage: S,
    config: SettlementConfig,
}

impl<S: Storage> SettlementEngine<S> {
    pub fn new(storage: S, config: SettlementConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Places an order for `quantity` units of `product`, reserving the
    /// stock.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::AddressNotFound`] / [`SettlementError::PermissionDenied`] -
    ///   Address is missing, deleted, or not the buyer's.
    /// - [`SettlementError::QuantityOutOfRange`] - Outside `1..=max_order_quantity`.
    /// - [`SettlementError::ProductNotFound`] - No such product.
    /// - [`SettlementError::InsufficientStock`] - Not enough units left.
    #[instrument(skip(self))]
    pub fn create_order(
        &self,
        buyer: UserId,
        product: ProductId,
        address: AddressId,
        quantity: u32,
    ) -> Result<OrderId, SettlementError> {
        observe("create_order", self.try_create_order(buyer, product, address, quantity))
    }

    fn try_create_order(
        &self,
        buyer: UserId,
        product_id: ProductId,
        address: AddressId,
        quantity: u32,
    ) -> Result<OrderId, SettlementError> {
        let mut uow = self.storage.begin()?;

        owned_address(&*uow, address, buyer)?;
        check_quantity(quantity, self.config.max_order_quantity)?;
        let product = uow
            .lock_product(product_id)?
            .ok_or(SettlementError::ProductNotFound(product_id))?;

        let line = OrderLine::capture(&product, address, quantity)?;
        stock::reserve(&mut *uow, product_id, quantity)?;

        let id = uow.next_order_id()?;
        let mut order = Order::new(id, buyer, line, Utc::now());
        order.set_reserved(quantity);
        let price = order.line.price;
        uow.insert_order(order)?;
        uow.commit()?;

        info!(order = %id, %price, "order created");
        Ok(id)
    }

    /// Changes an unpaid order.
    ///
    /// `status` must be the order's current status or `Cancelled`.
    /// Cancelling releases the whole reservation and ignores `quantity` and
    /// `address`. Otherwise the reservation is adjusted to `quantity` and
    /// the line is re-priced at the product's current unit price.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::OrderNotFound`] - No such order.
    /// - [`SettlementError::PermissionDenied`] - Not the buyer's order or address.
    /// - [`SettlementError::OrderAlreadyPaid`] - The order is settled.
    /// - [`SettlementError::OrderClosed`] - The order is cancelled.
    /// - [`SettlementError::InvalidTransition`] - Any other status change,
    ///   including `Paid`, which only [`create_payment`](Self::create_payment) sets.
    /// - [`SettlementError::InsufficientStock`] - Raising the quantity needs
    ///   more stock than is left.
    #[instrument(skip(self))]
    pub fn update_order(
        &self,
        order: OrderId,
        buyer: UserId,
        quantity: u32,
        address: AddressId,
        status: OrderStatus,
    ) -> Result<(), SettlementError> {
        observe(
            "update_order",
            self.try_update_order(order, buyer, quantity, address, status),
        )
    }

    fn try_update_order(
        &self,
        id: OrderId,
        buyer: UserId,
        quantity: u32,
        address: AddressId,
        status: OrderStatus,
    ) -> Result<(), SettlementError> {
        let mut uow = self.storage.begin()?;
        let mut order = uow
            .lock_order(id)?
            .ok_or(SettlementError::OrderNotFound(id))?;
        check_order_owner(&order, buyer)?;
        ensure_unpaid(&*uow, &order)?;
        if order.status() == OrderStatus::Cancelled {
            return Err(SettlementError::OrderClosed(id));
        }

        let now = Utc::now();
        if status == OrderStatus::Cancelled {
            let released = release_reservation(&mut *uow, &mut order)?;
            order.transition(OrderStatus::Cancelled, now)?;
            uow.put_order(order)?;
            uow.commit()?;
            info!(order = %id, released, "order cancelled");
            return Ok(());
        }
        if status != order.status() {
            return Err(SettlementError::InvalidTransition {
                from: order.status(),
                to: status,
            });
        }

        check_quantity(quantity, self.config.max_order_quantity)?;
        owned_address(&*uow, address, buyer)?;

        let product_id = order.line.product;
        let product = uow
            .lock_product(product_id)?
            .ok_or(SettlementError::ProductNotFound(product_id))?;
        let delta = i64::from(order.reserved()) - i64::from(quantity);
        stock::adjust(&mut *uow, product_id, delta)?;
        order.set_reserved(quantity);
        order.reprice(&product, address, quantity, now)?;

        let price = order.line.price;
        uow.put_order(order)?;
        uow.commit()?;
        info!(order = %id, quantity, %price, "order updated");
        Ok(())
    }

    /// Deletes an order and returns whatever stock it still holds.
    ///
    /// Payments made for the order are kept.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::OrderNotFound`] - No such order.
    /// - [`SettlementError::PermissionDenied`] - Not the buyer's order.
    #[instrument(skip(self))]
    pub fn delete_order(&self, buyer: UserId, order: OrderId) -> Result<(), SettlementError> {
        observe("delete_order", self.try_delete_order(buyer, order))
    }

    fn try_delete_order(&self, buyer: UserId, id: OrderId) -> Result<(), SettlementError> {
        let mut uow = self.storage.begin()?;
        let mut order = uow
            .lock_order(id)?
            .ok_or(SettlementError::OrderNotFound(id))?;
        check_order_owner(&order, buyer)?;

        let released = release_reservation(&mut *uow, &mut order)?;
        uow.delete_order(id)?;
        uow.commit()?;
        info!(order = %id, released, "order deleted");
        Ok(())
    }

    /// Pays for an order from one of the buyer's accounts.
    ///
    /// The order's captured price moves to the seller's account, the order
    /// becomes `Paid`, and a payment record is written, all in one unit of
    /// work.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::OrderNotFound`] - No such order.
    /// - [`SettlementError::PermissionDenied`] - Not the buyer's order or account.
    /// - [`SettlementError::OrderAlreadyPaid`] - Settled or already has a payment.
    /// - [`SettlementError::InvalidTransition`] - The order is cancelled.
    /// - [`SettlementError::AccountNotFound`] - Missing or deleted buyer account.
    /// - [`SettlementError::NoSellerAccount`] - Nowhere to send the money.
    /// - [`SettlementError::InsufficientFunds`] - Balance below the price.
    #[instrument(skip(self))]
    pub fn create_payment(
        &self,
        buyer: UserId,
        order: OrderId,
        account: AccountId,
    ) -> Result<PaymentId, SettlementError> {
        observe("create_payment", self.try_create_payment(buyer, order, account))
    }

    fn try_create_payment(
        &self,
        buyer: UserId,
        order_id: OrderId,
        account_id: AccountId,
    ) -> Result<PaymentId, SettlementError> {
        let mut uow = self.storage.begin()?;
        let mut order = uow
            .lock_order(order_id)?
            .ok_or(SettlementError::OrderNotFound(order_id))?;
        check_order_owner(&order, buyer)?;
        ensure_unpaid(&*uow, &order)?;
        if order.status() == OrderStatus::Cancelled {
            return Err(SettlementError::InvalidTransition {
                from: OrderStatus::Cancelled,
                to: OrderStatus::Paid,
            });
        }

        let account = uow
            .account(account_id)?
            .filter(Account::is_active)
            .ok_or(SettlementError::AccountNotFound(account_id))?;
        check_account_owner(&account, buyer)?;

        let product_id = order.line.product;
        let product = uow
            .product(product_id)?
            .ok_or(SettlementError::ProductNotFound(product_id))?;
        let seller_account = seller_account(&*uow, &product)?;

        let price = order.line.price;
        balance::transfer(&mut *uow, account_id, seller_account, price)?;

        let now = Utc::now();
        order.transition(OrderStatus::Paid, now)?;
        let quantity = order.line.quantity;
        uow.put_order(order)?;

        let id = uow.next_payment_id()?;
        uow.insert_payment(Payment {
            id,
            buyer,
            order: order_id,
            account: account_id,
            seller_account,
            quantity,
            price,
            paid_at: now,
        })?;
        uow.commit()?;

        info!(order = %order_id, payment = %id, %price, "payment settled");
        Ok(id)
    }

    /// Moves a settled order along fulfilment: `Paid` to `Shipped` to
    /// `Delivered`, or to `Cancelled`. Only the owner of the selling store
    /// may do this.
    ///
    /// Cancelling returns the reserved stock. The payment is not refunded.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::OrderNotFound`] - No such order.
    /// - [`SettlementError::PermissionDenied`] - `actor` does not own the store.
    /// - [`SettlementError::OrderClosed`] - The order is cancelled.
    /// - [`SettlementError::InvalidTransition`] - Not settled, or the move is
    ///   not in the transition table.
    #[instrument(skip(self))]
    pub fn advance_order(
        &self,
        actor: UserId,
        order: OrderId,
        status: OrderStatus,
    ) -> Result<(), SettlementError> {
        observe("advance_order", self.try_advance_order(actor, order, status))
    }

    fn try_advance_order(
        &self,
        actor: UserId,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<(), SettlementError> {
        let mut uow = self.storage.begin()?;
        let mut order = uow
            .lock_order(id)?
            .ok_or(SettlementError::OrderNotFound(id))?;

        let product_id = order.line.product;
        let product = uow
            .product(product_id)?
            .ok_or(SettlementError::ProductNotFound(product_id))?;
        let store = uow
            .store(product.store)?
            .ok_or(SettlementError::StoreNotFound(product.store))?;
        if store.owner != actor {
            return Err(SettlementError::PermissionDenied);
        }

        if order.status() == OrderStatus::Cancelled {
            return Err(SettlementError::OrderClosed(id));
        }
        if !order.is_settled() {
            return Err(SettlementError::InvalidTransition {
                from: order.status(),
                to: status,
            });
        }

        let from = order.status();
        order.transition(status, Utc::now())?;
        if status == OrderStatus::Cancelled {
            release_reservation(&mut *uow, &mut order)?;
        }
        uow.put_order(order)?;
        uow.commit()?;
        info!(order = %id, %from, to = %status, "order advanced");
        Ok(())
    }

    /// Reads one of `buyer`'s orders.
    pub fn order(&self, buyer: UserId, id: OrderId) -> Result<Order, SettlementError> {
        let uow = self.storage.begin()?;
        let order = uow.order(id)?.ok_or(SettlementError::OrderNotFound(id))?;
        check_order_owner(&order, buyer)?;
        Ok(order)
    }

    pub fn orders_of(&self, buyer: UserId) -> Result<Vec<Order>, SettlementError> {
        let uow = self.storage.begin()?;
        Ok(uow.orders_of(buyer)?)
    }

    /// Reads one of `buyer`'s payments.
    pub fn payment(&self, buyer: UserId, id: PaymentId) -> Result<Payment, SettlementError> {
        let uow = self.storage.begin()?;
        let payment = uow
            .payment(id)?
            .ok_or(SettlementError::PaymentNotFound(id))?;
        if payment.buyer != buyer {
            return Err(SettlementError::PermissionDenied);
        }
        Ok(payment)
    }

    pub fn payments_of(&self, buyer: UserId) -> Result<Vec<Payment>, SettlementError> {
        let uow = self.storage.begin()?;
        Ok(uow.payments_of(buyer)?)
    }
}

/// Logs a failed operation at a level that matches its kind.
fn observe<T>(operation: &'static str, result: Result<T, SettlementError>) -> Result<T, SettlementError> {
    result.inspect_err(|err| match err.kind() {
        ErrorKind::Persistence => warn!(
            operation,
            error = %err,
            retryable = err.is_retryable(),
            "storage failure"
        ),
        _ => debug!(operation, error = %err, "rejected"),
    })
}

/// Fails with `OrderAlreadyPaid` if money has moved for `order`.
fn ensure_unpaid<U>(uow: &U, order: &Order) -> Result<(), SettlementError>
where
    U: UnitOfWork + ?Sized,
{
    if order.is_settled() || uow.payment_for_order(order.id)?.is_some() {
        return Err(SettlementError::OrderAlreadyPaid(order.id));
    }
    Ok(())
}

/// Returns the order's reserved units to stock and zeroes the reservation.
fn release_reservation<U>(uow: &mut U, order: &mut Order) -> Result<u32, SettlementError>
where
    U: UnitOfWork + ?Sized,
{
    let held = order.reserved();
    if held > 0 {
        stock::release(uow, order.line.product, held)?;
        order.set_reserved(0);
    }
    Ok(held)
}

/// The product's payout account if it is active, else the store owner's
/// lowest-id active account.
fn seller_account<U>(uow: &U, product: &Product) -> Result<AccountId, SettlementError>
where
    U: UnitOfWork + ?Sized,
{
    if let Some(id) = product.default_account {
        if uow.account(id)?.is_some_and(|account| account.is_active()) {
            return Ok(id);
        }
    }
    let store = uow
        .store(product.store)?
        .ok_or(SettlementError::StoreNotFound(product.store))?;
    uow.accounts_of(store.owner)?
        .into_iter()
        .find(Account::is_active)
        .map(|account| account.id)
        .ok_or(SettlementError::NoSellerAccount(store.id))
}
