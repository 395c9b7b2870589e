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

//! In-process transactional storage.
//!
//! Mutable tables (products, accounts, orders) hold one [`Row`] per record.
//! A row carries a `held` flag guarded by a [`parking_lot::Mutex`], and a
//! [`Condvar`] that waiters park on until the holder releases it. A unit of
//! work keeps every row it locked, stages writes in private copies, and
//! copies them back on commit. Locks are released on drop, which makes
//! rollback the default exit path.
//!
//! Commits publish under the write side of a storage-wide [`RwLock`], and
//! reads that span several rows take its read side. A reader therefore sees
//! either all of a commit or none of it. Row locks are never acquired while
//! the gate is held.
//!
//! Reference tables (stores, addresses) and the append-only payments table
//! are plain [`DashMap`]s.

use super::journal::{CommitJournal, CommitRecord};
use super::{Storage, StorageError, UnitOfWork};
use crate::account::Account;
use crate::base::{AccountId, AddressId, OrderId, PaymentId, ProductId, StoreId, UserId};
use crate::directory::{Address, Store};
use crate::order::Order;
use crate::payment::Payment;
use crate::product::Product;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct RowState<T> {
    /// `None` once the row is deleted.
    value: Option<T>,
    held: bool,
}

#[derive(Debug)]
struct Row<T> {
    state: Mutex<RowState<T>>,
    released: Condvar,
}

/// Lock wait exceeded the storage timeout.
#[derive(Debug)]
struct LockTimeout;

impl<T: Clone> Row<T> {
    fn new(value: T) -> Self {
        Self {
            state: Mutex::new(RowState {
                value: Some(value),
                held: false,
            }),
            released: Condvar::new(),
        }
    }

    fn snapshot(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    /// Waits until the row is free, then holds it.
    fn acquire(&self, timeout: Duration) -> Result<Option<T>, LockTimeout> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.held {
            if self.released.wait_until(&mut state, deadline).timed_out() && state.held {
                return Err(LockTimeout);
            }
        }
        state.held = true;
        Ok(state.value.clone())
    }

    /// Overwrites the committed value. Caller must hold the row.
    fn write(&self, value: Option<T>) {
        self.state.lock().value = value;
    }

    fn release(&self) {
        self.state.lock().held = false;
        self.released.notify_all();
    }
}

type Table<K, T> = DashMap<K, Arc<Row<T>>>;

/// Clones the row handle out so no shard lock is held while waiting on it.
fn row_of<K: Eq + Hash, T>(table: &Table<K, T>, id: &K) -> Option<Arc<Row<T>>> {
    table.get(id).map(|entry| Arc::clone(entry.value()))
}

fn rows_of<K: Copy + Eq + Hash, T>(table: &Table<K, T>) -> Vec<(K, Arc<Row<T>>)> {
    table
        .iter()
        .map(|entry| (*entry.key(), Arc::clone(entry.value())))
        .collect()
}

/// Shared in-memory store.
#[derive(Debug)]
pub struct MemoryStorage {
    products: Table<ProductId, Product>,
    accounts: Table<AccountId, Account>,
    /// Account number → account, for the uniqueness constraint.
    account_numbers: DashMap<String, AccountId>,
    orders: Table<OrderId, Order>,
    stores: DashMap<StoreId, Store>,
    addresses: DashMap<AddressId, Address>,
    payments: DashMap<PaymentId, Payment>,
    journal: CommitJournal,
    /// Held for writing while a commit publishes its rows.
    commit_gate: RwLock<()>,
    next_order: AtomicU64,
    next_payment: AtomicU64,
    lock_timeout: Duration,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates a store whose row lock waits give up after `lock_timeout`.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            products: DashMap::new(),
            accounts: DashMap::new(),
            account_numbers: DashMap::new(),
            orders: DashMap::new(),
            stores: DashMap::new(),
            addresses: DashMap::new(),
            payments: DashMap::new(),
            journal: CommitJournal::new(),
            commit_gate: RwLock::new(()),
            next_order: AtomicU64::new(1),
            next_payment: AtomicU64::new(1),
            lock_timeout,
        }
    }

    /// Keeps at most `capacity` commit records in the journal.
    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal = CommitJournal::with_capacity(capacity);
        self
    }

    pub fn insert_store(&self, store: Store) -> Result<(), StorageError> {
        match self.stores.entry(store.id) {
            Entry::Occupied(_) => Err(StorageError::Constraint(format!("store {} exists", store.id))),
            Entry::Vacant(entry) => {
                entry.insert(store);
                Ok(())
            }
        }
    }

    pub fn insert_address(&self, address: Address) -> Result<(), StorageError> {
        match self.addresses.entry(address.id) {
            Entry::Occupied(_) => Err(StorageError::Constraint(format!(
                "address {} exists",
                address.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(address);
                Ok(())
            }
        }
    }

    /// Lists a new product. Existing products are only changed through the
    /// stock ledger.
    pub fn insert_product(&self, product: Product) -> Result<(), StorageError> {
        match self.products.entry(product.id) {
            Entry::Occupied(_) => Err(StorageError::Constraint(format!(
                "product {} exists",
                product.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Row::new(product)));
                Ok(())
            }
        }
    }

    /// Opens a new account. Existing accounts are only changed through the
    /// balance ledger.
    pub fn insert_account(&self, account: Account) -> Result<(), StorageError> {
        // Claim the number first; the entry API keeps check-and-insert atomic
        match self.account_numbers.entry(account.number.clone()) {
            Entry::Occupied(existing) => {
                return Err(StorageError::Constraint(format!(
                    "account number {} already used by account {}",
                    account.number,
                    existing.get()
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(account.id);
            }
        }
        match self.accounts.entry(account.id) {
            Entry::Occupied(_) => {
                self.account_numbers
                    .remove_if(&account.number, |_, claimed| *claimed == account.id);
                Err(StorageError::Constraint(format!(
                    "account {} exists",
                    account.id
                )))
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Row::new(account)));
                Ok(())
            }
        }
    }

    /// Committed products, ordered by id.
    pub fn products(&self) -> Vec<Product> {
        let _gate = self.commit_gate.read();
        committed(&self.products)
    }

    /// Committed accounts, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        let _gate = self.commit_gate.read();
        committed(&self.accounts)
    }

    /// Committed orders, ordered by id.
    pub fn orders(&self) -> Vec<Order> {
        let _gate = self.commit_gate.read();
        committed(&self.orders)
    }

    /// Committed payments, ordered by id.
    pub fn payments(&self) -> Vec<Payment> {
        let _gate = self.commit_gate.read();
        let mut payments: Vec<Payment> = self.payments.iter().map(|e| e.value().clone()).collect();
        payments.sort_by_key(|p| p.id);
        payments
    }

    pub fn journal(&self) -> &CommitJournal {
        &self.journal
    }
}

fn committed<K: Copy + Ord + Hash, T: Clone>(table: &Table<K, T>) -> Vec<T> {
    let mut rows = rows_of(table);
    rows.sort_by_key(|(id, _)| *id);
    rows.into_iter().filter_map(|(_, row)| row.snapshot()).collect()
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StorageError> {
        Ok(Box::new(MemoryUnitOfWork::new(self)))
    }
}

/// A row locked by a unit of work and its staged value.
#[derive(Debug)]
struct Held<T> {
    row: Arc<Row<T>>,
    staged: Option<T>,
    dirty: bool,
}

/// Unit of work over a [`MemoryStorage`].
#[derive(Debug)]
pub struct MemoryUnitOfWork<'a> {
    storage: &'a MemoryStorage,
    products: HashMap<ProductId, Held<Product>>,
    accounts: HashMap<AccountId, Held<Account>>,
    orders: HashMap<OrderId, Held<Order>>,
    new_orders: BTreeMap<OrderId, Order>,
    new_payments: Vec<Payment>,
}

impl<'a> MemoryUnitOfWork<'a> {
    fn new(storage: &'a MemoryStorage) -> Self {
        Self {
            storage,
            products: HashMap::new(),
            accounts: HashMap::new(),
            orders: HashMap::new(),
            new_orders: BTreeMap::new(),
            new_payments: Vec::new(),
        }
    }
}

fn lock_row<K, T>(
    table: &Table<K, T>,
    held: &mut HashMap<K, Held<T>>,
    id: K,
    timeout: Duration,
    what: &str,
) -> Result<Option<T>, StorageError>
where
    K: Copy + Eq + Hash + Display,
    T: Clone,
{
    if let Some(existing) = held.get(&id) {
        return Ok(existing.staged.clone());
    }
    let Some(row) = row_of(table, &id) else {
        return Ok(None);
    };
    let value = row.acquire(timeout).map_err(|LockTimeout| {
        warn!(row = %id, table = what, "lock wait timeout");
        StorageError::Unavailable(format!("lock wait timeout on {what} {id}"))
    })?;
    match value {
        Some(value) => {
            held.insert(
                id,
                Held {
                    row,
                    staged: Some(value.clone()),
                    dirty: false,
                },
            );
            Ok(Some(value))
        }
        None => {
            // Deleted while we waited
            row.release();
            Ok(None)
        }
    }
}

fn read_row<K, T>(table: &Table<K, T>, held: &HashMap<K, Held<T>>, id: K) -> Option<T>
where
    K: Eq + Hash,
    T: Clone,
{
    if let Some(existing) = held.get(&id) {
        return existing.staged.clone();
    }
    row_of(table, &id).and_then(|row| row.snapshot())
}

fn stage<K, T>(
    held: &mut HashMap<K, Held<T>>,
    id: K,
    value: Option<T>,
    what: &str,
) -> Result<(), StorageError>
where
    K: Eq + Hash + Display,
{
    match held.get_mut(&id) {
        Some(existing) => {
            existing.staged = value;
            existing.dirty = true;
            Ok(())
        }
        None => Err(StorageError::NotLocked(format!("{what} {id}"))),
    }
}

/// Copies dirty rows back and returns their ids, sorted.
fn flush<K, T>(table: &Table<K, T>, held: &HashMap<K, Held<T>>) -> Vec<K>
where
    K: Copy + Ord + Hash,
    T: Clone,
{
    let mut written = Vec::new();
    for (id, row) in held.iter().filter(|(_, h)| h.dirty) {
        row.row.write(row.staged.clone());
        if row.staged.is_none() {
            table.remove(id);
        }
        written.push(*id);
    }
    written.sort();
    written
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn lock_product(&mut self, id: ProductId) -> Result<Option<Product>, StorageError> {
        let timeout = self.storage.lock_timeout;
        lock_row(&self.storage.products, &mut self.products, id, timeout, "product")
    }

    fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StorageError> {
        let timeout = self.storage.lock_timeout;
        lock_row(&self.storage.accounts, &mut self.accounts, id, timeout, "account")
    }

    fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>, StorageError> {
        if let Some(order) = self.new_orders.get(&id) {
            return Ok(Some(order.clone()));
        }
        let timeout = self.storage.lock_timeout;
        lock_row(&self.storage.orders, &mut self.orders, id, timeout, "order")
    }

    fn product(&self, id: ProductId) -> Result<Option<Product>, StorageError> {
        Ok(read_row(&self.storage.products, &self.products, id))
    }

    fn account(&self, id: AccountId) -> Result<Option<Account>, StorageError> {
        Ok(read_row(&self.storage.accounts, &self.accounts, id))
    }

    fn accounts_of(&self, owner: UserId) -> Result<Vec<Account>, StorageError> {
        let _gate = self.storage.commit_gate.read();
        let mut accounts: Vec<Account> = rows_of(&self.storage.accounts)
            .into_iter()
            .filter_map(|(id, row)| match self.accounts.get(&id) {
                Some(existing) => existing.staged.clone(),
                None => row.snapshot(),
            })
            .filter(|account| account.owner == owner)
            .collect();
        accounts.sort_by_key(|account| account.id);
        Ok(accounts)
    }

    fn address(&self, id: AddressId) -> Result<Option<Address>, StorageError> {
        Ok(self.storage.addresses.get(&id).map(|e| e.value().clone()))
    }

    fn store(&self, id: StoreId) -> Result<Option<Store>, StorageError> {
        Ok(self.storage.stores.get(&id).map(|e| e.value().clone()))
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, StorageError> {
        if let Some(order) = self.new_orders.get(&id) {
            return Ok(Some(order.clone()));
        }
        Ok(read_row(&self.storage.orders, &self.orders, id))
    }

    fn orders_of(&self, buyer: UserId) -> Result<Vec<Order>, StorageError> {
        let _gate = self.storage.commit_gate.read();
        let mut orders: BTreeMap<OrderId, Order> = BTreeMap::new();
        for (id, row) in rows_of(&self.storage.orders) {
            let value = match self.orders.get(&id) {
                Some(existing) => existing.staged.clone(),
                None => row.snapshot(),
            };
            if let Some(order) = value.filter(|o| o.buyer == buyer) {
                orders.insert(id, order);
            }
        }
        for (id, order) in self.new_orders.iter().filter(|(_, o)| o.buyer == buyer) {
            orders.insert(*id, order.clone());
        }
        Ok(orders.into_values().collect())
    }

    fn payment(&self, id: PaymentId) -> Result<Option<Payment>, StorageError> {
        if let Some(payment) = self.new_payments.iter().find(|p| p.id == id) {
            return Ok(Some(payment.clone()));
        }
        Ok(self.storage.payments.get(&id).map(|e| e.value().clone()))
    }

    fn payment_for_order(&self, order: OrderId) -> Result<Option<Payment>, StorageError> {
        if let Some(payment) = self.new_payments.iter().find(|p| p.order == order) {
            return Ok(Some(payment.clone()));
        }
        let _gate = self.storage.commit_gate.read();
        Ok(self
            .storage
            .journal
            .payment_for(order)
            .and_then(|id| self.storage.payments.get(&id).map(|e| e.value().clone())))
    }

    fn payments_of(&self, buyer: UserId) -> Result<Vec<Payment>, StorageError> {
        let _gate = self.storage.commit_gate.read();
        let mut payments: Vec<Payment> = self
            .storage
            .payments
            .iter()
            .map(|e| e.value().clone())
            .chain(self.new_payments.iter().cloned())
            .filter(|p| p.buyer == buyer)
            .collect();
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }

    fn put_product(&mut self, product: Product) -> Result<(), StorageError> {
        stage(&mut self.products, product.id, Some(product), "product")
    }

    fn put_account(&mut self, account: Account) -> Result<(), StorageError> {
        stage(&mut self.accounts, account.id, Some(account), "account")
    }

    fn put_order(&mut self, order: Order) -> Result<(), StorageError> {
        if let Some(staged) = self.new_orders.get_mut(&order.id) {
            *staged = order;
            return Ok(());
        }
        stage(&mut self.orders, order.id, Some(order), "order")
    }

    fn next_order_id(&mut self) -> Result<OrderId, StorageError> {
        Ok(OrderId(self.storage.next_order.fetch_add(1, Ordering::SeqCst)))
    }

    fn insert_order(&mut self, order: Order) -> Result<(), StorageError> {
        if self.storage.orders.contains_key(&order.id) || self.new_orders.contains_key(&order.id) {
            return Err(StorageError::Constraint(format!("order {} exists", order.id)));
        }
        self.new_orders.insert(order.id, order);
        Ok(())
    }

    fn delete_order(&mut self, id: OrderId) -> Result<(), StorageError> {
        if self.new_orders.remove(&id).is_some() {
            return Ok(());
        }
        stage(&mut self.orders, id, None, "order")
    }

    fn next_payment_id(&mut self) -> Result<PaymentId, StorageError> {
        Ok(PaymentId(self.storage.next_payment.fetch_add(1, Ordering::SeqCst)))
    }

    fn insert_payment(&mut self, payment: Payment) -> Result<(), StorageError> {
        if self.payment_for_order(payment.order)?.is_some() {
            return Err(StorageError::Constraint(format!(
                "order {} already has a payment",
                payment.order
            )));
        }
        self.new_payments.push(payment);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        let storage = self.storage;
        let gate = storage.commit_gate.write();

        // Claim the payment index first so a violation aborts before any row changes
        let mut claimed = Vec::with_capacity(self.new_payments.len());
        for payment in &self.new_payments {
            if let Err(err) = storage.journal.claim(payment.order, payment.id) {
                for (order, id) in claimed {
                    storage.journal.unclaim(order, id);
                }
                return Err(err);
            }
            claimed.push((payment.order, payment.id));
        }

        let products = flush(&storage.products, &self.products);
        let accounts = flush(&storage.accounts, &self.accounts);
        let mut orders = flush(&storage.orders, &self.orders);

        for (id, order) in std::mem::take(&mut self.new_orders) {
            storage.orders.insert(id, Arc::new(Row::new(order)));
            orders.push(id);
        }
        orders.sort();

        let mut payments = Vec::with_capacity(self.new_payments.len());
        for payment in std::mem::take(&mut self.new_payments) {
            payments.push(payment.id);
            storage.payments.insert(payment.id, payment);
        }

        drop(gate);

        if products.is_empty() && accounts.is_empty() && orders.is_empty() && payments.is_empty() {
            return Ok(());
        }

        let sequence = storage.journal.append(CommitRecord {
            sequence: 0,
            products,
            accounts,
            orders,
            payments,
            committed_at: Utc::now(),
        });
        trace!(sequence, "unit of work committed");
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork<'_> {
    fn drop(&mut self) {
        for held in self.products.values() {
            held.row.release();
        }
        for held in self.accounts.values() {
            held.row.release();
        }
        for held in self.orders.values() {
            held.row.release();
        }
    }
}
