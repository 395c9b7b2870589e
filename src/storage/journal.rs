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

//! Thread-safe commit journal with a one-payment-per-order index.
//!
//! The index is the storage-level backstop for at-most-once payment: a
//! second payment for the same order is rejected at commit even if a caller
//! forgot to lock the order.
//!
//! Commit records are kept in a fixed-size window. Once it is full each new
//! record evicts the oldest one, so a long-running store keeps only its
//! recent history while the sequence counter keeps counting.

use super::StorageError;
use crate::base::{AccountId, OrderId, PaymentId, ProductId};
use chrono::{DateTime, Utc};
use crossbeam::queue::ArrayQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rows touched by one committed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub sequence: u64,
    pub products: Vec<ProductId>,
    pub accounts: Vec<AccountId>,
    pub orders: Vec<OrderId>,
    pub payments: Vec<PaymentId>,
    pub committed_at: DateTime<Utc>,
}

/// Default number of commit records retained.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 1024;

/// Bounded log of recent commits.
///
/// Combines a [`DashMap`] for O(1) order → payment uniqueness with an
/// [`ArrayQueue`] that preserves commit order.
#[derive(Debug)]
pub struct CommitJournal {
    /// Settled orders and the payment that settled them.
    paid_orders: DashMap<OrderId, PaymentId>,

    /// Most recent commit records in FIFO order.
    records: ArrayQueue<CommitRecord>,

    sequence: AtomicU64,
}

impl CommitJournal {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }

    /// Creates a journal that retains at most `capacity` records (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            paid_orders: DashMap::new(),
            records: ArrayQueue::new(capacity.max(1)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Maximum number of records retained.
    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    /// Claims `order` for `payment`.
    ///
    /// # Errors
    ///
    /// [`StorageError::Constraint`] if the order already has a payment.
    pub(crate) fn claim(&self, order: OrderId, payment: PaymentId) -> Result<(), StorageError> {
        // Entry API keeps check-and-insert atomic
        match self.paid_orders.entry(order) {
            Entry::Occupied(existing) => Err(StorageError::Constraint(format!(
                "order {} already settled by payment {}",
                order,
                existing.get()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(payment);
                Ok(())
            }
        }
    }

    /// Undoes a claim made during a commit that is being abandoned.
    pub(crate) fn unclaim(&self, order: OrderId, payment: PaymentId) {
        self.paid_orders.remove_if(&order, |_, claimed| *claimed == payment);
    }

    pub fn payment_for(&self, order: OrderId) -> Option<PaymentId> {
        self.paid_orders.get(&order).map(|entry| *entry.value())
    }

    /// Appends a commit record, stamping its sequence number. Evicts the
    /// oldest record when the window is full.
    pub(crate) fn append(&self, mut record: CommitRecord) -> u64 {
        record.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let sequence = record.sequence;
        self.records.force_push(record);
        sequence
    }

    /// Number of commits appended so far.
    pub fn commits(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Removes and returns every retained record, oldest first.
    pub fn drain(&self) -> Vec<CommitRecord> {
        let mut drained = Vec::with_capacity(self.records.len());
        while let Some(record) = self.records.pop() {
            drained.push(record);
        }
        drained
    }
}

impl Default for CommitJournal {
    fn default() -> Self {
        Self::new()
    }
}
