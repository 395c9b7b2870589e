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

//! Order aggregate.
//!
//! Orders follow a state machine:
//!
//! ```text
//!  Created ──pay──► Paid ──ship──► Shipped ──deliver──► Delivered
//!     │               │               │                     │
//!     └───────────────┴───────cancel──┴─────────────────────┴──► Cancelled
//! ```
//!
//! Every status change is checked against [`OrderStatus::TRANSITIONS`].
//! `Paid`, `Shipped` and `Delivered` are *settled*: money has moved and the
//! order line is frozen.

use crate::SettlementError;
use crate::base::{AddressId, OrderId, ProductId, UserId};
use crate::product::Product;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status of an order.
///
/// The discriminants are the integer status ids used by the surrounding
/// application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created = 1,
    Cancelled = 2,
    Paid = 3,
    Shipped = 4,
    Delivered = 5,
}

impl OrderStatus {
    /// Every allowed `(from, to)` status change.
    pub const TRANSITIONS: &'static [(OrderStatus, OrderStatus)] = &[
        (OrderStatus::Created, OrderStatus::Paid),
        (OrderStatus::Created, OrderStatus::Cancelled),
        (OrderStatus::Paid, OrderStatus::Shipped),
        (OrderStatus::Paid, OrderStatus::Cancelled),
        (OrderStatus::Shipped, OrderStatus::Delivered),
        (OrderStatus::Shipped, OrderStatus::Cancelled),
        (OrderStatus::Delivered, OrderStatus::Cancelled),
    ];

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Created),
            2 => Some(Self::Cancelled),
            3 => Some(Self::Paid),
            4 => Some(Self::Shipped),
            5 => Some(Self::Delivered),
            _ => None,
        }
    }

    /// Money has moved for orders in these statuses.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Paid | Self::Shipped | Self::Delivered)
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        Self::TRANSITIONS.contains(&(self, next))
    }

    fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Cancelled => "cancelled",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown order status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    /// Accepts a status name (case-insensitive) or its integer code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u8>() {
            return Self::from_code(code).ok_or_else(|| UnknownStatus(s.to_string()));
        }
        match trimmed.to_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "paid" => Ok(Self::Paid),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// The single line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product: ProductId,
    pub address: AddressId,
    pub quantity: u32,
    /// Product unit price when the line was last priced.
    pub unit_price: Decimal,
    /// `unit_price × quantity`, captured once and never recomputed from
    /// later product price changes.
    pub price: Decimal,
    /// Units currently held against product stock.
    reserved: u32,
}

impl OrderLine {
    /// Prices `quantity` units of `product` at its current unit price.
    ///
    /// The line starts with nothing reserved.
    pub fn capture(
        product: &Product,
        address: AddressId,
        quantity: u32,
    ) -> Result<Self, SettlementError> {
        Ok(Self {
            product: product.id,
            address,
            quantity,
            unit_price: product.price(),
            price: product.price_for(quantity)?,
            reserved: 0,
        })
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }
}

/// A buyer's order for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub buyer: UserId,
    status: OrderStatus,
    pub line: OrderLine,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates an order in [`OrderStatus::Created`].
    pub fn new(id: OrderId, buyer: UserId, line: OrderLine, now: DateTime<Utc>) -> Self {
        Self {
            id,
            buyer,
            status: OrderStatus::Created,
            line,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_settled()
    }

    /// Units this order currently holds against product stock.
    pub fn reserved(&self) -> u32 {
        self.line.reserved
    }

    /// Moves to `next` if the transition table allows it.
    pub(crate) fn transition(
        &mut self,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        if !self.status.can_transition_to(next) {
            return Err(SettlementError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Records that `quantity` units are now held against stock.
    pub(crate) fn set_reserved(&mut self, quantity: u32) {
        self.line.reserved = quantity;
    }

    /// Replaces the line with a freshly priced one, keeping the reservation.
    pub(crate) fn reprice(
        &mut self,
        product: &Product,
        address: AddressId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        let reserved = self.line.reserved;
        self.line = OrderLine::capture(product, address, quantity)?;
        self.line.reserved = reserved;
        self.updated_at = now;
        Ok(())
    }
}
