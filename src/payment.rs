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

//! Payment records.
//!
//! A payment is evidence of a settled transfer. It is written once, in the
//! same unit of work as the transfer itself, and never updated.

use crate::base::{AccountId, OrderId, PaymentId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub buyer: UserId,
    pub order: OrderId,
    /// Account that was debited.
    pub account: AccountId,
    /// Account that was credited.
    pub seller_account: AccountId,
    /// Units paid for.
    pub quantity: u32,
    /// Amount moved between the two accounts.
    pub price: Decimal,
    pub paid_at: DateTime<Utc>,
}
