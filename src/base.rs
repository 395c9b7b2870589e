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

//! Core identifier types for users, stores, products, categories, accounts,
//! addresses, orders and payments.
//!
//! Every identifier wraps a `u64` row id. They are distinct types so an
//! [`OrderId`] can never be passed where a [`ProductId`] is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Identity of an authenticated user (buyer or store owner).
    UserId
);

row_id!(
    /// Identity of a store owned by a user.
    StoreId
);

row_id!(
    /// Identity of a product listed by a store.
    ProductId
);

row_id!(
    /// Identity of a product category.
    CategoryId
);

row_id!(
    /// Identity of a user's money account.
    AccountId
);

row_id!(
    /// Identity of a delivery address.
    AddressId
);

row_id!(
    /// Identity of an order.
    ///
    /// Order ids are allocated by the storage layer and never reused, even
    /// when the order is deleted.
    OrderId
);

row_id!(
    /// Identity of a payment record.
    PaymentId
);
