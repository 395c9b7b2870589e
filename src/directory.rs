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

//! Reference records settlement reads but never writes.

use crate::base::{AddressId, StoreId, UserId};
use serde::{Deserialize, Serialize};

/// A store, owned by the user who receives its payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub owner: UserId,
    pub name: String,
}

impl Store {
    pub fn new(id: StoreId, owner: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            owner,
            name: name.into(),
        }
    }
}

/// A user's delivery address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub owner: UserId,
    pub name: String,
    pub deleted: bool,
}

impl Address {
    pub fn new(id: AddressId, owner: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            owner,
            name: name.into(),
            deleted: false,
        }
    }
}
