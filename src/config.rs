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

//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables for [`SettlementEngine`](crate::SettlementEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Largest quantity a single order line may request.
    pub max_order_quantity: u32,
}

impl SettlementConfig {
    pub const DEFAULT_MAX_ORDER_QUANTITY: u32 = 1000;

    pub fn with_max_order_quantity(mut self, max_order_quantity: u32) -> Self {
        self.max_order_quantity = max_order_quantity;
        self
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_order_quantity: Self::DEFAULT_MAX_ORDER_QUANTITY,
        }
    }
}
