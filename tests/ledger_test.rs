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

//! Ledger integration tests, including concurrent reservation and debits.

use marketplace_settlement::ledger::{balance, stock};
use marketplace_settlement::{
    Account, AccountId, Address, AddressId, BalanceLedger, MemoryStorage, Product, ProductId,
    SettlementConfig, SettlementEngine, SettlementError, StockLedger, Storage, Store, StoreId,
    UserId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

// === Helper Functions ===

fn make_storage(stock: u32, balances: &[Decimal]) -> MemoryStorage {
    let storage = MemoryStorage::new();
    storage
        .insert_store(Store::new(StoreId(1), UserId(100), "Kitchen"))
        .unwrap();
    storage
        .insert_product(Product::new(ProductId(1), StoreId(1), "Kettle", dec!(10.00), stock).unwrap())
        .unwrap();
    for (i, amount) in balances.iter().enumerate() {
        let id = i as u64 + 1;
        storage
            .insert_account(
                Account::new(AccountId(id), UserId(id), format!("ACC-{id}"), *amount).unwrap(),
            )
            .unwrap();
    }
    storage
}

fn balance_of(storage: &MemoryStorage, id: u64) -> Decimal {
    storage
        .accounts()
        .into_iter()
        .find(|a| a.id == AccountId(id))
        .map(|a| a.balance())
        .unwrap()
}

fn stock_of(storage: &MemoryStorage) -> u32 {
    storage.products()[0].amount()
}

// === Stock Ledger ===

#[test]
fn reserve_release_round_trip() {
    let storage = make_storage(5, &[]);
    let ledger = StockLedger::new(&storage);

    assert_eq!(ledger.reserve(ProductId(1), 5), Ok(0));
    assert_eq!(ledger.release(ProductId(1), 2), Ok(2));
    assert_eq!(ledger.adjust(ProductId(1), -2), Ok(0));
    assert_eq!(stock_of(&storage), 0);
}

#[test]
fn concurrent_reservations_never_oversell() {
    let storage = Arc::new(make_storage(100, &[]));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let storage = Arc::clone(&storage);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let ledger = StockLedger::new(storage.as_ref());
                (0..20)
                    .filter(|_| ledger.reserve(ProductId(1), 1).is_ok())
                    .count()
            })
        })
        .collect();

    let reserved: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(reserved, 100);
    assert_eq!(stock_of(&storage), 0);
}

#[test]
fn last_unit_goes_to_exactly_one_order() {
    let storage = make_storage(1, &[]);
    storage
        .insert_address(Address::new(AddressId(1), UserId(1), "One"))
        .unwrap();
    storage
        .insert_address(Address::new(AddressId(2), UserId(2), "Two"))
        .unwrap();
    let engine = Arc::new(SettlementEngine::new(storage, SettlementConfig::default()));
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [1u64, 2]
        .into_iter()
        .map(|buyer| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.create_order(UserId(buyer), ProductId(1), AddressId(buyer), 1)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(SettlementError::InsufficientStock { available: 0, .. })
    )));
    assert_eq!(stock_of(engine.storage()), 0);
    assert_eq!(engine.storage().orders().len(), 1);
}

// === Balance Ledger ===

#[test]
fn concurrent_debits_never_overdraw() {
    let storage = Arc::new(make_storage(0, &[dec!(100.00)]));
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                let ledger = BalanceLedger::new(storage.as_ref());
                (0..5)
                    .filter(|_| ledger.debit(AccountId(1), dec!(3.00)).is_ok())
                    .count()
            })
        })
        .collect();

    let debits: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    // 100.00 / 3.00 leaves 1.00 behind
    assert_eq!(debits, 33);
    assert_eq!(balance_of(&storage, 1), dec!(1.00));
}

#[test]
fn opposing_transfers_conserve_money() {
    let storage = Arc::new(make_storage(0, &[dec!(500.00), dec!(500.00)]));
    let handles: Vec<_> = [(1u64, 2u64), (2, 1)]
        .into_iter()
        .map(|(from, to)| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                let ledger = BalanceLedger::new(storage.as_ref());
                for _ in 0..200 {
                    ledger
                        .transfer(AccountId(from), AccountId(to), dec!(1.25))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(balance_of(&storage, 1), dec!(500.00));
    assert_eq!(balance_of(&storage, 2), dec!(500.00));
}

#[test]
fn readers_never_see_half_a_transfer() {
    let storage = Arc::new(make_storage(0, &[dec!(1000), dec!(1000)]));
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let storage = Arc::clone(&storage);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let ledger = BalanceLedger::new(storage.as_ref());
            for i in 0..20_000u32 {
                let (from, to) = if i % 2 == 0 { (1, 2) } else { (2, 1) };
                ledger
                    .transfer(AccountId(from), AccountId(to), dec!(1))
                    .unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let reader = {
        let storage = Arc::clone(&storage);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reads = 0u64;
            let mut torn = 0u64;
            loop {
                let finished = done.load(Ordering::SeqCst);
                let total: Decimal = storage.accounts().iter().map(|a| a.balance()).sum();
                if total != dec!(2000) {
                    torn += 1;
                }
                reads += 1;
                if finished {
                    break;
                }
            }
            (reads, torn)
        })
    };

    writer.join().unwrap();
    let (reads, torn) = reader.join().unwrap();
    assert!(reads > 0);
    assert_eq!(torn, 0, "{torn} of {reads} reads saw a partial commit");
}

#[test]
fn transfer_shortfall_leaves_both_accounts() {
    let storage = make_storage(0, &[dec!(5.00), dec!(0)]);
    let ledger = BalanceLedger::new(&storage);
    assert_eq!(
        ledger.transfer(AccountId(1), AccountId(2), dec!(5.01)),
        Err(SettlementError::InsufficientFunds {
            account: AccountId(1)
        })
    );
    assert_eq!(balance_of(&storage, 1), dec!(5.00));
    assert_eq!(balance_of(&storage, 2), dec!(0));
}

// === Payments ===

#[test]
fn concurrent_payments_for_one_order_settle_once() {
    const THREADS: usize = 8;
    const SELLER: u64 = 100;

    for _ in 0..50 {
        let storage = make_storage(10, &[dec!(100.00)]);
        storage
            .insert_address(Address::new(AddressId(1), UserId(1), "Home"))
            .unwrap();
        storage
            .insert_account(
                Account::new(AccountId(SELLER), UserId(SELLER), "SELLER", dec!(0)).unwrap(),
            )
            .unwrap();
        let engine = Arc::new(SettlementEngine::new(storage, SettlementConfig::default()));
        let order = engine
            .create_order(UserId(1), ProductId(1), AddressId(1), 3)
            .unwrap();
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    engine.create_payment(UserId(1), order, AccountId(1))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter(|r| r.is_err())
                .all(|r| *r == Err(SettlementError::OrderAlreadyPaid(order)))
        );

        let storage = engine.storage();
        assert_eq!(storage.payments().len(), 1);
        assert_eq!(balance_of(storage, 1), dec!(70.00));
        assert_eq!(balance_of(storage, SELLER), dec!(30.00));
        let total: Decimal = storage.accounts().iter().map(|a| a.balance()).sum();
        assert_eq!(total, dec!(100.00));
    }
}

// === Composition ===

#[test]
fn ledgers_compose_in_one_unit_of_work() {
    let storage = make_storage(5, &[dec!(100.00), dec!(0)]);

    let mut uow = storage.begin().unwrap();
    stock::reserve(uow.as_mut(), ProductId(1), 2).unwrap();
    balance::transfer(uow.as_mut(), AccountId(1), AccountId(2), dec!(20.00)).unwrap();
    uow.commit().unwrap();

    assert_eq!(stock_of(&storage), 3);
    assert_eq!(balance_of(&storage, 1), dec!(80.00));
    assert_eq!(balance_of(&storage, 2), dec!(20.00));
}

#[test]
fn dropped_unit_of_work_discards_every_ledger_change() {
    let storage = make_storage(5, &[dec!(100.00), dec!(0)]);

    {
        let mut uow = storage.begin().unwrap();
        stock::reserve(uow.as_mut(), ProductId(1), 2).unwrap();
        balance::transfer(uow.as_mut(), AccountId(1), AccountId(2), dec!(20.00)).unwrap();
        // Failing step ends the operation without commit
        assert!(balance::debit(uow.as_mut(), AccountId(2), dec!(50.00)).is_err());
    }

    assert_eq!(stock_of(&storage), 5);
    assert_eq!(balance_of(&storage, 1), dec!(100.00));
    assert_eq!(balance_of(&storage, 2), dec!(0));
}
