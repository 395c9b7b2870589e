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

use clap::{Parser, ValueEnum};
use csv::{ReaderBuilder, Trim, Writer};
use marketplace_settlement::{
    Account, AccountId, Address, AddressId, BalanceLedger, MemoryStorage, Order, OrderId,
    OrderStatus, Payment, Product, ProductId, SettlementConfig, SettlementEngine, SettlementError,
    StockLedger, Store, StoreId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DECIMAL_PRECISION: u32 = 4;

/// Marketplace settlement - replay order and payment commands
///
/// Reads a CSV command script, applies it to an in-memory store, and writes
/// the requested report to stdout. Rejected commands are logged to stderr
/// and skipped.
#[derive(Parser, Debug)]
#[command(name = "marketplace-settlement")]
#[command(about = "Replays marketplace order and payment commands from a CSV file", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: type,user,subject,object,address,quantity,amount,status
    /// Example: cargo run -- commands.csv --report orders > orders.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Which table to print once the script has run
    #[arg(long, value_enum, default_value_t = Report::Accounts)]
    report: Report,

    /// Largest quantity one order may request
    #[arg(long, default_value_t = SettlementConfig::DEFAULT_MAX_ORDER_QUANTITY)]
    max_quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    Accounts,
    Products,
    Orders,
    Payments,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let config = SettlementConfig::default().with_max_order_quantity(args.max_quantity);
    let engine = match replay(BufReader::new(file), config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing commands: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_report(&engine, args.report, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, user, subject, object, address, quantity, amount, status`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    kind: String,
    user: u64,
    subject: u64,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    object: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    address: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    quantity: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    status: Option<String>,
}

/// One parsed script line.
#[derive(Debug)]
enum Command {
    Store(Store),
    Product(Product),
    Address(Address),
    Account(Account),
    Deposit {
        account: AccountId,
        amount: Decimal,
    },
    Restock {
        product: ProductId,
        quantity: u32,
    },
    Order {
        buyer: UserId,
        product: ProductId,
        address: AddressId,
        quantity: u32,
    },
    Update {
        buyer: UserId,
        order: OrderId,
        quantity: u32,
        address: AddressId,
        status: OrderStatus,
    },
    Delete {
        buyer: UserId,
        order: OrderId,
    },
    Pay {
        buyer: UserId,
        order: OrderId,
        account: AccountId,
    },
    Advance {
        actor: UserId,
        order: OrderId,
        status: OrderStatus,
    },
}

impl CsvRecord {
    /// Converts a CSV record to a command.
    ///
    /// Returns `None` for unknown types or missing required fields.
    fn into_command(self) -> Option<Command> {
        let user = UserId(self.user);
        let subject = self.subject;

        let command = match self.kind.to_lowercase().as_str() {
            "store" => Command::Store(Store::new(StoreId(subject), user, format!("store-{subject}"))),
            "product" => {
                let product = Product::new(
                    ProductId(subject),
                    StoreId(self.object?),
                    format!("product-{subject}"),
                    self.amount?,
                    self.quantity.unwrap_or(0),
                )
                .ok()?;
                Command::Product(product)
            }
            "address" => Command::Address(Address::new(
                AddressId(subject),
                user,
                format!("address-{subject}"),
            )),
            "account" => Command::Account(
                Account::new(
                    AccountId(subject),
                    user,
                    format!("ACC-{subject:04}"),
                    self.amount.unwrap_or(Decimal::ZERO),
                )
                .ok()?,
            ),
            "deposit" => Command::Deposit {
                account: AccountId(subject),
                amount: self.amount?,
            },
            "restock" => Command::Restock {
                product: ProductId(subject),
                quantity: self.quantity?,
            },
            "order" => Command::Order {
                buyer: user,
                product: ProductId(subject),
                address: AddressId(self.address?),
                quantity: self.quantity?,
            },
            "update" => Command::Update {
                buyer: user,
                order: OrderId(subject),
                quantity: self.quantity.unwrap_or(0),
                address: AddressId(self.address.unwrap_or(0)),
                status: match self.status {
                    Some(status) => status.parse().ok()?,
                    None => OrderStatus::Created,
                },
            },
            "delete" => Command::Delete {
                buyer: user,
                order: OrderId(subject),
            },
            "pay" => Command::Pay {
                buyer: user,
                order: OrderId(subject),
                account: AccountId(self.object?),
            },
            "advance" => Command::Advance {
                actor: user,
                order: OrderId(subject),
                status: self.status?.parse().ok()?,
            },
            _ => return None,
        };
        Some(command)
    }
}

fn apply(engine: &SettlementEngine<MemoryStorage>, command: Command) -> Result<(), SettlementError> {
    let storage = engine.storage();
    match command {
        Command::Store(store) => storage.insert_store(store)?,
        Command::Product(product) => storage.insert_product(product)?,
        Command::Address(address) => storage.insert_address(address)?,
        Command::Account(account) => storage.insert_account(account)?,
        Command::Deposit { account, amount } => {
            BalanceLedger::new(storage).credit(account, amount)?;
        }
        Command::Restock { product, quantity } => {
            StockLedger::new(storage).release(product, quantity)?;
        }
        Command::Order {
            buyer,
            product,
            address,
            quantity,
        } => {
            engine.create_order(buyer, product, address, quantity)?;
        }
        Command::Update {
            buyer,
            order,
            quantity,
            address,
            status,
        } => engine.update_order(order, buyer, quantity, address, status)?,
        Command::Delete { buyer, order } => engine.delete_order(buyer, order)?,
        Command::Pay {
            buyer,
            order,
            account,
        } => {
            engine.create_payment(buyer, order, account)?;
        }
        Command::Advance {
            actor,
            order,
            status,
        } => engine.advance_order(actor, order, status)?,
    }
    Ok(())
}

/// Replays a command script from a CSV reader.
///
/// Rows are streamed, so arbitrarily long scripts never sit in memory.
/// Malformed rows and rejected commands are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, user, subject, object, address, quantity, amount, status`
///
/// | type | subject | other fields |
/// |------|---------|--------------|
/// | store | store id | `user` owns it |
/// | product | product id | `object` store, `quantity` stock, `amount` unit price |
/// | address | address id | `user` owns it |
/// | account | account id | `user` owns it, `amount` opening balance |
/// | deposit | account id | `amount` |
/// | restock | product id | `quantity` |
/// | order | product id | `address`, `quantity` |
/// | update | order id | `address`, `quantity`, `status` (default created) |
/// | delete | order id | |
/// | pay | order id | `object` paying account |
/// | advance | order id | `status` |
///
/// Order and payment ids are allocated from 1 in script order.
///
/// # Example
///
/// ```csv
/// type,user,subject,object,address,quantity,amount,status
/// store,2,1,,,,,
/// product,2,1,1,,5,10.00,
/// address,1,1,,,,,
/// account,1,1,,,,100.00,
/// account,2,2,,,,50.00,
/// order,1,1,,1,3,,
/// pay,1,1,1,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn replay<R: Read>(
    reader: R,
    config: SettlementConfig,
) -> Result<SettlementEngine<MemoryStorage>, csv::Error> {
    let engine = SettlementEngine::new(MemoryStorage::new(), config);

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (index, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let row = index + 1;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(row, error = %e, "skipping malformed row");
                continue;
            }
        };

        let Some(command) = record.into_command() else {
            warn!(row, "skipping invalid command");
            continue;
        };

        match apply(&engine, command) {
            Ok(()) => info!(row, "command applied"),
            Err(e) => warn!(row, error = %e, "command rejected"),
        }
    }

    Ok(engine)
}

#[derive(Debug, Serialize)]
struct ProductRow {
    product: ProductId,
    store: StoreId,
    price: Decimal,
    amount: u32,
}

impl From<&Product> for ProductRow {
    fn from(product: &Product) -> Self {
        Self {
            product: product.id,
            store: product.store,
            price: product.price().round_dp(DECIMAL_PRECISION),
            amount: product.amount(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OrderRow {
    order: OrderId,
    buyer: UserId,
    status: OrderStatus,
    product: ProductId,
    address: AddressId,
    quantity: u32,
    price: Decimal,
    reserved: u32,
}

impl From<&Order> for OrderRow {
    fn from(order: &Order) -> Self {
        Self {
            order: order.id,
            buyer: order.buyer,
            status: order.status(),
            product: order.line.product,
            address: order.line.address,
            quantity: order.line.quantity,
            price: order.line.price.round_dp(DECIMAL_PRECISION),
            reserved: order.reserved(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PaymentRow {
    payment: u64,
    order: OrderId,
    buyer: UserId,
    account: AccountId,
    seller_account: AccountId,
    quantity: u32,
    price: Decimal,
    paid_at: String,
}

impl From<&Payment> for PaymentRow {
    fn from(payment: &Payment) -> Self {
        Self {
            payment: payment.id.0,
            order: payment.order,
            buyer: payment.buyer,
            account: payment.account,
            seller_account: payment.seller_account,
            quantity: payment.quantity,
            price: payment.price.round_dp(DECIMAL_PRECISION),
            paid_at: payment.paid_at.to_rfc3339(),
        }
    }
}

/// Writes one table of the final state as CSV, ordered by id.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_report<W: Write>(
    engine: &SettlementEngine<MemoryStorage>,
    report: Report,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    let storage = engine.storage();

    match report {
        Report::Accounts => {
            for account in storage.accounts() {
                wtr.serialize(&account)?;
            }
        }
        Report::Products => {
            for product in storage.products() {
                wtr.serialize(ProductRow::from(&product))?;
            }
        }
        Report::Orders => {
            for order in storage.orders() {
                wtr.serialize(OrderRow::from(&order))?;
            }
        }
        Report::Payments => {
            for payment in storage.payments() {
                wtr.serialize(PaymentRow::from(&payment))?;
            }
        }
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    const SEED: &str = "type,user,subject,object,address,quantity,amount,status\n\
                        store,2,1,,,,,\n\
                        product,2,1,1,,5,10.00,\n\
                        address,1,1,,,,,\n\
                        account,1,1,,,,100.00,\n\
                        account,2,2,,,,50.00,\n";

    fn run(commands: &str) -> SettlementEngine<MemoryStorage> {
        let script = format!("{SEED}{commands}");
        replay(Cursor::new(script), SettlementConfig::default()).unwrap()
    }

    fn balance(engine: &SettlementEngine<MemoryStorage>, id: u64) -> Decimal {
        engine
            .storage()
            .accounts()
            .into_iter()
            .find(|a| a.id == AccountId(id))
            .map(|a| a.balance())
            .unwrap()
    }

    fn report(engine: &SettlementEngine<MemoryStorage>, report: Report) -> String {
        let mut out = Vec::new();
        write_report(engine, report, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn seed_rows_populate_storage() {
        let engine = run("");
        assert_eq!(engine.storage().accounts().len(), 2);
        assert_eq!(engine.storage().products()[0].amount(), 5);
    }

    #[test]
    fn order_then_pay() {
        let engine = run("order,1,1,,1,3,,\npay,1,1,1,,,,\n");

        assert_eq!(engine.storage().products()[0].amount(), 2);
        assert_eq!(balance(&engine, 1), dec!(70.00));
        assert_eq!(balance(&engine, 2), dec!(80.00));
        assert_eq!(
            engine.storage().orders()[0].status(),
            OrderStatus::Paid
        );
    }

    #[test]
    fn cancel_through_update_restores_stock() {
        let engine = run("order,1,1,,1,3,,\nupdate,1,1,,,,,cancelled\n");
        assert_eq!(engine.storage().products()[0].amount(), 5);
        assert_eq!(
            engine.storage().orders()[0].status(),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn update_accepts_status_codes() {
        let engine = run("order,1,1,,1,3,,\nupdate,1,1,,1,1,,1\n");
        assert_eq!(engine.storage().products()[0].amount(), 4);
        assert_eq!(engine.storage().orders()[0].line.quantity, 1);
    }

    #[test]
    fn rejected_commands_are_skipped() {
        // Second order exceeds stock, second payment is a duplicate
        let engine = run("order,1,1,,1,3,,\n\
                          order,1,1,,1,3,,\n\
                          pay,1,1,1,,,,\n\
                          pay,1,1,1,,,,\n");
        assert_eq!(engine.storage().orders().len(), 1);
        assert_eq!(engine.storage().payments().len(), 1);
        assert_eq!(balance(&engine, 1), dec!(70.00));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let engine = run("order,abc,1,,1,3,,\n\
                          bogus,1,1,,,,,\n\
                          order,1,1,,1,,,\n\
                          order,1,1,,1,1,,\n");
        assert_eq!(engine.storage().orders().len(), 1);
    }

    #[test]
    fn deposit_and_restock_use_ledgers() {
        let engine = run("deposit,1,1,,,,25.5,\nrestock,2,1,,,4,,\n");
        assert_eq!(balance(&engine, 1), dec!(125.50));
        assert_eq!(engine.storage().products()[0].amount(), 9);
    }

    #[test]
    fn seller_advances_paid_order() {
        let engine = run("order,1,1,,1,3,,\n\
                          pay,1,1,1,,,,\n\
                          advance,2,1,,,,,shipped\n\
                          advance,2,1,,,,,delivered\n");
        assert_eq!(
            engine.storage().orders()[0].status(),
            OrderStatus::Delivered
        );
    }

    #[test]
    fn quantity_bound_from_config() {
        let script = format!("{SEED}order,1,1,,1,3,,\n");
        let config = SettlementConfig::default().with_max_order_quantity(2);
        let engine = replay(Cursor::new(script), config).unwrap();
        assert!(engine.storage().orders().is_empty());
    }

    #[test]
    fn accounts_report_format() {
        let engine = run("order,1,1,,1,3,,\npay,1,1,1,,,,\n");
        let out = report(&engine, Report::Accounts);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "account,owner,number,balance,deleted");
        assert_eq!(lines[1], "1,1,ACC-0001,70.00,false");
        assert_eq!(lines[2], "2,2,ACC-0002,80.00,false");
    }

    #[test]
    fn orders_report_format() {
        let engine = run("order,1,1,,1,3,,\n");
        let out = report(&engine, Report::Orders);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "order,buyer,status,product,address,quantity,price,reserved"
        );
        assert_eq!(lines[1], "1,1,created,1,1,3,30.00,3");
    }

    #[test]
    fn products_and_payments_reports() {
        let engine = run("order,1,1,,1,3,,\npay,1,1,1,,,,\n");
        let products = report(&engine, Report::Products);
        assert_eq!(products.lines().nth(1), Some("1,1,10.00,2"));

        let payments = report(&engine, Report::Payments);
        assert!(payments.lines().nth(1).unwrap().starts_with("1,1,1,1,2,3,30.00,"));
    }
}
