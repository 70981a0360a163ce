use rusqlite::Connection;

use super::master::get_item_on;
use super::{
    Db, SqliteSequences, conversion_err, date_str, exists_on, log_activity, now, parse_date,
    parse_dt,
};
use crate::error::StoirError;
use crate::money::subtotal;
use crate::numbering::{TransactionNumberGenerator, parse_reference_date, resolve_reference_date};
use crate::types::{
    NewTransaction, Transaction, TransactionDetail, TransactionFilters, TransactionKind,
    TransactionLine,
};

fn transaction_from_row(row: &rusqlite::Row) -> Result<Transaction, rusqlite::Error> {
    let kind_str: String = row.get("kind")?;
    let txn_date: String = row.get("txn_date")?;
    let created_at_str: String = row.get("created_at")?;
    Ok(Transaction {
        number: row.get("number")?,
        kind: kind_str.parse().map_err(conversion_err)?,
        date: parse_date(&txn_date)?,
        partner_code: row.get("partner_code")?,
        note: row.get("note")?,
        total: row.get("total")?,
        actor: row.get("actor")?,
        created_at: parse_dt(&created_at_str)?,
    })
}

fn line_from_row(row: &rusqlite::Row) -> Result<TransactionLine, rusqlite::Error> {
    Ok(TransactionLine {
        item_code: row.get("item_code")?,
        qty: row.get("qty")?,
        price: row.get("price")?,
        discount_pct: row.get("discount_pct")?,
        subtotal: row.get("subtotal")?,
        system_qty: row.get("system_qty")?,
    })
}

fn check_partner(
    conn: &Connection,
    kind: TransactionKind,
    partner: Option<&str>,
) -> Result<(), StoirError> {
    let Some(code) = partner else {
        return Ok(());
    };
    let (sql, entity) = match kind {
        TransactionKind::Purchase => ("SELECT 1 FROM suppliers WHERE code = ?1", "supplier"),
        TransactionKind::Sale | TransactionKind::Claim => {
            ("SELECT 1 FROM customers WHERE code = ?1", "customer")
        }
        TransactionKind::StockCount => {
            return Err(StoirError::InvalidArgument(
                "stock counts do not take a partner".into(),
            ));
        }
    };
    if !exists_on(conn, sql, code)? {
        return Err(StoirError::not_found(entity, code));
    }
    Ok(())
}

impl Db {
    /// Records a document and applies its stock movements. The number is
    /// allocated inside the same SQLite transaction, so any failure leaves
    /// both stock and counters untouched.
    pub fn create_transaction(
        &self,
        new: &NewTransaction,
        actor: &str,
    ) -> Result<TransactionDetail, StoirError> {
        let kind = new.kind;
        if new.lines.is_empty() {
            return Err(StoirError::InvalidArgument(
                "a transaction needs at least one line".into(),
            ));
        }
        let date = resolve_reference_date(new.date.as_deref())?;
        let partner = new.partner_code.as_deref().filter(|p| !p.trim().is_empty());

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| StoirError::Internal(format!("failed to begin transaction: {e}")))?;

        check_partner(&tx, kind, partner)?;

        let generator = TransactionNumberGenerator::new(SqliteSequences::new(&tx));
        let number = generator.generate_for_date(kind.prefix(), date)?.to_string();

        let mut lines = Vec::with_capacity(new.lines.len());
        for input in &new.lines {
            let min_qty = if kind == TransactionKind::StockCount { 0 } else { 1 };
            if input.qty < min_qty {
                return Err(StoirError::InvalidArgument(format!(
                    "quantity for {} must be at least {min_qty}",
                    input.item_code
                )));
            }
            let discount = input.discount_pct.unwrap_or(0.0);
            if !(0.0..=100.0).contains(&discount) {
                return Err(StoirError::InvalidArgument(format!(
                    "discount for {} must be between 0 and 100",
                    input.item_code
                )));
            }

            let item = get_item_on(&tx, &input.item_code)?;
            let price = match (kind, input.price) {
                (TransactionKind::StockCount, _) => 0,
                (_, Some(price)) => price,
                (TransactionKind::Purchase, None) => item.purchase_price,
                (_, None) => item.sale_price,
            };
            if price < 0 {
                return Err(StoirError::InvalidArgument(format!(
                    "price for {} must be at least 0",
                    input.item_code
                )));
            }

            let (new_stock, system_qty) = if kind == TransactionKind::StockCount {
                (input.qty, Some(item.stock))
            } else {
                let after = item
                    .stock
                    .checked_add(kind.stock_delta(input.qty))
                    .ok_or_else(|| {
                        StoirError::InvalidArgument(format!(
                            "quantity for {} would overflow stock",
                            input.item_code
                        ))
                    })?;
                if after < 0 {
                    return Err(StoirError::InsufficientStock {
                        item: item.code,
                        available: item.stock,
                        requested: input.qty,
                    });
                }
                (after, None)
            };

            tx.execute(
                "UPDATE items SET stock = ?1 WHERE code = ?2",
                rusqlite::params![new_stock, item.code],
            )
            .map_err(|e| StoirError::Internal(format!("failed to update stock: {e}")))?;

            let line_total = subtotal(input.qty, price, discount).ok_or_else(|| {
                StoirError::InvalidArgument(format!(
                    "amount for {} is too large",
                    input.item_code
                ))
            })?;
            lines.push(TransactionLine {
                item_code: item.code,
                qty: input.qty,
                price,
                discount_pct: discount,
                subtotal: line_total,
                system_qty,
            });
        }

        let total = lines
            .iter()
            .try_fold(0i64, |acc, l| acc.checked_add(l.subtotal))
            .ok_or_else(|| StoirError::InvalidArgument("transaction total is too large".into()))?;
        tx.execute(
            "INSERT INTO transactions (number, kind, txn_date, partner_code, note, total, actor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                number,
                kind.as_str(),
                date_str(date),
                partner,
                new.note,
                total,
                actor,
                now(),
            ],
        )
        .map_err(|e| StoirError::Internal(format!("failed to create transaction: {e}")))?;

        for line in &lines {
            tx.execute(
                "INSERT INTO transaction_lines (number, item_code, qty, price, discount_pct, subtotal, system_qty)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    number,
                    line.item_code,
                    line.qty,
                    line.price,
                    line.discount_pct,
                    line.subtotal,
                    line.system_qty,
                ],
            )
            .map_err(|e| StoirError::Internal(format!("failed to add transaction line: {e}")))?;
        }

        log_activity(&tx, actor, "create", "transaction", &number, Some(kind.as_str()))?;

        tx.commit()
            .map_err(|e| StoirError::Internal(format!("failed to commit transaction: {e}")))?;
        tracing::info!(%number, kind = kind.as_str(), lines = lines.len(), total, "transaction recorded");

        self.get_transaction(&number)
    }

    pub fn get_transaction(&self, number: &str) -> Result<TransactionDetail, StoirError> {
        let transaction = self
            .conn
            .query_row(
                "SELECT * FROM transactions WHERE number = ?1",
                rusqlite::params![number],
                transaction_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoirError::not_found("transaction", number),
                other => StoirError::Internal(format!("failed to get transaction: {other}")),
            })?;

        let mut stmt = self
            .conn
            .prepare("SELECT * FROM transaction_lines WHERE number = ?1 ORDER BY id")
            .map_err(|e| StoirError::Internal(format!("failed to prepare lines query: {e}")))?;
        let lines = stmt
            .query_map(rusqlite::params![number], line_from_row)
            .map_err(|e| StoirError::Internal(format!("failed to query lines: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read lines: {e}")))?;

        Ok(TransactionDetail { transaction, lines })
    }

    pub fn list_transactions(
        &self,
        filters: &TransactionFilters,
    ) -> Result<Vec<Transaction>, StoirError> {
        let from = filters
            .from
            .as_deref()
            .map(parse_reference_date)
            .transpose()?
            .map(date_str);
        let to = filters
            .to
            .as_deref()
            .map(parse_reference_date)
            .transpose()?
            .map(date_str);
        let kind = filters.kind.map(TransactionKind::as_str);

        let mut stmt = self
            .conn
            .prepare(
                "SELECT * FROM transactions
                 WHERE (?1 IS NULL OR kind = ?1)
                   AND (?2 IS NULL OR txn_date >= ?2)
                   AND (?3 IS NULL OR txn_date <= ?3)
                 ORDER BY txn_date DESC, created_at DESC, number DESC",
            )
            .map_err(|e| StoirError::Internal(format!("failed to prepare transactions query: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![kind, from, to], transaction_from_row)
            .map_err(|e| StoirError::Internal(format!("failed to list transactions: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read transactions: {e}")))?;
        Ok(rows)
    }
}
