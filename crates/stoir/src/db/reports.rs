use std::collections::HashMap;

use chrono::{Days, NaiveDate};

use super::master::item_from_row;
use super::{Db, date_str, parse_date};
use crate::error::StoirError;
use crate::types::{
    Change, ChartPoint, Comparison, DashboardStats, DashboardSummary, StockFilters, StockRow,
    TopItem,
};

const CHART_DAYS: u64 = 7;
const TOP_ITEMS_DAYS: u64 = 30;
const TOP_ITEMS_LIMIT: i64 = 5;
const RECENT_ACTIVITY_LIMIT: usize = 10;

/// Quantities moved on one day.
#[derive(Debug, Default, Clone, Copy)]
struct Flow {
    stock_in: i64,
    stock_out: i64,
    transactions: i64,
}

fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

/// Percent change rounded to one decimal; 0 when there is nothing to
/// compare against.
fn percent_change(current: i64, previous: i64) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    let pct = (current as f64 - previous as f64) / previous as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

impl Db {
    pub fn stock_report(&self, filters: &StockFilters) -> Result<Vec<StockRow>, StoirError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM items WHERE (?1 IS NULL OR category_code = ?1) ORDER BY code")
            .map_err(|e| StoirError::Internal(format!("failed to prepare stock query: {e}")))?;
        let items = stmt
            .query_map(rusqlite::params![filters.category], item_from_row)
            .map_err(|e| StoirError::Internal(format!("failed to query stock: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read stock: {e}")))?;

        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let low = item.stock <= item.min_stock;
            if filters.low_only && !low {
                continue;
            }
            let stock_value = item.stock.checked_mul(item.purchase_price).ok_or_else(|| {
                StoirError::Internal(format!("stock value of {} overflows", item.code))
            })?;
            rows.push(StockRow {
                low,
                stock_value,
                code: item.code,
                name: item.name,
                category_code: item.category_code,
                unit: item.unit,
                stock: item.stock,
                min_stock: item.min_stock,
            });
        }
        Ok(rows)
    }

    fn daily_flow(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<HashMap<NaiveDate, Flow>, StoirError> {
        let mut flows: HashMap<NaiveDate, Flow> = HashMap::new();

        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.txn_date, t.kind, COALESCE(SUM(l.qty), 0)
                 FROM transactions t
                 JOIN transaction_lines l ON l.number = t.number
                 WHERE t.txn_date BETWEEN ?1 AND ?2
                 GROUP BY t.txn_date, t.kind",
            )
            .map_err(|e| StoirError::Internal(format!("failed to prepare flow query: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![date_str(from), date_str(to)], |row| {
                let date: String = row.get(0)?;
                Ok((parse_date(&date)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
            })
            .map_err(|e| StoirError::Internal(format!("failed to query flow: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read flow: {e}")))?;
        for (date, kind, qty) in rows {
            let flow = flows.entry(date).or_default();
            match kind.as_str() {
                "purchase" => flow.stock_in += qty,
                "sale" | "claim" => flow.stock_out += qty,
                _ => {}
            }
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT txn_date, COUNT(*) FROM transactions
                 WHERE txn_date BETWEEN ?1 AND ?2
                 GROUP BY txn_date",
            )
            .map_err(|e| StoirError::Internal(format!("failed to prepare count query: {e}")))?;
        let counts = stmt
            .query_map(rusqlite::params![date_str(from), date_str(to)], |row| {
                let date: String = row.get(0)?;
                Ok((parse_date(&date)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| StoirError::Internal(format!("failed to query counts: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read counts: {e}")))?;
        for (date, count) in counts {
            flows.entry(date).or_default().transactions += count;
        }

        Ok(flows)
    }

    fn top_items(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<TopItem>, StoirError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT l.item_code, i.name, SUM(l.qty) AS qty
                 FROM transaction_lines l
                 JOIN transactions t ON t.number = l.number
                 JOIN items i ON i.code = l.item_code
                 WHERE t.kind = 'sale' AND t.txn_date BETWEEN ?1 AND ?2
                 GROUP BY l.item_code
                 ORDER BY qty DESC, l.item_code
                 LIMIT ?3",
            )
            .map_err(|e| StoirError::Internal(format!("failed to prepare top items query: {e}")))?;
        let rows = stmt
            .query_map(
                rusqlite::params![date_str(from), date_str(to), TOP_ITEMS_LIMIT],
                |row| {
                    Ok(TopItem {
                        code: row.get(0)?,
                        name: row.get(1)?,
                        qty: row.get(2)?,
                    })
                },
            )
            .map_err(|e| StoirError::Internal(format!("failed to query top items: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read top items: {e}")))?;
        Ok(rows)
    }

    /// Dashboard figures as of `today`. Windows are inclusive of `today`.
    pub fn dashboard_summary(&self, today: NaiveDate) -> Result<DashboardSummary, StoirError> {
        let (total_sku, stock_alert_count): (i64, i64) = self
            .conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(stock <= min_stock), 0) FROM items",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| StoirError::Internal(format!("failed to count items: {e}")))?;

        let window_start = days_before(today, CHART_DAYS * 2 - 1);
        let flows = self.daily_flow(window_start, today)?;
        let flow_on = |date: NaiveDate| flows.get(&date).copied().unwrap_or_default();

        let current: Vec<NaiveDate> = (0..CHART_DAYS)
            .rev()
            .map(|back| days_before(today, back))
            .collect();
        let previous: Vec<NaiveDate> = (CHART_DAYS..CHART_DAYS * 2)
            .rev()
            .map(|back| days_before(today, back))
            .collect();

        let chart = current
            .iter()
            .map(|&date| {
                let flow = flow_on(date);
                ChartPoint {
                    date,
                    stock_in: flow.stock_in,
                    stock_out: flow.stock_out,
                }
            })
            .collect();

        let sum = |dates: &[NaiveDate]| {
            dates.iter().fold(Flow::default(), |acc, &d| {
                let f = flow_on(d);
                Flow {
                    stock_in: acc.stock_in.saturating_add(f.stock_in),
                    stock_out: acc.stock_out.saturating_add(f.stock_out),
                    transactions: acc.transactions.saturating_add(f.transactions),
                }
            })
        };
        let cur = sum(&current);
        let prev = sum(&previous);
        let comparison = Comparison {
            stock_in: Change {
                value: cur.stock_in,
                percent: percent_change(cur.stock_in, prev.stock_in),
            },
            stock_out: Change {
                value: cur.stock_out,
                percent: percent_change(cur.stock_out, prev.stock_out),
            },
            total_transactions: Change {
                value: cur.transactions,
                percent: percent_change(cur.transactions, prev.transactions),
            },
        };

        let today_flow = flow_on(today);
        let stats = DashboardStats {
            total_sku,
            stock_in_today: today_flow.stock_in,
            stock_out_today: today_flow.stock_out,
            stock_alert_count,
        };

        let top_items = self.top_items(days_before(today, TOP_ITEMS_DAYS - 1), today)?;
        let recent_activity = self.activity(RECENT_ACTIVITY_LIMIT)?;

        Ok(DashboardSummary {
            stats,
            chart,
            comparison,
            top_items,
            recent_activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{open_temp_db, seed_items};
    use crate::types::{LineInput, NewTransaction, TransactionKind};

    fn record(db: &Db, kind: TransactionKind, date: &str, lines: &[(&str, i64)]) {
        let new = NewTransaction {
            kind,
            date: Some(date.into()),
            partner_code: None,
            note: None,
            lines: lines
                .iter()
                .map(|(code, qty)| LineInput {
                    item_code: code.to_string(),
                    qty: *qty,
                    price: None,
                    discount_pct: None,
                })
                .collect(),
        };
        db.create_transaction(&new, "t").unwrap();
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn percent_change_handles_zero_base() {
        assert_eq!(percent_change(5, 0), 0.0);
        assert_eq!(percent_change(15, 10), 50.0);
        assert_eq!(percent_change(5, 10), -50.0);
        assert_eq!(percent_change(1, 3), -66.7);
    }

    #[test]
    fn stock_report_flags_low_items() {
        let (db, _dir) = open_temp_db();
        seed_items(&db, &["A", "B"]);
        record(&db, TransactionKind::Purchase, "2026-01-06", &[("A", 10), ("B", 2)]);

        let rows = db.stock_report(&StockFilters::default()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].low);
        assert_eq!(rows[0].stock_value, 100_000);
        assert!(rows[1].low, "stock equal to min_stock counts as low");

        let low = db
            .stock_report(&StockFilters {
                low_only: true,
                category: None,
            })
            .unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].code, "B");

        let none = db
            .stock_report(&StockFilters {
                low_only: false,
                category: Some("other".into()),
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn stock_value_overflow_is_an_error() {
        let (db, _dir) = open_temp_db();
        seed_items(&db, &["A"]);
        db.conn
            .execute(
                "UPDATE items SET stock = ?1, purchase_price = ?1 WHERE code = 'A'",
                rusqlite::params![4_000_000_000i64],
            )
            .unwrap();

        let err = db.stock_report(&StockFilters::default()).unwrap_err();
        assert!(matches!(err, StoirError::Internal(_)), "got {err:?}");
    }

    #[test]
    fn dashboard_summarises_windows() {
        let (db, _dir) = open_temp_db();
        seed_items(&db, &["A", "B"]);
        // Previous window.
        record(&db, TransactionKind::Purchase, "2026-01-01", &[("A", 10), ("B", 10)]);
        // Current window (2026-01-08 ..= 2026-01-14).
        record(&db, TransactionKind::Purchase, "2026-01-10", &[("A", 20)]);
        record(&db, TransactionKind::Sale, "2026-01-14", &[("A", 3), ("B", 1)]);
        record(&db, TransactionKind::Sale, "2026-01-14", &[("B", 4)]);
        record(&db, TransactionKind::Claim, "2026-01-14", &[("A", 1)]);

        let summary = db.dashboard_summary(day("2026-01-14")).unwrap();

        assert_eq!(summary.stats.total_sku, 2);
        assert_eq!(summary.stats.stock_in_today, 0);
        assert_eq!(summary.stats.stock_out_today, 9);
        // A: 26 > 2, B: 5 > 2
        assert_eq!(summary.stats.stock_alert_count, 0);

        assert_eq!(summary.chart.len(), 7);
        assert_eq!(summary.chart[0].date, day("2026-01-08"));
        assert_eq!(summary.chart[6].date, day("2026-01-14"));
        assert_eq!(summary.chart[2].stock_in, 20);
        assert_eq!(summary.chart[6].stock_out, 9);

        assert_eq!(summary.comparison.stock_in.value, 20);
        assert_eq!(summary.comparison.stock_in.percent, 0.0);
        assert_eq!(summary.comparison.total_transactions.value, 4);
        assert_eq!(summary.comparison.total_transactions.percent, 300.0);

        assert_eq!(summary.top_items.len(), 2);
        assert_eq!(summary.top_items[0].code, "B");
        assert_eq!(summary.top_items[0].qty, 5);
        assert_eq!(summary.top_items[1].qty, 3);

        assert!(!summary.recent_activity.is_empty());
        assert!(summary.recent_activity.len() <= RECENT_ACTIVITY_LIMIT);
    }

    #[test]
    fn dashboard_on_empty_db() {
        let (db, _dir) = open_temp_db();
        let summary = db.dashboard_summary(day("2026-01-06")).unwrap();
        assert_eq!(summary.stats.total_sku, 0);
        assert_eq!(summary.stats.stock_alert_count, 0);
        assert!(summary.chart.iter().all(|p| p.stock_in == 0 && p.stock_out == 0));
        assert!(summary.top_items.is_empty());
    }
}
