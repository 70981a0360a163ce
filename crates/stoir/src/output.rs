use serde::Serialize;

use crate::error::{ErrorResponse, StoirError};
use crate::money::{format_currency, format_number};
use crate::types::{
    ActivityEntry, BootstrapStatus, Customer, DashboardSummary, Item, Named, Session, StockRow,
    Supplier, Transaction, TransactionDetail, User,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Json,
    Human,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("error: failed to render output: {e}"),
    }
}

pub fn print_error(err: &StoirError, mode: OutputMode) {
    match mode {
        OutputMode::Json => {
            let resp = ErrorResponse::from(err);
            match serde_json::to_string(&resp) {
                Ok(s) => eprintln!("{s}"),
                Err(_) => eprintln!("error: {err}"),
            }
        }
        OutputMode::Human => {
            eprintln!("error: {err}");
        }
    }
}

fn print_list<T: Serialize>(items: &[T], mode: OutputMode, empty: &str, row: impl Fn(&T)) {
    match mode {
        OutputMode::Json => print_json(items),
        OutputMode::Human => {
            if items.is_empty() {
                println!("({empty})");
            } else {
                items.iter().for_each(row);
            }
        }
    }
}

pub fn print_number(number: &str, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(&serde_json::json!({ "number": number })),
        OutputMode::Human => println!("{number}"),
    }
}

// --- Master data ---

fn named_row(n: &Named) {
    println!("{:<14} {}", n.code, n.name);
}

pub fn print_named(value: &Named, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => named_row(value),
    }
}

pub fn print_named_list(values: &[Named], mode: OutputMode) {
    print_list(values, mode, "none", named_row);
}

fn supplier_row(s: &Supplier) {
    let email = s.email.as_deref().unwrap_or("-");
    println!("{:<14} {}  {}  {}  {email}", s.code, s.name, s.phone, s.address);
}

pub fn print_supplier(value: &Supplier, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => supplier_row(value),
    }
}

pub fn print_supplier_list(values: &[Supplier], mode: OutputMode) {
    print_list(values, mode, "no suppliers", supplier_row);
}

fn customer_row(c: &Customer) {
    let area = c.area_code.as_deref().unwrap_or("-");
    println!(
        "{:<14} {}  [{area}]  {} ({})  {}",
        c.code, c.name, c.contact_person, c.phone, c.address
    );
}

pub fn print_customer(value: &Customer, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => customer_row(value),
    }
}

pub fn print_customer_list(values: &[Customer], mode: OutputMode) {
    print_list(values, mode, "no customers", customer_row);
}

fn item_row(i: &Item) {
    println!(
        "{:<14} {:<28} {:>8} {:<5} buy {:>12}  sell {:>12}",
        i.code,
        i.name,
        format_number(i.stock),
        i.unit.as_str(),
        format_currency(i.purchase_price),
        format_currency(i.sale_price),
    );
}

pub fn print_item(value: &Item, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => {
            item_row(value);
            println!(
                "  category: {}  min stock: {}",
                value.category_code,
                format_number(value.min_stock)
            );
        }
    }
}

pub fn print_item_list(values: &[Item], mode: OutputMode) {
    print_list(values, mode, "no items", item_row);
}

// --- Transactions ---

fn transaction_row(t: &Transaction) {
    let partner = t.partner_code.as_deref().unwrap_or("-");
    println!(
        "{:<18} {}  {:<11} {:<14} {:>14}  @{}",
        t.number,
        t.date,
        t.kind.as_str(),
        partner,
        format_currency(t.total),
        t.actor
    );
}

pub fn print_transaction_list(values: &[Transaction], mode: OutputMode) {
    print_list(values, mode, "no transactions", transaction_row);
}

pub fn print_transaction(value: &TransactionDetail, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => {
            let t = &value.transaction;
            println!("{}  [{}] {}", t.number, t.kind, t.date);
            if let Some(partner) = &t.partner_code {
                println!("  partner: {partner}");
            }
            if let Some(note) = &t.note {
                println!("  note: {note}");
            }
            for line in &value.lines {
                match line.system_qty {
                    Some(system) => println!(
                        "    {:<14} counted {:>6}  system {:>6}",
                        line.item_code,
                        format_number(line.qty),
                        format_number(system)
                    ),
                    None if line.discount_pct > 0.0 => println!(
                        "    {:<14} {:>6} x {:>12} -{}%  = {}",
                        line.item_code,
                        format_number(line.qty),
                        format_currency(line.price),
                        line.discount_pct,
                        format_currency(line.subtotal)
                    ),
                    None => println!(
                        "    {:<14} {:>6} x {:>12}  = {}",
                        line.item_code,
                        format_number(line.qty),
                        format_currency(line.price),
                        format_currency(line.subtotal)
                    ),
                }
            }
            println!("  total: {}", format_currency(t.total));
        }
    }
}

// --- Reports ---

pub fn print_stock_report(rows: &[StockRow], mode: OutputMode) {
    print_list(rows, mode, "no items", |r| {
        let flag = if r.low { "LOW" } else { "" };
        println!(
            "{:<14} {:<28} {:>8} / {:<6} {:<5} {:>14} {flag}",
            r.code,
            r.name,
            format_number(r.stock),
            format_number(r.min_stock),
            r.unit.as_str(),
            format_currency(r.stock_value),
        );
    });
    if mode == OutputMode::Human && !rows.is_empty() {
        let total = rows
            .iter()
            .fold(0i64, |acc, r| acc.saturating_add(r.stock_value));
        println!("total value: {}", format_currency(total));
    }
}

fn signed_percent(p: f64) -> String {
    if p > 0.0 { format!("+{p}%") } else { format!("{p}%") }
}

pub fn print_dashboard(value: &DashboardSummary, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => {
            let s = &value.stats;
            println!(
                "SKU: {}  in today: {}  out today: {}  low stock: {}",
                format_number(s.total_sku),
                format_number(s.stock_in_today),
                format_number(s.stock_out_today),
                format_number(s.stock_alert_count)
            );

            println!("last 7 days:");
            for p in &value.chart {
                println!(
                    "  {}  in {:>6}  out {:>6}",
                    p.date,
                    format_number(p.stock_in),
                    format_number(p.stock_out)
                );
            }

            let c = &value.comparison;
            println!(
                "vs previous 7 days: in {} ({})  out {} ({})  transactions {} ({})",
                format_number(c.stock_in.value),
                signed_percent(c.stock_in.percent),
                format_number(c.stock_out.value),
                signed_percent(c.stock_out.percent),
                format_number(c.total_transactions.value),
                signed_percent(c.total_transactions.percent)
            );

            if !value.top_items.is_empty() {
                println!("top sold (30 days):");
                for (rank, t) in value.top_items.iter().enumerate() {
                    println!("  {}. {} {}  {}", rank + 1, t.code, t.name, format_number(t.qty));
                }
            }

            if !value.recent_activity.is_empty() {
                println!("recent:");
                for e in &value.recent_activity {
                    activity_row(e);
                }
            }
        }
    }
}

fn activity_row(e: &ActivityEntry) {
    let at = e.created_at.format("%Y-%m-%d %H:%M:%S");
    match &e.detail {
        Some(detail) => println!(
            "  {at}  {} {} {} by {}: {detail}",
            e.action, e.entity, e.entity_id, e.actor
        ),
        None => println!("  {at}  {} {} {} by {}", e.action, e.entity, e.entity_id, e.actor),
    }
}

pub fn print_activity(values: &[ActivityEntry], mode: OutputMode) {
    print_list(values, mode, "no activity", activity_row);
}

// --- Users ---

fn user_row(u: &User) {
    println!("{:<16} {:<6} {}", u.username, u.role.as_str(), u.display_name);
}

pub fn print_user(value: &User, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => user_row(value),
    }
}

pub fn print_user_list(values: &[User], mode: OutputMode) {
    print_list(values, mode, "no users", user_row);
}

pub fn print_session(value: &Session, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => {
            let granted: Vec<&str> = value.permissions.iter().map(|p| p.as_str()).collect();
            println!(
                "logged in as {} ({})",
                value.user.username,
                value.user.role.as_str()
            );
            println!("  can use: {}", granted.join(", "));
            println!("  expires: {}", value.expires_at.to_rfc3339());
        }
    }
}

pub fn print_bootstrap(value: &BootstrapStatus, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(value),
        OutputMode::Human => {
            if value.needs_setup {
                println!("no users yet: run `stoir setup-owner`");
            } else {
                println!("owner account is set up");
            }
        }
    }
}

pub fn print_deleted(mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(&serde_json::json!({"status": "deleted"})),
        OutputMode::Human => println!("deleted"),
    }
}

pub fn print_ok(message: &str, mode: OutputMode) {
    match mode {
        OutputMode::Json => print_json(&serde_json::json!({"status": "ok"})),
        OutputMode::Human => println!("{message}"),
    }
}
