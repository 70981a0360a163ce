use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Sale,
    StockCount,
    Claim,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 4] = [
        TransactionKind::Purchase,
        TransactionKind::Sale,
        TransactionKind::StockCount,
        TransactionKind::Claim,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            TransactionKind::Purchase => "PO",
            TransactionKind::Sale => "SL",
            TransactionKind::StockCount => "SO",
            TransactionKind::Claim => "CL",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Sale => "sale",
            TransactionKind::StockCount => "stock_count",
            TransactionKind::Claim => "claim",
        }
    }

    /// Signed stock movement for a line of `qty`. Stock counts are absolute
    /// and handled separately.
    pub fn stock_delta(self, qty: i64) -> i64 {
        match self {
            TransactionKind::Purchase => qty,
            TransactionKind::Sale | TransactionKind::Claim => -qty,
            TransactionKind::StockCount => 0,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" | "PO" => Ok(TransactionKind::Purchase),
            "sale" | "SL" => Ok(TransactionKind::Sale),
            "stock_count" | "stock-count" | "SO" => Ok(TransactionKind::StockCount),
            "claim" | "CL" => Ok(TransactionKind::Claim),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Pcs,
    Box,
    Kg,
    Liter,
}

impl Unit {
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Pcs => "pcs",
            Unit::Box => "box",
            Unit::Kg => "kg",
            Unit::Liter => "liter",
        }
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pcs" => Ok(Unit::Pcs),
            "box" => Ok(Unit::Box),
            "kg" => Ok(Unit::Kg),
            "liter" => Ok(Unit::Liter),
            other => Err(format!("unknown unit: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Staff,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Staff => "staff",
        }
    }

    /// Areas of the application this role may use.
    pub fn permissions(self) -> &'static [Permission] {
        match self {
            Role::Owner => &Permission::ALL,
            Role::Admin => &[
                Permission::Dashboard,
                Permission::MasterData,
                Permission::Transactions,
                Permission::Reports,
            ],
            Role::Staff => &[Permission::Dashboard, Permission::Transactions],
        }
    }

    pub fn allows(self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Dashboard,
    MasterData,
    Transactions,
    Reports,
    /// User management and the activity log.
    Settings,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::Dashboard,
        Permission::MasterData,
        Permission::Transactions,
        Permission::Reports,
        Permission::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Dashboard => "dashboard",
            Permission::MasterData => "master_data",
            Permission::Transactions => "transactions",
            Permission::Reports => "reports",
            Permission::Settings => "settings",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Master data ---

/// Categories and areas share this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Named {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub code: String,
    pub name: String,
    pub address: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub code: String,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub contact_person: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub code: String,
    pub name: String,
    pub category_code: String,
    pub unit: Unit,
    pub min_stock: i64,
    pub purchase_price: i64,
    pub sale_price: i64,
    pub stock: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSupplier {
    pub code: Option<String>,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplierUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCustomer {
    pub code: Option<String>,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub contact_person: String,
    pub area_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub contact_person: Option<String>,
    pub area_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub code: String,
    pub name: String,
    pub category_code: String,
    pub unit: Unit,
    #[serde(default)]
    pub min_stock: i64,
    pub purchase_price: i64,
    pub sale_price: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub name: Option<String>,
    pub category_code: Option<String>,
    pub unit: Option<Unit>,
    pub min_stock: Option<i64>,
    pub purchase_price: Option<i64>,
    pub sale_price: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFilters {
    pub q: Option<String>,
    pub category: Option<String>,
}

// --- Transactions ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineInput {
    pub item_code: String,
    pub qty: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_pct: Option<f64>,
}

impl FromStr for LineInput {
    type Err = String;

    /// `CODE:QTY[:PRICE[:DISCOUNT]]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 || parts.len() > 4 || parts[0].is_empty() {
            return Err(format!("expected CODE:QTY[:PRICE[:DISCOUNT]], got {s}"));
        }
        let qty = parts[1]
            .parse()
            .map_err(|_| format!("invalid quantity in {s}"))?;
        let price = match parts.get(2) {
            Some(p) if !p.is_empty() => Some(p.parse().map_err(|_| format!("invalid price in {s}"))?),
            _ => None,
        };
        let discount_pct = match parts.get(3) {
            Some(d) if !d.is_empty() => {
                Some(d.parse().map_err(|_| format!("invalid discount in {s}"))?)
            }
            _ => None,
        };
        Ok(LineInput {
            item_code: parts[0].to_string(),
            qty,
            price,
            discount_pct,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    /// `YYYY-MM-DD`; omitted means today.
    pub date: Option<String>,
    pub partner_code: Option<String>,
    pub note: Option<String>,
    pub lines: Vec<LineInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub item_code: String,
    pub qty: i64,
    pub price: i64,
    pub discount_pct: f64,
    pub subtotal: i64,
    /// Stock before a stock count was applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_qty: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub number: String,
    pub kind: TransactionKind,
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub total: i64,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDetail {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub lines: Vec<TransactionLine>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilters {
    pub kind: Option<TransactionKind>,
    pub from: Option<String>,
    pub to: Option<String>,
}

// --- Reports ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRow {
    pub code: String,
    pub name: String,
    pub category_code: String,
    pub unit: Unit,
    pub stock: i64,
    pub min_stock: i64,
    pub low: bool,
    pub stock_value: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockFilters {
    #[serde(default)]
    pub low_only: bool,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_sku: i64,
    pub stock_in_today: i64,
    pub stock_out_today: i64,
    pub stock_alert_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub date: NaiveDate,
    pub stock_in: i64,
    pub stock_out: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub value: i64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub stock_in: Change,
    pub stock_out: Change,
    pub total_transactions: Change,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopItem {
    pub code: String,
    pub name: String,
    pub qty: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub stats: DashboardStats,
    pub chart: Vec<ChartPoint>,
    pub comparison: Comparison,
    pub top_items: Vec<TopItem>,
    pub recent_activity: Vec<ActivityEntry>,
}

// --- Users & activity ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub password: String,
}

/// A logged-in user and the bearer token that identifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
    pub permissions: Vec<Permission>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapStatus {
    pub needs_setup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}
