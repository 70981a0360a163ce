use rusqlite::Connection;
use rusqlite::types::Value;

use super::{Db, conversion_err, exists_on, log_activity};
use crate::error::StoirError;
use crate::id::generate_code;
use crate::types::{
    Customer, CustomerUpdate, Item, ItemFilters, ItemUpdate, Named, NewCustomer, NewItem,
    NewSupplier, Supplier, SupplierUpdate,
};

/// Master tables that hold nothing but a code and a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKind {
    Category,
    Area,
}

impl NamedKind {
    fn table(self) -> &'static str {
        match self {
            NamedKind::Category => "categories",
            NamedKind::Area => "areas",
        }
    }

    pub fn entity(self) -> &'static str {
        match self {
            NamedKind::Category => "category",
            NamedKind::Area => "area",
        }
    }

    fn code_prefix(self) -> &'static str {
        match self {
            NamedKind::Category => "KTG",
            NamedKind::Area => "AREA",
        }
    }

    /// Query returning a row when some other table still points at `code`.
    fn usage_query(self) -> &'static str {
        match self {
            NamedKind::Category => "SELECT 1 FROM items WHERE category_code = ?1 LIMIT 1",
            NamedKind::Area => "SELECT 1 FROM customers WHERE area_code = ?1 LIMIT 1",
        }
    }
}

fn named_from_row(row: &rusqlite::Row) -> Result<Named, rusqlite::Error> {
    Ok(Named {
        code: row.get("code")?,
        name: row.get("name")?,
    })
}

fn supplier_from_row(row: &rusqlite::Row) -> Result<Supplier, rusqlite::Error> {
    Ok(Supplier {
        code: row.get("code")?,
        name: row.get("name")?,
        address: row.get("address")?,
        phone: row.get("phone")?,
        email: row.get("email")?,
    })
}

fn customer_from_row(row: &rusqlite::Row) -> Result<Customer, rusqlite::Error> {
    Ok(Customer {
        code: row.get("code")?,
        name: row.get("name")?,
        address: row.get("address")?,
        phone: row.get("phone")?,
        contact_person: row.get("contact_person")?,
        area_code: row.get("area_code")?,
    })
}

pub(crate) fn item_from_row(row: &rusqlite::Row) -> Result<Item, rusqlite::Error> {
    let unit_str: String = row.get("unit")?;
    Ok(Item {
        code: row.get("code")?,
        name: row.get("name")?,
        category_code: row.get("category_code")?,
        unit: unit_str.parse().map_err(conversion_err)?,
        min_stock: row.get("min_stock")?,
        purchase_price: row.get("purchase_price")?,
        sale_price: row.get("sale_price")?,
        stock: row.get("stock")?,
    })
}

pub(crate) fn get_item_on(conn: &Connection, code: &str) -> Result<Item, StoirError> {
    conn.query_row(
        "SELECT * FROM items WHERE code = ?1",
        rusqlite::params![code],
        item_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoirError::not_found("item", code),
        other => StoirError::Internal(format!("failed to get item: {other}")),
    })
}

fn require_text(field: &str, value: &str) -> Result<(), StoirError> {
    if value.trim().is_empty() {
        return Err(StoirError::InvalidArgument(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

fn require_non_negative(field: &str, value: i64) -> Result<(), StoirError> {
    if value < 0 {
        return Err(StoirError::InvalidArgument(format!(
            "{field} must be at least 0"
        )));
    }
    Ok(())
}

/// Picks the caller's code or mints one, and rejects duplicates.
fn resolve_code(
    conn: &Connection,
    table: &str,
    entity: &str,
    code: Option<&str>,
    prefix: &str,
) -> Result<String, StoirError> {
    let code = match code.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => generate_code(prefix),
    };
    let sql = format!("SELECT 1 FROM {table} WHERE code = ?1");
    if exists_on(conn, &sql, &code)? {
        return Err(StoirError::already_exists(entity, code));
    }
    Ok(code)
}

impl Db {
    // --- Categories & areas ---

    pub fn create_named(
        &self,
        kind: NamedKind,
        code: Option<&str>,
        name: &str,
        actor: &str,
    ) -> Result<Named, StoirError> {
        require_text("name", name)?;
        let code = resolve_code(
            &self.conn,
            kind.table(),
            kind.entity(),
            code,
            kind.code_prefix(),
        )?;

        let sql = format!("INSERT INTO {} (code, name) VALUES (?1, ?2)", kind.table());
        self.write(|conn| {
            conn.execute(&sql, rusqlite::params![code, name.trim()])
                .map_err(|e| {
                    StoirError::Internal(format!("failed to create {}: {e}", kind.entity()))
                })?;
            log_activity(conn, actor, "create", kind.entity(), &code, Some(name.trim()))
        })?;

        self.get_named(kind, &code)
    }

    pub fn get_named(&self, kind: NamedKind, code: &str) -> Result<Named, StoirError> {
        let sql = format!("SELECT * FROM {} WHERE code = ?1", kind.table());
        self.conn
            .query_row(&sql, rusqlite::params![code], named_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoirError::not_found(kind.entity(), code),
                other => StoirError::Internal(format!("failed to get {}: {other}", kind.entity())),
            })
    }

    pub fn list_named(&self, kind: NamedKind) -> Result<Vec<Named>, StoirError> {
        let sql = format!("SELECT * FROM {} ORDER BY name, code", kind.table());
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| StoirError::Internal(format!("failed to prepare list query: {e}")))?;
        let rows = stmt
            .query_map([], named_from_row)
            .map_err(|e| StoirError::Internal(format!("failed to list {}: {e}", kind.table())))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read {}: {e}", kind.table())))?;
        Ok(rows)
    }

    pub fn rename_named(
        &self,
        kind: NamedKind,
        code: &str,
        name: &str,
        actor: &str,
    ) -> Result<Named, StoirError> {
        require_text("name", name)?;
        self.get_named(kind, code)?;

        let sql = format!("UPDATE {} SET name = ?1 WHERE code = ?2", kind.table());
        self.write(|conn| {
            conn.execute(&sql, rusqlite::params![name.trim(), code])
                .map_err(|e| {
                    StoirError::Internal(format!("failed to rename {}: {e}", kind.entity()))
                })?;
            log_activity(conn, actor, "update", kind.entity(), code, Some(name.trim()))
        })?;

        self.get_named(kind, code)
    }

    pub fn delete_named(&self, kind: NamedKind, code: &str, actor: &str) -> Result<(), StoirError> {
        self.get_named(kind, code)?;
        if self.exists(kind.usage_query(), code)? {
            return Err(StoirError::in_use(kind.entity(), code));
        }

        let sql = format!("DELETE FROM {} WHERE code = ?1", kind.table());
        self.write(|conn| {
            conn.execute(&sql, rusqlite::params![code])
                .map_err(|e| {
                    StoirError::Internal(format!("failed to delete {}: {e}", kind.entity()))
                })?;
            log_activity(conn, actor, "delete", kind.entity(), code, None)
        })
    }

    // --- Suppliers ---

    pub fn create_supplier(&self, new: &NewSupplier, actor: &str) -> Result<Supplier, StoirError> {
        require_text("name", &new.name)?;
        require_text("address", &new.address)?;
        require_text("phone", &new.phone)?;
        let code = resolve_code(&self.conn, "suppliers", "supplier", new.code.as_deref(), "SUP")?;
        let email = new.email.as_deref().filter(|e| !e.trim().is_empty());

        self.write(|conn| {
            conn.execute(
                "INSERT INTO suppliers (code, name, address, phone, email) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![code, new.name.trim(), new.address, new.phone, email],
            )
            .map_err(|e| StoirError::Internal(format!("failed to create supplier: {e}")))?;
            log_activity(conn, actor, "create", "supplier", &code, Some(new.name.trim()))
        })?;

        self.get_supplier(&code)
    }

    pub fn get_supplier(&self, code: &str) -> Result<Supplier, StoirError> {
        self.conn
            .query_row(
                "SELECT * FROM suppliers WHERE code = ?1",
                rusqlite::params![code],
                supplier_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoirError::not_found("supplier", code),
                other => StoirError::Internal(format!("failed to get supplier: {other}")),
            })
    }

    pub fn list_suppliers(&self) -> Result<Vec<Supplier>, StoirError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM suppliers ORDER BY name, code")
            .map_err(|e| StoirError::Internal(format!("failed to prepare suppliers query: {e}")))?;
        let rows = stmt
            .query_map([], supplier_from_row)
            .map_err(|e| StoirError::Internal(format!("failed to list suppliers: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read suppliers: {e}")))?;
        Ok(rows)
    }

    pub fn update_supplier(
        &self,
        code: &str,
        fields: &SupplierUpdate,
        actor: &str,
    ) -> Result<Supplier, StoirError> {
        self.get_supplier(code)?;

        let mut set = SetBuilder::default();
        if let Some(name) = &fields.name {
            require_text("name", name)?;
            set.text("name", name.trim());
        }
        if let Some(address) = &fields.address {
            require_text("address", address)?;
            set.text("address", address);
        }
        if let Some(phone) = &fields.phone {
            require_text("phone", phone)?;
            set.text("phone", phone);
        }
        if let Some(email) = &fields.email {
            set.nullable_text("email", email);
        }

        self.write(|conn| set.apply(conn, "suppliers", code, actor, "supplier"))?;
        self.get_supplier(code)
    }

    pub fn delete_supplier(&self, code: &str, actor: &str) -> Result<(), StoirError> {
        self.get_supplier(code)?;
        if self.exists(
            "SELECT 1 FROM transactions WHERE kind = 'purchase' AND partner_code = ?1 LIMIT 1",
            code,
        )? {
            return Err(StoirError::in_use("supplier", code));
        }

        self.write(|conn| {
            conn.execute("DELETE FROM suppliers WHERE code = ?1", rusqlite::params![code])
                .map_err(|e| StoirError::Internal(format!("failed to delete supplier: {e}")))?;
            log_activity(conn, actor, "delete", "supplier", code, None)
        })
    }

    // --- Customers ---

    fn check_area(&self, area_code: Option<&str>) -> Result<(), StoirError> {
        if let Some(area) = area_code {
            self.get_named(NamedKind::Area, area)?;
        }
        Ok(())
    }

    pub fn create_customer(&self, new: &NewCustomer, actor: &str) -> Result<Customer, StoirError> {
        require_text("name", &new.name)?;
        require_text("address", &new.address)?;
        require_text("phone", &new.phone)?;
        require_text("contact_person", &new.contact_person)?;
        let area = new.area_code.as_deref().filter(|a| !a.trim().is_empty());
        self.check_area(area)?;
        let code = resolve_code(&self.conn, "customers", "customer", new.code.as_deref(), "CUST")?;

        self.write(|conn| {
            conn.execute(
                "INSERT INTO customers (code, name, address, phone, contact_person, area_code)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    code,
                    new.name.trim(),
                    new.address,
                    new.phone,
                    new.contact_person,
                    area,
                ],
            )
            .map_err(|e| StoirError::Internal(format!("failed to create customer: {e}")))?;
            log_activity(conn, actor, "create", "customer", &code, Some(new.name.trim()))
        })?;

        self.get_customer(&code)
    }

    pub fn get_customer(&self, code: &str) -> Result<Customer, StoirError> {
        self.conn
            .query_row(
                "SELECT * FROM customers WHERE code = ?1",
                rusqlite::params![code],
                customer_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoirError::not_found("customer", code),
                other => StoirError::Internal(format!("failed to get customer: {other}")),
            })
    }

    pub fn list_customers(&self, area: Option<&str>) -> Result<Vec<Customer>, StoirError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT * FROM customers WHERE (?1 IS NULL OR area_code = ?1) ORDER BY name, code",
            )
            .map_err(|e| StoirError::Internal(format!("failed to prepare customers query: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![area], customer_from_row)
            .map_err(|e| StoirError::Internal(format!("failed to list customers: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read customers: {e}")))?;
        Ok(rows)
    }

    pub fn update_customer(
        &self,
        code: &str,
        fields: &CustomerUpdate,
        actor: &str,
    ) -> Result<Customer, StoirError> {
        self.get_customer(code)?;

        let mut set = SetBuilder::default();
        if let Some(name) = &fields.name {
            require_text("name", name)?;
            set.text("name", name.trim());
        }
        if let Some(address) = &fields.address {
            require_text("address", address)?;
            set.text("address", address);
        }
        if let Some(phone) = &fields.phone {
            require_text("phone", phone)?;
            set.text("phone", phone);
        }
        if let Some(contact) = &fields.contact_person {
            require_text("contact_person", contact)?;
            set.text("contact_person", contact);
        }
        if let Some(area) = &fields.area_code {
            if !area.is_empty() {
                self.check_area(Some(area))?;
            }
            set.nullable_text("area_code", area);
        }

        self.write(|conn| set.apply(conn, "customers", code, actor, "customer"))?;
        self.get_customer(code)
    }

    pub fn delete_customer(&self, code: &str, actor: &str) -> Result<(), StoirError> {
        self.get_customer(code)?;
        if self.exists(
            "SELECT 1 FROM transactions WHERE kind IN ('sale', 'claim') AND partner_code = ?1 LIMIT 1",
            code,
        )? {
            return Err(StoirError::in_use("customer", code));
        }

        self.write(|conn| {
            conn.execute("DELETE FROM customers WHERE code = ?1", rusqlite::params![code])
                .map_err(|e| StoirError::Internal(format!("failed to delete customer: {e}")))?;
            log_activity(conn, actor, "delete", "customer", code, None)
        })
    }

    // --- Items ---

    pub fn create_item(&self, new: &NewItem, actor: &str) -> Result<Item, StoirError> {
        require_text("code", &new.code)?;
        require_text("name", &new.name)?;
        require_non_negative("min_stock", new.min_stock)?;
        require_non_negative("purchase_price", new.purchase_price)?;
        require_non_negative("sale_price", new.sale_price)?;
        self.get_named(NamedKind::Category, &new.category_code)?;
        let code = resolve_code(&self.conn, "items", "item", Some(new.code.as_str()), "BRG")?;

        self.write(|conn| {
            conn.execute(
                "INSERT INTO items (code, name, category_code, unit, min_stock, purchase_price, sale_price)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    code,
                    new.name.trim(),
                    new.category_code,
                    new.unit.as_str(),
                    new.min_stock,
                    new.purchase_price,
                    new.sale_price,
                ],
            )
            .map_err(|e| StoirError::Internal(format!("failed to create item: {e}")))?;
            log_activity(conn, actor, "create", "item", &code, Some(new.name.trim()))
        })?;

        self.get_item(&code)
    }

    pub fn get_item(&self, code: &str) -> Result<Item, StoirError> {
        get_item_on(&self.conn, code)
    }

    pub fn list_items(&self, filters: &ItemFilters) -> Result<Vec<Item>, StoirError> {
        let pattern = filters
            .q
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .map(|q| format!("%{}%", q.trim()));

        let mut stmt = self
            .conn
            .prepare(
                "SELECT * FROM items
                 WHERE (?1 IS NULL OR name LIKE ?1 OR code LIKE ?1)
                   AND (?2 IS NULL OR category_code = ?2)
                 ORDER BY code",
            )
            .map_err(|e| StoirError::Internal(format!("failed to prepare items query: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![pattern, filters.category], item_from_row)
            .map_err(|e| StoirError::Internal(format!("failed to list items: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoirError::Internal(format!("failed to read items: {e}")))?;
        Ok(rows)
    }

    pub fn update_item(
        &self,
        code: &str,
        fields: &ItemUpdate,
        actor: &str,
    ) -> Result<Item, StoirError> {
        self.get_item(code)?;

        let mut set = SetBuilder::default();
        if let Some(name) = &fields.name {
            require_text("name", name)?;
            set.text("name", name.trim());
        }
        if let Some(category) = &fields.category_code {
            self.get_named(NamedKind::Category, category)?;
            set.text("category_code", category);
        }
        if let Some(unit) = fields.unit {
            set.text("unit", unit.as_str());
        }
        for (field, value) in [
            ("min_stock", fields.min_stock),
            ("purchase_price", fields.purchase_price),
            ("sale_price", fields.sale_price),
        ] {
            if let Some(v) = value {
                require_non_negative(field, v)?;
                set.integer(field, v);
            }
        }

        self.write(|conn| set.apply(conn, "items", code, actor, "item"))?;
        self.get_item(code)
    }

    pub fn delete_item(&self, code: &str, actor: &str) -> Result<(), StoirError> {
        self.get_item(code)?;
        if self.exists(
            "SELECT 1 FROM transaction_lines WHERE item_code = ?1 LIMIT 1",
            code,
        )? {
            return Err(StoirError::in_use("item", code));
        }

        self.write(|conn| {
            conn.execute("DELETE FROM items WHERE code = ?1", rusqlite::params![code])
                .map_err(|e| StoirError::Internal(format!("failed to delete item: {e}")))?;
            log_activity(conn, actor, "delete", "item", code, None)
        })
    }
}

/// Collects `column = ?` clauses for a partial update and records what
/// changed in the activity log.
#[derive(Default)]
struct SetBuilder {
    clauses: Vec<String>,
    values: Vec<Value>,
    changed: serde_json::Map<String, serde_json::Value>,
}

impl SetBuilder {
    fn text(&mut self, column: &str, value: &str) {
        self.clauses.push(format!("{column} = ?"));
        self.values.push(Value::Text(value.to_string()));
        self.changed
            .insert(column.into(), serde_json::Value::String(value.to_string()));
    }

    /// Empty string clears the column.
    fn nullable_text(&mut self, column: &str, value: &str) {
        self.clauses.push(format!("{column} = ?"));
        if value.is_empty() {
            self.values.push(Value::Null);
        } else {
            self.values.push(Value::Text(value.to_string()));
        }
        self.changed
            .insert(column.into(), serde_json::Value::String(value.to_string()));
    }

    fn integer(&mut self, column: &str, value: i64) {
        self.clauses.push(format!("{column} = ?"));
        self.values.push(Value::Integer(value));
        self.changed.insert(column.into(), serde_json::Value::from(value));
    }

    fn apply(
        mut self,
        conn: &Connection,
        table: &str,
        code: &str,
        actor: &str,
        entity: &str,
    ) -> Result<(), StoirError> {
        if self.clauses.is_empty() {
            return Ok(());
        }

        self.values.push(Value::Text(code.to_string()));
        let sql = format!("UPDATE {table} SET {} WHERE code = ?", self.clauses.join(", "));
        conn.execute(&sql, rusqlite::params_from_iter(self.values))
            .map_err(|e| StoirError::Internal(format!("failed to update {entity}: {e}")))?;

        let detail = serde_json::Value::Object(self.changed).to_string();
        log_activity(conn, actor, "update", entity, code, Some(&detail))
    }
}
