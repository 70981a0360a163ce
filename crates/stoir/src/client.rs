use std::path::Path;

use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::daemon::PORT_FILE;
use crate::error::{ErrorResponse, StoirError};
use crate::types::{
    ActivityEntry, BootstrapStatus, Customer, CustomerUpdate, DashboardSummary, Item, ItemFilters,
    ItemUpdate, Named, NewCustomer, NewItem, NewSupplier, NewTransaction, NewUser, StockFilters,
    Session, StockRow, Supplier, SupplierUpdate, Transaction, TransactionDetail, TransactionFilters,
    User,
};

pub const BASE_URL_ENV: &str = "STOIR_API_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3131/api";
/// Holds the bearer token of the last `stoir login` for this data dir.
pub const SESSION_FILE: &str = "session";

/// Base URL for the daemon: the env override, then the port a running
/// daemon recorded in `data_dir`, then the default.
pub fn resolve_base_url(data_dir: &Path) -> String {
    if let Ok(url) = std::env::var(BASE_URL_ENV)
        && !url.trim().is_empty()
    {
        return url.trim_end_matches('/').to_string();
    }
    if let Ok(raw) = std::fs::read_to_string(data_dir.join(PORT_FILE))
        && let Ok(port) = raw.trim().parse::<u16>()
    {
        return format!("http://127.0.0.1:{port}/api");
    }
    DEFAULT_BASE_URL.to_string()
}

pub fn load_token(data_dir: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(data_dir.join(SESSION_FILE)).ok()?;
    let token = raw.trim();
    (!token.is_empty()).then(|| token.to_string())
}

pub fn save_token(data_dir: &Path, token: &str) -> Result<(), StoirError> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| StoirError::Internal(format!("failed to create data dir: {e}")))?;
    std::fs::write(data_dir.join(SESSION_FILE), token)
        .map_err(|e| StoirError::Internal(format!("failed to save session: {e}")))
}

pub fn clear_token(data_dir: &Path) -> Result<(), StoirError> {
    match std::fs::remove_file(data_dir.join(SESSION_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoirError::Internal(format!("failed to clear session: {e}"))),
    }
}

pub struct Client {
    http: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl Client {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Client {
            http: HttpClient::new(),
            base_url: base_url.into(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn check_reachable(&self) -> Result<(), String> {
        match self.http.get(self.url("/health")).send() {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("daemon returned status {}", resp.status())),
            Err(e) => Err(format!("cannot reach daemon at {}: {}", self.base_url, e)),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn parse_error(resp: Response) -> StoirError {
        let status = resp.status();
        match resp.json::<ErrorResponse>() {
            Ok(err_resp) => StoirError::from_response(err_resp),
            Err(_) => StoirError::Internal(format!("daemon returned status {status}")),
        }
    }

    fn send(&self, req: RequestBuilder) -> Result<Response, StoirError> {
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req
            .send()
            .map_err(|e| StoirError::Internal(e.to_string()))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(Self::parse_error(resp))
        }
    }

    fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, StoirError> {
        self.send(req)?
            .json()
            .map_err(|e| StoirError::Internal(e.to_string()))
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, StoirError> {
        self.fetch(self.http.get(self.url(path)))
    }

    fn get_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T, StoirError> {
        self.fetch(self.http.get(self.url(path)).query(query))
    }

    fn delete(&self, path: &str) -> Result<(), StoirError> {
        self.send(self.http.delete(self.url(path)))?;
        Ok(())
    }

    fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, StoirError> {
        self.fetch(self.http.post(self.url(path)).json(body))
    }

    fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, StoirError> {
        self.fetch(self.http.patch(self.url(path)).json(body))
    }

    // --- Numbering ---

    pub fn allocate_number(&self, prefix: &str, date: Option<&str>) -> Result<String, StoirError> {
        let mut body = json!({ "prefix": prefix });
        if let Some(d) = date {
            body["date"] = Value::String(d.to_string());
        }
        let resp: Value = self.post("/numbers", &body)?;
        resp["number"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| StoirError::Internal("response missing number".into()))
    }

    // --- Categories & areas ---

    pub fn create_named(
        &self,
        collection: &str,
        code: Option<&str>,
        name: &str,
    ) -> Result<Named, StoirError> {
        let body = json!({ "code": code, "name": name });
        self.post(&format!("/{collection}"), &body)
    }

    pub fn list_named(&self, collection: &str) -> Result<Vec<Named>, StoirError> {
        self.get(&format!("/{collection}"))
    }

    pub fn get_named(&self, collection: &str, code: &str) -> Result<Named, StoirError> {
        self.get(&format!("/{collection}/{code}"))
    }

    pub fn rename_named(&self, collection: &str, code: &str, name: &str) -> Result<Named, StoirError> {
        let body = json!({ "name": name });
        self.patch(&format!("/{collection}/{code}"), &body)
    }

    pub fn delete_named(&self, collection: &str, code: &str) -> Result<(), StoirError> {
        self.delete(&format!("/{collection}/{code}"))
    }

    // --- Suppliers ---

    pub fn create_supplier(&self, new: &NewSupplier) -> Result<Supplier, StoirError> {
        self.post("/suppliers", new)
    }

    pub fn list_suppliers(&self) -> Result<Vec<Supplier>, StoirError> {
        self.get("/suppliers")
    }

    pub fn get_supplier(&self, code: &str) -> Result<Supplier, StoirError> {
        self.get(&format!("/suppliers/{code}"))
    }

    pub fn update_supplier(&self, code: &str, fields: &SupplierUpdate) -> Result<Supplier, StoirError> {
        self.patch(&format!("/suppliers/{code}"), fields)
    }

    pub fn delete_supplier(&self, code: &str) -> Result<(), StoirError> {
        self.delete(&format!("/suppliers/{code}"))
    }

    // --- Customers ---

    pub fn create_customer(&self, new: &NewCustomer) -> Result<Customer, StoirError> {
        self.post("/customers", new)
    }

    pub fn list_customers(&self, area: Option<&str>) -> Result<Vec<Customer>, StoirError> {
        self.get_query("/customers", &[("area", area)])
    }

    pub fn get_customer(&self, code: &str) -> Result<Customer, StoirError> {
        self.get(&format!("/customers/{code}"))
    }

    pub fn update_customer(&self, code: &str, fields: &CustomerUpdate) -> Result<Customer, StoirError> {
        self.patch(&format!("/customers/{code}"), fields)
    }

    pub fn delete_customer(&self, code: &str) -> Result<(), StoirError> {
        self.delete(&format!("/customers/{code}"))
    }

    // --- Items ---

    pub fn create_item(&self, new: &NewItem) -> Result<Item, StoirError> {
        self.post("/items", new)
    }

    pub fn list_items(&self, filters: &ItemFilters) -> Result<Vec<Item>, StoirError> {
        self.get_query("/items", filters)
    }

    pub fn get_item(&self, code: &str) -> Result<Item, StoirError> {
        self.get(&format!("/items/{code}"))
    }

    pub fn update_item(&self, code: &str, fields: &ItemUpdate) -> Result<Item, StoirError> {
        self.patch(&format!("/items/{code}"), fields)
    }

    pub fn delete_item(&self, code: &str) -> Result<(), StoirError> {
        self.delete(&format!("/items/{code}"))
    }

    // --- Transactions ---

    pub fn create_transaction(&self, new: &NewTransaction) -> Result<TransactionDetail, StoirError> {
        self.post("/transactions", new)
    }

    pub fn list_transactions(
        &self,
        filters: &TransactionFilters,
    ) -> Result<Vec<Transaction>, StoirError> {
        self.get_query("/transactions", filters)
    }

    pub fn get_transaction(&self, number: &str) -> Result<TransactionDetail, StoirError> {
        self.get(&format!("/transactions/{number}"))
    }

    // --- Reports ---

    pub fn stock_report(&self, filters: &StockFilters) -> Result<Vec<StockRow>, StoirError> {
        self.get_query("/reports/stock", filters)
    }

    pub fn dashboard_summary(&self, today: Option<&str>) -> Result<DashboardSummary, StoirError> {
        self.get_query("/reports/dashboard-summary", &[("today", today)])
    }

    pub fn activity(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoirError> {
        self.get_query("/activity", &[("limit", limit)])
    }

    // --- Auth & users ---

    pub fn bootstrap_status(&self) -> Result<BootstrapStatus, StoirError> {
        self.get("/auth/bootstrap-status")
    }

    pub fn setup_owner(
        &self,
        username: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<User, StoirError> {
        let body = json!({
            "username": username,
            "password": password,
            "display_name": display_name,
        });
        self.post("/auth/setup-owner", &body)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Session, StoirError> {
        let body = json!({ "username": username, "password": password });
        self.post("/auth/login", &body)
    }

    /// Ends the session behind the client's token.
    pub fn logout(&self) -> Result<(), StoirError> {
        self.send(self.http.post(self.url("/auth/logout")))?;
        Ok(())
    }

    pub fn create_user(&self, new: &NewUser) -> Result<User, StoirError> {
        self.post("/users", new)
    }

    pub fn list_users(&self) -> Result<Vec<User>, StoirError> {
        self.get("/users")
    }

    pub fn delete_user(&self, username: &str) -> Result<(), StoirError> {
        self.delete(&format!("/users/{username}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn base_url_reads_port_file() {
        // Only meaningful when the override is absent from the test environment.
        if std::env::var(BASE_URL_ENV).is_ok() {
            return;
        }
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_base_url(dir.path()), DEFAULT_BASE_URL);

        std::fs::write(dir.path().join(PORT_FILE), "3140\n").unwrap();
        assert_eq!(resolve_base_url(dir.path()), "http://127.0.0.1:3140/api");

        std::fs::write(dir.path().join(PORT_FILE), "garbage").unwrap();
        assert_eq!(resolve_base_url(dir.path()), DEFAULT_BASE_URL);
    }

    #[test]
    fn session_token_is_saved_per_data_dir() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("nested");
        assert_eq!(load_token(&data_dir), None);
        clear_token(&data_dir).unwrap();

        save_token(&data_dir, "abc123").unwrap();
        assert_eq!(load_token(&data_dir).as_deref(), Some("abc123"));

        std::fs::write(data_dir.join(SESSION_FILE), "  \n").unwrap();
        assert_eq!(load_token(&data_dir), None);

        save_token(&data_dir, "def456").unwrap();
        clear_token(&data_dir).unwrap();
        assert_eq!(load_token(&data_dir), None);
    }
}
