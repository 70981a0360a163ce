use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;

const OWNER: &str = "budi";
const OWNER_PASSWORD: &str = "rahasia1";

fn stoir_bin() -> String {
    env!("CARGO_BIN_EXE_stoir").to_string()
}

struct DaemonGuard {
    child: Child,
    port: u16,
    dir: TempDir,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(port: u16, data_dir: &Path) -> Child {
    Command::new(stoir_bin())
        .args(["daemon", "--port", &port.to_string(), "--data-dir"])
        .arg(data_dir)
        .env_remove("STOIR_API_PORT")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("spawn daemon")
}

fn wait_healthy(port: u16) -> bool {
    let base = format!("http://127.0.0.1:{port}/api");
    for _ in 0..50 {
        std::thread::sleep(Duration::from_millis(100));
        if let Ok(resp) = reqwest::blocking::get(format!("{base}/health"))
            && resp.status().is_success()
        {
            return true;
        }
    }
    false
}

/// A running daemon with no accounts yet.
fn start_bare_daemon() -> DaemonGuard {
    let dir = TempDir::new().expect("create temp dir");
    let port = portpicker::pick_unused_port().expect("no free port");
    let child = spawn_daemon(port, dir.path());
    let guard = DaemonGuard { child, port, dir };
    assert!(
        wait_healthy(port),
        "daemon did not become ready within 5 seconds"
    );
    guard
}

/// A running daemon whose owner is logged in from the guard's data dir.
fn start_daemon() -> DaemonGuard {
    let guard = start_bare_daemon();
    run_ok_json(stoir(&guard).args(["setup-owner", OWNER, "--password", OWNER_PASSWORD]));
    run_ok_json(stoir(&guard).args(["login", OWNER, "--password", OWNER_PASSWORD]));
    guard
}

fn base_url(guard: &DaemonGuard) -> String {
    format!("http://127.0.0.1:{}/api", guard.port)
}

fn stoir_at(base_url: &str, data_dir: &Path) -> Command {
    let mut cmd = Command::new(stoir_bin());
    cmd.env("STOIR_API_BASE_URL", base_url);
    cmd.env("STOIR_DATA_DIR", data_dir);
    cmd.env_remove("STOIR_TOKEN");
    cmd
}

fn stoir(guard: &DaemonGuard) -> Command {
    stoir_at(&base_url(guard), guard.dir.path())
}

fn saved_token(data_dir: &Path) -> String {
    std::fs::read_to_string(data_dir.join("session"))
        .expect("read saved session")
        .trim()
        .to_string()
}

fn run_json(cmd: &mut Command) -> (bool, serde_json::Value) {
    cmd.arg("--json");
    let output = cmd.output().expect("run stoir command");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap_or_else(|e| {
        panic!(
            "failed to parse JSON: {e}\nstdout: {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    });
    (output.status.success(), value)
}

fn run_ok_json(cmd: &mut Command) -> serde_json::Value {
    let (ok, val) = run_json(cmd);
    assert!(ok, "expected success, got failure. value: {val}");
    val
}

/// Runs a command expected to fail and returns the `code` from its JSON error.
fn run_err_code(cmd: &mut Command) -> String {
    cmd.arg("--json");
    let output = cmd.output().expect("run stoir command");
    assert!(
        !output.status.success(),
        "expected failure, got success. stdout: {}",
        String::from_utf8_lossy(&output.stdout)
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    let line = stderr
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .unwrap_or_else(|| panic!("no JSON error on stderr: {stderr}"));
    let value: serde_json::Value = serde_json::from_str(line).unwrap();
    value["code"].as_str().unwrap_or("").to_string()
}

fn number(guard: &DaemonGuard, prefix: &str, date: &str) -> String {
    let val = run_ok_json(stoir(guard).args(["number", prefix, "--date", date]));
    val["number"].as_str().unwrap().to_string()
}

/// Category `KTG-1`, items `BRG-1` and `BRG-2`, supplier `SUP-1`, customer `CUST-1`.
fn seed(guard: &DaemonGuard) {
    run_ok_json(stoir(guard).args(["category", "add", "Oli", "--code", "KTG-1"]));
    for code in ["BRG-1", "BRG-2"] {
        run_ok_json(stoir(guard).args([
            "item",
            "add",
            code,
            "--name",
            "Oli Mesin",
            "--category",
            "KTG-1",
            "--min-stock",
            "2",
            "--buy",
            "10000",
            "--sell",
            "15000",
        ]));
    }
    run_ok_json(stoir(guard).args([
        "supplier",
        "add",
        "--code",
        "SUP-1",
        "--name",
        "PT Maju",
        "--address",
        "Jl. Merdeka 1",
        "--phone",
        "0812",
    ]));
    run_ok_json(stoir(guard).args([
        "customer",
        "add",
        "--code",
        "CUST-1",
        "--name",
        "Toko Jaya",
        "--address",
        "Jl. Sudirman 2",
        "--phone",
        "0813",
        "--contact",
        "Andi",
    ]));
}

fn stock_of(guard: &DaemonGuard, code: &str) -> i64 {
    let item = run_ok_json(stoir(guard).args(["item", "show", code]));
    item["stock"].as_i64().unwrap()
}

#[test]
fn numbers_follow_prefix_rules() {
    let daemon = start_daemon();

    assert_eq!(number(&daemon, "PO", "2026-01-06"), "PO-260106-0001");
    assert_eq!(number(&daemon, "PO", "2026-01-06"), "PO-260106-0002");
    assert_eq!(number(&daemon, "SL", "2026-01-06"), "SL-260106-0001");
    assert_eq!(number(&daemon, "SO", "2026-01-06"), "SO-20260106-0001");
    assert_eq!(number(&daemon, "PO", "2026-01-07"), "PO-260107-0001");
    assert_eq!(number(&daemon, "SO", "2026-01-07"), "SO-20260107-0001");
}

#[test]
fn invalid_date_consumes_nothing() {
    let daemon = start_daemon();

    assert_eq!(number(&daemon, "PO", "2026-01-06"), "PO-260106-0001");
    let code = run_err_code(stoir(&daemon).args(["number", "PO", "--date", "2026-02-30"]));
    assert_eq!(code, "invalid_date");
    let code = run_err_code(stoir(&daemon).args(["number", "PO", "--date", "06-01-2026"]));
    assert_eq!(code, "invalid_date");
    assert_eq!(number(&daemon, "PO", "2026-01-06"), "PO-260106-0002");
}

#[test]
fn number_without_date_uses_today() {
    let daemon = start_daemon();
    let val = run_ok_json(stoir(&daemon).args(["number", "SO"]));
    let n = val["number"].as_str().unwrap();
    assert!(n.starts_with("SO-"), "got {n}");
    assert!(n.ends_with("-0001"), "got {n}");
    assert_eq!(n.len(), "SO-20260106-0001".len());
}

#[test]
fn stock_moves_with_transactions() {
    let daemon = start_daemon();
    seed(&daemon);

    let po = run_ok_json(stoir(&daemon).args([
        "purchase",
        "--date",
        "2026-01-06",
        "--partner",
        "SUP-1",
        "--line",
        "BRG-1:10",
        "--line",
        "BRG-2:5:9000",
    ]));
    assert_eq!(po["number"], "PO-260106-0001");
    assert_eq!(po["kind"], "purchase");
    assert_eq!(po["total"], 145_000);
    assert_eq!(po["lines"].as_array().unwrap().len(), 2);
    assert_eq!(stock_of(&daemon, "BRG-1"), 10);
    assert_eq!(stock_of(&daemon, "BRG-2"), 5);

    let sale = run_ok_json(stoir(&daemon).args([
        "sale",
        "--date",
        "2026-01-06",
        "--partner",
        "CUST-1",
        "--line",
        "BRG-1:2::10",
    ]));
    assert_eq!(sale["number"], "SL-260106-0001");
    assert_eq!(sale["total"], 27_000);
    assert_eq!(stock_of(&daemon, "BRG-1"), 8);

    let count = run_ok_json(stoir(&daemon).args([
        "stock-count",
        "--date",
        "2026-01-06",
        "--line",
        "BRG-1:6",
    ]));
    assert_eq!(count["number"], "SO-20260106-0001");
    assert_eq!(count["lines"][0]["system_qty"], 8);
    assert_eq!(stock_of(&daemon, "BRG-1"), 6);

    let claim = run_ok_json(stoir(&daemon).args([
        "claim",
        "--date",
        "2026-01-06",
        "--partner",
        "CUST-1",
        "--line",
        "BRG-2:1",
    ]));
    assert_eq!(claim["number"], "CL-20260106-0001");
    assert_eq!(stock_of(&daemon, "BRG-2"), 4);

    let listed = run_ok_json(stoir(&daemon).args(["tx", "list", "--kind", "sale"]));
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["number"], "SL-260106-0001");

    let shown = run_ok_json(stoir(&daemon).args(["tx", "show", "PO-260106-0001"]));
    assert_eq!(shown["partner_code"], "SUP-1");

    let report = run_ok_json(stoir(&daemon).args(["report", "stock"]));
    let rows = report.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["stock_value"], 60_000);

    let dash = run_ok_json(stoir(&daemon).args(["dashboard", "--today", "2026-01-06"]));
    assert_eq!(dash["stats"]["total_sku"], 2);
    assert_eq!(dash["stats"]["stock_in_today"], 15);
    assert_eq!(dash["stats"]["stock_out_today"], 3);
    assert_eq!(dash["chart"].as_array().unwrap().len(), 7);
    assert_eq!(dash["top_items"][0]["code"], "BRG-1");
}

#[test]
fn oversell_is_rejected_without_side_effects() {
    let daemon = start_daemon();
    seed(&daemon);

    run_ok_json(stoir(&daemon).args(["purchase", "--date", "2026-01-06", "--line", "BRG-1:3"]));

    let code = run_err_code(stoir(&daemon).args([
        "sale",
        "--date",
        "2026-01-06",
        "--line",
        "BRG-1:2",
        "--line",
        "BRG-1:2",
    ]));
    assert_eq!(code, "insufficient_stock");
    assert_eq!(stock_of(&daemon, "BRG-1"), 3);

    let sale = run_ok_json(stoir(&daemon).args(["sale", "--date", "2026-01-06", "--line", "BRG-1:3"]));
    assert_eq!(sale["number"], "SL-260106-0001");
    assert_eq!(stock_of(&daemon, "BRG-1"), 0);
}

#[test]
fn master_data_guards() {
    let daemon = start_daemon();
    seed(&daemon);

    let code = run_err_code(stoir(&daemon).args(["category", "add", "Lagi", "--code", "KTG-1"]));
    assert_eq!(code, "already_exists");

    let code = run_err_code(stoir(&daemon).args(["category", "rm", "KTG-1"]));
    assert_eq!(code, "in_use");

    let code = run_err_code(stoir(&daemon).args(["item", "show", "NOPE"]));
    assert_eq!(code, "not_found");

    let generated = run_ok_json(stoir(&daemon).args(["area", "add", "Jakarta"]));
    let area = generated["code"].as_str().unwrap().to_string();
    assert!(area.starts_with("AREA-"), "got {area}");

    let renamed = run_ok_json(stoir(&daemon).args(["area", "rename", &area, "Jakarta Barat"]));
    assert_eq!(renamed["name"], "Jakarta Barat");

    let deleted = run_ok_json(stoir(&daemon).args(["area", "rm", &area]));
    assert_eq!(deleted["status"], "deleted");

    let updated = run_ok_json(stoir(&daemon).args(["item", "update", "BRG-2", "--sell", "16000"]));
    assert_eq!(updated["sale_price"], 16_000);

    let items = run_ok_json(stoir(&daemon).args(["item", "list", "-q", "oli"]));
    assert_eq!(items.as_array().unwrap().len(), 2);
}

#[test]
fn owner_setup_and_login() {
    let daemon = start_bare_daemon();

    let status = run_ok_json(stoir(&daemon).args(["setup-status"]));
    assert_eq!(status["needs_setup"], true);

    let owner = run_ok_json(stoir(&daemon).args([
        "setup-owner",
        OWNER,
        "--password",
        OWNER_PASSWORD,
        "--display-name",
        "Budi",
    ]));
    assert_eq!(owner["role"], "owner");

    let code = run_err_code(stoir(&daemon).args(["setup-owner", "lain", "--password", "rahasia1"]));
    assert_eq!(code, "setup_complete");

    let code = run_err_code(stoir(&daemon).args(["user", "list"]));
    assert_eq!(code, "not_logged_in");

    let code = run_err_code(stoir(&daemon).args(["login", OWNER, "--password", "salah123"]));
    assert_eq!(code, "unauthorized");
    let session = run_ok_json(stoir(&daemon).args(["login", OWNER, "--password", OWNER_PASSWORD]));
    assert_eq!(session["user"]["display_name"], "Budi");
    assert_eq!(session["permissions"].as_array().unwrap().len(), 5);
    assert_eq!(session["token"], saved_token(daemon.dir.path()));

    run_ok_json(stoir(&daemon).args([
        "user",
        "add",
        "sari",
        "--role",
        "staff",
        "--password",
        "gudang123",
    ]));
    let users = run_ok_json(stoir(&daemon).args(["user", "list"]));
    assert_eq!(users.as_array().unwrap().len(), 2);

    let code = run_err_code(stoir(&daemon).args(["user", "rm", OWNER]));
    assert_eq!(code, "invalid_argument");
    run_ok_json(stoir(&daemon).args(["user", "rm", "sari"]));

    run_ok_json(stoir(&daemon).args(["logout"]));
    assert!(!daemon.dir.path().join("session").exists());
    let code = run_err_code(stoir(&daemon).args(["log"]));
    assert_eq!(code, "not_logged_in");

    run_ok_json(stoir(&daemon).args(["login", OWNER, "--password", OWNER_PASSWORD]));
    let log = run_ok_json(stoir(&daemon).args(["log", "-n", "2"]));
    assert_eq!(log[0]["action"], "login");
    assert_eq!(log[1]["action"], "logout");
    assert_eq!(log[1]["actor"], OWNER);
}

#[test]
fn staff_is_limited_to_transactions() {
    let daemon = start_daemon();
    seed(&daemon);
    run_ok_json(stoir(&daemon).args(["purchase", "--date", "2026-01-06", "--line", "BRG-1:5"]));
    run_ok_json(stoir(&daemon).args([
        "user",
        "add",
        "sari",
        "--role",
        "staff",
        "--password",
        "gudang123",
    ]));

    let sari_dir = TempDir::new().unwrap();
    let sari = || stoir_at(&base_url(&daemon), sari_dir.path());
    let session = run_ok_json(sari().args(["login", "sari", "--password", "gudang123"]));
    assert_eq!(
        session["permissions"],
        serde_json::json!(["dashboard", "transactions"])
    );

    for args in [
        &["user", "list"][..],
        &["report", "stock"],
        &["log"],
        &["tx", "list"],
        &["category", "add", "Ban"],
        &["item", "update", "BRG-1", "--sell", "1"],
    ] {
        assert_eq!(run_err_code(sari().args(args)), "forbidden", "{args:?}");
    }

    let items = run_ok_json(sari().args(["item", "list"]));
    assert_eq!(items.as_array().unwrap().len(), 2);
    let sale = run_ok_json(sari().args(["sale", "--date", "2026-01-06", "--line", "BRG-1:1"]));
    assert_eq!(sale["number"], "SL-260106-0001");

    let log = run_ok_json(stoir(&daemon).args(["log", "-n", "1"]));
    assert_eq!(log[0]["action"], "create");
    assert_eq!(log[0]["actor"], "sari");

    let stranger = TempDir::new().unwrap();
    let code = run_err_code(stoir_at(&base_url(&daemon), stranger.path()).args(["item", "list"]));
    assert_eq!(code, "not_logged_in");
    let code = run_err_code(
        stoir_at(&base_url(&daemon), stranger.path())
            .args(["number", "PO"])
            .env("STOIR_TOKEN", "not-a-real-token"),
    );
    assert_eq!(code, "not_logged_in");
}

#[test]
fn parallel_number_requests_get_distinct_sequences() {
    const N: usize = 24;
    let daemon = start_daemon();
    let token = saved_token(daemon.dir.path());
    let url = format!("{}/numbers", base_url(&daemon));

    let handles: Vec<_> = (0..N)
        .map(|_| {
            let url = url.clone();
            let token = token.clone();
            std::thread::spawn(move || {
                let resp = reqwest::blocking::Client::new()
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&serde_json::json!({ "prefix": "PO", "date": "2026-01-06" }))
                    .send()
                    .expect("send number request");
                assert_eq!(resp.status().as_u16(), 201);
                let body: serde_json::Value = resp.json().expect("number body");
                body["number"].as_str().unwrap().to_string()
            })
        })
        .collect();

    let mut seqs: Vec<usize> = handles
        .into_iter()
        .map(|h| {
            let number = h.join().expect("request thread panicked");
            assert!(number.starts_with("PO-260106-"), "got {number}");
            number.rsplit('-').next().unwrap().parse().unwrap()
        })
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=N).collect::<Vec<_>>());

    assert_eq!(number(&daemon, "PO", "2026-01-06"), format!("PO-260106-{:04}", N + 1));
}

#[test]
fn oversized_amounts_are_rejected() {
    let daemon = start_daemon();
    seed(&daemon);

    let code = run_err_code(stoir(&daemon).args([
        "purchase",
        "--date",
        "2026-01-06",
        "--line",
        "BRG-1:4000000000:4000000000",
    ]));
    assert_eq!(code, "invalid_argument");
    assert_eq!(stock_of(&daemon, "BRG-1"), 0);

    let po = run_ok_json(stoir(&daemon).args(["purchase", "--date", "2026-01-06", "--line", "BRG-1:1"]));
    assert_eq!(po["number"], "PO-260106-0001");
    assert_eq!(stock_of(&daemon, "BRG-1"), 1);
}

#[test]
fn daemon_status_reachable() {
    let daemon = start_daemon();
    let output = stoir(&daemon)
        .args(["daemon", "status"])
        .output()
        .expect("run status");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("reachable"), "got {stdout}");
}

#[test]
fn daemon_status_unreachable() {
    let dir = TempDir::new().unwrap();
    let port = portpicker::pick_unused_port().expect("no free port");
    let output = stoir_at(&format!("http://127.0.0.1:{port}/api"), dir.path())
        .args(["daemon", "status"])
        .output()
        .expect("run status");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unreachable"), "got {stderr}");
}

#[test]
fn where_reports_data_dir() {
    let dir = TempDir::new().unwrap();
    let val = run_ok_json(
        stoir_at("http://127.0.0.1:1/api", dir.path())
            .arg("where"),
    );
    assert_eq!(val["data_dir"], dir.path().display().to_string());
    assert_eq!(val["base_url"], "http://127.0.0.1:1/api");
}

#[test]
fn client_finds_daemon_that_fell_back_to_another_port() {
    let dir = TempDir::new().unwrap();
    let held = std::net::TcpListener::bind("127.0.0.1:0").expect("hold a port");
    let taken = held.local_addr().unwrap().port();

    let child = spawn_daemon(taken, dir.path());
    let port_file = dir.path().join("daemon.port");
    let mut bound = None;
    for _ in 0..50 {
        std::thread::sleep(Duration::from_millis(100));
        if let Ok(raw) = std::fs::read_to_string(&port_file)
            && let Ok(port) = raw.trim().parse::<u16>()
        {
            bound = Some(port);
            break;
        }
    }
    let bound = bound.expect("daemon never wrote its port file");
    let daemon = DaemonGuard {
        child,
        port: bound,
        dir,
    };
    assert_ne!(bound, taken);
    assert!(wait_healthy(bound));

    let located = || {
        let mut cmd = Command::new(stoir_bin());
        cmd.env_remove("STOIR_API_BASE_URL");
        cmd.env("STOIR_DATA_DIR", daemon.dir.path());
        cmd
    };
    let output = located()
        .args(["daemon", "status"])
        .output()
        .expect("run status");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "got {stdout}");
    assert!(stdout.contains(&format!(":{bound}/api")), "got {stdout}");

    let val = run_ok_json(located().arg("where"));
    assert_eq!(val["base_url"], format!("http://127.0.0.1:{bound}/api"));
    drop(held);
}
