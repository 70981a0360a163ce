use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stoir::client::{Client, clear_token, load_token, resolve_base_url, save_token};
use stoir::error::StoirError;
use stoir::output::{self, OutputMode};
use stoir::types::{
    CustomerUpdate, ItemFilters, ItemUpdate, LineInput, NewCustomer, NewItem, NewSupplier,
    NewTransaction, NewUser, Role, StockFilters, SupplierUpdate, TransactionFilters,
    TransactionKind, Unit,
};

#[derive(Parser)]
#[command(name = "stoir", about = "Warehouse stock and transaction ledger")]
struct Cli {
    /// Session token; defaults to the one saved by `stoir login`
    #[arg(long, env = "STOIR_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = "STOIR_DATA_DIR", default_value = ".stoir", global = true)]
    data_dir: PathBuf,

    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Daemon {
        #[arg(long, env = "STOIR_API_PORT", default_value_t = 3131)]
        port: u16,
        #[command(subcommand)]
        subcmd: Option<DaemonSubcommand>,
    },
    Where,
    /// Allocate the next transaction number for a prefix
    Number {
        prefix: String,
        /// YYYY-MM-DD; defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    Category {
        #[command(subcommand)]
        subcmd: NamedSubcommand,
    },
    Area {
        #[command(subcommand)]
        subcmd: NamedSubcommand,
    },
    Supplier {
        #[command(subcommand)]
        subcmd: SupplierSubcommand,
    },
    Customer {
        #[command(subcommand)]
        subcmd: CustomerSubcommand,
    },
    Item {
        #[command(subcommand)]
        subcmd: ItemSubcommand,
    },
    Purchase(TxnArgs),
    Sale(TxnArgs),
    StockCount(TxnArgs),
    Claim(TxnArgs),
    Tx {
        #[command(subcommand)]
        subcmd: TxSubcommand,
    },
    Report {
        #[command(subcommand)]
        subcmd: ReportSubcommand,
    },
    Dashboard {
        /// Reference date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        today: Option<String>,
    },
    Log {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    User {
        #[command(subcommand)]
        subcmd: UserSubcommand,
    },
    SetupStatus,
    SetupOwner {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    Logout,
}

#[derive(Subcommand)]
enum DaemonSubcommand {
    Status,
}

#[derive(Subcommand)]
enum NamedSubcommand {
    Add {
        name: String,
        #[arg(long)]
        code: Option<String>,
    },
    List,
    Show {
        code: String,
    },
    Rename {
        code: String,
        name: String,
    },
    Rm {
        code: String,
    },
}

#[derive(Subcommand)]
enum SupplierSubcommand {
    Add {
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        email: Option<String>,
    },
    List,
    Show {
        code: String,
    },
    Update {
        code: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Empty string clears it
        #[arg(long)]
        email: Option<String>,
    },
    Rm {
        code: String,
    },
}

#[derive(Subcommand)]
enum CustomerSubcommand {
    Add {
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        contact: String,
        #[arg(long)]
        area: Option<String>,
    },
    List {
        #[arg(long)]
        area: Option<String>,
    },
    Show {
        code: String,
    },
    Update {
        code: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        contact: Option<String>,
        /// Empty string clears it
        #[arg(long)]
        area: Option<String>,
    },
    Rm {
        code: String,
    },
}

#[derive(Subcommand)]
enum ItemSubcommand {
    Add {
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        category: String,
        #[arg(long, default_value = "pcs")]
        unit: Unit,
        #[arg(long, default_value_t = 0)]
        min_stock: i64,
        #[arg(long)]
        buy: i64,
        #[arg(long)]
        sell: i64,
    },
    List {
        #[arg(short = 'q', long)]
        query: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    Show {
        code: String,
    },
    Update {
        code: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        unit: Option<Unit>,
        #[arg(long)]
        min_stock: Option<i64>,
        #[arg(long)]
        buy: Option<i64>,
        #[arg(long)]
        sell: Option<i64>,
    },
    Rm {
        code: String,
    },
}

#[derive(Args)]
struct TxnArgs {
    /// CODE:QTY[:PRICE[:DISCOUNT]]
    #[arg(long = "line", required = true)]
    lines: Vec<LineInput>,
    /// YYYY-MM-DD; defaults to today
    #[arg(long)]
    date: Option<String>,
    /// Supplier for purchases, customer for sales and claims
    #[arg(long)]
    partner: Option<String>,
    #[arg(long)]
    note: Option<String>,
}

#[derive(Subcommand)]
enum TxSubcommand {
    List {
        #[arg(long)]
        kind: Option<TransactionKind>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    Show {
        number: String,
    },
}

#[derive(Subcommand)]
enum ReportSubcommand {
    Stock {
        #[arg(long, default_value_t = false)]
        low: bool,
        #[arg(long)]
        category: Option<String>,
    },
}

#[derive(Subcommand)]
enum UserSubcommand {
    Add {
        username: String,
        #[arg(long, default_value = "staff")]
        role: Role,
        #[arg(long)]
        password: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    List,
    Rm {
        username: String,
    },
}

fn resolve_token(flag: Option<String>, data_dir: &Path) -> Option<String> {
    match flag {
        Some(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
        _ => load_token(data_dir),
    }
}

fn absolute(dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(dir),
        Err(_) => dir.to_path_buf(),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(err: StoirError, mode: OutputMode) -> ! {
    output::print_error(&err, mode);
    process::exit(1);
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let data_dir = absolute(&cli.data_dir);
    let token = resolve_token(cli.token, &data_dir);

    match cli.command {
        Commands::Daemon { port, subcmd } => match subcmd {
            Some(DaemonSubcommand::Status) => {
                let client = Client::new(resolve_base_url(&data_dir), None);
                match client.check_reachable() {
                    Ok(()) => {
                        println!("daemon reachable at {}", client.base_url());
                        process::exit(0);
                    }
                    Err(e) => {
                        eprintln!("daemon unreachable: {e}");
                        process::exit(1);
                    }
                }
            }
            None => {
                let rt = match tokio::runtime::Runtime::new() {
                    Ok(rt) => rt,
                    Err(e) => fail(
                        StoirError::Internal(format!("failed to create tokio runtime: {e}")),
                        mode,
                    ),
                };
                if let Err(e) = rt.block_on(stoir::daemon::start(port, data_dir)) {
                    fail(e, mode);
                }
            }
        },

        Commands::Where => {
            let base_url = resolve_base_url(&data_dir);
            match mode {
                OutputMode::Json => output::print_json(&serde_json::json!({
                    "data_dir": data_dir.display().to_string(),
                    "base_url": base_url,
                })),
                OutputMode::Human => println!("{}", data_dir.display()),
            }
        }

        command => {
            let client = Client::new(resolve_base_url(&data_dir), token);
            if let Err(e) = run(command, &client, &data_dir, mode) {
                fail(e, mode);
            }
        }
    }
}

fn run(
    command: Commands,
    client: &Client,
    data_dir: &Path,
    mode: OutputMode,
) -> Result<(), StoirError> {
    match command {
        Commands::Daemon { .. } | Commands::Where => {}

        Commands::Number { prefix, date } => {
            let number = client.allocate_number(&prefix, date.as_deref())?;
            output::print_number(&number, mode);
        }

        Commands::Category { subcmd } => run_named(client, "categories", subcmd, mode)?,
        Commands::Area { subcmd } => run_named(client, "areas", subcmd, mode)?,

        Commands::Supplier { subcmd } => match subcmd {
            SupplierSubcommand::Add {
                code,
                name,
                address,
                phone,
                email,
            } => {
                let new = NewSupplier {
                    code,
                    name,
                    address,
                    phone,
                    email,
                };
                output::print_supplier(&client.create_supplier(&new)?, mode);
            }
            SupplierSubcommand::List => {
                output::print_supplier_list(&client.list_suppliers()?, mode);
            }
            SupplierSubcommand::Show { code } => {
                output::print_supplier(&client.get_supplier(&code)?, mode);
            }
            SupplierSubcommand::Update {
                code,
                name,
                address,
                phone,
                email,
            } => {
                let fields = SupplierUpdate {
                    name,
                    address,
                    phone,
                    email,
                };
                output::print_supplier(&client.update_supplier(&code, &fields)?, mode);
            }
            SupplierSubcommand::Rm { code } => {
                client.delete_supplier(&code)?;
                output::print_deleted(mode);
            }
        },

        Commands::Customer { subcmd } => match subcmd {
            CustomerSubcommand::Add {
                code,
                name,
                address,
                phone,
                contact,
                area,
            } => {
                let new = NewCustomer {
                    code,
                    name,
                    address,
                    phone,
                    contact_person: contact,
                    area_code: area,
                };
                output::print_customer(&client.create_customer(&new)?, mode);
            }
            CustomerSubcommand::List { area } => {
                output::print_customer_list(&client.list_customers(area.as_deref())?, mode);
            }
            CustomerSubcommand::Show { code } => {
                output::print_customer(&client.get_customer(&code)?, mode);
            }
            CustomerSubcommand::Update {
                code,
                name,
                address,
                phone,
                contact,
                area,
            } => {
                let fields = CustomerUpdate {
                    name,
                    address,
                    phone,
                    contact_person: contact,
                    area_code: area,
                };
                output::print_customer(&client.update_customer(&code, &fields)?, mode);
            }
            CustomerSubcommand::Rm { code } => {
                client.delete_customer(&code)?;
                output::print_deleted(mode);
            }
        },

        Commands::Item { subcmd } => match subcmd {
            ItemSubcommand::Add {
                code,
                name,
                category,
                unit,
                min_stock,
                buy,
                sell,
            } => {
                let new = NewItem {
                    code,
                    name,
                    category_code: category,
                    unit,
                    min_stock,
                    purchase_price: buy,
                    sale_price: sell,
                };
                output::print_item(&client.create_item(&new)?, mode);
            }
            ItemSubcommand::List { query, category } => {
                let filters = ItemFilters { q: query, category };
                output::print_item_list(&client.list_items(&filters)?, mode);
            }
            ItemSubcommand::Show { code } => {
                output::print_item(&client.get_item(&code)?, mode);
            }
            ItemSubcommand::Update {
                code,
                name,
                category,
                unit,
                min_stock,
                buy,
                sell,
            } => {
                let fields = ItemUpdate {
                    name,
                    category_code: category,
                    unit,
                    min_stock,
                    purchase_price: buy,
                    sale_price: sell,
                };
                output::print_item(&client.update_item(&code, &fields)?, mode);
            }
            ItemSubcommand::Rm { code } => {
                client.delete_item(&code)?;
                output::print_deleted(mode);
            }
        },

        Commands::Purchase(args) => record(client, TransactionKind::Purchase, args, mode)?,
        Commands::Sale(args) => record(client, TransactionKind::Sale, args, mode)?,
        Commands::StockCount(args) => record(client, TransactionKind::StockCount, args, mode)?,
        Commands::Claim(args) => record(client, TransactionKind::Claim, args, mode)?,

        Commands::Tx { subcmd } => match subcmd {
            TxSubcommand::List { kind, from, to } => {
                let filters = TransactionFilters { kind, from, to };
                output::print_transaction_list(&client.list_transactions(&filters)?, mode);
            }
            TxSubcommand::Show { number } => {
                output::print_transaction(&client.get_transaction(&number)?, mode);
            }
        },

        Commands::Report { subcmd } => match subcmd {
            ReportSubcommand::Stock { low, category } => {
                let filters = StockFilters {
                    low_only: low,
                    category,
                };
                output::print_stock_report(&client.stock_report(&filters)?, mode);
            }
        },

        Commands::Dashboard { today } => {
            output::print_dashboard(&client.dashboard_summary(today.as_deref())?, mode);
        }

        Commands::Log { limit } => {
            output::print_activity(&client.activity(limit)?, mode);
        }

        Commands::User { subcmd } => match subcmd {
            UserSubcommand::Add {
                username,
                role,
                password,
                display_name,
            } => {
                let new = NewUser {
                    username,
                    display_name,
                    role,
                    password,
                };
                output::print_user(&client.create_user(&new)?, mode);
            }
            UserSubcommand::List => {
                output::print_user_list(&client.list_users()?, mode);
            }
            UserSubcommand::Rm { username } => {
                client.delete_user(&username)?;
                output::print_deleted(mode);
            }
        },

        Commands::SetupStatus => {
            output::print_bootstrap(&client.bootstrap_status()?, mode);
        }

        Commands::SetupOwner {
            username,
            password,
            display_name,
        } => {
            let user = client.setup_owner(&username, &password, display_name.as_deref())?;
            output::print_user(&user, mode);
        }

        Commands::Login { username, password } => {
            let session = client.login(&username, &password)?;
            save_token(data_dir, &session.token)?;
            output::print_session(&session, mode);
        }

        Commands::Logout => {
            // A token the daemon no longer knows is still dropped locally.
            let result = client.logout();
            clear_token(data_dir)?;
            result?;
            output::print_ok("logged out", mode);
        }
    }
    Ok(())
}

fn run_named(
    client: &Client,
    collection: &str,
    subcmd: NamedSubcommand,
    mode: OutputMode,
) -> Result<(), StoirError> {
    match subcmd {
        NamedSubcommand::Add { name, code } => {
            output::print_named(&client.create_named(collection, code.as_deref(), &name)?, mode);
        }
        NamedSubcommand::List => {
            output::print_named_list(&client.list_named(collection)?, mode);
        }
        NamedSubcommand::Show { code } => {
            output::print_named(&client.get_named(collection, &code)?, mode);
        }
        NamedSubcommand::Rename { code, name } => {
            output::print_named(&client.rename_named(collection, &code, &name)?, mode);
        }
        NamedSubcommand::Rm { code } => {
            client.delete_named(collection, &code)?;
            output::print_deleted(mode);
        }
    }
    Ok(())
}

fn record(
    client: &Client,
    kind: TransactionKind,
    args: TxnArgs,
    mode: OutputMode,
) -> Result<(), StoirError> {
    let new = NewTransaction {
        kind,
        date: args.date,
        partner_code: args.partner,
        note: args.note,
        lines: args.lines,
    };
    output::print_transaction(&client.create_transaction(&new)?, mode);
    Ok(())
}
