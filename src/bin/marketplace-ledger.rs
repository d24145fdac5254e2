//! CLI binary for operating a local merchant incentive ledger.

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};
use marketplace_ledger::config::LedgerConfig;
use marketplace_ledger::error::LedgerError;
use marketplace_ledger::ledger::{
    Adjustment, AuditReport, DepositFilter, LedgerBlocking, TransactionFilter, WalletSummary,
};
use marketplace_ledger::models::{
    Actor, AdjustmentDirection, Agent, AgentId, AgentStatus, BusinessProfile, CouponCode,
    DateTime, Decimal, Deposit, DepositStatus, DiscountType, Merchant, MerchantId, NaiveDate,
    NewAgent, NewCoupon, NewMerchant, RedemptionId, RedemptionRequest, Transaction,
    TransactionKind, Utc,
};
use marketplace_ledger::storage::{BlockingStorage, FileStorage};
use owo_colors::OwoColorize;

/// Environment variable overriding the storage directory.
const DATA_DIR_ENV: &str = "LEDGER_DATA_DIR";

/// Marketplace ledger CLI: agents, merchant wallets, deposits and coupons.
#[derive(Debug, Parser)]
#[command(name = "marketplace-ledger", version, about)]
struct Cli {
    /// Override the storage directory (default: XDG data dir).
    #[arg(long, global = true, value_name = "DIR", env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,
    /// Acting party: `admin`, `agent:<ID>` or `merchant:<ID>`.
    #[arg(
        long = "as",
        global = true,
        value_name = "ACTOR",
        default_value = "admin",
        value_parser = parse_actor
    )]
    actor: Actor,
    /// Run the command as of this instant (RFC 3339 or YYYY-MM-DD)
    /// instead of the current time.
    #[arg(long, global = true, value_name = "TIME", value_parser = parse_time)]
    at: Option<DateTime<Utc>>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Manage field agents.
    #[command(subcommand)]
    Agent(AgentCommand),
    /// Onboard and review merchants.
    #[command(subcommand)]
    Merchant(MerchantCommand),
    /// Collect and browse cash deposits.
    #[command(subcommand)]
    Deposit(DepositCommand),
    /// Release every locked deposit whose maturity date has passed.
    Release {
        /// Only release deposits of this merchant.
        #[arg(long)]
        merchant: Option<String>,
    },
    /// Issue, redeem and manage coupons.
    #[command(subcommand)]
    Coupon(CouponCommand),
    /// Apply a manual credit or debit to a wallet (admin).
    Adjust(AdjustArgs),
    /// Record a payout of available balance (admin).
    Withdraw {
        /// Merchant ID.
        merchant: String,
        /// Amount to pay out.
        #[arg(value_parser = parse_amount)]
        amount: Decimal,
        /// Payout reference, e.g. a bank transfer ID.
        #[arg(long)]
        reference: String,
    },
    /// List wallet transactions, optionally filtered.
    Transactions(TransactionArgs),
    /// Check wallets against their transactions, deposits and coupons.
    Audit {
        /// Only audit this merchant.
        #[arg(long)]
        merchant: Option<String>,
    },
}

/// `agent` subcommands.
#[derive(Debug, Subcommand)]
enum AgentCommand {
    /// Register a new agent (admin).
    Add {
        /// Full name.
        #[arg(long)]
        name: String,
        /// Contact phone number.
        #[arg(long)]
        phone: String,
        /// Contact email address.
        #[arg(long)]
        email: String,
        /// Operating region.
        #[arg(long)]
        region: Option<String>,
    },
    /// List all agents.
    List,
    /// Suspend an agent (admin).
    Suspend {
        /// Agent ID.
        id: String,
    },
    /// Reactivate a suspended agent (admin).
    Activate {
        /// Agent ID.
        id: String,
    },
}

/// `merchant` subcommands.
#[derive(Debug, Subcommand)]
enum MerchantCommand {
    /// Register a merchant under the acting agent.
    Register(RegisterArgs),
    /// Approve a pending merchant (admin).
    Approve {
        /// Merchant ID.
        id: String,
    },
    /// Reject a pending merchant (admin).
    Reject {
        /// Merchant ID.
        id: String,
        /// Why the application was rejected.
        #[arg(long)]
        reason: String,
    },
    /// List merchants.
    List {
        /// Only merchants onboarded by this agent.
        #[arg(long)]
        agent: Option<String>,
    },
    /// Show a merchant's wallet summary.
    Show {
        /// Merchant ID.
        id: String,
    },
}

/// Arguments for `merchant register`.
#[derive(Debug, Args)]
struct RegisterArgs {
    /// Trading name of the business.
    #[arg(long)]
    business_name: String,
    /// Name of the owner.
    #[arg(long)]
    owner_name: String,
    /// Contact phone number.
    #[arg(long)]
    phone: String,
    /// Contact email address.
    #[arg(long)]
    email: String,
    /// Street address.
    #[arg(long, default_value = "")]
    address: String,
    /// Business category.
    #[arg(long, default_value = "general")]
    category: String,
}

/// `deposit` subcommands.
#[derive(Debug, Subcommand)]
enum DepositCommand {
    /// Record cash collected from a merchant (owning agent).
    Collect {
        /// Merchant ID.
        merchant: String,
        /// Amount collected.
        #[arg(value_parser = parse_amount)]
        amount: Decimal,
    },
    /// List deposits.
    List {
        /// Filter by merchant ID.
        #[arg(long)]
        merchant: Option<String>,
        /// Filter by collecting agent ID.
        #[arg(long)]
        agent: Option<String>,
        /// Filter by maturity state.
        #[arg(long, value_enum)]
        status: Option<DepositState>,
    },
    /// Look up a deposit by receipt number.
    Find {
        /// Receipt number (case-insensitive).
        receipt: String,
    },
}

/// `coupon` subcommands.
#[derive(Debug, Subcommand)]
enum CouponCommand {
    /// Issue a coupon for a merchant.
    Create(CouponArgs),
    /// List a merchant's coupons.
    List {
        /// Merchant ID.
        merchant: String,
    },
    /// Preview the discount a coupon grants on an order.
    Quote {
        /// Coupon code.
        code: String,
        /// Order amount.
        #[arg(value_parser = parse_amount)]
        order: Decimal,
    },
    /// Redeem a coupon at checkout.
    Redeem {
        /// Coupon code.
        code: String,
        /// Customer reference.
        #[arg(long)]
        customer: String,
        /// Order amount.
        #[arg(long, value_parser = parse_amount)]
        order: Decimal,
    },
    /// Deactivate a coupon.
    Deactivate {
        /// Coupon code.
        code: String,
    },
    /// Reverse an applied redemption (admin).
    Reverse {
        /// Coupon code.
        code: String,
        /// Redemption ID.
        redemption: String,
        /// Why the redemption was reversed.
        #[arg(long)]
        reason: String,
    },
}

/// Arguments for `coupon create`.
#[derive(Debug, Args)]
struct CouponArgs {
    /// Issuing merchant ID.
    merchant: String,
    /// Code customers enter (generated if omitted).
    #[arg(long)]
    code: Option<String>,
    /// Free-text description.
    #[arg(long)]
    description: Option<String>,
    /// How the discount value is applied.
    #[arg(long, value_enum, default_value = "percentage")]
    kind: DiscountKind,
    /// Percentage (0-100) or fixed amount.
    #[arg(long, value_parser = parse_amount)]
    value: Decimal,
    /// Smallest order the coupon applies to.
    #[arg(long, value_parser = parse_amount)]
    min_order: Option<Decimal>,
    /// Cap on a percentage discount.
    #[arg(long, value_parser = parse_amount)]
    max_discount: Option<Decimal>,
    /// Maximum number of redemptions.
    #[arg(long, default_value_t = 1)]
    limit: u32,
    /// First valid instant (default: now).
    #[arg(long, value_parser = parse_time)]
    from: Option<DateTime<Utc>>,
    /// Last valid instant.
    #[arg(long, value_parser = parse_time)]
    until: DateTime<Utc>,
}

/// Arguments for the `adjust` subcommand.
#[derive(Debug, Args)]
struct AdjustArgs {
    /// Merchant ID.
    merchant: String,
    /// Credit or debit.
    #[arg(value_enum)]
    direction: Direction,
    /// Amount to move.
    #[arg(value_parser = parse_amount)]
    amount: Decimal,
    /// Why the correction was made.
    #[arg(long)]
    reason: String,
}

/// Arguments for the `transactions` subcommand.
#[derive(Debug, Args)]
struct TransactionArgs {
    /// Filter by merchant ID.
    #[arg(long)]
    merchant: Option<String>,
    /// Filter by kind (deposit, release, redemption, reversal,
    /// adjustmentCredit, adjustmentDebit, withdrawal).
    #[arg(long, value_parser = parse_kind)]
    kind: Option<TransactionKind>,
    /// Start date (inclusive, YYYY-MM-DD). Requires --to.
    #[arg(long, requires = "to", value_parser = parse_date)]
    from: Option<NaiveDate>,
    /// End date (inclusive, YYYY-MM-DD). Requires --from.
    #[arg(long, requires = "from", value_parser = parse_date)]
    to: Option<NaiveDate>,
}

/// Discount kinds accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DiscountKind {
    /// Percentage of the order amount.
    Percentage,
    /// Fixed amount.
    Fixed,
}

impl From<DiscountKind> for DiscountType {
    fn from(kind: DiscountKind) -> Self {
        match kind {
            DiscountKind::Percentage => Self::Percentage,
            DiscountKind::Fixed => Self::Fixed,
        }
    }
}

/// Adjustment directions accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    /// Add to the balance.
    Credit,
    /// Remove from the available balance.
    Debit,
}

impl From<Direction> for AdjustmentDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Credit => Self::Credit,
            Direction::Debit => Self::Debit,
        }
    }
}

/// Deposit states accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DepositState {
    /// Still maturing.
    Locked,
    /// Released to the available balance.
    Matured,
}

impl From<DepositState> for DepositStatus {
    fn from(state: DepositState) -> Self {
        match state {
            DepositState::Locked => Self::Locked,
            DepositState::Matured => Self::Matured,
        }
    }
}

/// Who runs a command, and as of when.
#[derive(Debug)]
struct Context {
    /// Acting party.
    actor: Actor,
    /// Evaluation instant.
    now: DateTime<Utc>,
}

/// Parses an actor given as `admin`, `agent:<ID>` or `merchant:<ID>`.
fn parse_actor(s: &str) -> Result<Actor, String> {
    let (role, id) = s.split_once(':').unwrap_or((s, ""));
    let id = id.trim();
    match (role.trim().to_ascii_lowercase().as_str(), id.is_empty()) {
        ("admin", true) => Ok(Actor::Admin),
        ("agent", false) => Ok(Actor::Agent(AgentId::from(id))),
        ("merchant", false) => Ok(Actor::Merchant(MerchantId::from(id))),
        _ => Err(format!(
            "expected `admin`, `agent:<ID>` or `merchant:<ID>`, got {s:?}"
        )),
    }
}

/// Parses a date string in `YYYY-MM-DD` format for clap.
fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|err| format!("{err}"))
}

/// Parses an RFC 3339 instant, or a date meaning midnight UTC.
fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        return Ok(instant.with_timezone(&Utc));
    }
    parse_date(s)
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|err| format!("expected RFC 3339 time or YYYY-MM-DD date, got {s:?}: {err}"))
}

/// Parses a money amount.
fn parse_amount(s: &str) -> Result<Decimal, String> {
    s.trim()
        .parse::<Decimal>()
        .map_err(|err| format!("invalid amount {s:?}: {err}"))
}

/// Parses a transaction kind.
fn parse_kind(s: &str) -> Result<TransactionKind, String> {
    s.parse()
}

/// Prints a failed ledger operation and returns the failure exit code.
fn report_error(context: &str, err: &LedgerError) -> io::Result<ExitCode> {
    let mut out = io::stderr().lock();
    writeln!(out, "{} {context}: {err}", "error:".red().bold())?;
    if matches!(*err, LedgerError::Conflict { .. }) {
        writeln!(
            out,
            "  {} the ledger changed concurrently; run the command again",
            "hint:".cyan()
        )?;
    }
    Ok(ExitCode::FAILURE)
}

/// Runs the CLI, returning an appropriate exit code.
fn run() -> io::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let _dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(err) => return report_error("invalid configuration", &err),
    };

    let storage = match create_storage(cli.data_dir) {
        Ok(storage) => storage,
        Err(err) => return report_error("failed to initialize storage", &err),
    };

    let ledger = match LedgerBlocking::builder()
        .storage(storage)
        .config(config)
        .build()
    {
        Ok(ledger) => ledger,
        Err(err) => return report_error("failed to build ledger", &err),
    };

    let ctx = Context {
        actor: cli.actor,
        now: cli.at.unwrap_or_else(Utc::now),
    };
    dispatch(&ledger, &ctx, cli.command)
}

/// Creates the storage backend, using `data_dir` if provided or the
/// default XDG data directory otherwise.
fn create_storage(data_dir: Option<PathBuf>) -> marketplace_ledger::error::Result<FileStorage> {
    let dir = match data_dir {
        Some(dir) => dir,
        None => FileStorage::default_dir()?,
    };
    FileStorage::new(dir)
}

/// Dispatches to the appropriate subcommand handler.
fn dispatch<S: BlockingStorage>(
    ledger: &LedgerBlocking<S>,
    ctx: &Context,
    command: Command,
) -> io::Result<ExitCode> {
    match command {
        Command::Agent(cmd) => cmd_agent(ledger, ctx, cmd),
        Command::Merchant(cmd) => cmd_merchant(ledger, ctx, cmd),
        Command::Deposit(cmd) => cmd_deposit(ledger, ctx, cmd),
        Command::Release { merchant } => cmd_release(ledger, ctx, merchant),
        Command::Coupon(cmd) => cmd_coupon(ledger, ctx, cmd),
        Command::Adjust(args) => cmd_adjust(ledger, ctx, args),
        Command::Withdraw {
            merchant,
            amount,
            reference,
        } => cmd_withdraw(ledger, ctx, &merchant, amount, &reference),
        Command::Transactions(args) => cmd_transactions(ledger, &args),
        Command::Audit { merchant } => cmd_audit(ledger, merchant),
    }
}

/// Executes the `agent` subcommands.
fn cmd_agent<S: BlockingStorage>(
    ledger: &LedgerBlocking<S>,
    ctx: &Context,
    command: AgentCommand,
) -> io::Result<ExitCode> {
    let (context, result) = match command {
        AgentCommand::Add {
            name,
            phone,
            email,
            region,
        } => {
            let new = NewAgent {
                name,
                phone,
                email,
                region,
            };
            (
                "failed to register agent",
                ledger
                    .register_agent(&ctx.actor, new, ctx.now)
                    .map(|agent| ("Agent registered", vec![agent])),
            )
        }
        AgentCommand::List => (
            "failed to read agents",
            ledger.agents().map(|agents| ("Agents", agents)),
        ),
        AgentCommand::Suspend { id } => (
            "failed to suspend agent",
            ledger
                .set_agent_status(&ctx.actor, &AgentId::from(id), AgentStatus::Suspended, ctx.now)
                .map(|agent| ("Agent suspended", vec![agent])),
        ),
        AgentCommand::Activate { id } => (
            "failed to activate agent",
            ledger
                .set_agent_status(&ctx.actor, &AgentId::from(id), AgentStatus::Active, ctx.now)
                .map(|agent| ("Agent activated", vec![agent])),
        ),
    };
    match result {
        Ok((title, agents)) => {
            print_agents_table(title, &agents)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => report_error(context, &err),
    }
}

/// Executes the `merchant` subcommands.
fn cmd_merchant<S: BlockingStorage>(
    ledger: &LedgerBlocking<S>,
    ctx: &Context,
    command: MerchantCommand,
) -> io::Result<ExitCode> {
    let (context, result) = match command {
        MerchantCommand::Register(args) => {
            let new = NewMerchant {
                profile: BusinessProfile {
                    business_name: args.business_name,
                    owner_name: args.owner_name,
                    phone: args.phone,
                    email: args.email,
                    address: args.address,
                    category: args.category,
                },
            };
            (
                "failed to register merchant",
                ledger
                    .register_merchant(&ctx.actor, new, ctx.now)
                    .map(|merchant| ("Merchant registered", vec![merchant])),
            )
        }
        MerchantCommand::Approve { id } => (
            "failed to approve merchant",
            ledger
                .approve_merchant(&ctx.actor, &MerchantId::from(id), ctx.now)
                .map(|merchant| ("Merchant approved", vec![merchant])),
        ),
        MerchantCommand::Reject { id, reason } => (
            "failed to reject merchant",
            ledger
                .reject_merchant(&ctx.actor, &MerchantId::from(id), &reason, ctx.now)
                .map(|merchant| ("Merchant rejected", vec![merchant])),
        ),
        MerchantCommand::List { agent } => (
            "failed to read merchants",
            match agent {
                Some(id) => ledger.merchants_by_agent(&AgentId::from(id)),
                None => ledger.merchants(),
            }
            .map(|merchants| ("Merchants", merchants)),
        ),
        MerchantCommand::Show { id } => {
            return match ledger.wallet_summary(&MerchantId::from(id)) {
                Ok(summary) => {
                    print_wallet_summary(&summary)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => report_error("failed to read wallet", &err),
            };
        }
    };
    match result {
        Ok((title, merchants)) => {
            print_merchants_table(title, &merchants)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => report_error(context, &err),
    }
}

/// Executes the `deposit` subcommands.
fn cmd_deposit<S: BlockingStorage>(
    ledger: &LedgerBlocking<S>,
    ctx: &Context,
    command: DepositCommand,
) -> io::Result<ExitCode> {
    match command {
        DepositCommand::Collect { merchant, amount } => {
            match ledger.collect_deposit(&ctx.actor, &MerchantId::from(merchant), amount, ctx.now)
            {
                Ok(receipt) => {
                    let mut out = io::stdout().lock();
                    writeln!(
                        out,
                        "{} {}",
                        "Deposit collected".green().bold(),
                        receipt.deposit.receipt_number.bold()
                    )?;
                    writeln!(out, "  Amount:    {:.2}", receipt.deposit.amount)?;
                    writeln!(out, "  Matures:   {}", receipt.deposit.maturity_date)?;
                    writeln!(out, "  Balance:   {:.2}", receipt.wallet.balance)?;
                    writeln!(out, "  Available: {:.2}", receipt.wallet.available())?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => report_error("failed to collect deposit", &err),
            }
        }
        DepositCommand::List {
            merchant,
            agent,
            status,
        } => {
            let mut filter = DepositFilter::new();
            if let Some(id) = merchant {
                filter = filter.merchant(MerchantId::from(id));
            }
            if let Some(id) = agent {
                filter = filter.agent(AgentId::from(id));
            }
            if let Some(state) = status {
                filter = filter.status(state.into());
            }
            match ledger.deposits(&filter) {
                Ok(deposits) => {
                    print_deposits_table(&deposits)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => report_error("failed to read deposits", &err),
            }
        }
        DepositCommand::Find { receipt } => match ledger.find_deposit_by_receipt(&receipt) {
            Ok(Some(deposit)) => {
                print_deposits_table(core::slice::from_ref(&deposit))?;
                Ok(ExitCode::SUCCESS)
            }
            Ok(None) => {
                writeln!(
                    io::stderr().lock(),
                    "{} deposit not found: {receipt}",
                    "error:".red().bold()
                )?;
                Ok(ExitCode::FAILURE)
            }
            Err(err) => report_error("failed to read deposits", &err),
        },
    }
}

/// Executes the `release` subcommand.
fn cmd_release<S: BlockingStorage>(
    ledger: &LedgerBlocking<S>,
    ctx: &Context,
    merchant: Option<String>,
) -> io::Result<ExitCode> {
    let result = match merchant {
        Some(id) => ledger.release_matured_for(&MerchantId::from(id), ctx.now),
        None => ledger.release_matured(ctx.now),
    };
    match result {
        Ok(released) => {
            print_transactions_table("Released deposits", &released)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => report_error("failed to release deposits", &err),
    }
}

/// Executes the `coupon` subcommands.
fn cmd_coupon<S: BlockingStorage>(
    ledger: &LedgerBlocking<S>,
    ctx: &Context,
    command: CouponCommand,
) -> io::Result<ExitCode> {
    match command {
        CouponCommand::Create(args) => {
            let new = NewCoupon {
                merchant: MerchantId::from(args.merchant),
                code: args.code,
                description: args.description,
                discount_type: args.kind.into(),
                discount_value: args.value,
                min_order_amount: args.min_order,
                max_discount: args.max_discount,
                usage_limit: args.limit,
                valid_from: args.from.unwrap_or(ctx.now),
                valid_until: args.until,
            };
            match ledger.create_coupon(&ctx.actor, new, ctx.now) {
                Ok(coupon) => {
                    print_coupons_table("Coupon created", core::slice::from_ref(&coupon))?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => report_error("failed to create coupon", &err),
            }
        }
        CouponCommand::List { merchant } => match ledger.coupons_for(&MerchantId::from(merchant)) {
            Ok(coupons) => {
                print_coupons_table("Coupons", &coupons)?;
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => report_error("failed to read coupons", &err),
        },
        CouponCommand::Quote { code, order } => {
            match ledger.quote_coupon(&code, order, ctx.now) {
                Ok(discount) => {
                    writeln!(
                        io::stdout().lock(),
                        "{} {:.2} off an order of {order:.2}",
                        "Discount:".green().bold(),
                        discount
                    )?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => report_error("coupon cannot be applied", &err),
            }
        }
        CouponCommand::Redeem {
            code,
            customer,
            order,
        } => {
            let request = RedemptionRequest {
                customer,
                order_amount: order,
            };
            match ledger.redeem_coupon(&ctx.actor, &code, request, ctx.now) {
                Ok(receipt) => {
                    let mut out = io::stdout().lock();
                    writeln!(
                        out,
                        "{} {}",
                        "Coupon redeemed".green().bold(),
                        receipt.coupon.code.bold()
                    )?;
                    writeln!(out, "  Redemption: {}", receipt.redemption.id)?;
                    writeln!(out, "  Discount:   {:.2}", receipt.redemption.discount_amount)?;
                    writeln!(out, "  Uses left:  {}", receipt.coupon.remaining_uses())?;
                    writeln!(out, "  Balance:    {:.2}", receipt.wallet.balance)?;
                    if !receipt.released.is_empty() {
                        let note = format!(
                            "({} matured deposit(s) released first)",
                            receipt.released.len()
                        );
                        writeln!(out, "  {}", note.dimmed())?;
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => report_error("failed to redeem coupon", &err),
            }
        }
        CouponCommand::Deactivate { code } => {
            match ledger.deactivate_coupon(&ctx.actor, &code, ctx.now) {
                Ok(coupon) => {
                    print_coupons_table("Coupon deactivated", core::slice::from_ref(&coupon))?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => report_error("failed to deactivate coupon", &err),
            }
        }
        CouponCommand::Reverse {
            code,
            redemption,
            reason,
        } => {
            let id = RedemptionId::from(redemption);
            match ledger.reverse_redemption(&ctx.actor, &code, &id, &reason, ctx.now) {
                Ok(reversal) => {
                    print_transactions_table(
                        "Redemption reversed",
                        core::slice::from_ref(&reversal),
                    )?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => report_error("failed to reverse redemption", &err),
            }
        }
    }
}

/// Executes the `adjust` subcommand.
fn cmd_adjust<S: BlockingStorage>(
    ledger: &LedgerBlocking<S>,
    ctx: &Context,
    args: AdjustArgs,
) -> io::Result<ExitCode> {
    let adjustment = Adjustment {
        direction: args.direction.into(),
        amount: args.amount,
        reason: args.reason,
    };
    match ledger.adjust_balance(&ctx.actor, &MerchantId::from(args.merchant), adjustment, ctx.now) {
        Ok(tx) => {
            print_transactions_table("Balance adjusted", core::slice::from_ref(&tx))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => report_error("failed to adjust balance", &err),
    }
}

/// Executes the `withdraw` subcommand.
fn cmd_withdraw<S: BlockingStorage>(
    ledger: &LedgerBlocking<S>,
    ctx: &Context,
    merchant: &str,
    amount: Decimal,
    reference: &str,
) -> io::Result<ExitCode> {
    let merchant = MerchantId::from(merchant);
    match ledger.record_withdrawal(&ctx.actor, &merchant, amount, reference, ctx.now) {
        Ok(tx) => {
            print_transactions_table("Withdrawal recorded", core::slice::from_ref(&tx))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => report_error("failed to record withdrawal", &err),
    }
}

/// Builds a [`TransactionFilter`] from CLI arguments.
fn build_transaction_filter(args: &TransactionArgs) -> TransactionFilter {
    let mut filter = TransactionFilter::new();
    if let Some(id) = args.merchant.as_deref() {
        filter = filter.merchant(MerchantId::from(id));
    }
    if let Some(kind) = args.kind {
        filter = filter.kind(kind);
    }
    if let Some((from_date, to_date)) = args.from.zip(args.to) {
        filter = filter.date_range(from_date, to_date);
    }
    filter
}

/// Executes the `transactions` subcommand.
fn cmd_transactions<S: BlockingStorage>(
    ledger: &LedgerBlocking<S>,
    args: &TransactionArgs,
) -> io::Result<ExitCode> {
    match ledger.transactions(&build_transaction_filter(args)) {
        Ok(txs) => {
            print_transactions_table("Transactions", &txs)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => report_error("failed to read transactions", &err),
    }
}

/// Executes the `audit` subcommand. Fails if any wallet is inconsistent.
fn cmd_audit<S: BlockingStorage>(
    ledger: &LedgerBlocking<S>,
    merchant: Option<String>,
) -> io::Result<ExitCode> {
    let result = match merchant {
        Some(id) => ledger
            .audit_merchant(&MerchantId::from(id))
            .map(|report| vec![report]),
        None => ledger.audit_all(),
    };
    match result {
        Ok(reports) => {
            print_audit_reports(&reports)?;
            if reports.iter().all(AuditReport::is_clean) {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Err(err) => report_error("audit failed", &err),
    }
}

// ── Output formatting ────────────────────────────────────────────────

/// Creates a table with the shared preset and a cyan header.
fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    _ = table.load_preset(UTF8_FULL);
    _ = table.set_header(
        header
            .iter()
            .map(|&name| Cell::new(name).fg(Color::Cyan))
            .collect::<Vec<Cell>>(),
    );
    table
}

/// Writes a titled table, or a dimmed note if there are no rows.
fn write_table(title: &str, rows: usize, empty: &str, table: &Table) -> io::Result<()> {
    let mut out = io::stdout().lock();
    if rows == 0 {
        writeln!(out, "{}", empty.dimmed())?;
        return Ok(());
    }
    writeln!(
        out,
        "{} {}",
        title.green().bold(),
        format_args!("({rows})").dimmed()
    )?;
    writeln!(out)?;
    writeln!(out, "{table}")?;
    Ok(())
}

/// Prints agents in a table.
fn print_agents_table(title: &str, agents: &[Agent]) -> io::Result<()> {
    let mut table = new_table(&["ID", "Name", "Phone", "Email", "Region", "Status"]);
    for agent in agents {
        let status = if agent.is_active() {
            Cell::new(agent.status).fg(Color::Green)
        } else {
            Cell::new(agent.status).fg(Color::Red)
        };
        _ = table.add_row(vec![
            Cell::new(&agent.id),
            Cell::new(&agent.name),
            Cell::new(&agent.phone),
            Cell::new(&agent.email),
            Cell::new(agent.region.as_deref().unwrap_or("\u{2014}")),
            status,
        ]);
    }
    write_table(title, agents.len(), "No agents found.", &table)
}

/// Prints merchants in a table.
fn print_merchants_table(title: &str, merchants: &[Merchant]) -> io::Result<()> {
    let mut table = new_table(&["ID", "Business", "Agent", "Status", "Balance", "Available"]);
    for merchant in merchants {
        _ = table.add_row(vec![
            Cell::new(&merchant.id),
            Cell::new(&merchant.profile.business_name),
            Cell::new(&merchant.agent),
            Cell::new(merchant.status),
            Cell::new(format!("{:.2}", merchant.wallet.balance)),
            Cell::new(format!("{:.2}", merchant.wallet.available())),
        ]);
    }
    write_table(title, merchants.len(), "No merchants found.", &table)
}

/// Prints deposits in a table.
fn print_deposits_table(deposits: &[Deposit]) -> io::Result<()> {
    let mut table = new_table(&["Receipt", "Merchant", "Amount", "Collected", "Matures", "Status"]);
    for deposit in deposits {
        _ = table.add_row(vec![
            Cell::new(&deposit.receipt_number),
            Cell::new(&deposit.merchant),
            Cell::new(format!("{:.2}", deposit.amount)),
            Cell::new(deposit.created.date_naive()),
            Cell::new(deposit.maturity_date.date_naive()),
            Cell::new(deposit.status),
        ]);
    }
    write_table("Deposits", deposits.len(), "No deposits found.", &table)
}

/// Prints transactions in a table.
fn print_transactions_table(title: &str, txs: &[Transaction]) -> io::Result<()> {
    let mut table = new_table(&["Date", "Merchant", "#", "Type", "Amount", "Balance", "Status"]);
    for tx in txs {
        let signed = tx.signed_amount();
        let amount = if signed > Decimal::ZERO {
            Cell::new(format!("+{:.2}", tx.amount)).fg(Color::Green)
        } else if signed < Decimal::ZERO {
            Cell::new(format!("-{:.2}", tx.amount)).fg(Color::Red)
        } else {
            Cell::new(format!("{:.2}", tx.amount)).fg(Color::DarkGrey)
        };
        _ = table.add_row(vec![
            Cell::new(tx.created.format("%Y-%m-%d %H:%M")),
            Cell::new(&tx.merchant),
            Cell::new(tx.sequence),
            Cell::new(tx.kind),
            amount,
            Cell::new(format!("{:.2}", tx.balance_after)),
            Cell::new(tx.status),
        ]);
    }
    write_table(title, txs.len(), "No transactions found.", &table)
}

/// Prints coupons in a table.
fn print_coupons_table(title: &str, coupons: &[CouponCode]) -> io::Result<()> {
    let mut table = new_table(&["Code", "Discount", "Used", "Valid until", "Active"]);
    for coupon in coupons {
        let discount = match coupon.discount_type {
            DiscountType::Percentage => format!("{}%", coupon.discount_value),
            DiscountType::Fixed => format!("{:.2}", coupon.discount_value),
        };
        let active = if coupon.active {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        _ = table.add_row(vec![
            Cell::new(&coupon.code),
            Cell::new(discount),
            Cell::new(format!("{}/{}", coupon.used_count, coupon.usage_limit)),
            Cell::new(coupon.valid_until.date_naive()),
            active,
        ]);
    }
    write_table(title, coupons.len(), "No coupons found.", &table)
}

/// Prints a merchant's wallet summary.
fn print_wallet_summary(summary: &WalletSummary) -> io::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(
        out,
        "{} {}",
        summary.business_name.green().bold(),
        format_args!("({}, {})", summary.merchant, summary.status).dimmed()
    )?;
    writeln!(out)?;
    let maturity = summary
        .maturity_date
        .map_or_else(|| "\u{2014}".to_owned(), |date| date.to_string());
    let rows = [
        ("Balance", format!("{:.2}", summary.balance)),
        ("Locked", format!("{:.2}", summary.locked_amount)),
        ("Available", format!("{:.2}", summary.available)),
        ("Next maturity", maturity),
        ("Total deposited", format!("{:.2}", summary.total_deposited)),
        ("Total redeemed", format!("{:.2}", summary.total_redeemed)),
        ("Total withdrawn", format!("{:.2}", summary.total_withdrawn)),
        ("Active coupons", summary.active_coupons.to_string()),
    ];
    let mut table = new_table(&["Wallet", "Value"]);
    for (name, value) in rows {
        _ = table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    writeln!(out, "{table}")?;
    Ok(())
}

/// Prints audit results, one line per merchant and one per issue.
fn print_audit_reports(reports: &[AuditReport]) -> io::Result<()> {
    let mut out = io::stdout().lock();
    if reports.is_empty() {
        writeln!(out, "{}", "No merchants to audit.".dimmed())?;
        return Ok(());
    }
    for report in reports {
        let checked = format!(
            "({} transactions, {} coupons)",
            report.transactions_checked, report.coupons_checked
        );
        if report.is_clean() {
            writeln!(
                out,
                "{} {} {}",
                "ok".green().bold(),
                report.business_name,
                checked.dimmed()
            )?;
        } else {
            writeln!(
                out,
                "{} {} {}",
                "FAIL".red().bold(),
                report.business_name,
                checked.dimmed()
            )?;
            for issue in &report.issues {
                writeln!(out, "  - {issue}")?;
            }
        }
    }
    Ok(())
}

/// Entry point.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            // stderr itself failed; nothing else to report to.
            let _ignored = writeln!(io::stderr(), "fatal I/O error: {err}");
            ExitCode::FAILURE
        }
    }
}
