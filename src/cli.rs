use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tuition")]
#[command(about = "Tuition billing ledger: charges, adjustments, payments and monthly reports", long_about = None)]
pub struct Cli {
    /// Override home directory (config/data subdirs will be created inside it).
    #[arg(long, env = "TUITION_HOME")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage student accounts.
    Account(AccountArgs),
    /// Post recurring tuition charges.
    Charge(ChargeArgs),

    /// Append a manual (signed) adjustment to an account.
    Adjust(AdjustArgs),
    /// List an account's adjustments, newest first.
    Adjustments(CodeArg),

    /// Record a payment received for an account.
    Pay(PayArgs),
    /// List an account's payments, newest first.
    Payments(CodeArg),
    /// List an account's charges, newest first.
    Charges(CodeArg),

    /// Make the current balance equal an amount by appending one adjustment.
    SetBalance(SetBalanceArgs),

    /// Balance of an account or a batch as of the end of a month.
    Balance(BalanceArgs),
    /// Month-by-month charges, adjustments, payments and running balance.
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct CodeArg {
    pub code: String,
}

#[derive(Debug, Args, Clone)]
pub struct AccountFields {
    #[arg(long)]
    pub batch: Option<String>,

    #[arg(long)]
    pub cgpa: Option<String>,

    #[arg(long)]
    pub semester_cgpa: Option<String>,

    /// First month billed (YYYY-MM). Defaults to the current month.
    #[arg(long)]
    pub billing_start: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum AccountCmd {
    Add {
        code: String,
        name: String,
        #[command(flatten)]
        fields: AccountFields,
    },
    Update {
        code: String,
        /// Rename the account code.
        #[arg(long = "code")]
        new_code: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        fields: AccountFields,
    },
    /// Delete an account together with all of its charges, adjustments and payments.
    Remove {
        code: String,
        #[arg(long)]
        yes: bool,
    },
    List {
        /// Balance month (YYYY-MM). Defaults to the current month.
        #[arg(long)]
        as_of: Option<String>,
        #[arg(long)]
        batch: Option<String>,
    },
    /// Upsert accounts from a CSV file (code,name,batch,cgpa,semester_cgpa,billing_start).
    Import { file: PathBuf },
    /// Write all accounts with their current balance to a CSV file.
    Export { file: PathBuf },
}

#[derive(Debug, Args)]
pub struct AccountArgs {
    #[command(subcommand)]
    pub cmd: AccountCmd,
}

#[derive(Debug, Subcommand)]
pub enum ChargeCmd {
    /// Post missing monthly tuition charges up to a month (inclusive).
    Generate {
        /// Target month (YYYY-MM). Defaults to the current month.
        #[arg(long)]
        through: Option<String>,
        /// Monthly fee. Defaults to `monthly_fee` from config.json.
        #[arg(long)]
        fee: Option<String>,
        /// Only this account; otherwise every account on file.
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct ChargeArgs {
    #[command(subcommand)]
    pub cmd: ChargeCmd,
}

#[derive(Debug, Args)]
pub struct AdjustArgs {
    pub code: String,
    /// Signed amount: positive increases what is owed.
    #[arg(allow_hyphen_values = true)]
    pub amount: String,

    /// Effective date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub date: Option<String>,

    #[arg(long, short = 'm', alias = "note")]
    pub note: Option<String>,
}

#[derive(Debug, Args)]
pub struct PayArgs {
    pub code: String,
    pub amount: String,

    /// Payment date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub date: Option<String>,

    #[arg(long)]
    pub method: Option<String>,

    #[arg(long)]
    pub reference: Option<String>,

    #[arg(long, short = 'm', alias = "note")]
    pub note: Option<String>,
}

#[derive(Debug, Args)]
pub struct SetBalanceArgs {
    pub code: String,
    #[arg(allow_hyphen_values = true)]
    pub amount: String,

    #[arg(long, short = 'm', alias = "note")]
    pub note: Option<String>,

    /// Treat this date (YYYY-MM-DD) as today.
    #[arg(long)]
    pub date: Option<String>,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("scope").required(true).args(["account", "batch"])))]
pub struct ScopeArgs {
    #[arg(long)]
    pub account: Option<String>,

    #[arg(long)]
    pub batch: Option<String>,
}

#[derive(Debug, Args)]
pub struct BalanceArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Month (YYYY-MM) whose last day is the cutoff. Defaults to the current month.
    #[arg(long)]
    pub month: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Table,
    Tsv,
    Csv,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Last month of the report (YYYY-MM). Defaults to the current month.
    #[arg(long)]
    pub end: Option<String>,

    /// Months before `--end` to include. Negative values mean 0.
    #[arg(long, allow_hyphen_values = true)]
    pub months_back: Option<i64>,

    #[arg(long, value_enum, default_value_t = ReportFormat::Table)]
    pub format: ReportFormat,
}
