mod cli;
mod config;
mod db;
mod domain;
mod error;
mod import;
mod ledger;
mod report;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use std::io::{self, Write};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::{
    AccountCmd, ChargeCmd, Cli, Command, ReportArgs, ReportFormat, ScopeArgs,
};
use crate::config::{AppConfig, app_paths, load_or_init_config, today};
use crate::db::Db;
use crate::domain::{
    Month, NewPayment, RawAccount, Scope, normalize_batch, parse_amount, parse_date,
};
use crate::error::LedgerError;
use crate::ledger::{ChargePlan, SetBalanceOutcome};
use crate::report::MonthlyReport;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        report_error(&err);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("TUITION_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Store and corruption failures print only their own message; the full
/// source chain is logged at debug level (`TUITION_LOG=debug`).
fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<LedgerError>() {
        Some(e) if !e.is_user_actionable() => {
            debug!(error = ?err, "ledger operation failed");
            eprintln!("Error: {e}");
        }
        _ => eprintln!("{err:#}"),
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = app_paths(cli.home.clone())?;
    let (cfg, _cfg_path) = load_or_init_config(&paths)?;
    let (db, _db_path) = Db::open(&paths)?;
    let today = today();

    match cli.command {
        Command::Account(args) => handle_account(&db, args.cmd, today),
        Command::Charge(args) => handle_charge(&db, &cfg, args.cmd, today),
        Command::Adjust(args) => {
            let account = db.require_account_by_code(&args.code)?;
            let amount = parse_amount(&args.amount, "amount")?;
            if amount.is_zero() {
                return Err(anyhow!("Adjustment amount must not be zero"));
            }
            let date = parse_date_or(args.date.as_deref(), today)?;
            let id = db.insert_adjustment(account.id, date, amount, args.note.as_deref())?;
            println!(
                "Recorded adjustment #{id} of {amount} for {} on {date}.",
                account.code
            );
            Ok(())
        }
        Command::Adjustments(args) => {
            let account = db.require_account_by_code(&args.code)?;
            let rows: Vec<Vec<String>> = db
                .list_adjustments(account.id)?
                .into_iter()
                .map(|a| {
                    vec![
                        a.id.to_string(),
                        a.date.to_string(),
                        a.amount.to_string(),
                        a.note.unwrap_or_default(),
                    ]
                })
                .collect();
            if rows.is_empty() {
                println!("(no adjustments)");
                return Ok(());
            }
            print_table(&["ID", "DATE", "AMOUNT", "NOTE"], &rows);
            Ok(())
        }
        Command::Pay(args) => {
            let account = db.require_account_by_code(&args.code)?;
            let amount = parse_amount(&args.amount, "amount")?;
            if amount <= Decimal::ZERO {
                return Err(anyhow!("Payment amount must be greater than zero"));
            }
            let payment = NewPayment {
                account_id: account.id,
                date: parse_date_or(args.date.as_deref(), today)?,
                amount,
                method: args.method,
                reference: args.reference,
                note: args.note,
            };
            let id = db.insert_payment(&payment)?;
            println!(
                "Recorded payment #{id} of {amount} for {} on {}.",
                account.code, payment.date
            );
            Ok(())
        }
        Command::Payments(args) => {
            let account = db.require_account_by_code(&args.code)?;
            let rows: Vec<Vec<String>> = db
                .list_payments(account.id)?
                .into_iter()
                .map(|p| {
                    vec![
                        p.id.to_string(),
                        p.date.to_string(),
                        p.amount.to_string(),
                        p.method.unwrap_or_default(),
                        p.reference.unwrap_or_default(),
                        p.note.unwrap_or_default(),
                    ]
                })
                .collect();
            if rows.is_empty() {
                println!("(no payments)");
                return Ok(());
            }
            print_table(&["ID", "DATE", "AMOUNT", "METHOD", "REFERENCE", "NOTE"], &rows);
            Ok(())
        }
        Command::Charges(args) => {
            let account = db.require_account_by_code(&args.code)?;
            let rows: Vec<Vec<String>> = db
                .list_charges(account.id)?
                .into_iter()
                .map(|c| {
                    vec![
                        c.month.to_string(),
                        c.charge_type,
                        c.amount.to_string(),
                        c.note.unwrap_or_default(),
                    ]
                })
                .collect();
            if rows.is_empty() {
                println!("(no charges)");
                return Ok(());
            }
            print_table(&["MONTH", "TYPE", "AMOUNT", "NOTE"], &rows);
            Ok(())
        }
        Command::SetBalance(args) => {
            let account = db.require_account_by_code(&args.code)?;
            let desired = parse_amount(&args.amount, "balance")?;
            let on = parse_date_or(args.date.as_deref(), today)?;
            match ledger::set_balance(&db, account.id, desired, args.note.as_deref(), on)? {
                SetBalanceOutcome::Unchanged { balance } => {
                    println!(
                        "Balance of {} is already {balance}; nothing recorded.",
                        account.code
                    );
                }
                SetBalanceOutcome::Adjusted {
                    adjustment_id,
                    delta,
                } => {
                    println!(
                        "Recorded adjustment #{adjustment_id} of {delta} for {}; balance is now {desired}.",
                        account.code
                    );
                }
            }
            Ok(())
        }
        Command::Balance(args) => {
            let (scope, label) = resolve_scope(&db, &args.scope)?;
            let month = parse_month_or(args.month.as_deref(), today)?;
            let balance = ledger::balance_as_of(&db, &scope, month)?;
            println!("{label}\t{month}\t{balance}");
            Ok(())
        }
        Command::Report(args) => handle_report(&db, &cfg, args, today),
    }
}

fn handle_account(db: &Db, cmd: AccountCmd, today: NaiveDate) -> Result<()> {
    match cmd {
        AccountCmd::Add { code, name, fields } => {
            let account = RawAccount {
                code,
                name,
                batch: fields.batch.unwrap_or_default(),
                cgpa: fields.cgpa,
                semester_cgpa: fields.semester_cgpa,
                billing_start: fields.billing_start,
            }
            .validate(today)?;
            let account = db.insert_account(&account)?;
            println!(
                "Added account {} ({}) in batch {}, billed from {}.",
                account.code, account.name, account.batch, account.billing_start
            );
            Ok(())
        }
        AccountCmd::Update {
            code,
            new_code,
            name,
            fields,
        } => {
            let existing = db.require_account_by_code(&code)?;
            let merged = RawAccount {
                code: new_code.unwrap_or(existing.code),
                name: name.unwrap_or(existing.name),
                batch: fields.batch.unwrap_or(existing.batch),
                cgpa: fields.cgpa.or(existing.cgpa.map(|v| v.to_string())),
                semester_cgpa: fields
                    .semester_cgpa
                    .or(existing.semester_cgpa.map(|v| v.to_string())),
                billing_start: fields
                    .billing_start
                    .or(Some(existing.billing_start.to_string())),
            }
            .validate(today)?;
            let account = db.update_account(existing.id, &merged)?;
            println!("Updated account {}.", account.code);
            Ok(())
        }
        AccountCmd::Remove { code, yes } => {
            let account = db.require_account_by_code(&code)?;
            if !yes
                && !prompt_yes_no(&format!(
                    "Delete {} ({}) and all of its charges, adjustments and payments? [y/N] ",
                    account.code, account.name
                ))?
            {
                println!("Cancelled.");
                return Ok(());
            }
            db.delete_account(account.id)?;
            println!("Removed account {}.", account.code);
            Ok(())
        }
        AccountCmd::List { as_of, batch } => {
            let month = parse_month_or(as_of.as_deref(), today)?;
            let mut accounts = db.list_accounts()?;
            if let Some(batch) = batch {
                let batch = normalize_batch(&batch);
                accounts.retain(|a| a.batch == batch);
            }
            if accounts.is_empty() {
                println!("(no accounts)");
                return Ok(());
            }

            let balances = ledger::balances_as_of(db, &accounts, month)?;
            let rows: Vec<Vec<String>> = accounts
                .iter()
                .map(|a| {
                    vec![
                        a.code.clone(),
                        a.name.clone(),
                        a.batch.clone(),
                        a.cgpa.map(|v| v.to_string()).unwrap_or_default(),
                        a.semester_cgpa.map(|v| v.to_string()).unwrap_or_default(),
                        a.billing_start.to_string(),
                        balances.get(&a.id).copied().unwrap_or_default().to_string(),
                    ]
                })
                .collect();
            print_table(
                &["CODE", "NAME", "BATCH", "CGPA", "SEM CGPA", "BILLING START", "BALANCE"],
                &rows,
            );
            Ok(())
        }
        AccountCmd::Import { file } => {
            let summary = import::import_accounts(db, &file, today)?;
            println!(
                "Imported {} account(s); {} row(s) failed. Existing codes were updated.",
                summary.processed, summary.failed
            );
            Ok(())
        }
        AccountCmd::Export { file } => {
            let accounts = db.list_accounts()?;
            let balances = ledger::balances_as_of(db, &accounts, Month::from_date(today))?;
            import::export_accounts(&file, &accounts, &balances)?;
            println!("Wrote {} account(s) to {}.", accounts.len(), file.display());
            Ok(())
        }
    }
}

fn handle_charge(db: &Db, cfg: &AppConfig, cmd: ChargeCmd, today: NaiveDate) -> Result<()> {
    match cmd {
        ChargeCmd::Generate {
            through,
            fee,
            account,
        } => {
            let through = parse_month_or(through.as_deref(), today)?;
            let monthly_fee = match fee {
                Some(raw) => parse_amount(&raw, "fee")?,
                None => cfg.monthly_fee,
            };
            let plan = ChargePlan {
                monthly_fee,
                through,
            };

            if let Some(code) = account {
                let account = db.require_account_by_code(&code)?;
                let created = ledger::generate_charges_for_account(
                    db,
                    account.id,
                    account.billing_start,
                    &plan,
                )?;
                println!(
                    "Posted {created} charge(s) of {monthly_fee} for {} through {through}.",
                    account.code
                );
                return Ok(());
            }

            let total = db.list_billing_schedules()?.len() as u64;
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::with_template("{bar:30} {pos}/{len} accounts")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            let run = ledger::generate_all_charges(db, &plan, || pb.inc(1))?;
            pb.finish_and_clear();

            println!(
                "Posted {} charge(s) of {monthly_fee} across {} account(s) through {through}.",
                run.created, run.accounts
            );
            if run.failures.is_empty() {
                return Ok(());
            }
            for f in &run.failures {
                eprintln!("  {}: {}", f.code, f.error);
            }
            Err(anyhow!(
                "Charge generation failed for {} account(s); the others were processed.",
                run.failures.len()
            ))
        }
    }
}

fn handle_report(db: &Db, cfg: &AppConfig, args: ReportArgs, today: NaiveDate) -> Result<()> {
    let (scope, label) = resolve_scope(db, &args.scope)?;
    let end = parse_month_or(args.end.as_deref(), today)?;
    let months_back = args
        .months_back
        .unwrap_or(i64::from(cfg.report_months_back));
    let report = report::monthly_report(db, &scope, end, months_back)?;

    match args.format {
        ReportFormat::Table => {
            if let (Some(first), Some(last)) = (report.rows.first(), report.rows.last()) {
                println!("Report for {label}: {} to {}", first.month, last.month);
            }
            println!("Opening balance: {}", report.opening_balance);
            print_table(
                &["MONTH", "CHARGES", "ADJUSTMENTS", "PAYMENTS", "NET CHANGE", "ENDING BALANCE"],
                &report_cells(&report),
            );
            println!("Closing balance: {}", report.closing_balance());
        }
        ReportFormat::Tsv => {
            println!("month\tcharges\tadjustments\tpayments\tnet_change\tending_balance");
            for row in report_cells(&report) {
                println!("{}", row.join("\t"));
            }
        }
        ReportFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(io::stdout().lock());
            wtr.write_record([
                "month",
                "charges",
                "adjustments",
                "payments",
                "net_change",
                "ending_balance",
            ])?;
            for row in report_cells(&report) {
                wtr.write_record(&row)?;
            }
            wtr.flush().context("Failed to write report")?;
        }
    }
    Ok(())
}

fn report_cells(report: &MonthlyReport) -> Vec<Vec<String>> {
    report
        .rows
        .iter()
        .map(|r| {
            vec![
                r.month.to_string(),
                r.charges.to_string(),
                r.adjustments.to_string(),
                r.payments.to_string(),
                r.net_change.to_string(),
                r.ending_balance.to_string(),
            ]
        })
        .collect()
}

fn resolve_scope(db: &Db, args: &ScopeArgs) -> Result<(Scope, String)> {
    match (&args.account, &args.batch) {
        (Some(code), _) => {
            let account = db.require_account_by_code(code)?;
            Ok((Scope::Account(account.id), account.code))
        }
        (None, Some(batch)) => {
            let batch = normalize_batch(batch);
            if batch.is_empty() {
                return Err(anyhow!("Batch is required."));
            }
            Ok((Scope::Batch(batch.clone()), format!("batch {batch}")))
        }
        (None, None) => Err(anyhow!("Pass --account <code> or --batch <label>")),
    }
}

fn parse_month_or(raw: Option<&str>, today: NaiveDate) -> Result<Month> {
    match raw {
        Some(raw) => Ok(raw.parse::<Month>()?),
        None => Ok(Month::from_date(today)),
    }
}

fn parse_date_or(raw: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    match raw {
        Some(raw) => Ok(parse_date(raw, "date")?),
        None => Ok(today),
    }
}

fn prompt_yes_no(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let cols = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();

    for row in rows {
        for (i, cell) in row.iter().take(cols).enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    fn print_row(cells: &[String], widths: &[usize]) {
        print!("|");
        for (i, w) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            print!(" {:width$} |", cell, width = *w);
        }
        println!();
    }

    fn print_sep(widths: &[usize]) {
        print!("|");
        for w in widths {
            print!("{}|", "-".repeat(w + 2));
        }
        println!();
    }

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    print_row(&header_cells, &widths);
    print_sep(&widths);
    for row in rows {
        print_row(row, &widths);
    }
}
