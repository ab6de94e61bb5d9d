//! Bulk account import/export in CSV.
//!
//! Column order: code, name, batch, cgpa, semester_cgpa, billing_start.
//! A first row that looks like a header is skipped.

use crate::db::Db;
use crate::domain::{Account, ImportSummary, NewAccount, RawAccount};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct ParsedAccounts {
    pub accounts: Vec<NewAccount>,
    /// Rows that could not be turned into a valid account.
    pub failed: usize,
}

pub fn parse_accounts_csv<R: Read>(reader: R, today: NaiveDate) -> Result<ParsedAccounts> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut out = ParsedAccounts::default();
    for (i, record) in rdr.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(err) => {
                warn!(row = i + 1, %err, "unreadable CSV row");
                out.failed += 1;
                continue;
            }
        };

        if i == 0 && looks_like_header(&record) {
            continue;
        }
        if record.iter().all(str::is_empty) {
            continue;
        }

        let field = |idx: usize| record.get(idx).unwrap_or("").to_string();
        let optional = |idx: usize| record.get(idx).filter(|v| !v.is_empty()).map(str::to_string);
        let raw = RawAccount {
            code: field(0),
            name: field(1),
            batch: field(2),
            cgpa: optional(3),
            semester_cgpa: optional(4),
            billing_start: optional(5),
        };

        match raw.validate(today) {
            Ok(account) => out.accounts.push(account),
            Err(err) => {
                warn!(row = i + 1, %err, "skipping invalid account row");
                out.failed += 1;
            }
        }
    }
    Ok(out)
}

fn looks_like_header(record: &csv::StringRecord) -> bool {
    let cell = |idx: usize| record.get(idx).unwrap_or("").to_ascii_lowercase();
    let first = cell(0);
    first.contains("code")
        || first.contains("id")
        || first.contains("student")
        || cell(1).contains("name")
        || cell(2).contains("batch")
        || cell(5).contains("billing")
}

/// Reads `path` and upserts every valid row (by code) in one transaction.
pub fn import_accounts(db: &Db, path: &Path, today: NaiveDate) -> Result<ImportSummary> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let parsed = parse_accounts_csv(file, today)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if !parsed.accounts.is_empty() {
        db.upsert_accounts(&parsed.accounts)?;
    }

    let summary = ImportSummary {
        processed: parsed.accounts.len(),
        failed: parsed.failed,
    };
    info!(
        file = %path.display(),
        processed = summary.processed,
        failed = summary.failed,
        "account import finished"
    );
    Ok(summary)
}

pub fn write_accounts_csv<W: Write>(
    writer: W,
    accounts: &[Account],
    balances: &BTreeMap<i64, Decimal>,
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "code",
        "name",
        "batch",
        "cgpa",
        "semester_cgpa",
        "billing_start",
        "balance",
    ])?;

    for a in accounts {
        let balance = balances.get(&a.id).copied().unwrap_or(Decimal::ZERO);
        wtr.write_record([
            a.code.clone(),
            a.name.clone(),
            a.batch.clone(),
            a.cgpa.map(|v| v.to_string()).unwrap_or_default(),
            a.semester_cgpa.map(|v| v.to_string()).unwrap_or_default(),
            a.billing_start.to_string(),
            balance.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_accounts(path: &Path, accounts: &[Account], balances: &BTreeMap<i64, Decimal>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_accounts_csv(file, accounts, balances)
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Month;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 12).unwrap()
    }

    #[test]
    fn header_row_is_skipped_and_rows_are_normalised() {
        let csv = "\
Student ID,Full Name,Batch,CGPA,Semester CGPA,Billing Start Month
S-1,Ada Lovelace,50,3.9,3.8,2024-01-01
S-2,Alan Turing,51st batch,,,2024/02
";
        let parsed = parse_accounts_csv(csv.as_bytes(), today()).unwrap();
        assert_eq!(parsed.failed, 0);
        assert_eq!(parsed.accounts.len(), 2);
        assert_eq!(parsed.accounts[0].batch, "50th");
        assert_eq!(parsed.accounts[0].billing_start, Month::new(2024, 1).unwrap());
        assert_eq!(parsed.accounts[1].batch, "51st");
        assert_eq!(parsed.accounts[1].cgpa, None);
        assert_eq!(parsed.accounts[1].billing_start, Month::new(2024, 2).unwrap());
    }

    #[test]
    fn invalid_rows_are_counted_not_fatal() {
        let csv = "\
S-1,Ada,50th,3.9,,2024-01
S-2,,50th,,,2024-01
S-3,Grace,50th,9.9,,2024-01
S-4,Linus,50th,,,next year
S-5,Ken,50th

";
        let parsed = parse_accounts_csv(csv.as_bytes(), today()).unwrap();
        assert_eq!(parsed.failed, 3);
        let codes: Vec<_> = parsed.accounts.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, vec!["S-1", "S-5"]);
        // Blank billing start falls back to the current month.
        assert_eq!(parsed.accounts[1].billing_start, Month::new(2024, 6).unwrap());
    }

    #[test]
    fn import_upserts_into_the_store() {
        let db = Db::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students.csv");
        std::fs::write(&path, "S-1,Ada,50th,,,2024-01\nS-2,Bob,,,,2024-01\n").unwrap();

        let summary = import_accounts(&db, &path, today()).unwrap();
        assert_eq!(summary, ImportSummary { processed: 1, failed: 1 });

        std::fs::write(&path, "S-1,Ada King,50th,,,2024-03\n").unwrap();
        import_accounts(&db, &path, today()).unwrap();
        let all = db.list_accounts().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Ada King");
        assert_eq!(all[0].billing_start, Month::new(2024, 3).unwrap());
    }

    #[test]
    fn export_writes_balance_column() {
        let account = Account {
            id: 7,
            code: "S-7".into(),
            name: "Edsger".into(),
            batch: "50th".into(),
            cgpa: Some(3.5),
            semester_cgpa: None,
            billing_start: Month::new(2024, 1).unwrap(),
        };
        let balances = BTreeMap::from([(7, Decimal::from(150))]);

        let mut buf = Vec::new();
        write_accounts_csv(&mut buf, &[account], &balances).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "code,name,batch,cgpa,semester_cgpa,billing_start,balance\nS-7,Edsger,50th,3.5,,2024-01,150\n"
        );
    }
}
