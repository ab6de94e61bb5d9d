use crate::config::AppPaths;
use crate::domain::{
    Account, Adjustment, Charge, Month, NewAccount, NewPayment, Payment, Scope, StreamTotals,
};
use crate::error::{LedgerError, LedgerResult};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, Params, Row, Transaction, ffi, params};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

const ACCOUNT_COLUMNS: &str =
    "id, code, name, group_label, cgpa, semester_cgpa, billing_start_month";

type AccountRow = (i64, String, String, String, Option<f64>, Option<f64>, String);

/// An account's billing-start month exactly as stored, parsed per account by
/// charge generation so one malformed row cannot block the others.
#[derive(Debug, Clone)]
pub struct BillingSchedule {
    pub account_id: i64,
    pub code: String,
    pub billing_start_raw: String,
}

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(paths: &AppPaths) -> Result<(Self, PathBuf)> {
        fs::create_dir_all(&paths.data_dir)
            .with_context(|| format!("Failed to create data dir {}", paths.data_dir.display()))?;

        let db_path = paths.db_path();
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open DB {}", db_path.display()))?;

        let db = Self { conn };
        db.migrate()
            .with_context(|| format!("Failed to initialise schema in {}", db_path.display()))?;
        Ok((db, db_path))
    }

    #[cfg(test)]
    pub fn open_in_memory() -> LedgerResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.migrate()?;
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> LedgerResult<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                group_label TEXT NOT NULL,
                cgpa REAL,
                semester_cgpa REAL,
                billing_start_month TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_group ON accounts(group_label);

            CREATE TABLE IF NOT EXISTS charges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                charge_month TEXT NOT NULL,
                amount TEXT NOT NULL,
                charge_type TEXT NOT NULL DEFAULT 'TUITION',
                note TEXT,
                UNIQUE(account_id, charge_month, charge_type)
            );

            CREATE TABLE IF NOT EXISTS adjustments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                adj_date TEXT NOT NULL,
                amount TEXT NOT NULL,
                note TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_adjustments_account_date ON adjustments(account_id, adj_date);

            CREATE TABLE IF NOT EXISTS payments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                payment_date TEXT NOT NULL,
                amount TEXT NOT NULL,
                method TEXT,
                reference TEXT,
                note TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_payments_account_date ON payments(account_id, payment_date);
            "#,
        )?;
        Ok(())
    }

    /// Starts a deferred transaction. Reads made through it see one consistent
    /// snapshot; writes become visible only on [`LedgerTx::commit`].
    pub fn begin(&self) -> LedgerResult<LedgerTx<'_>> {
        Ok(LedgerTx {
            tx: self.conn.unchecked_transaction()?,
        })
    }

    pub fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        self.query_accounts(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY group_label ASC, code ASC"),
            [],
        )
    }

    pub fn get_account(&self, id: i64) -> LedgerResult<Option<Account>> {
        let mut found = self.query_accounts(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
            params![id],
        )?;
        Ok(found.pop())
    }

    pub fn get_account_by_code(&self, code: &str) -> LedgerResult<Option<Account>> {
        let mut found = self.query_accounts(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE code = ?1"),
            params![code],
        )?;
        Ok(found.pop())
    }

    pub fn require_account_by_code(&self, code: &str) -> LedgerResult<Account> {
        self.get_account_by_code(code)?
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))
    }

    fn query_accounts<P: Params>(&self, sql: &str, params: P) -> LedgerResult<Vec<Account>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, read_account_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(account_from_row(row?)?);
        }
        Ok(out)
    }

    pub fn insert_account(&self, account: &NewAccount) -> LedgerResult<Account> {
        let result = self.conn.execute(
            r#"
            INSERT INTO accounts (code, name, group_label, cgpa, semester_cgpa, billing_start_month)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                account.code,
                account.name,
                account.batch,
                account.cgpa,
                account.semester_cgpa,
                account.billing_start.first_day(),
            ],
        );
        map_duplicate_code(result, &account.code)?;

        Ok(Account {
            id: self.conn.last_insert_rowid(),
            code: account.code.clone(),
            name: account.name.clone(),
            batch: account.batch.clone(),
            cgpa: account.cgpa,
            semester_cgpa: account.semester_cgpa,
            billing_start: account.billing_start,
        })
    }

    pub fn update_account(&self, id: i64, account: &NewAccount) -> LedgerResult<Account> {
        let result = self.conn.execute(
            r#"
            UPDATE accounts
            SET code = ?1, name = ?2, group_label = ?3, cgpa = ?4, semester_cgpa = ?5, billing_start_month = ?6
            WHERE id = ?7
            "#,
            params![
                account.code,
                account.name,
                account.batch,
                account.cgpa,
                account.semester_cgpa,
                account.billing_start.first_day(),
                id,
            ],
        );
        let changed = map_duplicate_code(result, &account.code)?;
        if changed == 0 {
            return Err(LedgerError::AccountNotFound(format!("#{id}")));
        }

        Ok(Account {
            id,
            code: account.code.clone(),
            name: account.name.clone(),
            batch: account.batch.clone(),
            cgpa: account.cgpa,
            semester_cgpa: account.semester_cgpa,
            billing_start: account.billing_start,
        })
    }

    /// Deletes the account and, through the foreign keys, all of its events.
    pub fn delete_account(&self, id: i64) -> LedgerResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Inserts or updates (by code) every record in one transaction; all or nothing.
    pub fn upsert_accounts(&self, accounts: &[NewAccount]) -> LedgerResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO accounts (code, name, group_label, cgpa, semester_cgpa, billing_start_month)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(code) DO UPDATE SET
                    name = excluded.name,
                    group_label = excluded.group_label,
                    cgpa = excluded.cgpa,
                    semester_cgpa = excluded.semester_cgpa,
                    billing_start_month = excluded.billing_start_month
                "#,
            )?;
            for a in accounts {
                written += stmt.execute(params![
                    a.code,
                    a.name,
                    a.batch,
                    a.cgpa,
                    a.semester_cgpa,
                    a.billing_start.first_day(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn list_billing_schedules(&self) -> LedgerResult<Vec<BillingSchedule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, code, billing_start_month FROM accounts ORDER BY group_label ASC, code ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BillingSchedule {
                account_id: row.get(0)?,
                code: row.get(1)?,
                billing_start_raw: row.get(2)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn insert_adjustment(
        &self,
        account_id: i64,
        date: NaiveDate,
        amount: Decimal,
        note: Option<&str>,
    ) -> LedgerResult<i64> {
        insert_adjustment(&self.conn, account_id, date, amount, note)
    }

    pub fn insert_payment(&self, payment: &NewPayment) -> LedgerResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO payments (account_id, payment_date, amount, method, reference, note)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                payment.account_id,
                payment.date,
                payment.amount.to_string(),
                clean_text(payment.method.as_deref()),
                clean_text(payment.reference.as_deref()),
                clean_text(payment.note.as_deref()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_charges(&self, account_id: i64) -> LedgerResult<Vec<Charge>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, account_id, charge_month, amount, charge_type, note
            FROM charges
            WHERE account_id = ?1
            ORDER BY charge_month DESC, id DESC
            "#,
        )?;
        let rows = stmt.query_map(params![account_id], |row| {
            let id: i64 = row.get(0)?;
            let account_id: i64 = row.get(1)?;
            let month: String = row.get(2)?;
            let amount: String = row.get(3)?;
            let charge_type: String = row.get(4)?;
            let note: Option<String> = row.get(5)?;
            Ok((id, account_id, month, amount, charge_type, note))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, account_id, month, amount, charge_type, note) = row?;
            out.push(Charge {
                id,
                account_id,
                month: parse_stored_month("charges", "charge_month", &month)?,
                amount: parse_stored_amount("charges", &amount)?,
                charge_type,
                note,
            });
        }
        Ok(out)
    }

    pub fn list_adjustments(&self, account_id: i64) -> LedgerResult<Vec<Adjustment>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, account_id, adj_date, amount, note
            FROM adjustments
            WHERE account_id = ?1
            ORDER BY adj_date DESC, id DESC
            "#,
        )?;
        let rows = stmt.query_map(params![account_id], |row| {
            let id: i64 = row.get(0)?;
            let account_id: i64 = row.get(1)?;
            let date: String = row.get(2)?;
            let amount: String = row.get(3)?;
            let note: Option<String> = row.get(4)?;
            Ok((id, account_id, date, amount, note))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, account_id, date, amount, note) = row?;
            out.push(Adjustment {
                id,
                account_id,
                date: parse_stored_date("adjustments", "adj_date", &date)?,
                amount: parse_stored_amount("adjustments", &amount)?,
                note,
            });
        }
        Ok(out)
    }

    pub fn list_payments(&self, account_id: i64) -> LedgerResult<Vec<Payment>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, account_id, payment_date, amount, method, reference, note
            FROM payments
            WHERE account_id = ?1
            ORDER BY payment_date DESC, id DESC
            "#,
        )?;
        let rows = stmt.query_map(params![account_id], |row| {
            let id: i64 = row.get(0)?;
            let account_id: i64 = row.get(1)?;
            let date: String = row.get(2)?;
            let amount: String = row.get(3)?;
            let method: Option<String> = row.get(4)?;
            let reference: Option<String> = row.get(5)?;
            let note: Option<String> = row.get(6)?;
            Ok((id, account_id, date, amount, method, reference, note))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, account_id, date, amount, method, reference, note) = row?;
            out.push(Payment {
                id,
                account_id,
                date: parse_stored_date("payments", "payment_date", &date)?,
                amount: parse_stored_amount("payments", &amount)?,
                method,
                reference,
                note,
            });
        }
        Ok(out)
    }
}

/// One unit of work against the store: a consistent read snapshot, and the
/// write boundary for per-account charge generation and set-balance.
/// Dropping it without [`LedgerTx::commit`] rolls back.
pub struct LedgerTx<'a> {
    tx: Transaction<'a>,
}

impl LedgerTx<'_> {
    /// Totals of each stream as of the end of `month`, inclusive.
    pub fn totals_as_of(&self, scope: &Scope, month: Month) -> LedgerResult<StreamTotals> {
        let mut totals = StreamTotals::default();
        for stream in Stream::ALL {
            for (_, amount) in stream_amounts(&self.tx, stream, scope, None, stream.cutoff(month))? {
                stream.add(&mut totals, amount)?;
            }
        }
        Ok(totals)
    }

    /// Per-month totals for `start..=end`. Months without events are absent.
    pub fn monthly_totals(
        &self,
        scope: &Scope,
        start: Month,
        end: Month,
    ) -> LedgerResult<BTreeMap<Month, StreamTotals>> {
        let mut by_month: BTreeMap<Month, StreamTotals> = BTreeMap::new();
        for stream in Stream::ALL {
            let rows = stream_amounts(
                &self.tx,
                stream,
                scope,
                Some(start.first_day()),
                stream.cutoff(end),
            )?;
            for (date, amount) in rows {
                stream.add(by_month.entry(Month::from_date(date)).or_default(), amount)?;
            }
        }
        Ok(by_month)
    }

    /// Balance of every account that has at least one event as of the end of `month`.
    pub fn balances_by_account(&self, month: Month) -> LedgerResult<BTreeMap<i64, Decimal>> {
        let mut by_account: BTreeMap<i64, StreamTotals> = BTreeMap::new();
        for stream in Stream::ALL {
            let sql = format!(
                "SELECT account_id, amount FROM {} WHERE {} <= ?1",
                stream.table(),
                stream.date_column()
            );
            let mut stmt = self.tx.prepare(&sql)?;
            let rows = stmt.query_map(params![stream.cutoff(month)], |row| {
                let account_id: i64 = row.get(0)?;
                let amount: String = row.get(1)?;
                Ok((account_id, amount))
            })?;
            for row in rows {
                let (account_id, amount) = row?;
                let amount = parse_stored_amount(stream.table(), &amount)?;
                stream.add(by_account.entry(account_id).or_default(), amount)?;
            }
        }
        by_account
            .into_iter()
            .map(|(id, totals)| totals.net().map(|net| (id, net)))
            .collect()
    }

    /// Returns `false` when a charge for (account, month, type) already exists.
    pub fn insert_charge_if_missing(
        &self,
        account_id: i64,
        month: Month,
        amount: Decimal,
        charge_type: &str,
    ) -> LedgerResult<bool> {
        let changed = self.tx.execute(
            r#"
            INSERT OR IGNORE INTO charges (account_id, charge_month, amount, charge_type, note)
            VALUES (?1, ?2, ?3, ?4, NULL)
            "#,
            params![account_id, month.first_day(), amount.to_string(), charge_type],
        )?;
        Ok(changed == 1)
    }

    pub fn insert_adjustment(
        &self,
        account_id: i64,
        date: NaiveDate,
        amount: Decimal,
        note: Option<&str>,
    ) -> LedgerResult<i64> {
        insert_adjustment(&self.tx, account_id, date, amount, note)
    }

    pub fn commit(self) -> LedgerResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Charges,
    Adjustments,
    Payments,
}

impl Stream {
    const ALL: [Stream; 3] = [Stream::Charges, Stream::Adjustments, Stream::Payments];

    fn table(self) -> &'static str {
        match self {
            Stream::Charges => "charges",
            Stream::Adjustments => "adjustments",
            Stream::Payments => "payments",
        }
    }

    fn date_column(self) -> &'static str {
        match self {
            Stream::Charges => "charge_month",
            Stream::Adjustments => "adj_date",
            Stream::Payments => "payment_date",
        }
    }

    /// Last stored date that still counts as "within" `month`. Charges are
    /// month-keyed; adjustments and payments carry real calendar dates.
    fn cutoff(self, month: Month) -> NaiveDate {
        match self {
            Stream::Charges => month.first_day(),
            Stream::Adjustments | Stream::Payments => month.last_day(),
        }
    }

    fn add(self, totals: &mut StreamTotals, amount: Decimal) -> LedgerResult<()> {
        let slot = match self {
            Stream::Charges => &mut totals.charges,
            Stream::Adjustments => &mut totals.adjustments,
            Stream::Payments => &mut totals.payments,
        };
        *slot = slot
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(self.table()))?;
        Ok(())
    }
}

/// Dated amounts of one stream for a scope, with `from..=to` on the stream's date column.
fn stream_amounts(
    conn: &Connection,
    stream: Stream,
    scope: &Scope,
    from: Option<NaiveDate>,
    to: NaiveDate,
) -> LedgerResult<Vec<(NaiveDate, Decimal)>> {
    let (scope_column, scope_value) = match scope {
        Scope::Account(id) => ("a.id", Value::Integer(*id)),
        Scope::Batch(label) => ("a.group_label", Value::Text(label.clone())),
    };
    let date_column = stream.date_column();
    let sql = format!(
        r#"
        SELECT e.{date_column}, e.amount
        FROM {table} e
        JOIN accounts a ON a.id = e.account_id
        WHERE {scope_column} = ?1
          AND (?2 IS NULL OR e.{date_column} >= ?2)
          AND e.{date_column} <= ?3
        "#,
        table = stream.table(),
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![scope_value, from, to], |row| {
        let date: String = row.get(0)?;
        let amount: String = row.get(1)?;
        Ok((date, amount))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (date, amount) = row?;
        out.push((
            parse_stored_date(stream.table(), date_column, &date)?,
            parse_stored_amount(stream.table(), &amount)?,
        ));
    }
    Ok(out)
}

fn insert_adjustment(
    conn: &Connection,
    account_id: i64,
    date: NaiveDate,
    amount: Decimal,
    note: Option<&str>,
) -> LedgerResult<i64> {
    conn.execute(
        "INSERT INTO adjustments (account_id, adj_date, amount, note) VALUES (?1, ?2, ?3, ?4)",
        params![account_id, date, amount.to_string(), clean_text(note)],
    )?;
    Ok(conn.last_insert_rowid())
}

fn read_account_row(row: &Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn account_from_row(raw: AccountRow) -> LedgerResult<Account> {
    let (id, code, name, batch, cgpa, semester_cgpa, billing_start) = raw;
    Ok(Account {
        id,
        code,
        name,
        batch,
        cgpa,
        semester_cgpa,
        billing_start: parse_stored_month("accounts", "billing_start_month", &billing_start)?,
    })
}

fn map_duplicate_code(result: rusqlite::Result<usize>, code: &str) -> LedgerResult<usize> {
    match result {
        Ok(changed) => Ok(changed),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(LedgerError::DuplicateCode(code.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn clean_text(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_stored_amount(table: &'static str, raw: &str) -> LedgerResult<Decimal> {
    raw.parse::<Decimal>().map_err(|_| LedgerError::Corrupt {
        table,
        column: "amount",
        value: raw.to_string(),
    })
}

fn parse_stored_date(table: &'static str, column: &'static str, raw: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| LedgerError::Corrupt {
        table,
        column,
        value: raw.to_string(),
    })
}

fn parse_stored_month(table: &'static str, column: &'static str, raw: &str) -> LedgerResult<Month> {
    raw.parse::<Month>().map_err(|_| LedgerError::Corrupt {
        table,
        column,
        value: raw.to_string(),
    })
}
