use crate::error::{LedgerError, LedgerResult};
use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// The only charge type generated by this ledger.
pub const CHARGE_TYPE_TUITION: &str = "TUITION";

/// Largest magnitude accepted for a single amount typed by a user (10^12).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// A calendar month with no day or time component.
///
/// Internally anchored on the first day of the month, which is also the key
/// used for `charges.charge_month` in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month(NaiveDate);

impl Month {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Self)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.with_day(1).unwrap_or(date))
    }

    pub fn year(self) -> i32 {
        self.0.year()
    }

    pub fn month(self) -> u32 {
        self.0.month()
    }

    pub fn first_day(self) -> NaiveDate {
        self.0
    }

    pub fn last_day(self) -> NaiveDate {
        let days = days_in_month(self.year(), self.month());
        self.0 + Days::new(u64::from(days - 1))
    }

    /// Shifts by a signed number of months. `None` only at the edges of chrono's range.
    pub fn offset(self, months: i32) -> Option<Self> {
        let index = i64::from(self.year()) * 12 + i64::from(self.month() - 1) + i64::from(months);
        let year = i32::try_from(index.div_euclid(12)).ok()?;
        let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
        Self::new(year, month)
    }

    pub fn next(self) -> Option<Self> {
        self.offset(1)
    }

    pub fn prev(self) -> Option<Self> {
        self.offset(-1)
    }

    /// Months from `start` through `end`, inclusive. Empty when `start > end`.
    pub fn range_inclusive(start: Month, end: Month) -> MonthRange {
        MonthRange {
            next: Some(start),
            end,
        }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
            if leap { 29 } else { 28 }
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for Month {
    type Err = LedgerError;

    /// Accepts `YYYY-MM`, `YYYY/MM`, and full dates (`YYYY-MM-DD`) truncated to their month.
    fn from_str(raw: &str) -> LedgerResult<Self> {
        let invalid = || LedgerError::validation(format!("Invalid month '{raw}'. Expected YYYY-MM"));

        let t = raw.trim().replace('/', "-");
        if t.len() == 10 {
            let date = NaiveDate::parse_from_str(&t, "%Y-%m-%d").map_err(|_| invalid())?;
            return Ok(Self::from_date(date));
        }

        let (y, m) = t.split_once('-').ok_or_else(invalid)?;
        if y.len() != 4 || m.is_empty() || m.len() > 2 {
            return Err(invalid());
        }
        if !y.chars().all(|c| c.is_ascii_digit()) || !m.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let year: i32 = y.parse().map_err(|_| invalid())?;
        let month: u32 = m.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

#[derive(Debug, Clone)]
pub struct MonthRange {
    next: Option<Month>,
    end: Month,
}

impl Iterator for MonthRange {
    type Item = Month;

    fn next(&mut self) -> Option<Month> {
        let cur = self.next.filter(|m| *m <= self.end)?;
        self.next = cur.next();
        Some(cur)
    }
}

/// What a balance or report is computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Account(i64),
    /// Every account carrying this group label.
    Batch(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Account(id) => write!(f, "account #{id}"),
            Scope::Batch(label) => write!(f, "batch '{label}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub batch: String,
    pub cgpa: Option<f64>,
    pub semester_cgpa: Option<f64>,
    pub billing_start: Month,
}

/// A validated account record ready to be inserted or upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub batch: String,
    pub cgpa: Option<f64>,
    pub semester_cgpa: Option<f64>,
    pub billing_start: Month,
}

/// Unvalidated account fields as typed by a user or read from a file.
#[derive(Debug, Clone, Default)]
pub struct RawAccount {
    pub code: String,
    pub name: String,
    pub batch: String,
    pub cgpa: Option<String>,
    pub semester_cgpa: Option<String>,
    pub billing_start: Option<String>,
}

impl RawAccount {
    /// Validates and normalises the record. A blank billing start means `today`'s month.
    pub fn validate(self, today: NaiveDate) -> LedgerResult<NewAccount> {
        let code = required("Account code", &self.code)?;
        let name = required("Name", &self.name)?;
        let batch = normalize_batch(&self.batch);
        if batch.is_empty() {
            return Err(LedgerError::validation("Batch is required."));
        }

        Ok(NewAccount {
            code,
            name,
            batch,
            cgpa: parse_score(self.cgpa.as_deref(), "CGPA")?,
            semester_cgpa: parse_score(self.semester_cgpa.as_deref(), "Semester CGPA")?,
            billing_start: parse_billing_start(self.billing_start.as_deref(), today)?,
        })
    }
}

fn required(label: &str, value: &str) -> LedgerResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(LedgerError::validation(format!("{label} is required.")));
    }
    Ok(v.to_string())
}

/// `"50"` becomes `"50th"`; the word "batch" is dropped (`"50th batch"` -> `"50th"`).
pub fn normalize_batch(raw: &str) -> String {
    let b = raw.trim();
    if !b.is_empty() && b.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = b.parse::<u64>() {
            return format!("{n}{}", ordinal_suffix(n));
        }
    }

    b.split_whitespace()
        .filter(|w| !w.eq_ignore_ascii_case("batch"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn ordinal_suffix(n: u64) -> &'static str {
    if (11..=13).contains(&(n % 100)) {
        return "th";
    }
    match n % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

pub fn parse_score(raw: Option<&str>, label: &str) -> LedgerResult<Option<f64>> {
    let Some(t) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    let v: f64 = t
        .parse()
        .map_err(|_| LedgerError::validation(format!("{label} must be a number, got '{t}'")))?;
    if !(0.0..=4.0).contains(&v) {
        return Err(LedgerError::validation(format!(
            "{label} must be between 0.0 and 4.0"
        )));
    }
    Ok(Some(v))
}

pub fn parse_billing_start(raw: Option<&str>, today: NaiveDate) -> LedgerResult<Month> {
    match raw.map(str::trim).filter(|t| !t.is_empty()) {
        None => Ok(Month::from_date(today)),
        Some(t) => t.parse::<Month>().map_err(|_| {
            LedgerError::validation(format!(
                "Invalid billing start month '{t}'. Expected YYYY-MM"
            ))
        }),
    }
}

pub fn parse_amount(raw: &str, field: &str) -> LedgerResult<Decimal> {
    let t = raw.trim();
    let amount = t
        .parse::<Decimal>()
        .map_err(|_| LedgerError::validation(format!("Invalid {field}: '{t}' is not a number")))?;
    if amount.abs() > MAX_AMOUNT {
        return Err(LedgerError::validation(format!(
            "Invalid {field}: '{t}' exceeds {MAX_AMOUNT} in magnitude"
        )));
    }
    Ok(amount)
}

pub fn parse_date(raw: &str, field: &str) -> LedgerResult<NaiveDate> {
    let t = raw.trim();
    NaiveDate::parse_from_str(t, "%Y-%m-%d").map_err(|_| {
        LedgerError::validation(format!("Invalid {field}: '{t}'. Expected YYYY-MM-DD"))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Charge {
    pub id: i64,
    pub account_id: i64,
    pub month: Month,
    pub amount: Decimal,
    pub charge_type: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub id: i64,
    pub account_id: i64,
    pub date: NaiveDate,
    /// Signed: positive increases the amount owed.
    pub amount: Decimal,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub account_id: i64,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub account_id: i64,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub note: Option<String>,
}

/// Summed amounts of the three event streams over some cutoff or month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamTotals {
    pub charges: Decimal,
    pub adjustments: Decimal,
    pub payments: Decimal,
}

impl StreamTotals {
    /// `charges + adjustments - payments`, or [`LedgerError::Overflow`].
    pub fn net(&self) -> LedgerResult<Decimal> {
        self.charges
            .checked_add(self.adjustments)
            .and_then(|v| v.checked_sub(self.payments))
            .ok_or(LedgerError::Overflow("balance"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyRow {
    pub month: Month,
    pub charges: Decimal,
    pub adjustments: Decimal,
    pub payments: Decimal,
    pub net_change: Decimal,
    pub ending_balance: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub processed: usize,
    pub failed: usize,
}
