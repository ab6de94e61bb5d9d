use crate::db::Db;
use crate::domain::{Month, MonthlyRow, Scope, StreamTotals};
use crate::error::{LedgerError, LedgerResult};
use rust_decimal::Decimal;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyReport {
    pub scope: Scope,
    /// Balance carried in from the end of the month before the first row.
    pub opening_balance: Decimal,
    /// One row per calendar month in the window, oldest first, including idle months.
    pub rows: Vec<MonthlyRow>,
}

impl MonthlyReport {
    pub fn closing_balance(&self) -> Decimal {
        self.rows
            .last()
            .map(|r| r.ending_balance)
            .unwrap_or(self.opening_balance)
    }
}

/// Builds the month-by-month reconciliation for `[end - months_back, end]`.
///
/// Negative `months_back` is treated as zero (a single-month report). All
/// reads come from one snapshot; nothing is written.
pub fn monthly_report(
    db: &Db,
    scope: &Scope,
    end: Month,
    months_back: i64,
) -> LedgerResult<MonthlyReport> {
    let months_back = i32::try_from(months_back.max(0))
        .map_err(|_| LedgerError::validation("Report window is too large"))?;
    let start = end
        .offset(-months_back)
        .ok_or_else(|| LedgerError::validation("Report window is out of range"))?;
    let before = start
        .prev()
        .ok_or_else(|| LedgerError::validation("Report window is out of range"))?;

    debug!(%scope, %start, %end, "building monthly report");
    let tx = db.begin()?;
    let opening_balance = tx.totals_as_of(scope, before)?.net()?;
    let by_month = tx.monthly_totals(scope, start, end)?;

    let mut running = opening_balance;
    let mut rows = Vec::new();
    for month in Month::range_inclusive(start, end) {
        let totals = by_month.get(&month).copied().unwrap_or_default();
        let net_change = totals.net()?;
        running = running
            .checked_add(net_change)
            .ok_or(LedgerError::Overflow("balance"))?;
        rows.push(row(month, totals, net_change, running));
    }

    Ok(MonthlyReport {
        scope: scope.clone(),
        opening_balance,
        rows,
    })
}

fn row(month: Month, totals: StreamTotals, net_change: Decimal, ending_balance: Decimal) -> MonthlyRow {
    MonthlyRow {
        month,
        charges: totals.charges,
        adjustments: totals.adjustments,
        payments: totals.payments,
        net_change,
        ending_balance,
    }
}
