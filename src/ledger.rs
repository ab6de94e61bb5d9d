//! Balance calculation, recurring charge generation and "set balance".
//!
//! Balances are never stored. Every figure is recomputed from the charge,
//! adjustment and payment streams, and history is only ever appended to.

use crate::db::Db;
use crate::domain::{Account, CHARGE_TYPE_TUITION, MAX_AMOUNT, Month, Scope};
use crate::error::{LedgerError, LedgerResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Differences smaller than this are treated as "already at the desired balance".
pub const SET_BALANCE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// Balance of an account or a whole batch as of the last day of `month`, inclusive.
///
/// For a batch the three streams are summed across every account carrying
/// the label before they are combined, so accounts without events simply
/// contribute nothing. No events at all yields exactly zero.
pub fn balance_as_of(db: &Db, scope: &Scope, month: Month) -> LedgerResult<Decimal> {
    let tx = db.begin()?;
    tx.totals_as_of(scope, month)?.net()
}

/// Balance of every account as of `month`. Accounts without events map to zero.
pub fn balances_as_of(db: &Db, accounts: &[Account], month: Month) -> LedgerResult<BTreeMap<i64, Decimal>> {
    let tx = db.begin()?;
    let known = tx.balances_by_account(month)?;
    Ok(accounts
        .iter()
        .map(|a| (a.id, known.get(&a.id).copied().unwrap_or(Decimal::ZERO)))
        .collect())
}

/// What a charge run posts: one `TUITION` charge of `monthly_fee` per month
/// from each account's billing start through `through`.
#[derive(Debug, Clone, Copy)]
pub struct ChargePlan {
    pub monthly_fee: Decimal,
    pub through: Month,
}

impl ChargePlan {
    fn validate(&self) -> LedgerResult<()> {
        if self.monthly_fee <= Decimal::ZERO {
            return Err(LedgerError::validation("Monthly fee must be greater than zero"));
        }
        if self.monthly_fee > MAX_AMOUNT {
            return Err(LedgerError::validation(format!(
                "Monthly fee must not exceed {MAX_AMOUNT}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ChargeFailure {
    pub code: String,
    pub error: LedgerError,
}

#[derive(Debug, Default)]
pub struct ChargeRun {
    /// Accounts whose charges are now complete through the target month.
    pub accounts: usize,
    /// Charges actually written; existing ones are not counted.
    pub created: usize,
    pub failures: Vec<ChargeFailure>,
}

/// Posts any missing charges for one account in a single transaction.
/// Returns the number of charges written (zero when already up to date).
pub fn generate_charges_for_account(
    db: &Db,
    account_id: i64,
    billing_start: Month,
    plan: &ChargePlan,
) -> LedgerResult<usize> {
    plan.validate()?;

    let tx = db.begin()?;
    let mut created = 0;
    for month in Month::range_inclusive(billing_start, plan.through) {
        if tx.insert_charge_if_missing(account_id, month, plan.monthly_fee, CHARGE_TYPE_TUITION)? {
            created += 1;
        }
    }
    tx.commit()?;
    Ok(created)
}

/// Runs [`generate_charges_for_account`] for every account on file.
///
/// Each account is its own unit of work: a failure is recorded in the
/// returned [`ChargeRun`] and the run moves on to the next account.
/// `on_account` is called once per account, after it has been processed.
pub fn generate_all_charges(
    db: &Db,
    plan: &ChargePlan,
    mut on_account: impl FnMut(),
) -> LedgerResult<ChargeRun> {
    plan.validate()?;

    let schedules = db.list_billing_schedules()?;
    let mut run = ChargeRun::default();

    for schedule in schedules {
        let result = schedule
            .billing_start_raw
            .parse::<Month>()
            .map_err(|_| LedgerError::Corrupt {
                table: "accounts",
                column: "billing_start_month",
                value: schedule.billing_start_raw.clone(),
            })
            .and_then(|start| generate_charges_for_account(db, schedule.account_id, start, plan));

        match result {
            Ok(created) => {
                run.accounts += 1;
                run.created += created;
            }
            Err(error) => {
                warn!(code = %schedule.code, %error, "charge generation failed for account");
                run.failures.push(ChargeFailure {
                    code: schedule.code,
                    error,
                });
            }
        }
        on_account();
    }

    info!(
        through = %plan.through,
        accounts = run.accounts,
        created = run.created,
        failed = run.failures.len(),
        "charge run finished"
    );
    Ok(run)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetBalanceOutcome {
    /// The balance was already within [`SET_BALANCE_EPSILON`]; nothing written.
    Unchanged { balance: Decimal },
    Adjusted { adjustment_id: i64, delta: Decimal },
}

/// Makes the account's balance as of `today`'s month equal `desired` by
/// appending one adjustment of `desired - current`, dated `today`.
///
/// Existing events are never touched, so balances of earlier months stay
/// as they were. The read and the append share one transaction.
pub fn set_balance(
    db: &Db,
    account_id: i64,
    desired: Decimal,
    note: Option<&str>,
    today: NaiveDate,
) -> LedgerResult<SetBalanceOutcome> {
    if desired.abs() > MAX_AMOUNT {
        return Err(LedgerError::validation(format!(
            "Balance must not exceed {MAX_AMOUNT} in magnitude"
        )));
    }

    let tx = db.begin()?;
    if db.get_account(account_id)?.is_none() {
        return Err(LedgerError::AccountNotFound(format!("#{account_id}")));
    }

    let current = tx
        .totals_as_of(&Scope::Account(account_id), Month::from_date(today))?
        .net()?;
    let delta = desired.checked_sub(current).ok_or_else(|| {
        LedgerError::validation(format!(
            "Cannot set balance to {desired}: the difference from {current} is out of range"
        ))
    })?;
    if delta.abs() < SET_BALANCE_EPSILON {
        return Ok(SetBalanceOutcome::Unchanged { balance: current });
    }

    let note = match note.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.to_string(),
        None => format!("Set balance to {desired}"),
    };
    let adjustment_id = tx.insert_adjustment(account_id, today, delta, Some(&note))?;
    tx.commit()?;

    info!(account_id, %current, %desired, %delta, "balance set via adjustment");
    Ok(SetBalanceOutcome::Adjusted {
        adjustment_id,
        delta,
    })
}
