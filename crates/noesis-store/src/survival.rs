use anyhow::Result;
use rusqlite::params;

use crate::store::{now_ms, Store};

/// §6.6: HOURLY_DEBT = 250/720 (≈$0.347/hr); DAILY_DEBT = 250/30.
pub const HOURLY_DEBT: f64 = 250.0 / 720.0;
pub const DAILY_DEBT: f64 = 250.0 / 30.0;

impl Store {
    pub fn survival_credit(&self, amount: f64, reason: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO survival_ledger (amount, reason, created_at) VALUES (?1, ?2, ?3)",
            params![amount, reason, now_ms()],
        )?;
        Ok(())
    }

    pub fn survival_debit(&self, amount: f64, reason: &str) -> Result<()> {
        self.survival_credit(-amount.abs(), reason)
    }

    /// Balance = sum of all ledger amounts (§8 universal invariant).
    pub fn survival_balance(&self) -> Result<f64> {
        let conn = self.conn.lock().unwrap();
        let total: Option<f64> =
            conn.query_row("SELECT SUM(amount) FROM survival_ledger", [], |r| r.get(0))?;
        Ok(total.unwrap_or(0.0))
    }

    fn survival_last_debt_at(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let last: Option<i64> = conn.query_row(
            "SELECT created_at FROM survival_ledger WHERE reason = 'hourly_debt' ORDER BY created_at DESC LIMIT 1",
            [],
            |r| r.get(0),
        ).ok();
        Ok(last)
    }

    /// Apply any overdue hourly debt since the last debt entry (§4.8 step 2):
    /// appends `-hours_since_last_debt * HOURLY_DEBT`. The first call seeds the
    /// anchor without charging anything (there is no "since" yet).
    pub fn survival_apply_overdue_debt(&self) -> Result<f64> {
        let now = now_ms();
        match self.survival_last_debt_at()? {
            None => {
                self.survival_debit(0.0, "hourly_debt")?;
                Ok(0.0)
            }
            Some(last) => {
                let hours = (now - last) as f64 / (60.0 * 60.0 * 1000.0);
                if hours <= 0.0 {
                    return Ok(0.0);
                }
                let debt = hours * HOURLY_DEBT;
                self.survival_debit(debt, "hourly_debt")?;
                Ok(debt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_is_sum_of_amounts() {
        let store = Store::open_memory().unwrap();
        store.survival_credit(1.0, "progress").unwrap();
        store.survival_credit(0.5, "partial").unwrap();
        store.survival_debit(0.25, "upkeep").unwrap();
        assert!((store.survival_balance().unwrap() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_first_overdue_debt_call_seeds_without_charging() {
        let store = Store::open_memory().unwrap();
        let debt = store.survival_apply_overdue_debt().unwrap();
        assert_eq!(debt, 0.0);
        assert_eq!(store.survival_balance().unwrap(), 0.0);
    }

    #[test]
    fn test_second_overdue_debt_call_charges_elapsed_hours() {
        let store = Store::open_memory().unwrap();
        store.survival_apply_overdue_debt().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            let two_hours_ago = now_ms() - 2 * 60 * 60 * 1000;
            conn.execute(
                "UPDATE survival_ledger SET created_at = ?1 WHERE reason = 'hourly_debt'",
                params![two_hours_ago],
            )
            .unwrap();
        }
        let debt = store.survival_apply_overdue_debt().unwrap();
        assert!((debt - 2.0 * HOURLY_DEBT).abs() < 1e-6);
    }
}
