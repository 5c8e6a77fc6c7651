//! Post-restore verification

use crate::{backup::BackupChain, Error, Result};
use ledger_core::{Account, AccountBalance, AccountId, Balance, LedgerStore, TransactionLeg, TxnId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Compares a restored dataset against the state captured before the wipe
#[derive(Debug, Clone)]
pub struct ConsistencyOracle {
    store: Arc<dyn LedgerStore>,
    initial_balance: Balance,
    verify_ledger: bool,
}

impl ConsistencyOracle {
    /// Create new oracle
    pub fn new(store: Arc<dyn LedgerStore>, initial_balance: Balance, verify_ledger: bool) -> Self {
        Self {
            store,
            initial_balance,
            verify_ledger,
        }
    }

    /// Check the restored balances against `expected` (ordered by id), then
    /// audit the ledger tables if enabled
    pub async fn verify(&self, expected: &[AccountBalance], chain: &BackupChain) -> Result<()> {
        let observed = self.store.account_balances().await?;
        compare_balances(expected, &observed)?;

        if self.verify_ledger {
            let accounts = self.store.accounts().await?;
            let legs = self.store.transaction_legs().await?;
            audit_ledger(&accounts, &legs, self.initial_balance)?;
            debug!("Ledger audit passed over {} legs", legs.len());
        }

        info!(
            "restore from backup 0-{} verified",
            chain.next_backup_index.saturating_sub(1)
        );
        Ok(())
    }
}

fn compare_balances(expected: &[AccountBalance], observed: &[AccountBalance]) -> Result<()> {
    if expected.len() != observed.len() {
        return Err(Error::AccountCountMismatch {
            expected: expected.len(),
            observed: observed.len(),
        });
    }

    match expected.iter().zip(observed).find(|(e, o)| e != o) {
        Some((e, o)) if e.id != o.id => Err(Error::InvariantViolation(format!(
            "restored account {} found where account {} was expected",
            o.id, e.id
        ))),
        Some((e, o)) => Err(Error::BalanceMismatch {
            account_id: e.id,
            expected: e.balance,
            observed: o.balance,
        }),
        None => Ok(()),
    }
}

/// Audit a ledger snapshot.
///
/// Checks money conservation, that every transaction has exactly two legs
/// summing to zero, and that replaying each account's legs in transaction id
/// order from `initial_balance` reproduces every running balance and ends at
/// the account's balance.
pub fn audit_ledger(
    accounts: &[Account],
    legs: &[TransactionLeg],
    initial_balance: Balance,
) -> Result<()> {
    let total: Balance = accounts.iter().map(|a| a.balance).sum();
    let expected_total = initial_balance * accounts.len() as Balance;
    if total != expected_total {
        return Err(Error::AuditFailed(format!(
            "total balance {} over {} accounts, expected {}",
            total,
            accounts.len(),
            expected_total
        )));
    }

    if let Some(account) = accounts.iter().find(|a| a.balance < 0) {
        return Err(Error::AuditFailed(format!(
            "account {} has negative balance {}",
            account.id, account.balance
        )));
    }

    let mut by_txn: BTreeMap<TxnId, Vec<&TransactionLeg>> = BTreeMap::new();
    let mut by_account: BTreeMap<AccountId, Vec<&TransactionLeg>> = BTreeMap::new();
    for leg in legs {
        by_txn.entry(leg.txn_id).or_default().push(leg);
        by_account.entry(leg.account_id).or_default().push(leg);
    }

    for (txn_id, txn_legs) in &by_txn {
        if txn_legs.len() != 2 {
            return Err(Error::AuditFailed(format!(
                "transaction {} has {} legs",
                txn_id,
                txn_legs.len()
            )));
        }
        let net: Balance = txn_legs.iter().map(|leg| leg.amount).sum();
        if net != 0 {
            return Err(Error::AuditFailed(format!(
                "legs of transaction {} sum to {}",
                txn_id, net
            )));
        }
    }

    let mut audited = 0;
    for account in accounts {
        let mut running = initial_balance;
        if let Some(account_legs) = by_account.get_mut(&account.id) {
            account_legs.sort_by_key(|leg| leg.txn_id);
            for leg in account_legs.iter() {
                running += leg.amount;
                if running != leg.running_balance {
                    return Err(Error::AuditFailed(format!(
                        "account {} transaction {}: running balance {}, replayed {}",
                        account.id, leg.txn_id, leg.running_balance, running
                    )));
                }
            }
            audited += 1;
        }
        if running != account.balance {
            return Err(Error::AuditFailed(format!(
                "account {} balance {}, replayed legs give {}",
                account.id, account.balance, running
            )));
        }
    }

    if audited != by_account.len() {
        let orphan = by_account
            .keys()
            .find(|id| !accounts.iter().any(|a| a.id == **id));
        return Err(Error::AuditFailed(format!(
            "legs reference unknown account {:?}",
            orphan
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: AccountId, balance: Balance) -> Account {
        Account::seeded(id, balance, "r")
    }

    fn transfer(
        txn_id: TxnId,
        from: (AccountId, Balance),
        to: (AccountId, Balance),
        amount: Balance,
    ) -> [TransactionLeg; 2] {
        [
            TransactionLeg::debit(txn_id, from.0, amount, from.1, "d"),
            TransactionLeg::credit(txn_id, to.0, amount, to.1, "c"),
        ]
    }

    #[test]
    fn test_balanced_ledger_passes() {
        let mut legs = Vec::new();
        legs.extend(transfer(1, (0, 1000), (1, 1000), 100));
        legs.extend(transfer(2, (1, 1100), (2, 1000), 50));
        let accounts = vec![account(0, 900), account(1, 1050), account(2, 1050)];

        audit_ledger(&accounts, &legs, 1000).unwrap();
    }

    #[test]
    fn test_conservation_violation() {
        let accounts = vec![account(0, 1000), account(1, 999)];
        let err = audit_ledger(&accounts, &[], 1000).unwrap_err();
        assert!(matches!(err, Error::AuditFailed(msg) if msg.contains("total balance 1999")));
    }

    #[test]
    fn test_single_leg_transaction() {
        let legs = vec![TransactionLeg::debit(1, 0, 10, 1000, "d")];
        let accounts = vec![account(0, 990), account(1, 1010)];
        let err = audit_ledger(&accounts, &legs, 1000).unwrap_err();
        assert!(matches!(err, Error::AuditFailed(msg) if msg.contains("1 legs")));
    }

    #[test]
    fn test_running_balance_gap() {
        let mut legs = Vec::new();
        legs.extend(transfer(1, (0, 1000), (1, 1000), 100));
        // txn 2 claims account 0 started from 1000 again
        legs.extend(transfer(2, (0, 1000), (1, 1100), 100));
        let accounts = vec![account(0, 800), account(1, 1200)];

        let err = audit_ledger(&accounts, &legs, 1000).unwrap_err();
        assert!(matches!(err, Error::AuditFailed(msg) if msg.contains("transaction 2")));
    }

    #[test]
    fn test_account_without_legs_must_keep_initial_balance() {
        let legs = transfer(1, (0, 1000), (1, 1000), 10).to_vec();
        let accounts = vec![account(0, 990), account(1, 1000), account(2, 1010)];
        assert!(audit_ledger(&accounts, &legs, 1000).is_err());
    }

    #[test]
    fn test_compare_balances() {
        let expected = vec![AccountBalance::new(0, 990), AccountBalance::new(1, 1010)];
        assert!(compare_balances(&expected, &expected).is_ok());

        let observed = vec![AccountBalance::new(0, 990), AccountBalance::new(1, 1000)];
        assert!(matches!(
            compare_balances(&expected, &observed),
            Err(Error::BalanceMismatch { account_id: 1, expected: 1010, observed: 1000 })
        ));

        assert!(matches!(
            compare_balances(&expected, &observed[..1]),
            Err(Error::AccountCountMismatch { expected: 2, observed: 1 })
        ));
    }

    #[test]
    fn test_compare_balances_reports_swapped_account() {
        let expected = vec![AccountBalance::new(0, 990), AccountBalance::new(1, 1010)];
        // same count, but account 1 came back as account 7
        let observed = vec![AccountBalance::new(0, 990), AccountBalance::new(7, 1010)];

        match compare_balances(&expected, &observed) {
            Err(Error::InvariantViolation(msg)) => {
                assert!(msg.contains("account 7"));
                assert!(msg.contains("account 1"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
