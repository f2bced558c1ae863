//! UTXO selection: largest-first greedy with change, and sweep totals.

use sigil_core::types::StoredUtxo;

use crate::error::SpendError;
use crate::fee::estimate_fee;

/// A chosen input set with its fee and change breakdown.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Inputs to consume.
    pub inputs: Vec<StoredUtxo>,
    /// Sum of input values.
    pub total_input: u64,
    /// Amount delivered to the recipient.
    pub amount: u64,
    /// Estimated fee for the selected shape.
    pub fee: u64,
    /// Change returned to the wallet; zero for sweeps.
    pub change: u64,
}

/// Select inputs covering `target` plus fee, assuming one recipient
/// output and one change output.
///
/// Largest-first greedy: sorts descending by value and accumulates
/// until the running total covers target plus the fee for the current
/// input count.
pub fn select_utxos(
    pool: &[StoredUtxo],
    target: u64,
    rate_sat_per_kb: u64,
) -> Result<Selection, SpendError> {
    if pool.is_empty() {
        return Err(SpendError::NoSpendableUtxos);
    }
    if target == 0 {
        return Err(SpendError::InvalidAmount("amount must be non-zero".into()));
    }

    let mut candidates: Vec<StoredUtxo> = pool.to_vec();
    candidates.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.key().cmp(&b.key())));

    let mut inputs = Vec::new();
    let mut total: u64 = 0;

    for utxo in candidates {
        total = total.saturating_add(utxo.amount);
        inputs.push(utxo);

        let fee = estimate_fee(rate_sat_per_kb, inputs.len(), 2);
        let needed = target.saturating_add(fee);
        if total >= needed {
            return Ok(Selection {
                total_input: total,
                amount: target,
                fee,
                change: total - needed,
                inputs,
            });
        }
    }

    let fee = estimate_fee(rate_sat_per_kb, inputs.len(), 2);
    Err(SpendError::InsufficientFunds {
        have: total,
        need: target.saturating_add(fee),
    })
}

/// Consume every input in the pool, producing one output and no change.
///
/// The delivered amount is the total minus the fee for the all-input,
/// one-output shape; a fee that consumes the whole total is an error.
pub fn sweep_selection(pool: &[StoredUtxo], rate_sat_per_kb: u64) -> Result<Selection, SpendError> {
    if pool.is_empty() {
        return Err(SpendError::NoSpendableUtxos);
    }

    let inputs: Vec<StoredUtxo> = pool.to_vec();
    let total: u64 = inputs.iter().fold(0u64, |acc, u| acc.saturating_add(u.amount));
    let fee = estimate_fee(rate_sat_per_kb, inputs.len(), 1);

    if fee >= total {
        return Err(SpendError::FeeExceedsInput { fee, total });
    }

    Ok(Selection {
        total_input: total,
        amount: total - fee,
        fee,
        change: 0,
        inputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sigil_core::Chain;

    fn utxo(txid: &str, amount: u64) -> StoredUtxo {
        StoredUtxo {
            chain: Chain::Bsv,
            txid: txid.to_string(),
            vout: 0,
            amount,
            script_pubkey: String::new(),
            address: "1A".into(),
            confirmations: 1,
            spent: false,
            spent_txid: String::new(),
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn selects_single_covering_utxo() {
        let pool = vec![utxo("small", 1_000), utxo("big", 100_000)];
        let sel = select_utxos(&pool, 50_000, 500).unwrap();

        assert_eq!(sel.inputs.len(), 1);
        assert_eq!(sel.inputs[0].txid, "big");
        assert_eq!(sel.total_input, 100_000);
        assert_eq!(sel.change, 100_000 - 50_000 - sel.fee);
    }

    #[test]
    fn accumulates_until_covered() {
        let pool = vec![utxo("a", 30_000), utxo("b", 30_000), utxo("c", 30_000)];
        let sel = select_utxos(&pool, 55_000, 500).unwrap();

        assert_eq!(sel.inputs.len(), 2);
        assert!(sel.total_input >= 55_000 + sel.fee);
    }

    #[test]
    fn fee_grows_with_input_count() {
        let pool = vec![utxo("a", 30_000), utxo("b", 30_000)];
        let one = select_utxos(&pool, 10_000, 500).unwrap();
        let two = select_utxos(&pool, 55_000, 500).unwrap();
        assert!(two.fee > one.fee);
    }

    #[test]
    fn insufficient_funds_reports_have_and_need() {
        let pool = vec![utxo("a", 1_000)];
        let err = select_utxos(&pool, 100_000, 500).unwrap_err();
        match err {
            SpendError::InsufficientFunds { have, need } => {
                assert_eq!(have, 1_000);
                assert!(need > 100_000);
            }
            other => panic!("expected InsufficientFunds, got {other}"),
        }
    }

    #[test]
    fn empty_pool_rejected() {
        assert!(matches!(
            select_utxos(&[], 1_000, 500),
            Err(SpendError::NoSpendableUtxos)
        ));
        assert!(matches!(
            sweep_selection(&[], 500),
            Err(SpendError::NoSpendableUtxos)
        ));
    }

    #[test]
    fn zero_target_rejected() {
        let pool = vec![utxo("a", 1_000)];
        assert!(matches!(
            select_utxos(&pool, 0, 500),
            Err(SpendError::InvalidAmount(_))
        ));
    }

    #[test]
    fn sweep_consumes_everything() {
        let pool = vec![
            utxo("a", 100_000),
            utxo("b", 200_000),
            utxo("c", 300_000),
        ];
        let sel = sweep_selection(&pool, 500).unwrap();

        assert_eq!(sel.inputs.len(), 3);
        assert_eq!(sel.total_input, 600_000);
        assert_eq!(sel.amount, 600_000 - sel.fee);
        assert_eq!(sel.change, 0);
    }

    #[test]
    fn sweep_rejects_fee_eating_the_total() {
        let pool = vec![utxo("dust", 10)];
        let err = sweep_selection(&pool, 500).unwrap_err();
        assert!(matches!(err, SpendError::FeeExceedsInput { .. }));
    }

    #[test]
    fn selection_is_deterministic_for_equal_amounts() {
        let pool = vec![utxo("b", 1_000), utxo("a", 1_000)];
        let first = select_utxos(&pool, 500, 500).unwrap();
        let second = select_utxos(&pool, 500, 500).unwrap();
        assert_eq!(first.inputs[0].txid, second.inputs[0].txid);
    }
}
