//! Fee estimation for UTXO-model transactions.
//!
//! Size-based: `fee = ceil(rate × size / 1000)` with the usual P2PKH
//! size approximations. The fee quote comes from the chain client; any
//! quote failure degrades to the built-in default rate.

use sigil_core::constants::{
    DEFAULT_FEE_RATE_SAT_PER_KB, INPUT_SIZE_BYTES, OUTPUT_SIZE_BYTES, TX_OVERHEAD_BYTES,
};
use sigil_sync::ChainClient;

/// Estimated serialized size of a transaction in bytes.
pub fn estimate_tx_size(n_inputs: usize, n_outputs: usize) -> u64 {
    (n_inputs as u64)
        .saturating_mul(INPUT_SIZE_BYTES)
        .saturating_add((n_outputs as u64).saturating_mul(OUTPUT_SIZE_BYTES))
        .saturating_add(TX_OVERHEAD_BYTES)
}

/// Fee for a transaction shape at a given rate, minimum 1 satoshi.
pub fn estimate_fee(rate_sat_per_kb: u64, n_inputs: usize, n_outputs: usize) -> u64 {
    let size = estimate_tx_size(n_inputs, n_outputs);
    rate_sat_per_kb.saturating_mul(size).div_ceil(1000).max(1)
}

/// The client's fee quote, or the default rate on any failure.
pub async fn fee_rate_or_default<C>(client: &C) -> u64
where
    C: ChainClient + ?Sized,
{
    match client.get_fee_quote().await {
        Ok(quote) => {
            tracing::debug!(rate = quote.rate_sat_per_kb, source = %quote.source, "fee quote");
            quote.rate_sat_per_kb
        }
        Err(e) => {
            tracing::warn!(error = %e, default = DEFAULT_FEE_RATE_SAT_PER_KB, "fee quote failed, using default rate");
            DEFAULT_FEE_RATE_SAT_PER_KB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sigil_sync::{ChainUtxo, ClientError, FeeQuote};

    #[test]
    fn size_model() {
        // 2 inputs, 2 outputs: 2*148 + 2*34 + 10 = 374 bytes.
        assert_eq!(estimate_tx_size(2, 2), 374);
    }

    #[test]
    fn fee_rounds_up() {
        // 1 input, 1 output: 192 bytes. 500 sat/kB -> 96 sat exactly.
        assert_eq!(estimate_fee(500, 1, 1), 96);
        // 1000 sat/kB over 193 bytes would be 193; over 192 bytes, 192.
        assert_eq!(estimate_fee(1000, 1, 1), 192);
        // Sub-1000 rates still charge at least 1 sat.
        assert_eq!(estimate_fee(1, 1, 1), 1);
    }

    struct QuotingClient {
        quote: Option<u64>,
    }

    #[async_trait]
    impl ChainClient for QuotingClient {
        async fn list_utxos(&self, _address: &str) -> Result<Vec<ChainUtxo>, ClientError> {
            Ok(Vec::new())
        }

        async fn get_fee_quote(&self) -> Result<FeeQuote, ClientError> {
            match self.quote {
                Some(rate) => Ok(FeeQuote {
                    rate_sat_per_kb: rate,
                    source: "test".into(),
                }),
                None => Err(ClientError::Network("quote down".into())),
            }
        }
    }

    #[tokio::test]
    async fn uses_quote_when_available() {
        let client = QuotingClient { quote: Some(750) };
        assert_eq!(fee_rate_or_default(&client).await, 750);
    }

    #[tokio::test]
    async fn falls_back_to_default() {
        let client = QuotingClient { quote: None };
        assert_eq!(
            fee_rate_or_default(&client).await,
            DEFAULT_FEE_RATE_SAT_PER_KB
        );
    }
}
