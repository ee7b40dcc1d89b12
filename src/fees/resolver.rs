//! Recovers a transaction's fee from its inputs and outputs.
//!
//! Fee = sum(spent previous outputs) - sum(outputs). Previous transactions
//! that cannot be fetched are skipped, so the input sum may undercount; the
//! bounds below catch the worst of that.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::rpc::{BitcoinRpc, RawTransaction, RpcError};

/// Smallest accepted fee, in sats.
pub const MIN_FEE_SATS: i64 = 1;
/// Largest accepted fee: 0.1 BTC.
pub const MAX_FEE_SATS: i64 = 10_000_000;

/// Anything that can hand out decoded transactions.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError>;

    /// False when calls are certain to fail (e.g. no credentials).
    fn is_available(&self) -> bool {
        true
    }
}

#[async_trait]
impl TransactionSource for BitcoinRpc {
    async fn raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
        self.get_raw_transaction(txid).await
    }

    fn is_available(&self) -> bool {
        self.is_configured()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBounds {
    pub min_sats: i64,
    pub max_sats: i64,
}

impl Default for FeeBounds {
    fn default() -> Self {
        Self {
            min_sats: MIN_FEE_SATS,
            max_sats: MAX_FEE_SATS,
        }
    }
}

impl FeeBounds {
    pub fn contains(&self, fee: i64) -> bool {
        (self.min_sats..=self.max_sats).contains(&fee)
    }
}

/// Input/output accounting for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub total_input: i64,
    pub total_output: i64,
    pub fee: i64,
    pub inputs_resolved: usize,
    pub inputs_skipped: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    #[error("could not fetch transaction: {0}")]
    Primary(#[source] RpcError),
    #[error("no input value could be resolved")]
    NoInputValue(FeeBreakdown),
    #[error("fee {} sats outside accepted bounds", .0.fee)]
    OutOfBounds(FeeBreakdown),
}

pub struct FeeResolver {
    source: Arc<dyn TransactionSource>,
    bounds: FeeBounds,
}

impl FeeResolver {
    pub fn new(source: Arc<dyn TransactionSource>) -> Self {
        Self {
            source,
            bounds: FeeBounds::default(),
        }
    }

    pub fn with_bounds(mut self, bounds: FeeBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn is_available(&self) -> bool {
        self.source.is_available()
    }

    /// Fee in sats, or `None` when it cannot be determined.
    pub async fn resolve_fee(&self, txid: &str) -> Option<u64> {
        match self.resolve_detailed(txid).await {
            Ok(breakdown) => u64::try_from(breakdown.fee).ok(),
            Err(err) => {
                warn!(txid = txid, error = %err, "Fee not resolved");
                None
            }
        }
    }

    pub async fn resolve_detailed(&self, txid: &str) -> Result<FeeBreakdown, FeeError> {
        let tx = self.source.raw_transaction(txid).await.map_err(FeeError::Primary)?;
        let total_output: i64 = tx.vout.iter().map(|out| out.value_sats()).sum();

        // Several inputs often spend outputs of the same parent
        let mut parents: HashMap<&str, Option<RawTransaction>> = HashMap::new();
        let mut total_input = 0i64;
        let mut inputs_resolved = 0usize;
        let mut inputs_skipped = 0usize;

        for input in &tx.vin {
            let Some((prev_txid, index)) = input.previous_output() else {
                inputs_skipped += 1;
                continue;
            };
            if !parents.contains_key(prev_txid) {
                let fetched = match self.source.raw_transaction(prev_txid).await {
                    Ok(parent) => Some(parent),
                    Err(err) => {
                        debug!(txid = txid, prev_txid = prev_txid, error = %err, "Previous transaction unavailable");
                        None
                    }
                };
                parents.insert(prev_txid, fetched);
            }
            match parents
                .get(prev_txid)
                .and_then(Option::as_ref)
                .and_then(|parent| parent.vout.get(index))
            {
                Some(spent) => {
                    total_input += spent.value_sats();
                    inputs_resolved += 1;
                }
                None => inputs_skipped += 1,
            }
        }

        let breakdown = FeeBreakdown {
            total_input,
            total_output,
            fee: total_input - total_output,
            inputs_resolved,
            inputs_skipped,
        };
        if total_input <= 0 {
            return Err(FeeError::NoInputValue(breakdown));
        }
        if !self.bounds.contains(breakdown.fee) {
            return Err(FeeError::OutOfBounds(breakdown));
        }
        Ok(breakdown)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rpc::{TxInput, TxOutput};
    use parking_lot::Mutex;

    /// In-memory node keyed by txid; unknown ids answer with RPC error -5.
    #[derive(Default)]
    pub(crate) struct FakeNode {
        pub txs: HashMap<String, RawTransaction>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeNode {
        pub fn with(mut self, tx: RawTransaction) -> Self {
            self.txs.insert(tx.txid.clone(), tx);
            self
        }

        pub fn call_count(&self, txid: &str) -> usize {
            self.calls.lock().iter().filter(|t| t.as_str() == txid).count()
        }
    }

    #[async_trait]
    impl TransactionSource for FakeNode {
        async fn raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
            self.calls.lock().push(txid.to_string());
            self.txs.get(txid).cloned().ok_or(RpcError::Remote {
                code: -5,
                message: "No such mempool or blockchain transaction".to_string(),
            })
        }
    }

    pub(crate) fn tx(txid: &str, inputs: &[(&str, u32)], outputs_btc: &[f64]) -> RawTransaction {
        RawTransaction {
            txid: txid.to_string(),
            vin: inputs
                .iter()
                .map(|(prev, vout)| TxInput {
                    txid: Some(prev.to_string()),
                    vout: Some(*vout),
                    coinbase: None,
                })
                .collect(),
            vout: outputs_btc
                .iter()
                .enumerate()
                .map(|(n, value)| TxOutput { value: *value, n: n as u32 })
                .collect(),
        }
    }

    fn resolver(node: FakeNode) -> (Arc<FakeNode>, FeeResolver) {
        let node = Arc::new(node);
        (node.clone(), FeeResolver::new(node))
    }

    #[tokio::test]
    async fn test_fee_from_single_input() {
        let node = FakeNode::default()
            .with(tx("child", &[("parent", 0)], &[0.5, 0.49]))
            .with(tx("parent", &[], &[1.0]));
        let (_, resolver) = resolver(node);
        assert_eq!(resolver.resolve_fee("child").await, Some(1_000_000));
    }

    #[tokio::test]
    async fn test_all_parent_lookups_fail() {
        let node = FakeNode::default().with(tx("child", &[("gone", 0), ("gone2", 1)], &[0.5]));
        let (_, resolver) = resolver(node);
        assert_eq!(resolver.resolve_fee("child").await, None);
        assert!(matches!(
            resolver.resolve_detailed("child").await,
            Err(FeeError::NoInputValue(FeeBreakdown { inputs_skipped: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn test_zero_fee_rejected() {
        let node = FakeNode::default()
            .with(tx("child", &[("parent", 0)], &[1.0]))
            .with(tx("parent", &[], &[1.0]));
        let (_, resolver) = resolver(node);
        assert_eq!(resolver.resolve_fee("child").await, None);
    }

    #[tokio::test]
    async fn test_fee_above_ceiling_rejected() {
        let node = FakeNode::default()
            .with(tx("child", &[("parent", 0)], &[0.5]))
            .with(tx("parent", &[], &[0.7]));
        let (_, resolver) = resolver(node);
        assert!(matches!(
            resolver.resolve_detailed("child").await,
            Err(FeeError::OutOfBounds(FeeBreakdown { fee: 20_000_000, .. }))
        ));
        assert_eq!(resolver.resolve_fee("child").await, None);
    }

    #[tokio::test]
    async fn test_ceiling_is_inclusive() {
        let node = FakeNode::default()
            .with(tx("child", &[("parent", 0)], &[0.9]))
            .with(tx("parent", &[], &[1.0]));
        let (_, resolver) = resolver(node);
        assert_eq!(resolver.resolve_fee("child").await, Some(10_000_000));
    }

    #[tokio::test]
    async fn test_partial_inputs_and_bad_index_are_skipped() {
        let node = FakeNode::default()
            .with(tx("child", &[("parent", 1), ("parent", 7), ("missing", 0)], &[0.2]))
            .with(tx("parent", &[], &[5.0, 0.2001]));
        let (_, resolver) = resolver(node);
        let breakdown = resolver.resolve_detailed("child").await.unwrap();
        assert_eq!(breakdown.fee, 10_000);
        assert_eq!(breakdown.inputs_resolved, 1);
        assert_eq!(breakdown.inputs_skipped, 2);
    }

    #[tokio::test]
    async fn test_shared_parent_fetched_once() {
        let node = FakeNode::default()
            .with(tx("child", &[("parent", 0), ("parent", 1)], &[0.3]))
            .with(tx("parent", &[], &[0.2, 0.1001]));
        let (node, resolver) = resolver(node);
        assert_eq!(resolver.resolve_fee("child").await, Some(10_000));
        assert_eq!(node.call_count("parent"), 1);
    }

    #[tokio::test]
    async fn test_coinbase_input_contributes_nothing() {
        let mut coinbase = tx("cb", &[], &[3.125]);
        coinbase.vin.push(TxInput { txid: None, vout: None, coinbase: Some("03".to_string()) });
        let node = FakeNode::default().with(coinbase);
        let (_, resolver) = resolver(node);
        assert_eq!(resolver.resolve_fee("cb").await, None);
    }

    #[tokio::test]
    async fn test_primary_failure() {
        let (_, resolver) = resolver(FakeNode::default());
        assert!(matches!(resolver.resolve_detailed("nope").await, Err(FeeError::Primary(_))));
    }
}
