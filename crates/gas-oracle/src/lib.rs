#![forbid(unsafe_code)]

use common::{Address, format_native};
use node_client::{CallRequest, NodeProvider, NodeResult};
use serde::{Deserialize, Serialize};

/// 0.01 native units at 18 decimals. Balances at or above this clear the
/// sufficiency check; the boundary itself is sufficient.
pub const MIN_GAS_THRESHOLD_WEI: u128 = 10_000_000_000_000_000;

pub const GAS_BUFFER_PERCENT: u128 = 20;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct GasStatus {
    pub native_balance_wei: u128,
    pub has_sufficient_gas: bool,
    pub minimum_required_wei: u128,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct GasEstimate {
    pub gas_limit: u64,
    pub gas_cost_wei: u128,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WalletView {
    Disconnected,
    Connected { balance_wei: u128 },
}

pub fn has_sufficient_gas(balance_wei: u128) -> bool {
    balance_wei >= MIN_GAS_THRESHOLD_WEI
}

pub fn gas_status(balance_wei: u128) -> GasStatus {
    GasStatus {
        native_balance_wei: balance_wei,
        has_sufficient_gas: has_sufficient_gas(balance_wei),
        minimum_required_wei: MIN_GAS_THRESHOLD_WEI,
    }
}

/// Estimated cost plus the safety margin, in integer hundredths so no
/// floating point rounding sneaks into wei amounts.
pub fn buffered_gas_cost(gas_cost_wei: u128) -> u128 {
    gas_cost_wei.saturating_mul(100 + GAS_BUFFER_PERCENT) / 100
}

/// Conservative: an unavailable estimate is never affordable.
pub fn can_afford(balance_wei: u128, estimate: Option<&GasEstimate>) -> bool {
    match estimate {
        Some(estimate) => balance_wei >= buffered_gas_cost(estimate.gas_cost_wei),
        None => false,
    }
}

/// Which banner the dashboard shows for a wallet, first match wins:
/// disconnected wallets get none, empty wallets are pointed at the faucet,
/// underfunded wallets see the shortfall, funded wallets get none.
pub fn funding_message(wallet: &WalletView) -> Option<String> {
    match wallet {
        WalletView::Disconnected => None,
        WalletView::Connected { balance_wei: 0 } => Some(
            "Wallet has no ANDE balance. Request funds from the faucet to get started.".to_owned(),
        ),
        WalletView::Connected { balance_wei } if !has_sufficient_gas(*balance_wei) => Some(format!(
            "Insufficient gas: wallet holds {} ANDE but at least {} ANDE is needed to cover fees.",
            format_native(*balance_wei),
            format_native(MIN_GAS_THRESHOLD_WEI)
        )),
        WalletView::Connected { .. } => None,
    }
}

/// Evaluates wallet gas questions against the live node.
pub struct GasOracle<P> {
    provider: P,
}

impl<P: NodeProvider> GasOracle<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub async fn wallet_gas_status(&self, address: &Address) -> NodeResult<GasStatus> {
        let balance_wei = self.provider.balance(address).await?;
        Ok(gas_status(balance_wei))
    }

    /// Estimation never escalates: any node failure comes back as None.
    pub async fn estimate(&self, call: &CallRequest) -> Option<GasEstimate> {
        let gas_limit = match self.provider.estimate_gas(call).await {
            Ok(gas_limit) => gas_limit,
            Err(err) => {
                tracing::debug!(error = %err, "gas limit estimate unavailable");
                return None;
            }
        };
        let gas_price_wei = match self.provider.gas_price().await {
            Ok(gas_price_wei) => gas_price_wei,
            Err(err) => {
                tracing::debug!(error = %err, "gas price unavailable");
                return None;
            }
        };

        Some(GasEstimate {
            gas_limit,
            gas_cost_wei: (gas_limit as u128).saturating_mul(gas_price_wei),
        })
    }

    pub async fn can_afford(&self, balance_wei: u128, call: &CallRequest) -> bool {
        can_afford(balance_wei, self.estimate(call).await.as_ref())
    }
}
