use common::round_two_decimals;
use node_client::Block;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Activity over the most recent block window. Recomputed from scratch on
/// every sample; the service keeps no longer history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {
    pub transactions_per_second: f64,
    pub average_block_time_secs: f64,
    pub total_transactions: u64,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum WindowError {
    #[error("window heights must increase: {previous} then {current}")]
    NonSequentialHeights { previous: u64, current: u64 },
    #[error("timestamp regressed at block {height}: {previous} then {current}")]
    TimestampRegression {
        height: u64,
        previous: u64,
        current: u64,
    },
}

/// Pairwise stats over an ascending block window. The first block only anchors
/// the first interval; its transaction count is not included in the totals.
/// Fewer than two blocks yields zeroed stats.
pub fn compute_window_stats(blocks: &[Block]) -> Result<ChainStats, WindowError> {
    if blocks.len() < 2 {
        return Ok(ChainStats::default());
    }

    let mut total_transactions = 0_u64;
    let mut total_time_secs = 0_u64;
    for pair in blocks.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        if current.number <= previous.number {
            return Err(WindowError::NonSequentialHeights {
                previous: previous.number,
                current: current.number,
            });
        }
        if current.timestamp < previous.timestamp {
            return Err(WindowError::TimestampRegression {
                height: current.number,
                previous: previous.timestamp,
                current: current.timestamp,
            });
        }
        total_transactions = total_transactions.saturating_add(current.transaction_count as u64);
        total_time_secs = total_time_secs.saturating_add(current.timestamp - previous.timestamp);
    }

    let intervals = (blocks.len() - 1) as f64;
    let average_block_time_secs = round_two_decimals(total_time_secs as f64 / intervals);
    let transactions_per_second = if total_time_secs > 0 {
        round_two_decimals(total_transactions as f64 / total_time_secs as f64)
    } else {
        0.0
    };

    Ok(ChainStats {
        transactions_per_second,
        average_block_time_secs,
        total_transactions,
    })
}

/// First height of the window ending at `head`: never below 1, at most
/// `window` blocks behind so a full window spans `window + 1` blocks.
pub fn sample_start(head: u64, window: u64) -> u64 {
    head.saturating_sub(window).max(1)
}
