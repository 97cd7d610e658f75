use serde::{Deserialize, Serialize};

pub const DAYS_PER_YEAR: u32 = 365;
pub const DEFAULT_STAKING_APR_BPS: u32 = 500;

/// Linear staking projection in wei: `principal * apr / 10_000 * days / 365`,
/// floored, saturating on absurd inputs instead of overflowing.
pub fn project_rewards(principal_wei: u128, apr_bps: u32, days: u32) -> u128 {
    principal_wei
        .saturating_mul(apr_bps as u128)
        .saturating_mul(days as u128)
        / (10_000_u128 * DAYS_PER_YEAR as u128)
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RewardPoint {
    pub month: u32,
    pub days: u32,
    pub projected_wei: u128,
}

/// Cumulative month marks for the projection chart, ending at the full-year
/// projection.
pub fn yearly_schedule(principal_wei: u128, apr_bps: u32) -> Vec<RewardPoint> {
    (1..=12)
        .map(|month| {
            let days = month * DAYS_PER_YEAR / 12;
            RewardPoint {
                month,
                days,
                projected_wei: project_rewards(principal_wei, apr_bps, days),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_STAKING_APR_BPS, project_rewards, yearly_schedule};
    use common::WEI_PER_NATIVE;

    #[test]
    fn five_percent_of_a_thousand_for_a_year() {
        let principal = 1_000 * WEI_PER_NATIVE;
        assert_eq!(
            project_rewards(principal, DEFAULT_STAKING_APR_BPS, 365),
            50 * WEI_PER_NATIVE
        );
    }

    #[test]
    fn projection_scales_linearly_with_days() {
        let principal = 400 * WEI_PER_NATIVE;
        let full = project_rewards(principal, 800, 365);
        let half = project_rewards(principal, 800, 365 / 2);
        assert!(half <= full / 2);
        assert!(full / 2 - half < WEI_PER_NATIVE);
    }

    #[test]
    fn zero_inputs_project_zero() {
        assert_eq!(project_rewards(0, 500, 365), 0);
        assert_eq!(project_rewards(WEI_PER_NATIVE, 0, 365), 0);
        assert_eq!(project_rewards(WEI_PER_NATIVE, 500, 0), 0);
    }

    #[test]
    fn yearly_schedule_is_monotonic_and_ends_at_full_year() {
        let principal = 1_000 * WEI_PER_NATIVE;
        let schedule = yearly_schedule(principal, DEFAULT_STAKING_APR_BPS);

        assert_eq!(schedule.len(), 12);
        assert_eq!(schedule[11].days, 365);
        assert_eq!(schedule[11].projected_wei, 50 * WEI_PER_NATIVE);
        for pair in schedule.windows(2) {
            assert!(pair[0].projected_wei <= pair[1].projected_wei);
        }
    }

    #[test]
    fn absurd_inputs_do_not_panic() {
        let projected = project_rewards(u128::MAX, 10_000, 365);
        assert!(projected > 0);
    }
}
