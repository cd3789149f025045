//! Distribution properties
//!
//! For any gross reward, any tier assignment and any referral depth, the
//! planned payouts sum to the gross amount exactly, and configured rates
//! never exceed the whole.
//!
//! Run with: cargo test -p quota-treasury --test distribution_properties

use proptest::prelude::*;
use quota_economics::{
    launch_tax_config, ReferralGraph, TaxCategory, TaxManager, TierEngine, TierSchedule,
    REFERRAL_DEPTHS,
};
use quota_treasury::{
    AccountLedger, DistributionEngine, DistributionSettings, DustPolicy, InMemoryAccountLedger,
    PayoutKind,
};
use quota_types::{div_scaled, mul_scaled, AccountId, Amount, Result, BPS_DENOMINATOR, SCALE};

// =============================================================================
// TEST HELPERS
// =============================================================================

fn admin() -> AccountId {
    AccountId::from_label("governance")
}

fn member(n: usize) -> AccountId {
    AccountId::from_label(&format!("member-{n}"))
}

/// member-0 <- member-1 <- ... <- member-(len - 1); returns the deepest member.
fn chain_with_tiers(tiers: &[u8]) -> (ReferralGraph, AccountId) {
    let engine = TierEngine::new(admin());
    let mut graph = ReferralGraph::new();
    let mut referrer = AccountId::ROOT;
    for n in 0..=tiers.len() {
        graph.enroll(member(n), referrer, 0).unwrap();
        referrer = member(n);
    }
    for (n, tier) in tiers.iter().enumerate() {
        engine.set_tier(&admin(), &mut graph, &member(n), *tier).unwrap();
    }
    (graph, member(tiers.len()))
}

fn engine(max_depth: usize, dust_policy: DustPolicy) -> DistributionEngine {
    DistributionEngine::new(
        admin(),
        DistributionSettings {
            escrow: AccountId::from_label("escrow"),
            max_depth,
            dust_policy,
        },
    )
    .unwrap()
}

/// Stores settlement units and reports `units * factor / SCALE`, the way a
/// rebased token does.
struct ScaledLedger {
    inner: InMemoryAccountLedger,
    factor: u128,
}

impl AccountLedger for ScaledLedger {
    fn balance_of(&self, account: &AccountId) -> Amount {
        mul_scaled(self.inner.balance_of(account), self.factor).unwrap_or(Amount::MAX)
    }

    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<()> {
        let units = self.to_units(amount)?;
        self.inner.transfer(from, to, units)
    }

    fn total_supply(&self) -> Amount {
        mul_scaled(self.inner.total_supply(), self.factor).unwrap_or(Amount::MAX)
    }

    fn to_units(&self, amount: Amount) -> Result<Amount> {
        Ok(div_scaled(amount, self.factor)?)
    }

    fn from_units(&self, units: Amount) -> Result<Amount> {
        Ok(mul_scaled(units, self.factor)?)
    }

    fn unit_balance_of(&self, account: &AccountId) -> Amount {
        self.inner.balance_of(account)
    }

    fn transfer_units(&mut self, from: &AccountId, to: &AccountId, units: Amount) -> Result<()> {
        self.inner.transfer(from, to, units)
    }
}

fn launch_tax() -> TaxManager {
    TaxManager::with_config(admin(), launch_tax_config(&TierSchedule::default())).unwrap()
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn payouts_sum_to_gross(
        gross in any::<u128>().prop_map(|g| g >> 8),
        tiers in proptest::collection::vec(0u8..=4, 0..8),
        max_depth in 0usize..=REFERRAL_DEPTHS,
        dust_to_pool in any::<bool>(),
    ) {
        let tax = launch_tax();
        let (graph, staker) = chain_with_tiers(&tiers);
        let policy = if dust_to_pool {
            DustPolicy::Pool(TaxCategory::PerpetualPool)
        } else {
            DustPolicy::Staker
        };

        let plan = engine(max_depth, policy).plan(gross, &staker, &tax, &graph).unwrap();
        prop_assert_eq!(plan.total(), gross);
        prop_assert_eq!(
            plan.category_total() + plan.referral_total() + plan.staker_amount() + plan.dust_paid(),
            gross
        );

        let referrals = plan.payouts.iter()
            .filter(|p| matches!(p.kind, PayoutKind::Referral { .. }))
            .count();
        prop_assert!(referrals <= max_depth);
    }

    #[test]
    fn rejected_rate_leaves_config_unchanged(
        category in proptest::sample::select(TaxCategory::ALL.to_vec()),
        bps in 0u32..=20_000,
        tier in 0u8..=6,
        rates in proptest::array::uniform4(0u32..=4_000),
    ) {
        let mut tax = launch_tax();
        let before = tax.config().clone();

        match tax.set_rate(&admin(), category, bps) {
            Ok(()) => prop_assert!(tax.total_configured_bps() <= BPS_DENOMINATOR as u64),
            Err(_) => prop_assert_eq!(tax.config(), &before),
        }

        let before = tax.config().clone();
        match tax.set_bulk_referral_rate(&admin(), tier, rates) {
            Ok(()) => prop_assert!(tax.total_configured_bps() <= BPS_DENOMINATOR as u64),
            Err(_) => prop_assert_eq!(tax.config(), &before),
        }
    }

    #[test]
    fn escrow_debit_matches_credits_on_scaled_ledger(
        gross in 0u128..=10u128.pow(24),
        factor in (SCALE / 2)..=(SCALE * 2),
        tiers in proptest::collection::vec(0u8..=4, 0..6),
    ) {
        let tax = launch_tax();
        let (graph, staker) = chain_with_tiers(&tiers);
        let escrow = AccountId::from_label("escrow");
        let mut ledger = ScaledLedger { inner: InMemoryAccountLedger::new(), factor };
        ledger.inner.credit(&escrow, 10u128.pow(30)).unwrap();

        let mut engine = engine(REFERRAL_DEPTHS, DustPolicy::default());
        let receipt = engine.distribute(gross, &staker, &tax, &graph, &mut ledger).unwrap();
        let plan = &receipt.plan;

        prop_assert_eq!(plan.gross, div_scaled(gross, factor).unwrap());
        prop_assert_eq!(plan.total(), plan.gross);
        prop_assert_eq!(ledger.unit_balance_of(&escrow), 10u128.pow(30) - plan.gross);
        let mut credited = 0;
        for payout in &plan.payouts {
            if payout.recipient == escrow {
                continue;
            }
            let units = ledger.unit_balance_of(&payout.recipient);
            prop_assert_eq!(units, plan.amount_for(&payout.recipient));
            prop_assert_eq!(
                ledger.balance_of(&payout.recipient),
                ledger.from_units(plan.amount_for(&payout.recipient)).unwrap()
            );
            credited += payout.amount;
        }
        prop_assert_eq!(credited, plan.gross);
    }
}
