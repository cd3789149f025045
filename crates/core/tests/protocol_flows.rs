use quota_core::{AccrualKind, Protocol, ProtocolConfig, ProtocolError};
use quota_economics::TaxCategory;
use quota_storage::{MemoryStateStore, SledStateStore, StateStore};
use quota_token::FixedPriceOracle;
use quota_types::{tokens, AccountId, ErrorKind, ManualClock, SCALE};
use tempfile::TempDir;

fn admin() -> AccountId {
    AccountId::from_label("admin")
}

fn treasury() -> AccountId {
    AccountId::from_label("treasury")
}

fn escrow() -> AccountId {
    AccountId::from_label("reward-escrow")
}

/// No category taxes and a shared stream of 0.1 token per second.
fn referral_only_config() -> ProtocolConfig {
    let mut config = ProtocolConfig::default();
    config.categories.clear();
    config.accrual.mode = AccrualKind::Shared;
    config.accrual.rate_per_second = "0.1".into();
    config
}

fn setup(config: &ProtocolConfig) -> (Protocol<MemoryStateStore, ManualClock>, ManualClock) {
    let clock = ManualClock::new(1_000);
    let protocol = Protocol::genesis(config, MemoryStateStore::new(), clock.clone())
        .expect("genesis");
    (protocol, clock)
}

fn rejected_kind(err: ProtocolError) -> ErrorKind {
    err.kind().expect("engine rejection")
}

#[test]
fn tier_one_referrer_receives_450_bps() {
    let (mut protocol, clock) = setup(&referral_only_config());
    let referrer = AccountId::from_label("referrer");
    let alice = AccountId::from_label("alice");

    protocol
        .fund_rewards(&treasury(), tokens(1_000))
        .expect("fund escrow");
    protocol.enroll(referrer, AccountId::ROOT).expect("enroll referrer");
    protocol.enroll(alice, referrer).expect("enroll alice");
    protocol.set_tier(&admin(), &referrer, 1).expect("set tier");
    protocol
        .mint_stake_tokens(&admin(), &alice, tokens(10))
        .expect("issue stake tokens");
    protocol.stake(&alice, tokens(10)).expect("stake");

    clock.advance(1_000);
    let outcome = protocol.claim(&alice).expect("claim");

    assert_eq!(outcome.gross, tokens(100));
    let receipt = outcome.receipt.expect("distribution receipt");
    assert_eq!(receipt.plan.amount_for(&referrer), 4_500_000_000_000_000_000);
    assert_eq!(receipt.plan.staker_amount(), 95_500_000_000_000_000_000);
    assert_eq!(receipt.plan.total(), tokens(100));
    assert_eq!(protocol.balance_of(&referrer), 4_500_000_000_000_000_000);
    assert_eq!(protocol.balance_of(&alice), 95_500_000_000_000_000_000);
    assert_eq!(protocol.balance_of(&escrow()), tokens(900));

    // Nothing changed since: the second claim pays nothing.
    let again = protocol.claim(&alice).expect("second claim");
    assert_eq!(again.gross, 0);
    assert!(again.receipt.is_none());
}

#[test]
fn launch_taxes_route_to_category_pools() {
    let (mut protocol, clock) = setup(&ProtocolConfig::default());
    let alice = AccountId::from_label("alice");
    protocol.set_reward_rate(&admin(), SCALE / 10).expect("shared rate");
    protocol
        .fund_rewards(&treasury(), tokens(1_000))
        .expect("fund escrow");
    protocol
        .mint_stake_tokens(&admin(), &alice, tokens(10))
        .expect("issue stake tokens");
    protocol.stake(&alice, tokens(10)).expect("stake");

    clock.advance(1_000);
    let receipt = protocol
        .claim(&alice)
        .expect("claim")
        .receipt
        .expect("receipt");

    // 6000 bps of category taxes; with no referrer the direct-referrer share
    // lands in its pool.
    assert_eq!(receipt.plan.category_total(), tokens(60));
    assert_eq!(protocol.balance_of(&alice), tokens(40));
    let right_up_pool = protocol
        .state()
        .tax
        .pool(TaxCategory::DirectReferrer)
        .expect("direct-referrer pool");
    assert_eq!(protocol.balance_of(&right_up_pool), tokens(5));
    let dev_pool = protocol
        .state()
        .tax
        .pool(TaxCategory::Dev)
        .expect("dev pool");
    assert_eq!(protocol.balance_of(&dev_pool), 12_500_000_000_000_000_000);
}

#[test]
fn claim_after_rebase_credits_exactly_the_plan() {
    let (mut protocol, clock) = setup(&referral_only_config());
    let referrer = AccountId::from_label("referrer");
    let alice = AccountId::from_label("alice");

    protocol
        .fund_rewards(&treasury(), tokens(1_000))
        .expect("fund escrow");
    protocol.enroll(referrer, AccountId::ROOT).expect("enroll referrer");
    protocol.enroll(alice, referrer).expect("enroll alice");
    protocol.set_tier(&admin(), &referrer, 1).expect("set tier");
    protocol
        .mint_stake_tokens(&admin(), &alice, tokens(10))
        .expect("issue stake tokens");
    protocol.stake(&alice, tokens(10)).expect("stake");

    // +2% expansion
    let report = protocol.rebase(SCALE * 12 / 10).expect("rebase");
    assert!(report.supply_after > report.supply_before);

    let token = &protocol.state().token;
    let escrow_before = token.base_balance_of(&escrow());

    clock.advance(1_000);
    let outcome = protocol.claim(&alice).expect("claim");
    let receipt = outcome.receipt.expect("distribution receipt");
    assert_eq!(receipt.requested, tokens(100));

    let token = &protocol.state().token;
    let plan = &receipt.plan;
    assert_eq!(plan.gross, token.to_base(tokens(100)).expect("to base"));
    assert_eq!(plan.total(), plan.gross);
    assert_eq!(token.base_balance_of(&referrer), plan.amount_for(&referrer));
    assert_eq!(token.base_balance_of(&alice), plan.amount_for(&alice));
    assert_eq!(
        escrow_before - token.base_balance_of(&escrow()),
        plan.amount_for(&referrer) + plan.amount_for(&alice)
    );
    assert_eq!(
        protocol.balance_of(&referrer),
        token.from_base(plan.amount_for(&referrer)).expect("from base")
    );
}

#[test]
fn reward_below_one_base_unit_after_expansion_claims_cleanly() {
    let mut config = referral_only_config();
    config.accrual.rate_per_second = "0.000000000000000001".into();
    let (mut protocol, clock) = setup(&config);
    let alice = AccountId::from_label("alice");

    protocol
        .fund_rewards(&treasury(), tokens(1))
        .expect("fund escrow");
    protocol
        .mint_stake_tokens(&admin(), &alice, 1)
        .expect("issue stake tokens");
    protocol.stake(&alice, 1).expect("stake");
    protocol.rebase(SCALE * 12 / 10).expect("rebase");
    let escrow_before = protocol.state().token.base_balance_of(&escrow());

    clock.advance(1);
    let outcome = protocol.claim(&alice).expect("claim");
    assert_eq!(outcome.gross, 1);
    let receipt = outcome.receipt.expect("receipt");
    assert_eq!(receipt.plan.gross, 0);
    assert_eq!(receipt.transfers, 0);

    // The fraction stays in escrow and the claim is settled.
    assert_eq!(protocol.state().token.base_balance_of(&escrow()), escrow_before);
    assert_eq!(protocol.earned(&alice).expect("earned"), 0);
}

#[test]
fn enrolling_after_staking_counts_existing_principal() {
    let (mut protocol, _clock) = setup(&ProtocolConfig::default());
    let alice = AccountId::from_label("alice");

    protocol
        .mint_stake_tokens(&admin(), &alice, tokens(30))
        .expect("issue stake tokens");
    protocol.stake(&alice, tokens(30)).expect("stake");

    let node = protocol.enroll(alice, AccountId::ROOT).expect("enroll");
    assert_eq!(node.volume, tokens(30));
    assert_eq!(protocol.node(&alice).expect("node").volume, tokens(30));

    protocol.withdraw(&alice, tokens(10)).expect("withdraw");
    assert_eq!(protocol.node(&alice).expect("node").volume, tokens(20));
}

#[test]
fn default_dust_goes_to_perpetual_pool() {
    let mut config = ProtocolConfig::default();
    config.accrual.mode = AccrualKind::Shared;
    config.accrual.rate_per_second = "0.000000000000000033".into();
    let (mut protocol, clock) = setup(&config);
    let alice = AccountId::from_label("alice");

    protocol
        .fund_rewards(&treasury(), tokens(1))
        .expect("fund escrow");
    protocol
        .mint_stake_tokens(&admin(), &alice, 1)
        .expect("issue stake tokens");
    protocol.stake(&alice, 1).expect("stake");

    clock.advance(1);
    let receipt = protocol
        .claim(&alice)
        .expect("claim")
        .receipt
        .expect("receipt");
    assert_eq!(receipt.plan.gross, 33);
    assert!(receipt.plan.dust > 0);
    assert_eq!(receipt.plan.dust_paid(), receipt.plan.dust);

    let perpetual = protocol
        .state()
        .tax
        .pool(TaxCategory::PerpetualPool)
        .expect("perpetual pool");
    assert_eq!(
        receipt.plan.amount_for(&perpetual),
        receipt.plan.dust + 33 * 450 / 10_000
    );
    assert_eq!(receipt.plan.total(), 33);
}

#[test]
fn daily_transfer_limit_and_whitelist_bypass() {
    let (mut protocol, clock) = setup(&ProtocolConfig::default());
    let alice = AccountId::from_label("alice");
    let bob = AccountId::from_label("bob");

    protocol
        .transfer(&treasury(), &alice, tokens(8_888))
        .expect("whitelisted treasury moves everything");

    protocol.transfer(&alice, &bob, tokens(1_776)).expect("first");
    protocol.transfer(&alice, &bob, tokens(1)).expect("second");
    let err = protocol.transfer(&alice, &bob, tokens(1)).unwrap_err();
    assert_eq!(rejected_kind(err), ErrorKind::TransferLimitExceeded);
    assert_eq!(protocol.balance_of(&bob), tokens(1_777));
    assert_eq!(
        protocol.remaining_allowance(&alice).expect("allowance"),
        600_000_000_000_000_000
    );

    protocol.whitelist(&admin(), &alice, true).expect("whitelist");
    protocol.transfer(&alice, &bob, tokens(1)).expect("bypass");
    protocol.whitelist(&admin(), &alice, false).expect("unlist");

    clock.advance(86_400);
    protocol
        .transfer(&alice, &bob, tokens(100))
        .expect("fresh window");
}

#[test]
fn higher_tier_raises_transfer_limit() {
    let (mut protocol, _clock) = setup(&ProtocolConfig::default());
    let alice = AccountId::from_label("alice");
    let bob = AccountId::from_label("bob");

    protocol.enroll(alice, AccountId::ROOT).expect("enroll");
    protocol.set_tier(&admin(), &alice, 4).expect("tier 4");
    protocol
        .transfer(&treasury(), &alice, tokens(100))
        .expect("fund alice");

    // Tier 4 may move half the window-start balance
    protocol.transfer(&alice, &bob, tokens(50)).expect("within limit");
    assert!(protocol.transfer(&alice, &bob, tokens(1)).is_err());
}

#[test]
fn second_rebase_within_interval_is_rejected() {
    let mut config = ProtocolConfig::default();
    config.rebase.expansion_tax_bps = 1_000;
    let (mut protocol, clock) = setup(&config);

    let oracle = FixedPriceOracle::new(SCALE * 12 / 10);
    let report = protocol.rebase_from_oracle(&oracle).expect("first rebase");
    assert!(report.supply_after > report.supply_before);

    let pool = protocol
        .state()
        .tax
        .pool(TaxCategory::PerpetualPool)
        .expect("perpetual pool");
    assert_eq!(protocol.balance_of(&pool), report.expansion_minted);
    assert!(report.expansion_minted > 0);

    clock.advance(3_600);
    let err = protocol.rebase(SCALE * 2).unwrap_err();
    assert_eq!(rejected_kind(err), ErrorKind::TooEarly);
    assert_eq!(
        protocol.state().token.rebase_controller().state().epoch,
        1
    );
}

#[test]
fn failed_claim_rolls_back_accrual() {
    let (mut protocol, clock) = setup(&referral_only_config());
    let alice = AccountId::from_label("alice");
    protocol
        .mint_stake_tokens(&admin(), &alice, tokens(10))
        .expect("issue stake tokens");
    protocol.stake(&alice, tokens(10)).expect("stake");
    protocol
        .fund_rewards(&treasury(), tokens(10))
        .expect("underfund escrow");
    let commits = protocol.store_meta().expect("meta").commits;

    clock.advance(1_000);
    let err = protocol.claim(&alice).unwrap_err();
    assert_eq!(rejected_kind(err), ErrorKind::InsufficientBalance);

    // The reward is still owed and nothing was committed.
    assert_eq!(protocol.earned(&alice).expect("earned"), tokens(100));
    assert_eq!(protocol.balance_of(&escrow()), tokens(10));
    assert_eq!(protocol.store_meta().expect("meta").commits, commits);
}

#[test]
fn failed_commit_restores_state() {
    let (mut protocol, clock) = setup(&referral_only_config());
    let alice = AccountId::from_label("alice");
    protocol
        .fund_rewards(&treasury(), tokens(1_000))
        .expect("fund escrow");
    protocol
        .mint_stake_tokens(&admin(), &alice, tokens(10))
        .expect("issue stake tokens");
    protocol.stake(&alice, tokens(10)).expect("stake");

    clock.advance(1_000);
    protocol.store().fail_commits(true);
    let err = protocol.claim(&alice).unwrap_err();
    assert!(matches!(err, ProtocolError::Storage(_)));
    assert_eq!(protocol.balance_of(&alice), 0);
    assert_eq!(protocol.balance_of(&escrow()), tokens(1_000));

    protocol.store().fail_commits(false);
    let outcome = protocol.claim(&alice).expect("claim after recovery");
    assert_eq!(outcome.gross, tokens(100));
}

#[test]
fn governance_is_enforced_and_transferable() {
    let (mut protocol, _clock) = setup(&ProtocolConfig::default());
    let outsider = AccountId::from_label("outsider");
    let council = AccountId::from_label("council");

    let err = protocol
        .set_tax_rate(&outsider, TaxCategory::Dev, 0)
        .unwrap_err();
    assert_eq!(rejected_kind(err), ErrorKind::Unauthorized);

    let err = protocol
        .set_tax_rate(&admin(), TaxCategory::Dev, 9_000)
        .unwrap_err();
    assert_eq!(rejected_kind(err), ErrorKind::ConfigurationInvalid);
    assert_eq!(protocol.state().tax.rate(TaxCategory::Dev), 1_250);

    protocol
        .transfer_governance(&admin(), council)
        .expect("hand over");
    assert!(protocol.set_max_depth(&admin(), 2).is_err());
    protocol.set_max_depth(&council, 2).expect("council governs");
    assert_eq!(protocol.state().distribution.settings().max_depth, 2);
    assert_eq!(protocol.state().token.governor().admin(), council);
}

#[test]
fn state_survives_reopen() {
    let temp_dir = TempDir::new().expect("temp dir");
    let db_path = temp_dir.path().join("db");
    let clock = ManualClock::new(500);
    let alice = AccountId::from_label("alice");
    let referrer = AccountId::from_label("referrer");

    {
        let store = SledStateStore::new(&db_path).expect("open store");
        let mut protocol =
            Protocol::genesis(&ProtocolConfig::default(), store, clock.clone()).expect("genesis");
        protocol.enroll(referrer, AccountId::ROOT).expect("enroll");
        protocol.enroll(alice, referrer).expect("enroll");
        protocol
            .mint_stake_tokens(&admin(), &alice, tokens(25))
            .expect("issue");
        protocol.stake(&alice, tokens(25)).expect("stake");
        protocol.flush().expect("flush");
    }

    let store = SledStateStore::new(&db_path).expect("reopen store");
    assert!(store.is_initialized().expect("meta"));
    assert!(matches!(
        Protocol::genesis(&ProtocolConfig::default(), store, clock.clone()),
        Err(ProtocolError::AlreadyInitialized)
    ));

    let store = SledStateStore::new(&db_path).expect("reopen store");
    let protocol = Protocol::open(store, clock).expect("open");
    assert_eq!(protocol.node(&alice).expect("node").referrer, referrer);
    assert_eq!(protocol.node(&alice).expect("node").volume, tokens(25));
    assert_eq!(
        protocol.position(&alice).expect("position").principal,
        tokens(25)
    );
    assert_eq!(protocol.balance_of(&treasury()), tokens(8_888));
    assert_eq!(protocol.state().referrals.len(), 2);
}

#[test]
fn open_without_genesis_fails() {
    let err = Protocol::open(MemoryStateStore::new(), ManualClock::new(0)).err();
    assert!(matches!(err, Some(ProtocolError::NotInitialized)));
}
