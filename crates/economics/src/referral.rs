//! Referral forest.
//!
//! Nodes live in an arena keyed by participant, each holding its referrer's
//! key. A referrer must already be enrolled (or be the root sentinel) when a
//! participant joins, and links never change afterwards, so the structure is
//! acyclic by construction and every chain terminates at the root.

use quota_types::{AccountId, Amount, QuotaError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// A participant's position in the forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralNode {
    pub participant: AccountId,
    /// [`AccountId::ROOT`] when the participant heads its own tree.
    pub referrer: AccountId,
    pub tier: u8,
    pub joined_at: Timestamp,
    /// Number of ancestors above this node.
    pub depth: u32,
    /// Principal currently staked by the participant.
    pub volume: Amount,
    /// Direct referrals in enrollment order.
    pub referrals: Vec<AccountId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferralGraph {
    nodes: HashMap<AccountId, ReferralNode>,
}

impl ReferralGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `participant` below `referrer`.
    pub fn enroll(
        &mut self,
        participant: AccountId,
        referrer: AccountId,
        now: Timestamp,
    ) -> Result<&ReferralNode> {
        if participant.is_root() {
            return Err(QuotaError::InvalidAccount(
                "the root sentinel cannot enroll".into(),
            ));
        }
        if self.nodes.contains_key(&participant) {
            return Err(QuotaError::AlreadyEnrolled(participant.to_string()));
        }
        if referrer == participant {
            return Err(QuotaError::CycleDetected(format!(
                "{participant} cannot refer itself"
            )));
        }

        let depth = if referrer.is_root() {
            0
        } else {
            let parent = self.nodes.get(&referrer).ok_or_else(|| {
                QuotaError::CycleDetected(format!("referrer {referrer} is not enrolled"))
            })?;
            parent.depth + 1
        };
        if !self.terminates_from(&referrer) {
            return Err(QuotaError::CycleDetected(format!(
                "ancestry of {referrer} does not reach the root"
            )));
        }

        if let Some(parent) = self.nodes.get_mut(&referrer) {
            parent.referrals.push(participant);
        }
        info!(
            target: "referral",
            participant = %participant,
            referrer = %referrer,
            depth,
            "participant enrolled"
        );
        let node = self.nodes.entry(participant).or_insert(ReferralNode {
            participant,
            referrer,
            tier: 0,
            joined_at: now,
            depth,
            volume: 0,
            referrals: Vec::new(),
        });
        Ok(&*node)
    }

    /// Ancestors of `participant`, nearest first, at most `max_depth` of them.
    ///
    /// The iterator borrows the graph immutably; calling this again yields
    /// the same sequence.
    pub fn resolve_chain(&self, participant: &AccountId, max_depth: usize) -> Chain<'_> {
        Chain {
            graph: self,
            cursor: *participant,
            remaining: max_depth,
        }
    }

    /// Walk up from `start`, bounded by the number of nodes.
    fn terminates_from(&self, start: &AccountId) -> bool {
        let mut cursor = *start;
        for _ in 0..=self.nodes.len() {
            if cursor.is_root() {
                return true;
            }
            match self.nodes.get(&cursor) {
                Some(node) => cursor = node.referrer,
                None => return false,
            }
        }
        false
    }

    pub(crate) fn set_tier(&mut self, participant: &AccountId, tier: u8) -> Result<u8> {
        let node = self
            .nodes
            .get_mut(participant)
            .ok_or_else(|| QuotaError::NotEnrolled(participant.to_string()))?;
        let previous = node.tier;
        node.tier = tier;
        Ok(previous)
    }

    /// Add staked principal to a participant's volume. Unenrolled stakers are ignored.
    pub fn record_volume(&mut self, participant: &AccountId, amount: Amount) {
        if let Some(node) = self.nodes.get_mut(participant) {
            node.volume = node.volume.saturating_add(amount);
            debug!(target: "referral", participant = %participant, volume = node.volume, "volume recorded");
        }
    }

    pub fn release_volume(&mut self, participant: &AccountId, amount: Amount) {
        if let Some(node) = self.nodes.get_mut(participant) {
            node.volume = node.volume.saturating_sub(amount);
        }
    }

    pub fn node(&self, participant: &AccountId) -> Option<&ReferralNode> {
        self.nodes.get(participant)
    }

    pub fn is_enrolled(&self, participant: &AccountId) -> bool {
        self.nodes.contains_key(participant)
    }

    /// Tier of an enrolled participant; 0 otherwise.
    pub fn tier_of(&self, participant: &AccountId) -> u8 {
        self.nodes.get(participant).map(|n| n.tier).unwrap_or(0)
    }

    pub fn direct_referrals(&self, participant: &AccountId) -> &[AccountId] {
        self.nodes
            .get(participant)
            .map(|n| n.referrals.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Lazy ancestor walk returned by [`ReferralGraph::resolve_chain`].
#[derive(Debug, Clone)]
pub struct Chain<'a> {
    graph: &'a ReferralGraph,
    cursor: AccountId,
    remaining: usize,
}

impl Iterator for Chain<'_> {
    type Item = AccountId;

    fn next(&mut self) -> Option<AccountId> {
        if self.remaining == 0 {
            return None;
        }
        let parent = self.graph.nodes.get(&self.cursor)?.referrer;
        if parent.is_root() {
            self.remaining = 0;
            return None;
        }
        self.remaining -= 1;
        self.cursor = parent;
        Some(parent)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use quota_types::ErrorKind;

    fn id(n: u8) -> AccountId {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        AccountId(bytes)
    }

    /// Builds the chain id(1) <- id(2) <- ... <- id(len).
    fn linear_chain(len: u8) -> ReferralGraph {
        let mut graph = ReferralGraph::new();
        graph.enroll(id(1), AccountId::ROOT, 0).unwrap();
        for n in 2..=len {
            graph.enroll(id(n), id(n - 1), n as u64).unwrap();
        }
        graph
    }

    #[test]
    fn test_enroll_under_root_and_referrer() {
        let graph = linear_chain(3);
        let node = graph.node(&id(3)).unwrap();
        assert_eq!(node.referrer, id(2));
        assert_eq!(node.depth, 2);
        assert_eq!(graph.direct_referrals(&id(2)), &[id(3)]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_self_referral_is_cycle() {
        let mut graph = ReferralGraph::new();
        let err = graph.enroll(id(1), id(1), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CycleDetected);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_unenrolled_referrer_is_cycle() {
        let mut graph = ReferralGraph::new();
        let err = graph.enroll(id(2), id(9), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CycleDetected);
    }

    #[test]
    fn test_double_enroll_rejected() {
        let mut graph = linear_chain(2);
        let err = graph.enroll(id(2), AccountId::ROOT, 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyEnrolled);
        assert_eq!(graph.node(&id(2)).unwrap().referrer, id(1));
    }

    #[test]
    fn test_root_cannot_enroll() {
        let mut graph = ReferralGraph::new();
        let err = graph.enroll(AccountId::ROOT, AccountId::ROOT, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAccount);
    }

    #[test]
    fn test_chain_stops_at_root() {
        let graph = linear_chain(3);
        let chain: Vec<_> = graph.resolve_chain(&id(3), 10).collect();
        assert_eq!(chain, vec![id(2), id(1)]);
        assert_eq!(graph.resolve_chain(&id(1), 10).count(), 0);
        assert_eq!(graph.resolve_chain(&id(42), 10).count(), 0);
    }

    #[test]
    fn test_chain_is_restartable() {
        let graph = linear_chain(6);
        let chain = graph.resolve_chain(&id(6), 4);
        let first: Vec<_> = chain.clone().collect();
        let second: Vec<_> = chain.collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![id(5), id(4), id(3), id(2)]);
    }

    #[test]
    fn test_volume_tracking() {
        let mut graph = linear_chain(1);
        graph.record_volume(&id(1), 100);
        graph.release_volume(&id(1), 40);
        assert_eq!(graph.node(&id(1)).unwrap().volume, 60);
        graph.record_volume(&id(7), 100);
        assert!(graph.node(&id(7)).is_none());
    }

    proptest! {
        #[test]
        fn chain_length_bounded_by_max_depth(len in 1u8..40, max_depth in 0usize..12) {
            let graph = linear_chain(len);
            let resolved = graph.resolve_chain(&id(len), max_depth).count();
            prop_assert!(resolved <= max_depth);
            prop_assert_eq!(resolved, max_depth.min(len as usize - 1));
        }
    }
}
