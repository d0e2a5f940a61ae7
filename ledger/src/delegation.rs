//! Delegation graph
//!
//! Each delegator points at no more than one delegate per scope. When a vote
//! carries a topic, a delegation scoped to that topic takes precedence over
//! the delegator's `All` delegation. The graph is kept acyclic under every
//! topic a vote could resolve it with.

use agora_core::ParticipantId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelegationScope {
    All,
    Topic(String),
}

impl DelegationScope {
    pub fn topic(topic: impl Into<String>) -> Self {
        DelegationScope::Topic(topic.into())
    }

    /// Does a delegation under this scope apply to a vote on `topic`?
    pub fn applies_to(&self, topic: Option<&str>) -> bool {
        match self {
            DelegationScope::All => true,
            DelegationScope::Topic(t) => topic == Some(t.as_str()),
        }
    }
}

impl fmt::Display for DelegationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelegationScope::All => f.write_str("all"),
            DelegationScope::Topic(t) => write!(f, "topic:{}", t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator: ParticipantId,
    pub delegate: ParticipantId,
    pub scope: DelegationScope,
    pub since: u64,
}

/// Effect of a delegate call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationChange {
    Created,
    Replaced { previous: ParticipantId },
    Revoked { previous: Option<ParticipantId> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationGraph {
    edges: BTreeMap<ParticipantId, BTreeMap<DelegationScope, Delegation>>,
}

impl DelegationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delegate that `delegator`'s weight flows to on a vote about `topic`
    pub fn effective_delegate(&self, delegator: &str, topic: Option<&str>) -> Option<&ParticipantId> {
        let scopes = self.edges.get(delegator)?;
        if let Some(t) = topic {
            if let Some(d) = scopes.get(&DelegationScope::Topic(t.to_string())) {
                return Some(&d.delegate);
            }
        }
        scopes.get(&DelegationScope::All).map(|d| &d.delegate)
    }

    pub fn get(&self, delegator: &str, scope: &DelegationScope) -> Option<&Delegation> {
        self.edges.get(delegator)?.get(scope)
    }

    /// Would adding `delegator -> delegate` under `scope` close a cycle?
    pub fn would_cycle(&self, delegator: &str, delegate: &str, scope: &DelegationScope) -> bool {
        if delegator == delegate {
            return false;
        }
        match scope {
            DelegationScope::Topic(t) => self.reaches(delegate, delegator, Some(t)),
            DelegationScope::All => {
                self.reaches(delegate, delegator, None)
                    || self
                        .topics()
                        .iter()
                        .any(|t| self.reaches(delegate, delegator, Some(t)))
            }
        }
    }

    /// Path search over edges usable under `topic` (`None` follows only `All` edges)
    fn reaches(&self, from: &str, target: &str, topic: Option<&str>) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack = vec![from.to_string()];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !seen.insert(node.clone()) {
                continue;
            }
            if let Some(scopes) = self.edges.get(node.as_str()) {
                for (scope, edge) in scopes {
                    let usable = match scope {
                        DelegationScope::All => true,
                        DelegationScope::Topic(t) => topic == Some(t.as_str()),
                    };
                    if usable {
                        stack.push(edge.delegate.to_string());
                    }
                }
            }
        }
        false
    }

    fn topics(&self) -> BTreeSet<String> {
        self.edges
            .values()
            .flat_map(|scopes| scopes.keys())
            .filter_map(|scope| match scope {
                DelegationScope::Topic(t) => Some(t.clone()),
                DelegationScope::All => None,
            })
            .collect()
    }

    /// Insert or overwrite; caller has already ruled out cycles
    pub(crate) fn set(&mut self, delegation: Delegation) -> Option<Delegation> {
        self.edges
            .entry(delegation.delegator.clone())
            .or_default()
            .insert(delegation.scope.clone(), delegation)
    }

    pub(crate) fn revoke(&mut self, delegator: &str, scope: &DelegationScope) -> Option<Delegation> {
        let scopes = self.edges.get_mut(delegator)?;
        let removed = scopes.remove(scope);
        if scopes.is_empty() {
            self.edges.remove(delegator);
        }
        removed
    }

    /// Participants delegating directly to `delegate` under `topic`
    pub fn direct_delegators(&self, delegate: &str, topic: Option<&str>) -> Vec<ParticipantId> {
        self.edges
            .keys()
            .filter(|delegator| {
                self.effective_delegate(delegator.as_str(), topic)
                    .is_some_and(|d| d.as_str() == delegate)
            })
            .cloned()
            .collect()
    }

    /// Where every delegator's weight ends up under `topic`: the first
    /// participant along its chain who has not delegated further
    ///
    /// One pass over the edges; chains already walked are reused.
    pub fn final_delegates(&self, topic: Option<&str>) -> BTreeMap<ParticipantId, ParticipantId> {
        let direct: BTreeMap<&ParticipantId, &ParticipantId> = self
            .edges
            .keys()
            .filter_map(|d| self.effective_delegate(d.as_str(), topic).map(|to| (d, to)))
            .collect();

        let mut resolved: BTreeMap<ParticipantId, ParticipantId> = BTreeMap::new();
        for delegator in direct.keys() {
            let mut path = vec![*delegator];
            let mut current = *delegator;
            let root = loop {
                if let Some(root) = resolved.get(current) {
                    break root.clone();
                }
                match direct.get(current) {
                    Some(&next) if !path.contains(&next) => {
                        path.push(next);
                        current = next;
                    }
                    // chain ends at someone who kept their weight
                    _ => break current.clone(),
                }
            };
            for node in path {
                if *node != root && direct.contains_key(node) {
                    resolved.insert(node.clone(), root.clone());
                }
            }
        }
        resolved
    }

    /// Participants appearing on either side of a delegation
    pub fn participants(&self) -> BTreeSet<ParticipantId> {
        let mut all = BTreeSet::new();
        for (delegator, scopes) in &self.edges {
            all.insert(delegator.clone());
            for edge in scopes.values() {
                all.insert(edge.delegate.clone());
            }
        }
        all
    }

    pub fn iter(&self) -> impl Iterator<Item = &Delegation> {
        self.edges.values().flat_map(|scopes| scopes.values())
    }

    pub fn len(&self) -> usize {
        self.edges.values().map(|scopes| scopes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// No chain of effective delegations revisits a participant, for any topic
    pub fn is_acyclic(&self) -> bool {
        let mut topics: Vec<Option<String>> = self.topics().into_iter().map(Some).collect();
        topics.push(None);
        for topic in &topics {
            for start in self.edges.keys() {
                let mut seen = BTreeSet::new();
                let mut current = start.as_str();
                seen.insert(current);
                while let Some(next) = self.effective_delegate(current, topic.as_deref()) {
                    if !seen.insert(next.as_str()) {
                        return false;
                    }
                    current = next.as_str();
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: &str, to: &str, scope: DelegationScope) -> Delegation {
        Delegation {
            delegator: from.into(),
            delegate: to.into(),
            scope,
            since: 0,
        }
    }

    #[test]
    fn test_topic_delegation_beats_all() {
        let mut graph = DelegationGraph::new();
        graph.set(edge("a", "b", DelegationScope::All));
        graph.set(edge("a", "c", DelegationScope::topic("treasury")));

        assert_eq!(graph.effective_delegate("a", None).unwrap().as_str(), "b");
        assert_eq!(graph.effective_delegate("a", Some("treasury")).unwrap().as_str(), "c");
        assert_eq!(graph.effective_delegate("a", Some("upgrades")).unwrap().as_str(), "b");
    }

    #[test]
    fn test_cycle_detection_respects_scope() {
        let mut graph = DelegationGraph::new();
        graph.set(edge("a", "b", DelegationScope::topic("treasury")));

        // b -> a under another topic never meets a -> b
        assert!(!graph.would_cycle("b", "a", &DelegationScope::topic("upgrades")));
        assert!(graph.would_cycle("b", "a", &DelegationScope::topic("treasury")));
        // an all-scope edge applies to the treasury topic as well
        assert!(graph.would_cycle("b", "a", &DelegationScope::All));
    }

    #[test]
    fn test_final_delegates_follow_chains() {
        let mut graph = DelegationGraph::new();
        graph.set(edge("a", "b", DelegationScope::All));
        graph.set(edge("b", "c", DelegationScope::All));
        graph.set(edge("d", "c", DelegationScope::topic("x")));
        graph.set(edge("e", "a", DelegationScope::All));

        let roots = graph.final_delegates(None);
        let expected: BTreeMap<ParticipantId, ParticipantId> =
            [("a", "c"), ("b", "c"), ("e", "c")]
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect();
        assert_eq!(roots, expected);

        let roots = graph.final_delegates(Some("x"));
        assert_eq!(roots.len(), 4);
        assert_eq!(roots["d"].as_str(), "c");
        assert!(graph.is_acyclic());
    }

    #[test]
    fn test_topic_edge_redirects_chain() {
        let mut graph = DelegationGraph::new();
        graph.set(edge("a", "b", DelegationScope::All));
        graph.set(edge("b", "c", DelegationScope::All));
        graph.set(edge("b", "d", DelegationScope::topic("x")));

        assert_eq!(graph.final_delegates(None)["a"].as_str(), "c");
        let roots = graph.final_delegates(Some("x"));
        assert_eq!(roots["a"].as_str(), "d");
        assert_eq!(roots["b"].as_str(), "d");
    }
}
