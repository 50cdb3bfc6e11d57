//! Route type preference and best-route selection

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::compare::{compare_prefix_sequences, HeaderAge};
use crate::config::FabricConfig;
use crate::element::PrefixTieElement;
use crate::prefix::IpPrefix;
use crate::types::{PrefixSequence, SystemId};

/// Origin class of a route, declared from most to least preferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RouteType {
    Illegal,
    Discard,
    LocalPrefix,
    SouthPgpPrefix,
    NorthPgpPrefix,
    NorthPrefix,
    SouthPrefix,
    NorthExternalPrefix,
    SouthExternalPrefix,
    NegativeNorthPrefix,
}

impl RouteType {
    pub const ALL: [RouteType; 10] = [
        RouteType::Illegal,
        RouteType::Discard,
        RouteType::LocalPrefix,
        RouteType::SouthPgpPrefix,
        RouteType::NorthPgpPrefix,
        RouteType::NorthPrefix,
        RouteType::SouthPrefix,
        RouteType::NorthExternalPrefix,
        RouteType::SouthExternalPrefix,
        RouteType::NegativeNorthPrefix,
    ];
}

/// The more preferred of two route types.
///
/// This is the bare table ordering; `Illegal` is kept out of selection by
/// `select_best`, not here.
pub fn prefer(a: RouteType, b: RouteType) -> RouteType {
    if a <= b {
        a
    } else {
        b
    }
}

/// One advertisement of reachability for a prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub route_type: RouteType,
    pub metric: u32,
    pub originator: SystemId,
    pub sequence: Option<PrefixSequence>,
}

impl RouteCandidate {
    pub fn new(route_type: RouteType, metric: u32, originator: SystemId) -> Self {
        RouteCandidate {
            route_type,
            metric,
            originator,
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: PrefixSequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Whether this candidate may ever be selected
    pub fn is_eligible(&self, config: &FabricConfig) -> bool {
        self.route_type != RouteType::Illegal
            && self.metric != config.invalid_distance
            && self.metric < config.infinite_distance
    }
}

/// Order two candidates, `Less` meaning `a` is preferred
pub fn compare_candidates(a: &RouteCandidate, b: &RouteCandidate, config: &FabricConfig) -> Ordering {
    let clamp = |metric: u32| metric.min(config.infinite_distance);

    a.route_type
        .cmp(&b.route_type)
        .then_with(|| clamp(a.metric).cmp(&clamp(b.metric)))
        .then_with(|| match (&a.sequence, &b.sequence) {
            (Some(sa), Some(sb)) => {
                match compare_prefix_sequences(sa, sb, config.prefix_sequence_window_ms) {
                    HeaderAge::Newer => Ordering::Less,
                    HeaderAge::Older => Ordering::Greater,
                    HeaderAge::Same => Ordering::Equal,
                }
            }
            _ => Ordering::Equal,
        })
        .then_with(|| a.originator.cmp(&b.originator))
}

/// Pick the winning candidate: most preferred type, then lowest metric,
/// then newest prefix sequence, then lowest originator.
///
/// Candidates of type `Illegal`, with metric `invalid_distance`, or
/// unreachable at `infinite_distance` are never selected.
pub fn select_best<'a>(
    candidates: &'a [RouteCandidate],
    config: &FabricConfig,
) -> Option<&'a RouteCandidate> {
    candidates
        .iter()
        .filter(|c| c.is_eligible(config))
        .min_by(|a, b| compare_candidates(a, b, config))
}

/// Candidate routes per prefix
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<IpPrefix, Vec<RouteCandidate>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the candidate from the same originator and route type
    pub fn add(&mut self, prefix: IpPrefix, candidate: RouteCandidate) {
        let candidates = self.routes.entry(prefix).or_default();
        candidates.retain(|c| {
            !(c.originator == candidate.originator && c.route_type == candidate.route_type)
        });
        candidates.push(candidate);
    }

    /// Add every prefix of a prefix payload, adding `distance` to each metric
    pub fn add_prefixes(
        &mut self,
        originator: SystemId,
        route_type: RouteType,
        element: &PrefixTieElement,
        distance: u32,
    ) {
        for (prefix, attributes) in &element.prefixes {
            let mut candidate = RouteCandidate::new(
                route_type,
                attributes.metric.saturating_add(distance),
                originator,
            );
            candidate.sequence = attributes.monotonic_clock;
            self.add(prefix.clone(), candidate);
        }
    }

    /// Remove everything advertised by `originator`
    pub fn withdraw_originator(&mut self, originator: SystemId) -> usize {
        let mut removed = 0;
        self.routes.retain(|_, candidates| {
            let before = candidates.len();
            candidates.retain(|c| c.originator != originator);
            removed += before - candidates.len();
            !candidates.is_empty()
        });
        removed
    }

    pub fn candidates(&self, prefix: &IpPrefix) -> &[RouteCandidate] {
        self.routes.get(prefix).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn best(&self, prefix: &IpPrefix, config: &FabricConfig) -> Option<&RouteCandidate> {
        select_best(self.candidates(prefix), config)
    }

    /// Best route of every prefix that has an eligible candidate
    pub fn best_routes<'a>(
        &'a self,
        config: &'a FabricConfig,
    ) -> impl Iterator<Item = (&'a IpPrefix, &'a RouteCandidate)> + 'a {
        self.routes
            .iter()
            .filter_map(move |(prefix, candidates)| {
                select_best(candidates, config).map(|best| (prefix, best))
            })
    }

    pub fn prefix_count(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::PrefixAttributes;
    use crate::types::IeeeTimestamp;

    fn sid(value: u64) -> SystemId {
        SystemId::new(value).unwrap()
    }

    #[test]
    fn test_prefer_follows_table() {
        assert_eq!(prefer(RouteType::Discard, RouteType::LocalPrefix), RouteType::Discard);
        assert_eq!(prefer(RouteType::SouthPgpPrefix, RouteType::LocalPrefix), RouteType::LocalPrefix);
        assert_eq!(prefer(RouteType::NorthPrefix, RouteType::SouthPrefix), RouteType::NorthPrefix);
        assert_eq!(
            prefer(RouteType::NegativeNorthPrefix, RouteType::SouthExternalPrefix),
            RouteType::SouthExternalPrefix
        );
    }

    #[test]
    fn test_prefer_total_order() {
        for (i, a) in RouteType::ALL.iter().enumerate() {
            for (j, b) in RouteType::ALL.iter().enumerate() {
                let expected = if i <= j { *a } else { *b };
                assert_eq!(prefer(*a, *b), expected);
                assert_eq!(prefer(*a, *b), prefer(*b, *a));
            }
        }
    }

    #[test]
    fn test_select_by_route_type_before_metric() {
        let config = FabricConfig::default();
        let candidates = vec![
            RouteCandidate::new(RouteType::SouthPrefix, 1, sid(1)),
            RouteCandidate::new(RouteType::NorthPrefix, 100, sid(2)),
        ];
        let best = select_best(&candidates, &config).unwrap();
        assert_eq!(best.originator, sid(2));
    }

    #[test]
    fn test_select_lower_metric_within_type() {
        let config = FabricConfig::default();
        let candidates = vec![
            RouteCandidate::new(RouteType::NorthPrefix, 20, sid(1)),
            RouteCandidate::new(RouteType::NorthPrefix, 10, sid(2)),
        ];
        assert_eq!(select_best(&candidates, &config).unwrap().originator, sid(2));
    }

    #[test]
    fn test_invalid_and_infinite_metrics() {
        let config = FabricConfig::default();
        let candidates = vec![
            RouteCandidate::new(RouteType::NorthPrefix, 0, sid(1)),
            RouteCandidate::new(RouteType::NorthPrefix, 0x7FFF_FFFF, sid(2)),
            RouteCandidate::new(RouteType::NorthPrefix, 0x7FFF_FFFE, sid(3)),
        ];
        assert_eq!(select_best(&candidates, &config).unwrap().originator, sid(3));
        assert!(select_best(&candidates[..2], &config).is_none());
    }

    #[test]
    fn test_infinite_worse_than_finite_in_ordering() {
        let config = FabricConfig::default();
        let finite = RouteCandidate::new(RouteType::NorthPrefix, 1_000_000, sid(5));
        let infinite = RouteCandidate::new(RouteType::NorthPrefix, u32::MAX, sid(1));
        assert_eq!(compare_candidates(&finite, &infinite, &config), Ordering::Less);
    }

    #[test]
    fn test_illegal_never_selected() {
        let config = FabricConfig::default();
        let candidates = vec![
            RouteCandidate::new(RouteType::Illegal, 1, sid(1)),
            RouteCandidate::new(RouteType::SouthExternalPrefix, 50, sid(2)),
        ];
        assert_eq!(select_best(&candidates, &config).unwrap().originator, sid(2));
    }

    #[test]
    fn test_stable_tie_break() {
        let config = FabricConfig::default();
        let candidates = vec![
            RouteCandidate::new(RouteType::NorthPrefix, 10, sid(9)),
            RouteCandidate::new(RouteType::NorthPrefix, 10, sid(4)),
            RouteCandidate::new(RouteType::NorthPrefix, 10, sid(7)),
        ];
        assert_eq!(select_best(&candidates, &config).unwrap().originator, sid(4));
    }

    #[test]
    fn test_newer_prefix_sequence_breaks_metric_tie() {
        let config = FabricConfig::default();
        let old = PrefixSequence::new(IeeeTimestamp::new(100, None), None);
        let new = PrefixSequence::new(IeeeTimestamp::new(105, None), None);
        let candidates = vec![
            RouteCandidate::new(RouteType::NorthPrefix, 10, sid(1)).with_sequence(old),
            RouteCandidate::new(RouteType::NorthPrefix, 10, sid(2)).with_sequence(new),
        ];
        assert_eq!(select_best(&candidates, &config).unwrap().originator, sid(2));
    }

    #[test]
    fn test_route_table_add_and_withdraw() {
        let config = FabricConfig::default();
        let prefix: IpPrefix = "10.0.0.0/24".parse().unwrap();
        let mut element = PrefixTieElement::default();
        element
            .prefixes
            .insert(prefix.clone(), PrefixAttributes::with_metric(5));

        let mut table = RouteTable::new();
        table.add_prefixes(sid(1), RouteType::NorthPrefix, &element, 1);
        table.add_prefixes(sid(2), RouteType::NorthPrefix, &element, 10);
        table.add_prefixes(sid(1), RouteType::NorthPrefix, &element, 20);

        assert_eq!(table.candidates(&prefix).len(), 2);
        let best = table.best(&prefix, &config).unwrap();
        assert_eq!(best.originator, sid(2));
        assert_eq!(best.metric, 15);

        assert_eq!(table.withdraw_originator(sid(2)), 1);
        assert_eq!(table.best(&prefix, &config).unwrap().metric, 25);
        assert_eq!(table.withdraw_originator(sid(1)), 1);
        assert_eq!(table.prefix_count(), 0);
        assert_eq!(table.best_routes(&config).count(), 0);
    }
}
