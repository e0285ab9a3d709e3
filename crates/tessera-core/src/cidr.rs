//! Subnet parsing and overlap checks for edge admission.

use ipnet::IpNet;
use std::str::FromStr;

use tessera_types::{Edge, ValidationError};

/// Parse network/prefix-length notation and clear host bits.
///
/// `10.0.0.7/24` is accepted and normalized to `10.0.0.0/24`. Bare addresses
/// without a prefix length are rejected.
pub fn parse_cidr(cidr: &str) -> Result<IpNet, ValidationError> {
    let trimmed = cidr.trim();
    if !trimmed.contains('/') {
        return Err(ValidationError::InvalidCidr {
            cidr: cidr.to_string(),
            message: "missing prefix length".to_string(),
        });
    }
    IpNet::from_str(trimmed)
        .map(|net| net.trunc())
        .map_err(|e| ValidationError::InvalidCidr { cidr: cidr.to_string(), message: e.to_string() })
}

/// Two ranges overlap when either contains the other's network address.
///
/// Prefix-aligned ranges are either nested or disjoint, so this covers equal,
/// containing and partially overlapping inputs. Different address families
/// never overlap.
pub fn cidrs_overlap(a: &IpNet, b: &IpNet) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// First edge (other than `candidate_name`) whose subnet overlaps `candidate`.
///
/// Existing edges with unparseable CIDRs are skipped with a warning; they could
/// only have been written by a foreign writer.
pub fn find_conflict<'a>(
    candidate: &IpNet,
    candidate_name: &str,
    existing: impl IntoIterator<Item = &'a Edge>,
) -> Option<&'a Edge> {
    existing.into_iter().filter(|edge| edge.name != candidate_name).find(|edge| {
        match parse_cidr(&edge.cidr) {
            Ok(net) => cidrs_overlap(candidate, &net),
            Err(e) => {
                tracing::warn!(
                    namespace = %edge.namespace,
                    edge = %edge.name,
                    error = %e,
                    "Skipping stored edge with invalid CIDR"
                );
                false
            },
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn net(s: &str) -> IpNet {
        parse_cidr(s).unwrap()
    }

    #[test]
    fn test_parse_normalizes_host_bits() {
        assert_eq!(net("10.0.0.7/24").to_string(), "10.0.0.0/24");
        assert_eq!(net(" 172.18.0.0/16 ").to_string(), "172.18.0.0/16");
        assert_eq!(net("fd00::1/64").to_string(), "fd00::/64");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "10.0.0.0", "10.0.0.0/33", "10.0.0/24", "abc/8", "10.0.0.0/-1"] {
            let err = parse_cidr(bad).unwrap_err();
            assert!(matches!(err, ValidationError::InvalidCidr { .. }), "{bad:?} -> {err:?}");
        }
    }

    #[test]
    fn test_overlap_cases() {
        assert!(cidrs_overlap(&net("10.0.0.0/24"), &net("10.0.0.0/24")));
        assert!(cidrs_overlap(&net("10.0.0.0/24"), &net("10.0.0.128/25")));
        assert!(cidrs_overlap(&net("10.0.0.128/25"), &net("10.0.0.0/24")));
        assert!(cidrs_overlap(&net("0.0.0.0/0"), &net("192.168.1.0/24")));
        assert!(!cidrs_overlap(&net("10.0.0.0/25"), &net("10.0.0.128/25")));
        assert!(!cidrs_overlap(&net("10.0.0.0/8"), &net("::/0")));
    }

    #[test]
    fn test_find_conflict_ignores_same_name() {
        let existing = vec![
            Edge::new("default", "e1", "1.1.1.1:1", "10.0.0.0/24"),
            Edge::new("default", "e2", "2.2.2.2:1", "10.1.0.0/16"),
            Edge::new("default", "broken", "3.3.3.3:1", "not-a-cidr"),
        ];
        let hit = find_conflict(&net("10.1.2.0/24"), "e9", &existing).unwrap();
        assert_eq!(hit.name, "e2");
        assert!(find_conflict(&net("10.0.0.0/24"), "e1", &existing).is_none());
        assert!(find_conflict(&net("192.168.0.0/16"), "e9", &existing).is_none());
    }

    fn ipv4_net() -> impl Strategy<Value = IpNet> {
        // Small address space so overlaps are common.
        (0u8..4, 0u8..=255, 16u8..=26).prop_map(|(b, c, len)| {
            let addr = Ipv4Addr::new(10, b, c, 0);
            IpNet::new(addr.into(), len).unwrap().trunc()
        })
    }

    fn ranges_intersect(a: &IpNet, b: &IpNet) -> bool {
        let (IpNet::V4(a), IpNet::V4(b)) = (a, b) else { return false };
        let (a_lo, a_hi) = (u32::from(a.network()), u32::from(a.broadcast()));
        let (b_lo, b_hi) = (u32::from(b.network()), u32::from(b.broadcast()));
        a_lo <= b_hi && b_lo <= a_hi
    }

    proptest! {
        #[test]
        fn prop_overlap_matches_range_intersection(a in ipv4_net(), b in ipv4_net()) {
            prop_assert_eq!(cidrs_overlap(&a, &b), ranges_intersect(&a, &b));
            prop_assert_eq!(cidrs_overlap(&a, &b), cidrs_overlap(&b, &a));
        }

        #[test]
        fn prop_admitted_set_is_pairwise_disjoint(nets in proptest::collection::vec(ipv4_net(), 1..24)) {
            let mut admitted: Vec<Edge> = Vec::new();
            for (i, candidate) in nets.iter().enumerate() {
                let conflict = find_conflict(candidate, &format!("e{i}"), &admitted).is_some();
                let expected = admitted.iter().any(|e| ranges_intersect(candidate, &net(&e.cidr)));
                prop_assert_eq!(conflict, expected);
                if !conflict {
                    admitted.push(Edge::new("ns", format!("e{i}"), "h:1", candidate.to_string()));
                }
            }
            for (i, a) in admitted.iter().enumerate() {
                for b in &admitted[i + 1..] {
                    prop_assert!(!ranges_intersect(&net(&a.cidr), &net(&b.cidr)));
                }
            }
        }
    }
}
