//! # Port Placement
//!
//! Chooses which free load-balanced port a domain gets next. Ports whose
//! numeric neighbours belong to other domains are preferred, so one domain's
//! CQs end up spread out rather than packed next to each other.

use alloc::collections::VecDeque;

use crate::resource::{LdbPort, Location};
use crate::{DomainId, PortId};

/// Ownership of a neighbouring port as seen from the requesting domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Neighbour {
    Unowned,
    Other,
    Same,
}

fn classify(ports: &[LdbPort], id: usize, domain: DomainId) -> Neighbour {
    match ports[id].owner {
        Location::Pool => Neighbour::Unowned,
        Location::Domain(d) if d == domain => Neighbour::Same,
        Location::Domain(_) => Neighbour::Other,
    }
}

/// Placement rank of `port`; lower is better
fn rank(ports: &[LdbPort], port: PortId, domain: DomainId) -> u32 {
    let n = ports.len();
    let id = port as usize;
    let prev = classify(ports, (id + n - 1) % n, domain);
    let next = classify(ports, (id + 1) % n, domain);

    match (prev, next) {
        (Neighbour::Other, Neighbour::Other) => 0,
        (Neighbour::Other, Neighbour::Unowned) | (Neighbour::Unowned, Neighbour::Other) => 1,
        (Neighbour::Unowned, Neighbour::Unowned) => 2,
        _ => 3,
    }
}

/// Position in `free` of the port to hand to `domain`
///
/// Priority: both neighbours owned by another domain, then one other-owned
/// and one unowned, then both unowned, then the first entry. Returns `None`
/// only for an empty list.
pub fn pick_port(free: &VecDeque<PortId>, ports: &[LdbPort], domain: DomainId) -> Option<usize> {
    if free.is_empty() || ports.is_empty() {
        return None;
    }

    for wanted in 0..3 {
        if let Some(pos) = free.iter().position(|&p| rank(ports, p, domain) == wanted) {
            return Some(pos);
        }
    }
    Some(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn ports(owners: &[Option<DomainId>]) -> Vec<LdbPort> {
        owners
            .iter()
            .enumerate()
            .map(|(i, owner)| {
                let mut p = LdbPort::new(i as PortId, 0);
                if let Some(d) = owner {
                    p.owner = Location::Domain(*d);
                }
                p
            })
            .collect()
    }

    #[test]
    fn test_prefers_port_between_other_domains() {
        //            0        1     2        3     4        5
        let ports = ports(&[None, None, Some(1), None, Some(1), None]);
        let free: VecDeque<PortId> = [0, 1, 3, 5].into_iter().collect();

        // port 3 sits between two ports of domain 1
        assert_eq!(pick_port(&free, &ports, 0), Some(2));
    }

    #[test]
    fn test_one_other_one_unowned_beats_both_unowned() {
        let ports = ports(&[None, None, None, None, Some(1), None, None, None]);
        let free: VecDeque<PortId> = [1, 3, 5, 7].into_iter().collect();

        assert_eq!(pick_port(&free, &ports, 0), Some(1));
    }

    #[test]
    fn test_both_unowned_beats_own_neighbour() {
        let ports = ports(&[Some(0), None, None, None, None, None]);
        let free: VecDeque<PortId> = [1, 3].into_iter().collect();

        assert_eq!(pick_port(&free, &ports, 0), Some(1));
    }

    #[test]
    fn test_neighbours_wrap_around() {
        let ports = ports(&[None, Some(1), None, None, Some(1)]);
        let free: VecDeque<PortId> = [2, 0].into_iter().collect();

        // port 0's neighbours are 4 and 1
        assert_eq!(pick_port(&free, &ports, 0), Some(1));
    }

    #[test]
    fn test_fallback_is_total() {
        let packed = ports(&[Some(0), None, Some(0), None, Some(0), None]);
        let free: VecDeque<PortId> = [5, 3, 1].into_iter().collect();

        assert_eq!(pick_port(&free, &packed, 0), Some(0));
        assert_eq!(pick_port(&VecDeque::new(), &packed, 0), None);

        // Every owner pattern of a small ring yields a pick
        for mask in 0u32..(1 << 6) {
            let owners: Vec<Option<DomainId>> = (0..6)
                .map(|i| if mask & (1 << i) != 0 { Some(i % 2) } else { None })
                .collect();
            let ring = ports(&owners);
            let free: VecDeque<PortId> = (0..6).filter(|i| mask & (1 << i) == 0).collect();
            assert_eq!(pick_port(&free, &ring, 0).is_some(), !free.is_empty());
        }
    }
}
