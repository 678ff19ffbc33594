//! Global link maps.
//!
//! Four multimaps keyed by rod gid describe the permanent bilateral
//! constraints of the system. The maps are global knowledge: every rank
//! holds an identical copy, reconciled by all-gather whenever links are
//! added. Reverse maps allow traversal from the "next" side.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::Gid;

/// A two-rod link entry, as read from the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Gid of the rod whose plus end is linked.
    pub prev: Gid,
    /// Gid of the rod whose minus end is linked.
    pub next: Gid,
}

/// A three-rod link entry: a center rod bent against its two neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriLink {
    /// Center rod.
    pub center: Gid,
    /// Left neighbor.
    pub left: Gid,
    /// Right neighbor.
    pub right: Gid,
}

/// The four link multimaps plus their reverse maps.
#[derive(Debug, Clone, Default)]
pub struct LinkMaps {
    pin: HashMap<Gid, Vec<Gid>>,
    pin_reverse: HashMap<Gid, Vec<Gid>>,
    extend: HashMap<Gid, Vec<Gid>>,
    extend_reverse: HashMap<Gid, Vec<Gid>>,
    bend: HashMap<Gid, Vec<Gid>>,
    bend_reverse: HashMap<Gid, Vec<Gid>>,
    tri_bend: HashMap<Gid, Vec<(Gid, Gid)>>,
    tri_bend_reverse: HashMap<(Gid, Gid), Vec<Gid>>,
}

impl LinkMaps {
    /// Empty maps.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every link.
    pub fn clear(&mut self) {
        self.pin.clear();
        self.pin_reverse.clear();
        self.extend.clear();
        self.extend_reverse.clear();
        self.bend.clear();
        self.bend_reverse.clear();
        self.tri_bend.clear();
        self.tri_bend_reverse.clear();
    }

    /// Add a rigid pin between the plus end of `prev` and the minus end of
    /// `next`.
    pub fn insert_pin(&mut self, link: Link) {
        self.pin.entry(link.prev).or_default().push(link.next);
        self.pin_reverse
            .entry(link.next)
            .or_default()
            .push(link.prev);
    }

    /// Add a Hookean extension spring between the plus end of `prev` and the
    /// minus end of `next`.
    pub fn insert_extend(&mut self, link: Link) {
        self.extend.entry(link.prev).or_default().push(link.next);
        self.extend_reverse
            .entry(link.next)
            .or_default()
            .push(link.prev);
    }

    /// Add an angular spring on the relative orientation of two rods.
    pub fn insert_bend(&mut self, link: Link) {
        self.bend.entry(link.prev).or_default().push(link.next);
        self.bend_reverse
            .entry(link.next)
            .or_default()
            .push(link.prev);
    }

    /// Add an angular spring on the chord orientation through three rod
    /// centers.
    pub fn insert_tri_bend(&mut self, link: TriLink) {
        self.tri_bend
            .entry(link.center)
            .or_default()
            .push((link.left, link.right));
        self.tri_bend_reverse
            .entry((link.left, link.right))
            .or_default()
            .push(link.center);
    }

    /// Pin partners of `gid` (rods whose minus end attaches to its plus end).
    #[must_use]
    pub fn pins_of(&self, gid: Gid) -> &[Gid] {
        self.pin.get(&gid).map_or(&[], Vec::as_slice)
    }

    /// Extend-link partners of `gid`.
    #[must_use]
    pub fn extends_of(&self, gid: Gid) -> &[Gid] {
        self.extend.get(&gid).map_or(&[], Vec::as_slice)
    }

    /// Bend-link partners of `gid`.
    #[must_use]
    pub fn bends_of(&self, gid: Gid) -> &[Gid] {
        self.bend.get(&gid).map_or(&[], Vec::as_slice)
    }

    /// Tri-bend neighbor pairs of the center rod `gid`.
    #[must_use]
    pub fn tri_bends_of(&self, gid: Gid) -> &[(Gid, Gid)] {
        self.tri_bend.get(&gid).map_or(&[], Vec::as_slice)
    }

    /// Number of pin links.
    #[must_use]
    pub fn pin_count(&self) -> usize {
        self.pin.values().map(Vec::len).sum()
    }

    /// Number of extend links.
    #[must_use]
    pub fn extend_count(&self) -> usize {
        self.extend.values().map(Vec::len).sum()
    }

    /// Number of bend links.
    #[must_use]
    pub fn bend_count(&self) -> usize {
        self.bend.values().map(Vec::len).sum()
    }

    /// Number of tri-bend links.
    #[must_use]
    pub fn tri_bend_count(&self) -> usize {
        self.tri_bend.values().map(Vec::len).sum()
    }

    /// Iterate pin links as (prev, next).
    pub fn iter_pin(&self) -> impl Iterator<Item = Link> + '_ {
        self.pin.iter().flat_map(|(&prev, nexts)| {
            nexts.iter().map(move |&next| Link { prev, next })
        })
    }

    /// Iterate extend links as (prev, next).
    pub fn iter_extend(&self) -> impl Iterator<Item = Link> + '_ {
        self.extend.iter().flat_map(|(&prev, nexts)| {
            nexts.iter().map(move |&next| Link { prev, next })
        })
    }

    /// Iterate bend links as (prev, next).
    pub fn iter_bend(&self) -> impl Iterator<Item = Link> + '_ {
        self.bend.iter().flat_map(|(&prev, nexts)| {
            nexts.iter().map(move |&next| Link { prev, next })
        })
    }

    /// Iterate tri-bend links.
    pub fn iter_tri_bend(&self) -> impl Iterator<Item = TriLink> + '_ {
        self.tri_bend.iter().flat_map(|(&center, pairs)| {
            pairs.iter().map(move |&(left, right)| TriLink {
                center,
                left,
                right,
            })
        })
    }

    /// A deterministic fingerprint of the map contents, used to verify that
    /// all ranks hold identical maps.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut acc: u64 = 0;
        let mut mix = |tag: u64, a: Gid, b: Gid, c: Gid| {
            let mut h = tag
                .wrapping_mul(0x9e37_79b9_7f4a_7c15)
                .wrapping_add(a.raw() as u64)
                .wrapping_mul(0x2545_f491_4f6c_dd1d)
                .wrapping_add(b.raw() as u64)
                .wrapping_mul(0x9e37_79b9_7f4a_7c15)
                .wrapping_add(c.raw() as u64);
            h ^= h >> 33;
            // Order-independent combine: the iteration order of a hash map
            // differs between ranks.
            acc = acc.wrapping_add(h);
        };
        for l in self.iter_pin() {
            mix(1, l.prev, l.next, Gid::new(0));
        }
        for l in self.iter_extend() {
            mix(2, l.prev, l.next, Gid::new(0));
        }
        for l in self.iter_bend() {
            mix(3, l.prev, l.next, Gid::new(0));
        }
        for l in self.iter_tri_bend() {
            mix(4, l.center, l.left, l.right);
        }
        acc
    }
}
