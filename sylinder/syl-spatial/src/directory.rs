//! Distributed data directory.
//!
//! Each rank publishes `{gid -> record}` for the rods it owns; afterwards
//! any rank may look up an arbitrary list of gids and receives the records
//! in request order, wherever they live. The rank responsible for answering
//! a gid is `hash(gid) mod n_ranks` (owner-computes hash); publishing
//! forwards each record to its hash owner, and queries travel to the hash
//! owner and back.
//!
//! `find` is collective: every rank must call it, even with an empty query
//! list, and the call suspends until all ranks have posted their queries.

use hashbrown::HashMap;
use syl_types::Gid;

use crate::{Comm, SpatialError};

/// Distributed gid-keyed record store.
#[derive(Debug)]
pub struct DataDirectory<V> {
    comm: Comm,
    /// Records this rank answers for (hash ownership, not container
    /// ownership).
    answering: HashMap<Gid, V>,
}

impl<V: Clone + Send + 'static> DataDirectory<V> {
    /// An empty directory on this communicator.
    #[must_use]
    pub fn new(comm: Comm) -> Self {
        Self {
            comm,
            answering: HashMap::new(),
        }
    }

    /// Hash owner of a gid. Deterministic and identical on every rank.
    fn owner_of(&self, gid: Gid) -> usize {
        let h = (gid.raw() as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        ((h >> 32) as usize) % self.comm.size()
    }

    /// Collective: replace the directory contents with this step's records.
    ///
    /// Each rank contributes the records of the rods it currently owns;
    /// records are routed to their hash owners and indexed there.
    pub fn publish(&mut self, records: impl IntoIterator<Item = (Gid, V)>) {
        let n = self.comm.size();
        let mut outgoing: Vec<Vec<(Gid, V)>> = vec![Vec::new(); n];
        for (gid, value) in records {
            outgoing[self.owner_of(gid)].push((gid, value));
        }
        self.answering.clear();
        for bucket in self.comm.all_to_all(outgoing) {
            for (gid, value) in bucket {
                self.answering.insert(gid, value);
            }
        }
    }

    /// Collective: look up `gid_to_find` and return the records in request
    /// order.
    ///
    /// # Errors
    ///
    /// [`SpatialError::UnknownGid`] when any requested gid was never
    /// published. The caller is responsible for asking only for live gids;
    /// this is a fatal consistency error.
    pub fn find(&self, gid_to_find: &[Gid]) -> crate::Result<Vec<V>> {
        let n = self.comm.size();

        // Route queries to their hash owners, remembering the request slot.
        let mut queries: Vec<Vec<(usize, Gid)>> = vec![Vec::new(); n];
        for (slot, &gid) in gid_to_find.iter().enumerate() {
            queries[self.owner_of(gid)].push((slot, gid));
        }

        // Answer what lands here; a miss is reported back as None so every
        // rank can fail the same way.
        let incoming = self.comm.all_to_all(queries);
        let replies: Vec<Vec<(usize, Gid, Option<V>)>> = incoming
            .into_iter()
            .map(|bucket| {
                bucket
                    .into_iter()
                    .map(|(slot, gid)| (slot, gid, self.answering.get(&gid).cloned()))
                    .collect()
            })
            .collect();

        let mut found: Vec<Option<V>> = vec![None; gid_to_find.len()];
        let mut missing: Option<Gid> = None;
        for bucket in self.comm.all_to_all(replies) {
            for (slot, gid, value) in bucket {
                match value {
                    Some(v) => found[slot] = Some(v),
                    None => missing = Some(gid),
                }
            }
        }
        if let Some(gid) = missing {
            return Err(SpatialError::UnknownGid { gid });
        }

        let mut out = Vec::with_capacity(found.len());
        for (slot, value) in found.into_iter().enumerate() {
            match value {
                Some(v) => out.push(v),
                None => {
                    return Err(SpatialError::UnknownGid {
                        gid: gid_to_find[slot],
                    })
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::CommWorld;

    #[test]
    fn solo_publish_find() {
        let mut dir = DataDirectory::new(Comm::solo());
        dir.publish([(Gid::new(1), 10_i32), (Gid::new(5), 50)]);
        let got = dir.find(&[Gid::new(5), Gid::new(1), Gid::new(5)]).unwrap();
        assert_eq!(got, vec![50, 10, 50]);
    }

    #[test]
    fn solo_unknown_gid_is_fatal() {
        let mut dir = DataDirectory::new(Comm::solo());
        dir.publish([(Gid::new(1), 1_i32)]);
        assert!(matches!(
            dir.find(&[Gid::new(2)]),
            Err(SpatialError::UnknownGid { .. })
        ));
    }

    #[test]
    fn cross_rank_find() {
        let world = CommWorld::new(3);
        std::thread::scope(|scope| {
            for rank in 0..3 {
                let comm = Comm::world(&world, rank);
                scope.spawn(move || {
                    // Rank r owns gids 10r and 10r+1.
                    let base = 10 * rank as i64;
                    let mut dir = DataDirectory::new(comm);
                    dir.publish([
                        (Gid::new(base), base * 100),
                        (Gid::new(base + 1), (base + 1) * 100),
                    ]);
                    // Every rank asks for records of every other rank.
                    let want = vec![Gid::new(21), Gid::new(0), Gid::new(10)];
                    let got = dir.find(&want).unwrap();
                    assert_eq!(got, vec![2100, 0, 1000]);
                });
            }
        });
    }

    #[test]
    fn republish_replaces() {
        let mut dir = DataDirectory::new(Comm::solo());
        dir.publish([(Gid::new(1), 1_i32)]);
        dir.publish([(Gid::new(2), 2_i32)]);
        assert!(dir.find(&[Gid::new(1)]).is_err());
        assert_eq!(dir.find(&[Gid::new(2)]).unwrap(), vec![2]);
    }
}
