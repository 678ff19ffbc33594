//! Explicit communicator handle.
//!
//! The simulation never touches process-global communication state; every
//! component that needs a collective receives a [`Comm`] by value. Two
//! backends exist:
//!
//! - [`Comm::solo`]: a single rank; every collective is an identity.
//! - [`Comm::world`]: one of `n` ranks driven by threads of this process,
//!   synchronising through a shared [`CommWorld`]. This is how multi-rank
//!   behavior is exercised in tests.
//!
//! Every collective is built on one primitive, `all_exchange`, in which each
//! rank deposits a value and receives every rank's value in rank order. A
//! rank calling a collective suspends until all ranks have called it;
//! calling collectives in different orders on different ranks deadlocks or
//! panics, exactly as divergent collectives do in a message-passing run.

use std::any::Any;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Communicator handle. Cheap to clone; clones refer to the same rank.
#[derive(Clone)]
pub struct Comm {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Solo,
    World { world: Arc<CommWorld>, rank: usize },
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Inner::Solo => write!(f, "Comm::solo"),
            Inner::World { world, rank } => {
                write!(f, "Comm::world({}/{})", rank, world.size)
            }
        }
    }
}

impl Comm {
    /// A single-rank communicator.
    #[must_use]
    pub fn solo() -> Self {
        Self { inner: Inner::Solo }
    }

    /// Rank `rank` of an in-process world.
    #[must_use]
    pub fn world(world: &Arc<CommWorld>, rank: usize) -> Self {
        assert!(rank < world.size, "rank out of range");
        Self {
            inner: Inner::World {
                world: Arc::clone(world),
                rank,
            },
        }
    }

    /// This rank's index.
    #[must_use]
    pub fn rank(&self) -> usize {
        match &self.inner {
            Inner::Solo => 0,
            Inner::World { rank, .. } => *rank,
        }
    }

    /// Number of ranks.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.inner {
            Inner::Solo => 1,
            Inner::World { world, .. } => world.size,
        }
    }

    /// Suspend until every rank has arrived.
    pub fn barrier(&self) {
        if let Inner::World { world, rank } = &self.inner {
            world.all_exchange::<()>(*rank, ());
        }
    }

    /// Gather every rank's vector, returned per source rank in rank order.
    #[must_use]
    pub fn all_gather<T: Clone + Send + 'static>(&self, value: Vec<T>) -> Vec<Vec<T>> {
        match &self.inner {
            Inner::Solo => vec![value],
            Inner::World { world, rank } => world.all_exchange(*rank, value),
        }
    }

    /// Gather every rank's vector, concatenated in rank order.
    #[must_use]
    pub fn all_gather_flat<T: Clone + Send + 'static>(&self, value: Vec<T>) -> Vec<T> {
        self.all_gather(value).into_iter().flatten().collect()
    }

    /// Personalised exchange: `buckets[r]` is sent to rank `r`; the return
    /// value holds the bucket received from each source rank.
    ///
    /// `buckets.len()` must equal [`size`](Comm::size).
    #[must_use]
    pub fn all_to_all<T: Clone + Send + 'static>(&self, buckets: Vec<Vec<T>>) -> Vec<Vec<T>> {
        assert_eq!(buckets.len(), self.size(), "one bucket per destination");
        match &self.inner {
            Inner::Solo => buckets,
            Inner::World { world, rank } => {
                let all = world.all_exchange(*rank, buckets);
                all.into_iter()
                    .map(|mut from_src| from_src.swap_remove(*rank))
                    .collect()
            }
        }
    }

    /// Elementwise sum of `values` across ranks.
    #[must_use]
    pub fn all_reduce_sum(&self, values: &[f64]) -> Vec<f64> {
        self.reduce_with(values, 0.0, |acc, x| acc + x)
    }

    /// Elementwise minimum across ranks.
    #[must_use]
    pub fn all_reduce_min(&self, values: &[f64]) -> Vec<f64> {
        self.reduce_with(values, f64::INFINITY, f64::min)
    }

    /// Elementwise maximum across ranks.
    #[must_use]
    pub fn all_reduce_max(&self, values: &[f64]) -> Vec<f64> {
        self.reduce_with(values, f64::NEG_INFINITY, f64::max)
    }

    /// Sum of one scalar across ranks.
    #[must_use]
    pub fn all_reduce_sum_scalar(&self, value: f64) -> f64 {
        self.all_reduce_sum(&[value])[0]
    }

    /// Maximum of one integer across ranks.
    #[must_use]
    pub fn all_reduce_max_i64(&self, value: i64) -> i64 {
        match &self.inner {
            Inner::Solo => value,
            Inner::World { world, rank } => world
                .all_exchange(*rank, value)
                .into_iter()
                .max()
                .unwrap_or(value),
        }
    }

    /// Sum of one integer across ranks.
    #[must_use]
    pub fn all_reduce_sum_usize(&self, value: usize) -> usize {
        match &self.inner {
            Inner::Solo => value,
            Inner::World { world, rank } => {
                world.all_exchange(*rank, value).into_iter().sum()
            }
        }
    }

    fn reduce_with(&self, values: &[f64], init: f64, op: fn(f64, f64) -> f64) -> Vec<f64> {
        match &self.inner {
            Inner::Solo => values.to_vec(),
            Inner::World { world, rank } => {
                let all = world.all_exchange(*rank, values.to_vec());
                let mut out = vec![init; values.len()];
                for contribution in &all {
                    assert_eq!(
                        contribution.len(),
                        values.len(),
                        "reduction length mismatch across ranks"
                    );
                    for (o, &x) in out.iter_mut().zip(contribution) {
                        *o = op(*o, x);
                    }
                }
                out
            }
        }
    }
}

/// Shared state of an in-process multi-rank world.
///
/// Create one world, then hand [`Comm::world`] handles to `n` threads, one
/// per rank. All collectives are two-phase: every rank deposits its
/// contribution, then every rank reads the full slot table before the next
/// collective may begin.
pub struct CommWorld {
    size: usize,
    state: Mutex<ExchangeState>,
    arrived: Condvar,
}

struct ExchangeState {
    gathering: bool,
    deposited: usize,
    taken: usize,
    slots: Vec<Option<Box<dyn Any + Send>>>,
}

impl CommWorld {
    /// A world of `size` ranks.
    #[must_use]
    pub fn new(size: usize) -> Arc<Self> {
        assert!(size > 0, "world needs at least one rank");
        Arc::new(Self {
            size,
            state: Mutex::new(ExchangeState {
                gathering: false,
                deposited: 0,
                taken: 0,
                slots: (0..size).map(|_| None).collect(),
            }),
            arrived: Condvar::new(),
        })
    }

    /// Number of ranks in this world.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    fn all_exchange<T: Clone + Send + 'static>(&self, rank: usize, value: T) -> Vec<T> {
        let mut st = lock(&self.state);
        // A rank racing ahead into the next collective waits for the
        // laggards of the previous one to finish reading.
        while st.gathering {
            st = wait(&self.arrived, st);
        }
        assert!(
            st.slots[rank].is_none(),
            "rank {rank} deposited twice in one collective"
        );
        st.slots[rank] = Some(Box::new(value));
        st.deposited += 1;
        if st.deposited == self.size {
            st.gathering = true;
            st.taken = 0;
            self.arrived.notify_all();
        } else {
            while !st.gathering {
                st = wait(&self.arrived, st);
            }
        }

        let out: Vec<T> = st
            .slots
            .iter()
            .map(|slot| {
                let any = slot.as_ref().unwrap_or_else(|| {
                    panic!("collective participation mismatch")
                });
                any.downcast_ref::<T>()
                    .cloned()
                    .unwrap_or_else(|| panic!("collective payload type mismatch across ranks"))
            })
            .collect();

        st.taken += 1;
        if st.taken == self.size {
            for slot in &mut st.slots {
                *slot = None;
            }
            st.deposited = 0;
            st.gathering = false;
            self.arrived.notify_all();
        }
        out
    }
}

fn lock(m: &Mutex<ExchangeState>) -> MutexGuard<'_, ExchangeState> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wait<'a>(cv: &Condvar, guard: MutexGuard<'a, ExchangeState>) -> MutexGuard<'a, ExchangeState> {
    match cv.wait(guard) {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
