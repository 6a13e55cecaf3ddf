//! Fanout batching
//!
//! A publisher splits its subscriber set into ordered batches of at most
//! `batch_size` ids and hands each batch to the distributor derived from
//! `(publisher, batch index)`. Same shape in, same distributors out.

use std::collections::BTreeSet;

use crate::broker::ids::{DistributorId, PublisherId, SubscriberId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub distributor: DistributorId,
    pub targets: Vec<SubscriberId>,
}

/// Plans `ceil(N / batch_size)` non-overlapping batches. A `batch_size` of
/// zero is treated as one.
pub fn plan(
    publisher: &PublisherId,
    subscribers: &BTreeSet<SubscriberId>,
    batch_size: usize,
) -> Vec<Batch> {
    let members: Vec<SubscriberId> = subscribers.iter().copied().collect();
    members
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            distributor: DistributorId::for_batch(publisher, index),
            targets: chunk.to_vec(),
        })
        .collect()
}
