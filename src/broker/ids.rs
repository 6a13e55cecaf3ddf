//! Actor identities.
//!
//! Identities are derived, never stored: the same topic name always maps to
//! the same publisher, and the same `(publisher, batch index)` always maps to
//! the same distributor.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::topic::Topic;

const NAMESPACE: Uuid = Uuid::from_u128(0x1c5e_7a2b_44f0_4d3e_9b8a_6f02_d1e4_c0a7);

macro_rules! actor_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Actor name used for logs, timers and storage namespaces.
            pub fn actor_name(&self) -> String {
                format!("{}/{}", $kind, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

actor_id!(
    /// One per topic.
    PublisherId,
    "publisher"
);
actor_id!(SubscriberId, "subscriber");
actor_id!(DistributorId, "distributor");
actor_id!(
    /// One live client connection inside a subscriber.
    SessionId,
    "session"
);

impl PublisherId {
    pub fn for_topic(topic: &Topic) -> Self {
        Self(Uuid::new_v5(
            &NAMESPACE,
            format!("publisher:{}", topic.as_str()).as_bytes(),
        ))
    }
}

impl SubscriberId {
    pub fn for_name(name: &str) -> Self {
        Self(Uuid::new_v5(
            &NAMESPACE,
            format!("subscriber:{name}").as_bytes(),
        ))
    }
}

impl DistributorId {
    pub fn for_batch(caller: &PublisherId, index: usize) -> Self {
        Self(Uuid::new_v5(
            &NAMESPACE,
            format!("distributor:{caller}/{index}").as_bytes(),
        ))
    }
}

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}
