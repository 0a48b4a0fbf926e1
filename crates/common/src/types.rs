use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Each id gets its own type so an `OrderId` can never be passed where an
/// `OrderLineId` is expected.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an id from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of an order (the aggregate root).
    OrderId
);
uuid_id!(
    /// Identifier of an order line, the per-location grouping of items.
    OrderLineId
);
uuid_id!(
    /// Identifier of a single ordered item.
    OrderItemId
);
uuid_id!(
    /// Identifier of an escalation record.
    ProblemId
);
uuid_id!(
    /// Identifier of the customer who placed an order.
    CustomerId
);

/// Identifier of a fulfillment location.
///
/// Assigned by the external location directory, so it is numeric rather
/// than a locally generated UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(i64);

impl LocationId {
    /// Creates a location id from the directory's numeric id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the numeric id.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LocationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
