//! Stable handles into the model arenas.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub struct $name(pub u64);

        impl $name {
            /// Create a new ID.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the raw ID value.
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }

            #[allow(clippy::cast_possible_truncation)]
            pub(crate) const fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) const fn from_index(index: usize) -> Self {
                Self(index as u64)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

arena_id!(
    /// Handle of a body in a [`Model`](crate::Model).
    BodyId,
    "Body"
);

arena_id!(
    /// Handle of a grip in a [`Model`](crate::Model).
    GripId,
    "Grip"
);

arena_id!(
    /// Handle of a joint in a [`Model`](crate::Model).
    JointId,
    "Joint"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip_and_display() {
        let id = BodyId::new(7);
        assert_eq!(id.raw(), 7);
        assert_eq!(id.index(), 7);
        assert_eq!(BodyId::from_index(7), id);
        assert_eq!(id.to_string(), "Body(7)");
        assert_eq!(GripId::from(3).to_string(), "Grip(3)");
        assert_eq!(JointId::new(0).to_string(), "Joint(0)");
    }
}
