//! Opaque identifiers into the owning arrays of the plant.
//!
//! Each id is a `NonZeroU32` newtype; call sites that need an "unset"
//! state use `Option<Id>` rather than a sentinel baked into the type
//! itself.

use std::num::NonZeroU32;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub fn new(index: u32) -> Option<Self> {
                NonZeroU32::new(index).map(Self)
            }

            /// Construct from a zero-based array index.
            pub fn from_index(index: usize) -> Self {
                Self(NonZeroU32::new(index as u32 + 1).expect("index + 1 is never zero"))
            }

            pub fn index(self) -> usize {
                (self.0.get() - 1) as usize
            }

            pub fn get(self) -> u32 {
                self.0.get()
            }
        }
    };
}

define_id!(SensorId);
define_id!(RelayId);
define_id!(PumpId);
define_id!(ValveId);
define_id!(BModelId);
define_id!(CircuitId);
define_id!(DhwtId);
define_id!(HeatsourceId);
define_id!(ScheduleId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_roundtrips() {
        let id = SensorId::from_index(0);
        assert_eq!(id.index(), 0);
        let id2 = SensorId::from_index(5);
        assert_eq!(id2.index(), 5);
        assert_ne!(id, id2);
    }
}
