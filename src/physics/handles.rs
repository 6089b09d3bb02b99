use std::hash::Hash;

use crate::interop::{AbiArg, AbiReturn, AbiType};

// Newtypes over the native id integers; `repr(transparent)` keeps them ABI-identical.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u32);

#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SubShapeId(pub u32);

#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ObjectLayer(pub u16);

impl BodyId {
    /// Value the native library uses for "no body".
    pub const INVALID: BodyId = BodyId(0xFFFF_FFFF);

    const INDEX_MASK: u32 = 0x007F_FFFF;
    const SEQUENCE_SHIFT: u32 = 24;

    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Slot of the body in the native body array.
    #[inline(always)]
    pub fn index(self) -> u32 {
        self.0 & Self::INDEX_MASK
    }

    /// Reuse counter of the slot.
    #[inline(always)]
    pub fn sequence(self) -> u8 {
        (self.0 >> Self::SEQUENCE_SHIFT) as u8
    }
}

impl SubShapeId {
    /// The root shape: no sub shape selected.
    pub const EMPTY: SubShapeId = SubShapeId(0xFFFF_FFFF);
}

macro_rules! impl_abi_newtype {
    ($($ty:ty => $abi:ident),* $(,)?) => {
        $(
            impl AbiArg for $ty {
                const ABI: AbiType = AbiType::$abi;
            }

            impl AbiReturn for $ty {
                const ABI: AbiType = AbiType::$abi;
            }
        )*
    };
}

impl_abi_newtype!(BodyId => U32, SubShapeId => U32, ObjectLayer => U16);

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BodyId<{}>", self.0)
    }
}

impl std::fmt::Display for SubShapeId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "SubShapeId<{}>", self.0)
    }
}

impl std::fmt::Display for ObjectLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ObjectLayer<{}>", self.0)
    }
}
