//! Kademlia node Id or a lookup target
use rand::Rng;
use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 32;
/// Number of distinct distance classes (and buckets), one per bit of an [Id].
pub const KEY_SIZE: usize = ID_SIZE * 8;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia node Id or a lookup target
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE](crate::common::ID_SIZE).
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    /// Distance class between this Id and another Id.
    ///
    /// Returns the zero-based index of the highest set bit of `self XOR other`,
    /// where 0 is the least significant bit and 255 the most significant one.
    ///
    /// Distance to self is 0, the same class as Ids that differ only in the lowest bit.
    /// Distance to an Id that differs in the first bit is 255.
    pub fn distance(&self, other: &Id) -> u8 {
        for i in 0..ID_SIZE {
            let xor = self.0[i] ^ other.0[i];

            if xor != 0 {
                // leading zero bits so far + leading zeros of this byte
                let leading_zeros = i * 8 + xor.leading_zeros() as usize;

                return (KEY_SIZE - 1 - leading_zeros) as u8;
            }
        }

        0
    }

    /// Compare `a` and `b` by their distance class to this Id, closest first.
    ///
    /// Ids in the same distance class compare as equal.
    pub fn order_by_distance(&self, a: &Id, b: &Id) -> Ordering {
        self.distance(a).cmp(&self.distance(b))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        let bytes = hex::decode(s)?;

        Id::from_bytes(bytes)
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}
