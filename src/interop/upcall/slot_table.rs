//! Generational slot table backing listener tokens.
//!
//! Inserting picks a slot that has been vacated before, or if none are available, appends a
//! new one. Every vacated slot bumps its generation, so a token issued for an earlier occupant
//! never resolves to a later one.

use std::fmt;

/// Key of a value stored in a [`SlotTable`].
///
/// Generations start at 1, so a token's bit pattern is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    index: u32,
    generation: u32,
}

impl Token {
    #[inline(always)]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline(always)]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the token into the 64-bit value handed to native code.
    #[inline(always)]
    pub fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpacks a value produced by [`Token::to_bits`]. Returns `None` for zero.
    #[inline(always)]
    pub fn from_bits(bits: u64) -> Option<Token> {
        let token = Token {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        };
        if token.generation == 0 {
            None
        } else {
            Some(token)
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Token<{}v{}>", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slots addressed by generational [`Token`]s, recycled through a free stack.
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    /// Stack of vacated slot indices.
    available: Vec<u32>,
    occupied: usize,
}

impl<T> SlotTable<T> {
    /// Creates a table with room for `initial_capacity` values before reallocating.
    #[inline(always)]
    pub fn new(initial_capacity: usize) -> Self {
        SlotTable {
            slots: Vec::with_capacity(initial_capacity),
            available: Vec::with_capacity(initial_capacity),
            occupied: 0,
        }
    }

    /// Ensures room for `additional` more values beyond the currently allocated slots.
    #[inline(always)]
    pub fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional);
        self.available.reserve(additional);
    }

    /// Stores `value` and returns its token.
    pub fn insert(&mut self, value: T) -> Token {
        self.occupied += 1;
        match self.available.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.value.is_none(), "Recycled slot must be vacant.");
                slot.value = Some(value);
                Token {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 1,
                    value: Some(value),
                });
                Token {
                    index,
                    generation: 1,
                }
            }
        }
    }

    /// The value stored under `token`, unless the token's occupant has since been removed.
    #[inline(always)]
    pub fn get(&self, token: Token) -> Option<&T> {
        self.slots
            .get(token.index as usize)
            .filter(|slot| slot.generation == token.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Removes the value under `token` and retires the token. Stale tokens remove nothing.
    pub fn remove(&mut self, token: Token) -> Option<T> {
        let slot = self.slots.get_mut(token.index as usize)?;
        if slot.generation != token.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation == 0 {
            slot.generation = 1;
        }
        self.available.push(token.index);
        self.occupied -= 1;
        Some(value)
    }

    #[inline(always)]
    pub fn contains(&self, token: Token) -> bool {
        self.get(token).is_some()
    }

    /// Number of occupied slots.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.occupied
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Number of slots ever allocated, occupied or not.
    #[inline(always)]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slots that fit before the table reallocates.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Iterates over occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = (Token, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Token {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_never_zero() {
        let mut table = SlotTable::new(4);
        let token = table.insert("a");
        assert_eq!(token.index(), 0);
        assert_ne!(token.to_bits(), 0);
        assert_eq!(Token::from_bits(token.to_bits()), Some(token));
        assert_eq!(Token::from_bits(0), None);
        assert_eq!(token.to_string(), "Token<0v1>");
    }

    #[test]
    fn reused_slots_do_not_alias() {
        let mut table = SlotTable::new(1);
        let first = table.insert("first");
        assert_eq!(table.remove(first), Some("first"));

        let second = table.insert("second");
        assert_eq!(second.index(), first.index());
        assert_ne!(second, first);
        assert_eq!(table.get(first), None);
        assert_eq!(table.get(second), Some(&"second"));

        // A stale removal leaves the new occupant alone.
        assert_eq!(table.remove(first), None);
        assert_eq!(table.len(), 1);
        assert_eq!(table.slot_count(), 1);
    }

    #[test]
    fn churn_keeps_the_table_bounded() {
        let mut table = SlotTable::new(2);
        let anchor = table.insert(0);
        for i in 1..1000 {
            let token = table.insert(i);
            assert_eq!(table.remove(token), Some(i));
        }
        assert_eq!(table.slot_count(), 2);
        assert_eq!(table.iter().map(|(token, _)| token).collect::<Vec<_>>(), vec![anchor]);
    }

    #[test]
    fn unknown_tokens_resolve_to_nothing() {
        let table: SlotTable<u8> = SlotTable::new(0);
        assert!(table.is_empty());
        let bogus = Token::from_bits(0x0000_0001_0000_0007).unwrap();
        assert!(!table.contains(bogus));
    }
}
