//! Validity bitmap: one bit per slot, set = valid

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidityBitmap {
    bytes: Vec<u8>,
    len: usize,
}

impl ValidityBitmap {
    /// A bitmap of `len` valid slots
    pub fn all_valid(len: usize) -> Self {
        let mut bytes = vec![0xFF; len.div_ceil(8)];
        if len % 8 != 0 {
            if let Some(last) = bytes.last_mut() {
                *last = (1u8 << (len % 8)) - 1;
            }
        }
        Self { bytes, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, valid: bool) {
        if self.len % 8 == 0 {
            self.bytes.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, valid);
    }

    /// Validity of slot `i`; out-of-range slots read as invalid
    pub fn get(&self, i: usize) -> bool {
        i < self.len && self.bytes[i / 8] & (1 << (i % 8)) != 0
    }

    pub fn set(&mut self, i: usize, valid: bool) {
        debug_assert!(i < self.len);
        if valid {
            self.bytes[i / 8] |= 1 << (i % 8);
        } else {
            self.bytes[i / 8] &= !(1 << (i % 8));
        }
    }

    /// Remove slot `i`, shifting later slots down
    pub fn remove(&mut self, i: usize) {
        let kept: Vec<bool> = (0..self.len).filter(|&j| j != i).map(|j| self.get(j)).collect();
        *self = kept.into_iter().collect();
    }

    /// Number of invalid slots
    pub fn count_invalid(&self) -> usize {
        (0..self.len).filter(|&i| !self.get(i)).count()
    }
}

impl FromIterator<bool> for ValidityBitmap {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut bitmap = ValidityBitmap::default();
        for valid in iter {
            bitmap.push(valid);
        }
        bitmap
    }
}
