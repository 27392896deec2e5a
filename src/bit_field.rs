use std::{convert::Infallible, fmt, ops::BitOrAssign, str::FromStr};

pub const WORD_BITS: u32 = 32;

/// Growable bitset of component def ids, packed into 32 bit words.
///
/// Word `i` holds bits `[32i, 32i + 32)`. Words past the end are read as zero
/// and the word vector never keeps trailing zero words. When `all` is set the
/// field behaves as if every bit were set and `values` is ignored.
#[derive(Debug, Clone, Default)]
pub struct BitField {
    pub(crate) values: Vec<u32>,
    pub(crate) all: bool,
}

impl BitField {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            all: false,
        }
    }

    /// A field with every bit implicitly set.
    pub fn all() -> Self {
        Self {
            values: Vec::new(),
            all: true,
        }
    }

    pub fn from_values(indices: impl IntoIterator<Item = u32>) -> Self {
        let mut field = Self::new();
        field.set_values(indices, true);
        field
    }

    /// Parses the textual forms: `"all"` or a binary digit string written
    /// most significant bit first (the last character is bit 0). Anything
    /// else yields an empty field.
    pub fn parse(text: &str) -> Self {
        if text == "all" {
            return Self::all();
        }
        if !text.bytes().all(|b| b == b'0' || b == b'1') {
            return Self::new();
        }

        let mut field = Self::new();
        for (index, byte) in text.bytes().rev().enumerate() {
            if byte == b'1' {
                field.set(index as u32, true);
            }
        }
        field
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn words(&self) -> &[u32] {
        &self.values
    }

    #[inline]
    fn word(&self, index: usize) -> u32 {
        self.values.get(index).copied().unwrap_or(0)
    }

    fn trim(&mut self) {
        while self.values.last() == Some(&0) {
            self.values.pop();
        }
    }

    /// Sets or clears a single bit. A concrete index always leaves the
    /// "all" mode first.
    pub fn set(&mut self, index: u32, value: bool) -> &mut Self {
        self.all = false;

        let word = (index / WORD_BITS) as usize;
        let mask = 1u32 << (index % WORD_BITS);
        if value {
            if word >= self.values.len() {
                self.values.resize(word + 1, 0);
            }
            self.values[word] |= mask;
        } else if let Some(w) = self.values.get_mut(word) {
            *w &= !mask;
            self.trim();
        }
        self
    }

    /// Switches into "all" mode, dropping the explicit words.
    pub fn set_all(&mut self) -> &mut Self {
        self.all = true;
        self.values.clear();
        self
    }

    pub fn set_values(&mut self, indices: impl IntoIterator<Item = u32>, value: bool) -> &mut Self {
        for index in indices {
            self.set(index, value);
        }
        self
    }

    pub fn get(&self, index: u32) -> bool {
        if self.all {
            return true;
        }
        self.word((index / WORD_BITS) as usize) & (1 << (index % WORD_BITS)) != 0
    }

    /// Number of set bits. An "all" field has no finite count and reports
    /// `usize::MAX`.
    pub fn count(&self) -> usize {
        if self.all {
            return usize::MAX;
        }
        self.values.iter().map(|&w| popcount(w) as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.values.iter().all(|&w| w == 0)
    }

    /// True when `self & other` has at least one bit set.
    pub fn intersects(&self, other: &BitField) -> bool {
        match (self.all, other.all) {
            (true, true) => true,
            (true, false) => !other.is_empty(),
            (false, true) => !self.is_empty(),
            (false, false) => self
                .values
                .iter()
                .zip(other.values.iter())
                .any(|(a, b)| a & b != 0),
        }
    }

    /// True when `self & other` equals `target` bit for bit.
    pub fn and_equals(&self, other: &BitField, target: &BitField) -> bool {
        self.intersection(other).equals(target)
    }

    /// Writes `self & other` into `out` and hands it back.
    pub fn and_into<'o>(&self, other: &BitField, out: &'o mut BitField) -> &'o mut BitField {
        *out = self.intersection(other);
        out
    }

    pub fn intersection(&self, other: &BitField) -> BitField {
        match (self.all, other.all) {
            (true, true) => Self::all(),
            (true, false) => other.clone(),
            (false, true) => self.clone(),
            (false, false) => {
                let mut result = Self {
                    values: self
                        .values
                        .iter()
                        .zip(other.values.iter())
                        .map(|(a, b)| a & b)
                        .collect(),
                    all: false,
                };
                result.trim();
                result
            }
        }
    }

    /// True when every bit set in `a` is also set in `b`.
    pub fn and(a: &BitField, b: &BitField) -> bool {
        if b.all {
            return true;
        }
        if a.all {
            return false;
        }
        a.values
            .iter()
            .enumerate()
            .all(|(i, &w)| w & b.word(i) == w)
    }

    /// True when `a` and `b` share at least one bit.
    pub fn aand(a: &BitField, b: &BitField) -> bool {
        a.intersects(b)
    }

    /// True when neither field is "all" and they share no bit.
    pub fn nor(a: &BitField, b: &BitField) -> bool {
        !a.all && !b.all && !a.intersects(b)
    }

    pub fn equals(&self, other: &BitField) -> bool {
        if self.all || other.all {
            return self.all == other.all;
        }
        let len = self.values.len().max(other.values.len());
        (0..len).all(|i| self.word(i) == other.word(i))
    }

    /// Ascending iterator over the set bit indices. Empty for an "all" field.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        let words = if self.all { &[][..] } else { &self.values[..] };
        words.iter().enumerate().flat_map(|(i, &word)| {
            (0..WORD_BITS)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| i as u32 * WORD_BITS + bit)
        })
    }

    pub fn to_values(&self) -> Vec<u32> {
        self.iter().collect()
    }

    pub fn highest(&self) -> Option<u32> {
        if self.all {
            return None;
        }
        self.values
            .iter()
            .enumerate()
            .rev()
            .find(|(_, &w)| w != 0)
            .map(|(i, &w)| i as u32 * WORD_BITS + (WORD_BITS - 1 - w.leading_zeros()))
    }

    /// Dense 0/1 digits from the highest set bit down to bit 0.
    pub fn to_array(&self) -> Vec<u8> {
        match self.highest() {
            Some(high) => (0..=high).rev().map(|i| self.get(i) as u8).collect(),
            None => Vec::new(),
        }
    }

    pub fn to_binary_string(&self) -> String {
        self.to_array()
            .into_iter()
            .map(|digit| if digit == 1 { '1' } else { '0' })
            .collect()
    }
}

#[inline]
fn popcount(mut x: u32) -> u32 {
    x -= (x >> 1) & 0x5555_5555;
    x = (x & 0x3333_3333) + ((x >> 2) & 0x3333_3333);
    x = (x + (x >> 4)) & 0x0f0f_0f0f;
    x.wrapping_mul(0x0101_0101) >> 24
}

impl PartialEq for BitField {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for BitField {}

impl BitOrAssign<&BitField> for BitField {
    fn bitor_assign(&mut self, rhs: &BitField) {
        if self.all || rhs.all {
            self.set_all();
            return;
        }
        if rhs.values.len() > self.values.len() {
            self.values.resize(rhs.values.len(), 0);
        }
        for (w, r) in self.values.iter_mut().zip(rhs.values.iter()) {
            *w |= r;
        }
    }
}

impl FromIterator<u32> for BitField {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::from_values(iter)
    }
}

impl FromStr for BitField {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for BitField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all {
            f.write_str("all")
        } else {
            f.write_str(&self.to_binary_string())
        }
    }
}
