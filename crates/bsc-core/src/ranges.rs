use thiserror::Error;

/// Inclusive range of NRI values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NriRange {
    pub first: u16,
    pub last: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeErr {
    #[error("invalid NRI range {first}..={last}")]
    Invalid { first: u16, last: u16 },
    #[error("NRI range {first}..={last} exceeds {bitlen} bit NRI")]
    ExceedsBitlen { first: u16, last: u16, bitlen: u8 },
}

/// A sorted list of disjoint NRI ranges.
/// Overlapping or adjacent input ranges are merged on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NriRanges(Vec<NriRange>);

impl NriRanges {
    pub fn empty() -> Self {
        Self(vec![])
    }

    /// Takes Vec<NriRange>, validates, sorts and merges it
    pub fn from_vec_nrirange(mut ranges: Vec<NriRange>) -> Result<Self, RangeErr> {
        for r in &ranges {
            if r.first > r.last {
                return Err(RangeErr::Invalid { first: r.first, last: r.last });
            }
        }
        ranges.sort_by(|a, b| a.first.cmp(&b.first));

        let mut merged: Vec<NriRange> = Vec::with_capacity(ranges.len());
        for r in ranges {
            match merged.last_mut() {
                Some(prev) if r.first as u32 <= prev.last as u32 + 1 => {
                    prev.last = prev.last.max(r.last);
                }
                _ => merged.push(r),
            }
        }
        Ok(Self(merged))
    }

    /// Takes Vec<(first, last)> with inclusive bounds
    pub fn from_vec_tuple(tuples: Vec<(u16, u16)>) -> Result<Self, RangeErr> {
        let ranges = tuples.into_iter().map(|(first, last)| NriRange { first, last }).collect();
        Self::from_vec_nrirange(ranges)
    }

    pub fn as_slice(&self) -> &[NriRange] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks if the given NRI falls within any of the ranges
    pub fn contains(&self, nri: u16) -> bool {
        for range in self.as_slice() {
            if nri < range.first {
                // Sorted, nothing further can match
                break;
            }
            if nri <= range.last {
                return true;
            }
        }
        false
    }

    /// Returns the first overlapping span between two range lists, if any
    pub fn overlap(&self, other: &NriRanges) -> Option<NriRange> {
        for a in self.as_slice() {
            for b in other.as_slice() {
                let first = a.first.max(b.first);
                let last = a.last.min(b.last);
                if first <= last {
                    return Some(NriRange { first, last });
                }
            }
        }
        None
    }

    /// Verifies all ranges are representable with `bitlen` NRI bits
    pub fn check_bitlen(&self, bitlen: u8) -> Result<(), RangeErr> {
        let max = ((1u32 << bitlen) - 1) as u16;
        for r in self.as_slice() {
            if r.last > max {
                return Err(RangeErr::ExceedsBitlen { first: r.first, last: r.last, bitlen });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_sorting_and_merging() {
        let ranges = NriRanges::from_vec_tuple(vec![(300, 400), (100, 200), (201, 250), (390, 420)]).unwrap();
        let s = ranges.as_slice();
        assert_eq!(s.len(), 2);
        assert_eq!(s[0], NriRange { first: 100, last: 250 });
        assert_eq!(s[1], NriRange { first: 300, last: 420 });
    }

    #[test]
    fn test_containment() {
        let ranges = NriRanges::from_vec_tuple(vec![(100, 199), (400, 499)]).unwrap();
        assert!(ranges.contains(100));
        assert!(ranges.contains(199));
        assert!(!ranges.contains(200));
        assert!(!ranges.contains(99));
        assert!(ranges.contains(450));
        assert!(!ranges.contains(500));
    }

    #[test]
    fn test_invalid_range() {
        assert_eq!(
            NriRanges::from_vec_tuple(vec![(200, 100)]),
            Err(RangeErr::Invalid { first: 200, last: 100 })
        );
    }

    #[test]
    fn test_overlap_and_bitlen() {
        let a = NriRanges::from_vec_tuple(vec![(10, 20)]).unwrap();
        let b = NriRanges::from_vec_tuple(vec![(0, 5), (15, 30)]).unwrap();
        assert_eq!(a.overlap(&b), Some(NriRange { first: 15, last: 20 }));
        assert!(a.check_bitlen(5).is_ok());
        assert!(a.check_bitlen(4).is_err());
    }
}
