//! Sorted-list intersection.
//!
//! Every posting list is sorted ascending by the same primary key, so the
//! intersection walks the shortest list once and advances a forward-only
//! cursor per other list: O(sum of lengths), never O(product). Matches are
//! reported as positions into the shortest (driver) list, which keeps the
//! driver's records addressable for scoring without another lookup.

use crate::record::PostingRecord;
use crate::result::ResultSet;

/// Index of the shortest input list, or `None` when no input qualifies.
pub fn shortest<R: PostingRecord>(sets: &[ResultSet<R>]) -> Option<usize> {
    sets.iter()
        .enumerate()
        .min_by_key(|(_, s)| s.len())
        .map(|(i, _)| i)
}

/// Intersect `sets`, appending match positions (into the driver list) to
/// `out`. Returns the driver index.
///
/// Degenerate inputs: no sets or any empty set produce no matches; a single
/// set matches at every position.
pub fn intersect_into<R: PostingRecord>(sets: &[ResultSet<R>], out: &mut Vec<usize>) -> usize {
    let driver = match shortest(sets) {
        Some(d) => d,
        None => return 0,
    };
    let driver_len = sets[driver].len();
    if driver_len == 0 {
        return driver;
    }
    if sets.len() == 1 {
        out.extend(0..driver_len);
        return driver;
    }

    let mut positions = vec![0usize; sets.len()];

    'driver: for p in 0..driver_len {
        let value = sets[driver].value_at(p);

        for (t, set) in sets.iter().enumerate() {
            if t == driver {
                continue;
            }
            let pos = &mut positions[t];
            while *pos < set.len() && set.value_at(*pos) < value {
                *pos += 1;
            }
            if *pos >= set.len() {
                // an exhausted list can never match again
                break 'driver;
            }
            if set.value_at(*pos) > value {
                continue 'driver;
            }
        }
        out.push(p);
    }
    driver
}

/// Convenience wrapper returning the matches as a fresh vector.
pub fn intersect<R: PostingRecord>(sets: &[ResultSet<R>]) -> (usize, Vec<usize>) {
    let mut out = Vec::new();
    let driver = intersect_into(sets, &mut out);
    (driver, out)
}
