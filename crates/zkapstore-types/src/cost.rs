//! The cost function — how many passes an operation must pay.
//!
//! One pass pays for `bytes_per_pass` bytes of stored data. Costs are
//! quantized per call by summing the relevant share sizes and rounding up,
//! so the order of the sizes is part of the contract: callers hand in an
//! ordered sequence (a slice), never an unordered collection, keeping the
//! quantization deterministic across client and server.

use std::collections::BTreeMap;

use crate::{Result, ShareNum, TwVectors, WriteVector, ZkapError};

/// The fewest passes that pay for the given share sizes.
///
/// Returns `ceil(sum(share_sizes) / bytes_per_pass)`.
///
/// # Errors
/// Returns [`ZkapError::InvalidArgument`] if `bytes_per_pass` is zero.
pub fn required_passes(bytes_per_pass: u64, share_sizes: &[u64]) -> Result<u64> {
    if bytes_per_pass == 0 {
        return Err(ZkapError::InvalidArgument {
            reason: "bytes_per_pass must be at least 1".to_string(),
        });
    }
    let total: u64 = share_sizes.iter().sum();
    Ok(total.div_ceil(bytes_per_pass))
}

/// Does any per-share vector in this call mutate data?
#[must_use]
pub fn has_writes(tw_vectors: &TwVectors) -> bool {
    tw_vectors.values().any(crate::TestWriteVectors::is_write)
}

/// The share data length implied by a write vector and an optional
/// `new_length`: the greatest end offset written, truncated by
/// `new_length` when that is smaller. `new_length` only ever truncates.
#[must_use]
pub fn get_implied_data_length(write_vector: &[WriteVector], new_length: Option<u64>) -> u64 {
    let written = write_vector
        .iter()
        .map(|wv| wv.offset + wv.data.len() as u64)
        .max()
        .unwrap_or(0);
    match new_length {
        Some(limit) if limit < written => limit,
        _ => written,
    }
}

/// Passes required for the *new* storage of a mutable write.
///
/// Per share, the implied post-write length minus the currently stored
/// length (clamped at zero); the cost is [`required_passes`] over those
/// increases. Read-only calls cost zero.
///
/// # Errors
/// Returns [`ZkapError::InvalidArgument`] if `bytes_per_pass` is zero.
pub fn required_new_passes_for_mutable_write(
    bytes_per_pass: u64,
    current_sizes: &BTreeMap<ShareNum, u64>,
    tw_vectors: &TwVectors,
) -> Result<u64> {
    let increases: Vec<u64> = tw_vectors
        .iter()
        .map(|(sharenum, vectors)| {
            let implied = get_implied_data_length(&vectors.write, vectors.new_length);
            let current = current_sizes.get(sharenum).copied().unwrap_or(0);
            implied.saturating_sub(current)
        })
        .collect();
    required_passes(bytes_per_pass, &increases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestWriteVectors;

    fn write_at(offset: u64, len: usize) -> WriteVector {
        WriteVector {
            offset,
            data: vec![0xaa; len],
        }
    }

    #[test]
    fn zero_bytes_per_pass_rejected() {
        let err = required_passes(0, &[100]).unwrap_err();
        assert!(matches!(err, ZkapError::InvalidArgument { .. }));
    }

    #[test]
    fn empty_sizes_cost_nothing() {
        assert_eq!(required_passes(1024, &[]).unwrap(), 0);
    }

    #[test]
    fn cost_rounds_up() {
        assert_eq!(required_passes(1024, &[1]).unwrap(), 1);
        assert_eq!(required_passes(1024, &[1024]).unwrap(), 1);
        assert_eq!(required_passes(1024, &[1025]).unwrap(), 2);
    }

    #[test]
    fn cost_sums_before_quantizing() {
        // Three half-pass shares quantize together, not per share.
        assert_eq!(required_passes(1000, &[500, 500, 500]).unwrap(), 2);
    }

    #[test]
    fn cost_of_allocate_scenario() {
        // 3 shares of 100_000 bytes at 128 KiB per pass.
        let cost = required_passes(128 * 1024, &[100_000, 100_000, 100_000]).unwrap();
        assert_eq!(cost, 3);
    }

    #[test]
    fn minimum_result_matches_per_share_expectation() {
        // Sizes that are exact pass multiples cost exactly their sum.
        let bytes_per_pass = 4096;
        let expected_per_share = [1u64, 3, 7];
        let sizes: Vec<u64> = expected_per_share
            .iter()
            .map(|passes| passes * bytes_per_pass)
            .collect();
        assert_eq!(
            required_passes(bytes_per_pass, &sizes).unwrap(),
            expected_per_share.iter().sum::<u64>()
        );
    }

    #[test]
    fn implied_length_from_writes() {
        assert_eq!(get_implied_data_length(&[], None), 0);
        assert_eq!(
            get_implied_data_length(&[write_at(0, 10), write_at(100, 20)], None),
            120
        );
    }

    #[test]
    fn implied_length_truncated_by_new_length() {
        let vector = [write_at(0, 200)];
        assert_eq!(get_implied_data_length(&vector, Some(50)), 50);
        // new_length never expands.
        assert_eq!(get_implied_data_length(&vector, Some(500)), 200);
    }

    #[test]
    fn read_only_mutable_call_costs_zero() {
        let tw: TwVectors = [(ShareNum(0), TestWriteVectors::default())].into();
        assert!(!has_writes(&tw));
        let cost =
            required_new_passes_for_mutable_write(1024, &BTreeMap::new(), &tw).unwrap();
        assert_eq!(cost, 0);
    }

    #[test]
    fn growth_is_charged_per_share_increase() {
        let tw: TwVectors = [(
            ShareNum(0),
            TestWriteVectors {
                write: vec![write_at(0, 3000)],
                ..Default::default()
            },
        )]
        .into();
        let current: BTreeMap<ShareNum, u64> = [(ShareNum(0), 1000)].into();
        // 3000 implied - 1000 current = 2000 new bytes => 2 passes at 1024.
        assert_eq!(
            required_new_passes_for_mutable_write(1024, &current, &tw).unwrap(),
            2
        );
    }

    #[test]
    fn shrinking_write_costs_nothing() {
        let tw: TwVectors = [(
            ShareNum(0),
            TestWriteVectors {
                write: vec![write_at(0, 10)],
                new_length: Some(10),
                ..Default::default()
            },
        )]
        .into();
        let current: BTreeMap<ShareNum, u64> = [(ShareNum(0), 100_000)].into();
        assert_eq!(
            required_new_passes_for_mutable_write(1024, &current, &tw).unwrap(),
            0
        );
    }

    #[test]
    fn fresh_share_charged_in_full() {
        let tw: TwVectors = [(
            ShareNum(7),
            TestWriteVectors {
                write: vec![write_at(0, 2048)],
                ..Default::default()
            },
        )]
        .into();
        assert_eq!(
            required_new_passes_for_mutable_write(1024, &BTreeMap::new(), &tw).unwrap(),
            2
        );
    }
}
