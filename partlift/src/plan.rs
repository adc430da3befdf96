//! Part layout for a transfer.
//!
//! Splits an object of `total_size` bytes into contiguous parts of
//! `part_size` bytes. Part indices are 1-based to match multipart upload
//! numbering. The last part carries the remainder.
//!
//! An empty object still gets one zero-length part, so an empty file is
//! uploaded as a single empty part and downloaded as an empty file.

use crate::error::{TransferError, TransferResult};

/// A contiguous byte range of the object, transferred as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartDescriptor {
    /// 1-based part number.
    pub index: u32,
    /// Byte offset of the part within the object.
    pub offset: u64,
    /// Length of the part in bytes.
    pub length: u64,
}

impl PartDescriptor {
    /// Exclusive end offset of the part.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Number of parts for the given sizes (at least one).
pub fn part_count(total_size: u64, part_size: u64) -> TransferResult<u64> {
    if part_size == 0 {
        return Err(TransferError::InvalidConfig(
            "part size must be greater than zero".to_string(),
        ));
    }
    Ok(total_size.div_ceil(part_size).max(1))
}

/// Compute the ordered part table for an object.
///
/// # Errors
///
/// Returns `InvalidConfig` if `part_size` is zero or the object would need
/// more parts than a `u32` index can number.
pub fn plan(total_size: u64, part_size: u64) -> TransferResult<Vec<PartDescriptor>> {
    let count = part_count(total_size, part_size)?;
    if count > u64::from(u32::MAX) {
        return Err(TransferError::InvalidConfig(format!(
            "{} bytes in parts of {} bytes needs {} parts",
            total_size, part_size, count
        )));
    }

    let parts = (0..count)
        .map(|i| {
            let offset = i * part_size;
            let length = if i + 1 == count {
                total_size - offset
            } else {
                part_size
            };
            PartDescriptor {
                index: (i + 1) as u32,
                offset,
                length,
            }
        })
        .collect();

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_with_remainder() {
        let parts = plan(2_500_000, 1_000_000).unwrap();
        assert_eq!(
            parts,
            vec![
                PartDescriptor {
                    index: 1,
                    offset: 0,
                    length: 1_000_000
                },
                PartDescriptor {
                    index: 2,
                    offset: 1_000_000,
                    length: 1_000_000
                },
                PartDescriptor {
                    index: 3,
                    offset: 2_000_000,
                    length: 500_000
                },
            ]
        );
    }

    #[test]
    fn test_plan_exact_multiple() {
        let parts = plan(4096, 1024).unwrap();
        assert_eq!(parts.len(), 4);
        assert!(parts.iter().all(|p| p.length == 1024));
        assert_eq!(parts[3].end(), 4096);
    }

    #[test]
    fn test_plan_smaller_than_part() {
        let parts = plan(10, 1024).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].length, 10);
    }

    #[test]
    fn test_plan_empty_object_has_one_empty_part() {
        let parts = plan(0, 1024).unwrap();
        assert_eq!(
            parts,
            vec![PartDescriptor {
                index: 1,
                offset: 0,
                length: 0
            }]
        );
    }

    #[test]
    fn test_plan_rejects_zero_part_size() {
        let result = plan(100, 0);
        assert!(matches!(result, Err(TransferError::InvalidConfig(_))));
    }

    #[test]
    fn test_part_count() {
        assert_eq!(part_count(0, 5).unwrap(), 1);
        assert_eq!(part_count(5, 5).unwrap(), 1);
        assert_eq!(part_count(6, 5).unwrap(), 2);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_plan_covers_object_exactly(
                total_size in 0u64..50_000_000,
                part_size in 1u64..5_000_000
            ) {
                let parts = plan(total_size, part_size)?;

                let expected = total_size.div_ceil(part_size).max(1);
                prop_assert_eq!(parts.len() as u64, expected);

                let sum: u64 = parts.iter().map(|p| p.length).sum();
                prop_assert_eq!(sum, total_size);

                for (i, part) in parts.iter().enumerate() {
                    prop_assert_eq!(part.index as usize, i + 1);
                    prop_assert_eq!(part.offset, i as u64 * part_size);
                    prop_assert!(part.length <= part_size);
                    if i + 1 < parts.len() {
                        prop_assert_eq!(part.length, part_size);
                    }
                }
            }
        }
    }
}
