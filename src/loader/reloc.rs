//! Relocation of inter-segment longword references

use crate::loader::{Error, Relocation, Result};
use crate::memory::{Endianness, Segment};
use std::collections::{BTreeMap, BTreeSet};

/// Relocated target address to the set of absolute addresses referring to
/// it.
pub type RelocatedAddresses = BTreeMap<u32, BTreeSet<u32>>;

/// Absolute addresses of every longword that was relocated.
pub type RelocatableAddresses = BTreeSet<u32>;

/// Rewrite every relocated longword in the segments' cached data into an
/// absolute address.
///
/// `relocations` runs parallel to `segments`. Each longword named by a
/// relocation holds an offset into the relocation's target segment; it is
/// replaced by that segment's address plus the offset, written back in the
/// file's byte order.
///
/// This mutates segment data in place. Running it twice over the same data
/// relocates every value twice.
pub fn relocate_segment_data(
    segments: &mut [Segment],
    endianness: Endianness,
    relocations: &[Vec<Relocation>],
    relocated: &mut RelocatedAddresses,
    relocatable: &mut RelocatableAddresses,
) -> Result<()> {
    let segment_addresses: Vec<u32> = segments.iter().map(|s| s.address()).collect();

    for (segment_id, segment_relocations) in relocations.iter().enumerate() {
        if segment_relocations.is_empty() {
            continue;
        }

        let segment = segments.get_mut(segment_id).ok_or_else(|| {
            Error::CorruptContainer(format!(
                "relocations given for missing segment {}",
                segment_id
            ))
        })?;
        let segment_address = segment.address();
        let data = segment
            .data_mut()
            .ok_or(Error::SegmentNotCached(segment_id))?;

        for relocation in segment_relocations {
            let target_address = *segment_addresses
                .get(relocation.target_segment)
                .ok_or_else(|| {
                    Error::CorruptContainer(format!(
                        "segment {} relocates against missing segment {}",
                        segment_id, relocation.target_segment
                    ))
                })?;

            for &local_offset in relocation.offsets.iter() {
                let value = endianness.read_u32(data, local_offset as usize)?;
                let address = value.wrapping_add(target_address);
                let referrer = segment_address.wrapping_add(local_offset);

                relocated.entry(address).or_default().insert(referrer);
                relocatable.insert(referrer);

                endianness.write_u32(data, local_offset as usize, address)?;
            }
        }
    }

    Ok(())
}
