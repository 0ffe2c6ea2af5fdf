use core::ops::Range;

/// Sorts `ranges` and merges the ones that overlap or touch. Empty ranges are dropped.
pub fn merge_overlapping_ranges(ranges: &mut Vec<Range<usize>>) {
    ranges.retain(|range| !range.is_empty());
    ranges.sort_unstable_by_key(|range| range.start);

    let mut out_len = 0;
    for input_i in 0..ranges.len() {
        let range = ranges[input_i].clone();
        if out_len > 0 && range.start <= ranges[out_len - 1].end {
            ranges[out_len - 1].end = ranges[out_len - 1].end.max(range.end);
        } else {
            ranges[out_len] = range;
            out_len += 1;
        }
    }
    ranges.truncate(out_len);
}

/// Whether `ranges` tile `0..len` without gaps or overlaps.
pub fn ranges_tile(ranges: &[Range<usize>], len: usize) -> bool {
    let total: usize = ranges.iter().map(|range| range.len()).sum();
    let mut merged = ranges.to_vec();
    merge_overlapping_ranges(&mut merged);
    total == len && (merged.is_empty() && len == 0 || merged == [0..len])
}
