use rand::seq::SliceRandom;

/// Repeat every element `count` times in place: `[a, b] x2 -> [a, a, b, b]`.
pub fn multiply_slice<T: Clone>(s: &[T], count: usize) -> Vec<T> {
    s.iter()
        .flat_map(|v| std::iter::repeat_n(v, count))
        .cloned()
        .collect()
}

/// Split into contiguous chunks of `size` elements, the last one possibly shorter.
/// A `size` of zero is treated as one.
pub fn split_slice<T: Clone>(s: &[T], size: usize) -> Vec<Vec<T>> {
    s.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

pub fn shuffle<T>(s: &mut [T]) {
    s.shuffle(&mut rand::rng());
}

/// Parse a comma separated endpoint list, skipping blank entries.
pub fn parse_endpoints(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
