//! Size limits and prefix selection for oversized values.

use ndarray::{ArrayD, ArrayViewD, Slice};
use serde::Deserialize;

/// Bounds applied while building a tree.
///
/// Every limit is a prefix length: truncated values keep their first elements, rows, children or
/// bytes. Deserializable so thresholds can live in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum nesting depth below the root.
    pub max_depth: usize,
    /// Maximum kept length along any array axis (K).
    pub max_elements_per_dim: usize,
    /// Maximum kept element count of one array.
    pub max_array_elements: usize,
    pub max_rows: usize,
    pub max_columns: usize,
    /// Maximum children of one mapping or sequence.
    pub max_children: usize,
    pub max_string_bytes: usize,
    pub max_binary_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_elements_per_dim: 4096,
            max_array_elements: 1 << 20,
            max_rows: 100_000,
            max_columns: 512,
            max_children: 10_000,
            max_string_bytes: 10_000,
            max_binary_bytes: 4096,
        }
    }
}

pub(crate) fn element_count(shape: &[usize]) -> usize {
    shape.iter().fold(1usize, |acc, &d| acc.saturating_mul(d))
}

impl Limits {
    /// The prefix shape to keep for an array of `shape`, or `None` if it fits.
    pub fn array_prefix(&self, shape: &[usize]) -> Option<Vec<usize>> {
        if shape.is_empty() {
            return None;
        }
        let k = self.max_elements_per_dim.max(1);
        let total = element_count(shape);
        if total == 0 || (shape.iter().all(|&d| d <= k) && total <= self.max_array_elements) {
            return None;
        }

        let mut kept: Vec<usize> = shape.iter().map(|&d| d.min(k)).collect();
        while element_count(&kept) > self.max_array_elements {
            let Some((idx, &longest)) = kept.iter().enumerate().max_by_key(|(_, d)| **d) else {
                break;
            };
            if longest <= 1 {
                break;
            }
            kept[idx] = longest / 2;
        }
        Some(kept)
    }

    /// Number of items to keep out of `len` under `limit`, and whether anything was dropped.
    pub fn prefix(len: usize, limit: usize) -> (usize, bool) {
        if len > limit { (limit, true) } else { (len, false) }
    }
}

/// Longest prefix of `s` within `max_bytes`, cut on a char boundary.
pub(crate) fn truncate_str(s: &str, max_bytes: usize) -> (&str, bool) {
    if s.len() <= max_bytes {
        return (s, false);
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    (&s[..end], true)
}

/// View of the leading `kept` block of `data`.
pub(crate) fn array_prefix_view<'a>(data: &'a ArrayD<f64>, kept: &[usize]) -> ArrayViewD<'a, f64> {
    data.slice_each_axis(|ax| Slice::from(0..kept[ax.axis.index()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_arrays_are_kept_whole() {
        let limits = Limits::default();
        assert_eq!(limits.array_prefix(&[10, 10]), None);
        assert_eq!(limits.array_prefix(&[]), None);
        assert_eq!(limits.array_prefix(&[0, 100_000]), None);
    }

    #[test]
    fn long_axis_is_cut_to_k() {
        let limits = Limits {
            max_elements_per_dim: 100,
            ..Limits::default()
        };
        assert_eq!(limits.array_prefix(&[1000]), Some(vec![100]));
        assert_eq!(limits.array_prefix(&[3, 1000]), Some(vec![3, 100]));
    }

    #[test]
    fn kept_block_fits_element_budget() {
        let limits = Limits::default();
        let kept = limits.array_prefix(&[5000, 5000]).unwrap();
        assert_eq!(kept, vec![1024, 1024]);
        assert!(element_count(&kept) <= limits.max_array_elements);
    }

    #[test]
    fn strings_are_cut_on_char_boundary() {
        let (s, cut) = truncate_str("héllo", 2);
        assert_eq!(s, "h");
        assert!(cut);
        assert_eq!(truncate_str("abc", 3), ("abc", false));
    }

    #[test]
    fn prefix_values_are_row_major() {
        let data = ArrayD::from_shape_vec(vec![3, 3], (0..9).map(f64::from).collect()).unwrap();
        let kept: Vec<f64> = array_prefix_view(&data, &[2, 2]).iter().copied().collect();
        assert_eq!(kept, vec![0.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn limits_deserialize_with_defaults() {
        let limits: Limits = toml::from_str("max_depth = 4").unwrap();
        assert_eq!(limits.max_depth, 4);
        assert_eq!(limits.max_rows, Limits::default().max_rows);
    }
}
