//! Interval overlap between spans of the same coordinate space.

use crate::span::{CoordinateSpace, Span};

/// Number of characters shared by `a` and `b`.
pub fn intersection<C: CoordinateSpace>(a: &Span<C>, b: &Span<C>) -> usize {
    let start = a.start_char.max(b.start_char);
    let end = a.end_char.min(b.end_char);
    end.saturating_sub(start)
}

/// Intersection over union of two spans.
///
/// Returns `0.0` when the union is empty (both spans degenerate), so the
/// result is always a number in `[0, 1]`.
pub fn iou<C: CoordinateSpace>(a: &Span<C>, b: &Span<C>) -> f64 {
    let inter = intersection(a, b);
    // inter <= a.len(), and the sum is bounded by the covering interval
    let union = a.len() - inter + b.len();

    if union == 0 {
        return 0.0;
    }

    inter as f64 / union as f64
}
