//! Location ranking by grid distance.

use domain::{GridPoint, OrderLocation};

/// Squared Euclidean distance between two grid points.
///
/// Squaring keeps the comparison exact on integers; the ordering is the
/// same as for the true Euclidean distance.
pub fn heuristic_distance(a: GridPoint, b: GridPoint) -> u128 {
    let dx = (i128::from(a.x) - i128::from(b.x)).unsigned_abs();
    let dy = (i128::from(a.y) - i128::from(b.y)).unsigned_abs();
    (dx * dx).saturating_add(dy * dy)
}

/// Picks the candidate closest to `target`. Equal distances go to the lower
/// location id.
pub fn nearest<'a, I>(candidates: I, target: GridPoint) -> Option<&'a OrderLocation>
where
    I: IntoIterator<Item = &'a OrderLocation>,
{
    candidates
        .into_iter()
        .min_by_key(|location| (heuristic_distance(location.grid(), target), location.id))
}
