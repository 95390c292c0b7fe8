//! Edge-to-edge projection error.

use crate::{CoreError, CoreResult, Real, Vec2};
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use serde::{Deserialize, Serialize};

/// Correspondences farther than this many pixels are not counted.
pub const DEFAULT_EDGE_MATCH_RANGE: Real = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeDistance {
    /// Mean distance of matched projections; `None` when nothing matched.
    pub mean: Option<Real>,
    pub matched: usize,
    pub total: usize,
}

/// Mean distance from each projected LiDAR edge to its nearest camera edge pixel,
/// ignoring pairs farther apart than `max_range`.
pub fn mean_edge_distance(
    camera_edges: &[Vec2],
    projected: &[Vec2],
    max_range: Real,
) -> CoreResult<EdgeDistance> {
    if camera_edges.is_empty() {
        return Err(CoreError::EmptyEdgeSet);
    }
    let coords: Vec<[f64; 2]> = camera_edges.iter().map(|p| [p.x, p.y]).collect();
    let tree: ImmutableKdTree<f64, u32, 2, 32> = ImmutableKdTree::new_from_slice(&coords);

    let mut sum = 0.0;
    let mut matched = 0;
    for p in projected.iter().filter(|p| p.x.is_finite() && p.y.is_finite()) {
        let nn = tree.nearest_one::<SquaredEuclidean>(&[p.x, p.y]);
        let d = nn.distance.sqrt();
        if d <= max_range {
            sum += d;
            matched += 1;
        }
    }
    Ok(EdgeDistance {
        mean: (matched > 0).then(|| sum / matched as Real),
        matched,
        total: projected.len(),
    })
}
