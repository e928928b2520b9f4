use float_ord::FloatOrd;
use geo::{coord, BoundingRect, Coord, EuclideanLength, Line, LineString, Polygon};
use serde::{Deserialize, Serialize};

/// Four corner points of a (possibly rotated) character or word box.
///
/// Points are stored as given. Most consumers call [`Quadrilateral::ordered`]
/// first to get them in top-left, top-right, bottom-right, bottom-left order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f32; 2]; 4]", into = "[[f32; 2]; 4]")]
pub struct Quadrilateral {
    pub points: [Coord<f32>; 4],
}

impl Quadrilateral {
    pub fn new(points: [Coord<f32>; 4]) -> Self {
        Self { points }
    }

    /// Axis-aligned box spanned by two opposite corners, in the order
    /// (x1, y1), (x2, y1), (x2, y2), (x1, y2).
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new([
            coord! { x: x1, y: y1 },
            coord! { x: x2, y: y1 },
            coord! { x: x2, y: y2 },
            coord! { x: x1, y: y2 },
        ])
    }

    pub fn top_left(&self) -> Coord<f32> {
        self.points[0]
    }

    pub fn top_right(&self) -> Coord<f32> {
        self.points[1]
    }

    pub fn bottom_right(&self) -> Coord<f32> {
        self.points[2]
    }

    pub fn bottom_left(&self) -> Coord<f32> {
        self.points[3]
    }

    pub fn is_finite(&self) -> bool {
        self.points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
    }

    /// Reorders the points clockwise starting at the top-left corner.
    ///
    /// The top-left corner has the smallest `x + y`, the bottom-right the
    /// largest. Of the remaining two, the one with the smaller `y - x` is the
    /// top-right corner. Ties fall back to the smaller `y`. Self-intersecting
    /// input gives a degenerate but still complete ordering.
    pub fn ordered(&self) -> Self {
        let p = self.points;
        let mut by_sum = [0usize, 1, 2, 3];
        by_sum.sort_by_key(|&i| (FloatOrd(p[i].x + p[i].y), FloatOrd(p[i].y)));

        let top_left = p[by_sum[0]];
        let bottom_right = p[by_sum[3]];
        let (mut top_right, mut bottom_left) = (p[by_sum[1]], p[by_sum[2]]);

        let diff_key = |c: Coord<f32>| (FloatOrd(c.y - c.x), FloatOrd(c.y));
        if diff_key(top_right) > diff_key(bottom_left) {
            std::mem::swap(&mut top_right, &mut bottom_left);
        }

        Self::new([top_left, top_right, bottom_right, bottom_left])
    }

    /// Smallest axis-aligned rectangle containing all four points.
    pub fn containing_rect(&self) -> Self {
        let rect = self
            .to_polygon()
            .bounding_rect()
            .unwrap_or_else(|| geo::Rect::new(self.points[0], self.points[0]));
        let (min, max) = (rect.min(), rect.max());
        Self::from_corners(min.x, min.y, max.x, max.y)
    }

    /// Extent between the ordered top-left and bottom-right corners.
    pub fn width_height(&self) -> (f32, f32) {
        let ordered = self.ordered();
        let diff = ordered.bottom_right() - ordered.top_left();
        (diff.x, diff.y)
    }

    /// Output size for rectifying this box: the longer of each pair of
    /// opposite edges.
    pub fn edge_lengths(&self) -> (f32, f32) {
        let q = self.ordered();
        let len = |a, b| Line::new(a, b).euclidean_length();
        let width = len(q.top_left(), q.top_right()).max(len(q.bottom_left(), q.bottom_right()));
        let height = len(q.top_left(), q.bottom_left()).max(len(q.top_right(), q.bottom_right()));
        (width, height)
    }

    pub fn to_polygon(&self) -> Polygon<f32> {
        Polygon::new(LineString::from(self.points.to_vec()), vec![])
    }
}

impl From<[[f32; 2]; 4]> for Quadrilateral {
    fn from(points: [[f32; 2]; 4]) -> Self {
        Self::new(points.map(|[x, y]| coord! { x: x, y: y }))
    }
}

impl From<Quadrilateral> for [[f32; 2]; 4] {
    fn from(quad: Quadrilateral) -> Self {
        quad.points.map(|p| [p.x, p.y])
    }
}
