//! Clip polygon rings to the paintable window.
//!
//! Annotation vertices may lie arbitrarily far outside the image. Before a
//! ring reaches the scanline fill it is clipped against a window one pixel
//! larger than the canvas, one edge at a time (Sutherland-Hodgman). For a
//! convex window this keeps the winding number of every point inside the
//! window, so the clipped ring fills exactly the same canvas pixels under
//! the even-odd rule, self-intersecting rings included. Edges introduced by
//! the clip run along the window border, outside the canvas.

use geo::{Coord, LineString, Rect};

/// Canvas bounds grown by one pixel on every side.
#[must_use]
pub fn paint_window(width: u32, height: u32) -> Rect<f64> {
    Rect::new(
        Coord { x: -1.0, y: -1.0 },
        Coord {
            x: f64::from(width) + 1.0,
            y: f64::from(height) + 1.0,
        },
    )
}

/// Clip a ring to `window`.
///
/// Returns the clipped vertices without a closing repeat. Vertices already
/// inside the window come back unchanged and in order; the result is empty
/// when no part of the ring lies inside.
#[must_use]
pub fn clip_ring(ring: &LineString<f64>, window: Rect<f64>) -> Vec<Coord<f64>> {
    let mut points: Vec<Coord<f64>> = ring.coords().copied().collect();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    let edges = [
        Edge::Left(window.min().x),
        Edge::Right(window.max().x),
        Edge::Top(window.min().y),
        Edge::Bottom(window.max().y),
    ];
    for edge in edges {
        if points.is_empty() {
            break;
        }
        points = clip_against(&points, edge);
    }
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

/// One side of the window, as the half-plane that is kept.
#[derive(Debug, Clone, Copy)]
enum Edge {
    Left(f64),
    Right(f64),
    Top(f64),
    Bottom(f64),
}

impl Edge {
    fn keeps(self, c: Coord<f64>) -> bool {
        match self {
            Self::Left(x) => c.x >= x,
            Self::Right(x) => c.x <= x,
            Self::Top(y) => c.y >= y,
            Self::Bottom(y) => c.y <= y,
        }
    }

    /// Where segment `a`-`b` crosses this edge.
    ///
    /// Only called when exactly one endpoint is kept, so the segment is
    /// never parallel to the edge.
    fn crossing(self, a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
        match self {
            Self::Left(x) | Self::Right(x) => Coord {
                x,
                y: lerp(a.y, b.y, (x - a.x) / (b.x - a.x)),
            },
            Self::Top(y) | Self::Bottom(y) => Coord {
                x: lerp(a.x, b.x, (y - a.y) / (b.y - a.y)),
                y,
            },
        }
    }
}

fn clip_against(points: &[Coord<f64>], edge: Edge) -> Vec<Coord<f64>> {
    let mut out = Vec::with_capacity(points.len() + 2);
    let Some(&last) = points.last() else {
        return out;
    };

    let mut prev = last;
    for &current in points {
        match (edge.keeps(prev), edge.keeps(current)) {
            (true, true) => push_distinct(&mut out, current),
            (true, false) => push_distinct(&mut out, edge.crossing(prev, current)),
            (false, true) => {
                push_distinct(&mut out, edge.crossing(prev, current));
                push_distinct(&mut out, current);
            }
            (false, false) => {}
        }
        prev = current;
    }
    out
}

fn push_distinct(out: &mut Vec<Coord<f64>>, c: Coord<f64>) {
    if out.last() != Some(&c) {
        out.push(c);
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    t.mul_add(b - a, a)
}
