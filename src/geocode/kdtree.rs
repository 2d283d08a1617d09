// src/geocode/kdtree.rs
//! Static 3-d tree over unit-sphere vectors.
//!
//! Positions are mapped onto the unit sphere so the euclidean (chord)
//! distance is monotonic in great-circle distance and the antimeridian
//! needs no special casing. Callers measure the winner's distance with
//! `geo`'s haversine.

type Vec3 = [f64; 3];

fn to_unit_vec(lat_deg: f64, lon_deg: f64) -> Vec3 {
    let (lat, lon) = (lat_deg.to_radians(), lon_deg.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

fn dist2(a: &Vec3, b: &Vec3) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

/// Implicit balanced tree: the median of `[lo, hi)` sits at the middle slot.
#[derive(Debug, Default)]
pub struct KdTree {
    nodes: Vec<(Vec3, usize)>,
}

impl KdTree {
    /// `points[i]` is `(lat, lon)` for payload index `i`.
    pub fn build(points: &[(f64, f64)]) -> Self {
        let mut nodes: Vec<(Vec3, usize)> = points
            .iter()
            .enumerate()
            .map(|(i, &(lat, lon))| (to_unit_vec(lat, lon), i))
            .collect();
        Self::arrange(&mut nodes, 0);
        Self { nodes }
    }

    fn arrange(slice: &mut [(Vec3, usize)], depth: usize) {
        if slice.len() <= 1 {
            return;
        }
        let axis = depth % 3;
        let mid = slice.len() / 2;
        slice.select_nth_unstable_by(mid, |a, b| a.0[axis].total_cmp(&b.0[axis]));
        let (left, rest) = slice.split_at_mut(mid);
        Self::arrange(left, depth + 1);
        Self::arrange(&mut rest[1..], depth + 1);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Payload index of the nearest point.
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<usize> {
        let target = to_unit_vec(lat, lon);
        let mut best: Option<(usize, f64)> = None;
        self.search(0, self.nodes.len(), 0, &target, &mut best);
        best.map(|(slot, _)| self.nodes[slot].1)
    }

    fn search(
        &self,
        lo: usize,
        hi: usize,
        depth: usize,
        target: &Vec3,
        best: &mut Option<(usize, f64)>,
    ) {
        if lo >= hi {
            return;
        }
        let mid = lo + (hi - lo) / 2;
        let (p, _) = &self.nodes[mid];
        let d2 = dist2(p, target);
        if best.map_or(true, |(_, bd)| d2 < bd) {
            *best = Some((mid, d2));
        }

        let axis = depth % 3;
        let diff = target[axis] - p[axis];
        let (near, far) = if diff < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };
        self.search(near.0, near.1, depth + 1, target, best);
        if best.map_or(true, |(_, bd)| diff * diff < bd) {
            self.search(far.0, far.1, depth + 1, target, best);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Distance, Haversine, Point};
    use rand::Rng;

    fn km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        Haversine::distance(Point::new(lon1, lat1), Point::new(lon2, lat2)) / 1000.0
    }

    #[test]
    fn matches_brute_force() {
        let mut rng = rand::rng();
        let pts: Vec<(f64, f64)> = (0..500)
            .map(|_| (rng.random_range(-90.0..90.0), rng.random_range(-180.0..180.0)))
            .collect();
        let tree = KdTree::build(&pts);
        assert_eq!(tree.len(), 500);

        for _ in 0..200 {
            let (lat, lon) = (rng.random_range(-90.0..90.0), rng.random_range(-180.0..180.0));
            let idx = tree.nearest(lat, lon).unwrap();
            let brute = pts
                .iter()
                .map(|&(a, b)| km(lat, lon, a, b))
                .fold(f64::INFINITY, f64::min);
            let (a, b) = pts[idx];
            let found = km(lat, lon, a, b);
            assert!((found - brute).abs() < 1e-3, "tree {found} vs brute {brute}");
        }
    }

    #[test]
    fn antimeridian_neighbours_are_close() {
        let tree = KdTree::build(&[(0.0, 179.9), (0.0, 0.0)]);
        assert_eq!(tree.nearest(0.0, -179.9), Some(0));
    }

    #[test]
    fn empty_tree_has_no_neighbour() {
        let tree = KdTree::build(&[]);
        assert!(tree.is_empty());
        assert!(tree.nearest(1.0, 1.0).is_none());
    }
}
