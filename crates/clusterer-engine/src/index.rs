//! Static KD-tree over projected points.
//!
//! The tree is built once by sorting the coordinate array in place
//! (alternating x/y medians via Floyd–Rivest selection) and only answers
//! queries afterwards. Visitors receive the insertion index of each hit.

/// Leaf size used when the caller does not pick one.
pub const DEFAULT_NODE_SIZE: usize = 64;

/// Flat, immutable KD-tree keyed by insertion index.
#[derive(Debug, Clone, Default)]
pub struct KdIndex {
    ids: Vec<u32>,
    coords: Vec<[f64; 2]>,
    node_size: usize,
}

impl KdIndex {
    /// Index `points`; the n-th point is reported as id `n`.
    pub fn new<I>(points: I, node_size: usize) -> Self
    where
        I: IntoIterator<Item = [f64; 2]>,
    {
        let coords: Vec<[f64; 2]> = points.into_iter().collect();
        let ids = (0..coords.len() as u32).collect();
        let mut index = Self {
            ids,
            coords,
            node_size: node_size.max(1),
        };
        if index.coords.len() > 1 {
            let last = index.coords.len() - 1;
            index.sort(0, last, 0);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Visit every point inside the inclusive box `[min_x, max_x] × [min_y, max_y]`.
    pub fn range<F>(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64, mut visit: F)
    where
        F: FnMut(u32),
    {
        if self.ids.is_empty() {
            return;
        }
        let bounds = [min_x, min_y, max_x, max_y];
        self.range_in(&bounds, &mut visit, 0, self.ids.len() - 1, 0);
    }

    /// Visit every point within Euclidean distance `r` of `(qx, qy)`.
    pub fn within<F>(&self, qx: f64, qy: f64, r: f64, mut visit: F)
    where
        F: FnMut(u32),
    {
        if self.ids.is_empty() {
            return;
        }
        self.within_in([qx, qy], r, &mut visit, 0, self.ids.len() - 1, 0);
    }

    fn range_in<F>(&self, b: &[f64; 4], visit: &mut F, left: usize, right: usize, axis: usize)
    where
        F: FnMut(u32),
    {
        let inside = |p: &[f64; 2]| p[0] >= b[0] && p[0] <= b[2] && p[1] >= b[1] && p[1] <= b[3];

        if right - left <= self.node_size {
            for i in left..=right {
                if inside(&self.coords[i]) {
                    visit(self.ids[i]);
                }
            }
            return;
        }

        let m = (left + right) >> 1;
        let p = self.coords[m];
        if inside(&p) {
            visit(self.ids[m]);
        }

        if b[axis] <= p[axis] {
            self.range_in(b, visit, left, m - 1, 1 - axis);
        }
        if b[axis + 2] >= p[axis] {
            self.range_in(b, visit, m + 1, right, 1 - axis);
        }
    }

    fn within_in<F>(
        &self,
        q: [f64; 2],
        r: f64,
        visit: &mut F,
        left: usize,
        right: usize,
        axis: usize,
    ) where
        F: FnMut(u32),
    {
        let r2 = r * r;

        if right - left <= self.node_size {
            for i in left..=right {
                if sq_dist(&self.coords[i], &q) <= r2 {
                    visit(self.ids[i]);
                }
            }
            return;
        }

        let m = (left + right) >> 1;
        let p = self.coords[m];
        if sq_dist(&p, &q) <= r2 {
            visit(self.ids[m]);
        }

        if q[axis] - r <= p[axis] {
            self.within_in(q, r, visit, left, m - 1, 1 - axis);
        }
        if q[axis] + r >= p[axis] {
            self.within_in(q, r, visit, m + 1, right, 1 - axis);
        }
    }

    fn sort(&mut self, left: usize, right: usize, axis: usize) {
        if right - left <= self.node_size {
            return;
        }
        let m = (left + right) >> 1;
        self.select(m as isize, left as isize, right as isize, axis);
        self.sort(left, m - 1, 1 - axis);
        self.sort(m + 1, right, 1 - axis);
    }

    /// Rearrange `[left, right]` so the k-th element on `axis` is in place,
    /// smaller values before it and larger after.
    fn select(&mut self, k: isize, mut left: isize, mut right: isize, axis: usize) {
        while right > left {
            if right - left > 600 {
                let n = (right - left + 1) as f64;
                let m = (k - left + 1) as f64;
                let z = n.ln();
                let s = 0.5 * (2.0 * z / 3.0).exp();
                let sign = if 2.0 * m < n { -1.0 } else { 1.0 };
                let sd = 0.5 * (z * s * (n - s) / n).sqrt() * sign;
                let new_left = left.max((k as f64 - m * s / n + sd).floor() as isize);
                let new_right = right.min((k as f64 + (n - m) * s / n + sd).floor() as isize);
                self.select(k, new_left, new_right, axis);
            }

            let t = self.at(k, axis);
            let mut i = left;
            let mut j = right;

            self.swap(left, k);
            if self.at(right, axis) > t {
                self.swap(left, right);
            }

            while i < j {
                self.swap(i, j);
                i += 1;
                j -= 1;
                while self.at(i, axis) < t {
                    i += 1;
                }
                while self.at(j, axis) > t {
                    j -= 1;
                }
            }

            if self.at(left, axis) == t {
                self.swap(left, j);
            } else {
                j += 1;
                self.swap(j, right);
            }

            if j <= k {
                left = j + 1;
            }
            if k <= j {
                right = j - 1;
            }
        }
    }

    fn at(&self, i: isize, axis: usize) -> f64 {
        self.coords[i as usize][axis]
    }

    fn swap(&mut self, i: isize, j: isize) {
        self.ids.swap(i as usize, j as usize);
        self.coords.swap(i as usize, j as usize);
    }
}

fn sq_dist(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random points in the unit square.
    fn scatter(n: usize) -> Vec<[f64; 2]> {
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 1_000_000) as f64 / 1_000_000.0
        };
        (0..n).map(|_| [next(), next()]).collect()
    }

    fn sorted(mut ids: Vec<u32>) -> Vec<u32> {
        ids.sort_unstable();
        ids
    }

    #[test]
    fn empty_index_visits_nothing() {
        let index = KdIndex::new(Vec::new(), DEFAULT_NODE_SIZE);
        assert!(index.is_empty());
        let mut hits = 0;
        index.range(0.0, 0.0, 1.0, 1.0, |_| hits += 1);
        index.within(0.5, 0.5, 1.0, |_| hits += 1);
        assert_eq!(hits, 0);
    }

    #[test]
    fn range_matches_brute_force() {
        let points = scatter(2_000);
        let index = KdIndex::new(points.clone(), 16);
        assert_eq!(index.len(), 2_000);

        let (min_x, min_y, max_x, max_y) = (0.2, 0.3, 0.55, 0.9);
        let mut found = Vec::new();
        index.range(min_x, min_y, max_x, max_y, |id| found.push(id));

        let expected: Vec<u32> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p[0] >= min_x && p[0] <= max_x && p[1] >= min_y && p[1] <= max_y)
            .map(|(i, _)| i as u32)
            .collect();

        assert_eq!(sorted(found), expected);
    }

    #[test]
    fn within_matches_brute_force() {
        let points = scatter(5_000);
        let index = KdIndex::new(points.clone(), DEFAULT_NODE_SIZE);

        let (qx, qy, r) = (0.4, 0.6, 0.05);
        let mut found = Vec::new();
        index.within(qx, qy, r, |id| found.push(id));

        let expected: Vec<u32> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| sq_dist(p, &[qx, qy]) <= r * r)
            .map(|(i, _)| i as u32)
            .collect();

        assert!(!expected.is_empty());
        assert_eq!(sorted(found), expected);
    }

    #[test]
    fn duplicate_coordinates_are_all_reported() {
        let points = vec![[0.5, 0.5]; 200];
        let index = KdIndex::new(points, 8);
        let mut found = Vec::new();
        index.within(0.5, 0.5, 0.0, |id| found.push(id));
        assert_eq!(sorted(found), (0..200).collect::<Vec<u32>>());
    }
}
