//! Minimum-cost perfect matching over a square cost matrix.
//!
//! Costs are symmetrised, `(c[i][j] + c[j][i]) / 2`, and the pairing is
//! solved exactly on the complete graph with Edmonds' weighted blossom
//! algorithm in O(n³). Pair costs are turned into non-negative integer
//! weights `max - cost` before solving so dual updates stay exact; the
//! reported total is summed from the original floating-point costs.
//!
//! The result is deterministic for a given matrix. Among several optimal
//! matchings the one returned depends only on vertex order.

use crate::core::error::SolverError;

/// Integer range the symmetrised costs are scaled onto before solving
const WEIGHT_RESOLUTION: f64 = (1u64 << 40) as f64;

const NONE: usize = usize::MAX;

/// Square matrix of pairing costs
#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
    n: usize,
    data: Vec<f64>,
}

impl CostMatrix {
    /// Matrix of size `n` with every entry set to `value`
    pub fn filled(n: usize, value: f64) -> Self {
        Self {
            n,
            data: vec![value; n * n],
        }
    }

    /// Build from rows, rejecting ragged or non-finite input
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, SolverError> {
        let n = rows.len();
        if n == 0 {
            return Err(SolverError::Empty);
        }

        let mut data = Vec::with_capacity(n * n);
        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != n {
                return Err(SolverError::NotSquare {
                    row,
                    len: values.len(),
                    expected: n,
                });
            }
            data.extend(values);
        }

        let matrix = Self { n, data };
        matrix.check_finite()?;
        Ok(matrix)
    }

    pub fn size(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.n + j] = value;
    }

    fn check_finite(&self) -> Result<(), SolverError> {
        match self.data.iter().position(|v| !v.is_finite()) {
            Some(pos) => Err(SolverError::NonFinite {
                row: pos / self.n,
                col: pos % self.n,
            }),
            None => Ok(()),
        }
    }

    /// Symmetrised copy; the diagonal is never read
    fn symmetrised(&self) -> Vec<Vec<f64>> {
        let n = self.n;
        (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| if i == j { 0.0 } else { (self.get(i, j) + self.get(j, i)) / 2.0 })
                    .collect()
            })
            .collect()
    }
}

/// Disjoint index pairs covering every row of the matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Matching {
    /// Pairs `(i, j)` with `i < j`, sorted by `i`
    pub pairs: Vec<(usize, usize)>,
    /// Sum of symmetrised pair costs
    pub total_cost: f64,
}

impl Matching {
    pub fn partner_of(&self, index: usize) -> Option<usize> {
        self.pairs.iter().find_map(|&(i, j)| {
            if i == index {
                Some(j)
            } else if j == index {
                Some(i)
            } else {
                None
            }
        })
    }
}


/// Solve the minimum-cost perfect matching for an even-sized matrix
pub fn solve(costs: &CostMatrix) -> Result<Matching, SolverError> {
    let n = costs.size();
    if n == 0 {
        return Err(SolverError::Empty);
    }
    if n % 2 == 1 {
        return Err(SolverError::OddSize(n));
    }
    costs.check_finite()?;

    let sym = costs.symmetrised();
    let mate = WeightedBlossom::new(n, integer_weights(&sym)).max_weight_perfect();

    let pairs: Vec<(usize, usize)> = mate
        .iter()
        .enumerate()
        .filter(|&(i, &m)| m != NONE && i < m)
        .map(|(i, &m)| (i, m))
        .collect();
    if pairs.len() * 2 != n {
        return Err(SolverError::Incomplete(n - pairs.len() * 2));
    }

    let total_cost: f64 = pairs.iter().map(|&(i, j)| sym[i][j]).sum();
    tracing::debug!("Solved {} slots into {} pairs, cost {:.3}", n, pairs.len(), total_cost);

    Ok(Matching { pairs, total_cost })
}

/// Complete-graph edges `(i, j, weight)` with `i < j`, where the cheapest
/// pair gets the largest weight
///
/// Every perfect matching has n/2 edges, so maximising `max - cost` is the
/// same as minimising cost.
fn integer_weights(sym: &[Vec<f64>]) -> Vec<(usize, usize, i64)> {
    let n = sym.len();
    let mut lowest = f64::INFINITY;
    let mut highest = f64::NEG_INFINITY;
    for i in 0..n {
        for j in (i + 1)..n {
            lowest = lowest.min(sym[i][j]);
            highest = highest.max(sym[i][j]);
        }
    }

    // halves keep the spread finite for extreme inputs
    let half_spread = highest / 2.0 - lowest / 2.0;
    let scale = if half_spread > 0.0 {
        WEIGHT_RESOLUTION / half_spread
    } else {
        0.0
    };

    let mut edges = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let weight = ((highest / 2.0 - sym[i][j] / 2.0) * scale).round() as i64;
            edges.push((i, j, weight));
        }
    }
    edges
}

/// Edmonds' maximum-weight matching with maximum cardinality, O(n³)
///
/// Vertices are `0..n`, blossoms `n..2n`. An edge `k` has two endpoints
/// `2k` and `2k + 1`; `p ^ 1` is the opposite end of endpoint `p`. Vertex
/// duals are stored doubled so integer weights keep every update integral.
/// Labels: 0 free, 1 outer (S), 2 inner (T); bit 4 marks a blossom
/// visited by `scan_blossom`.
struct WeightedBlossom {
    n: usize,
    edges: Vec<(usize, usize, i64)>,
    endpoint: Vec<usize>,
    neighbours: Vec<Vec<usize>>,
    mate: Vec<usize>,
    label: Vec<u8>,
    label_end: Vec<usize>,
    in_blossom: Vec<usize>,
    parent: Vec<usize>,
    children: Vec<Vec<usize>>,
    base: Vec<usize>,
    child_endpoints: Vec<Vec<usize>>,
    best_edge: Vec<usize>,
    best_edges: Vec<Option<Vec<usize>>>,
    unused: Vec<usize>,
    dual: Vec<i64>,
    allowed: Vec<bool>,
    queue: Vec<usize>,
}

/// Python-style index into a cyclic child list
#[inline]
fn cyclic(j: isize, len: usize) -> usize {
    j.rem_euclid(len as isize) as usize
}

impl WeightedBlossom {
    fn new(n: usize, edges: Vec<(usize, usize, i64)>) -> Self {
        let max_weight = edges.iter().map(|e| e.2).max().unwrap_or(0).max(0);

        let endpoint = edges.iter().flat_map(|&(i, j, _)| [i, j]).collect();
        let mut neighbours = vec![Vec::new(); n];
        for (k, &(i, j, _)) in edges.iter().enumerate() {
            neighbours[i].push(2 * k + 1);
            neighbours[j].push(2 * k);
        }

        let mut dual = vec![max_weight; n];
        dual.extend(std::iter::repeat(0).take(n));

        Self {
            n,
            allowed: vec![false; edges.len()],
            edges,
            endpoint,
            neighbours,
            mate: vec![NONE; n],
            label: vec![0; 2 * n],
            label_end: vec![NONE; 2 * n],
            in_blossom: (0..n).collect(),
            parent: vec![NONE; 2 * n],
            children: vec![Vec::new(); 2 * n],
            base: (0..n).chain(std::iter::repeat(NONE).take(n)).collect(),
            child_endpoints: vec![Vec::new(); 2 * n],
            best_edge: vec![NONE; 2 * n],
            best_edges: vec![None; 2 * n],
            unused: (n..2 * n).collect(),
            dual,
            queue: Vec::new(),
        }
    }

    #[inline]
    fn slack(&self, k: usize) -> i64 {
        let (i, j, w) = self.edges[k];
        self.dual[i] + self.dual[j] - 2 * w
    }

    fn leaves(&self, b: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![b];
        while let Some(t) = stack.pop() {
            if t < self.n {
                out.push(t);
            } else {
                stack.extend(self.children[t].iter().rev());
            }
        }
        out
    }

    /// Label `w` (and its blossom) and, for an inner label, its mate's
    /// blossom as outer
    fn assign_label(&mut self, mut w: usize, mut t: u8, mut p: usize) {
        loop {
            let b = self.in_blossom[w];
            self.label[w] = t;
            self.label[b] = t;
            self.label_end[w] = p;
            self.label_end[b] = p;
            self.best_edge[w] = NONE;
            self.best_edge[b] = NONE;

            if t == 1 {
                let leaves = self.leaves(b);
                self.queue.extend(leaves);
                return;
            }

            let mate = self.mate[self.base[b]];
            w = self.endpoint[mate];
            t = 1;
            p = mate ^ 1;
        }
    }

    /// Trace back from `v` and `w` towards their roots; returns the base of
    /// a new blossom, or `NONE` when the roots differ (augmenting path)
    fn scan_blossom(&mut self, mut v: usize, mut w: usize) -> usize {
        let mut path = Vec::new();
        let mut base = NONE;

        while v != NONE || w != NONE {
            let b = self.in_blossom[v];
            if self.label[b] & 4 != 0 {
                base = self.base[b];
                break;
            }
            path.push(b);
            self.label[b] = 5;

            if self.label_end[b] == NONE {
                v = NONE;
            } else {
                let t = self.endpoint[self.label_end[b]];
                let bt = self.in_blossom[t];
                v = self.endpoint[self.label_end[bt]];
            }
            if w != NONE {
                std::mem::swap(&mut v, &mut w);
            }
        }

        for b in path {
            self.label[b] = 1;
        }
        base
    }

    /// Contract the odd cycle closed by edge `k` into a new outer blossom
    fn add_blossom(&mut self, base: usize, k: usize) {
        let Some(b) = self.unused.pop() else {
            return;
        };
        let (v, w, _) = self.edges[k];
        let bb = self.in_blossom[base];
        let mut bv = self.in_blossom[v];
        let mut bw = self.in_blossom[w];

        self.base[b] = base;
        self.parent[b] = NONE;
        self.parent[bb] = b;

        let mut path = Vec::new();
        let mut endps = Vec::new();
        while bv != bb {
            self.parent[bv] = b;
            path.push(bv);
            endps.push(self.label_end[bv]);
            bv = self.in_blossom[self.endpoint[self.label_end[bv]]];
        }
        path.push(bb);
        path.reverse();
        endps.reverse();
        endps.push(2 * k);
        while bw != bb {
            self.parent[bw] = b;
            path.push(bw);
            endps.push(self.label_end[bw] ^ 1);
            bw = self.in_blossom[self.endpoint[self.label_end[bw]]];
        }

        self.children[b] = path.clone();
        self.child_endpoints[b] = endps;
        self.label[b] = 1;
        self.label_end[b] = self.label_end[bb];
        self.dual[b] = 0;

        for leaf in self.leaves(b) {
            if self.label[self.in_blossom[leaf]] == 2 {
                self.queue.push(leaf);
            }
            self.in_blossom[leaf] = b;
        }

        // cheapest edge from the new blossom to each neighbouring outer blossom
        let mut best_to = vec![NONE; 2 * self.n];
        for &child in &path {
            let cached = self.best_edges[child].take();
            let lists: Vec<Vec<usize>> = match cached {
                Some(list) => vec![list],
                None => self
                    .leaves(child)
                    .into_iter()
                    .map(|leaf| self.neighbours[leaf].iter().map(|p| p / 2).collect())
                    .collect(),
            };
            for list in lists {
                for k in list {
                    let (i, j, _) = self.edges[k];
                    let j = if self.in_blossom[j] == b { i } else { j };
                    let bj = self.in_blossom[j];
                    if bj != b
                        && self.label[bj] == 1
                        && (best_to[bj] == NONE || self.slack(k) < self.slack(best_to[bj]))
                    {
                        best_to[bj] = k;
                    }
                }
            }
            self.best_edge[child] = NONE;
        }

        let best: Vec<usize> = best_to.into_iter().filter(|k| *k != NONE).collect();
        self.best_edge[b] = NONE;
        for &k in &best {
            if self.best_edge[b] == NONE || self.slack(k) < self.slack(self.best_edge[b]) {
                self.best_edge[b] = k;
            }
        }
        self.best_edges[b] = Some(best);
    }

    /// Undo a blossom, relabelling its children when done mid-stage
    fn expand_blossom(&mut self, b: usize, end_stage: bool) {
        let children = self.children[b].clone();
        for &s in &children {
            self.parent[s] = NONE;
            if s < self.n {
                self.in_blossom[s] = s;
            } else if end_stage && self.dual[s] == 0 {
                self.expand_blossom(s, end_stage);
            } else {
                for leaf in self.leaves(s) {
                    self.in_blossom[leaf] = s;
                }
            }
        }

        if !end_stage && self.label[b] == 2 {
            let endps = self.child_endpoints[b].clone();
            let len = children.len();
            let entry = self.in_blossom[self.endpoint[self.label_end[b] ^ 1]];
            let position = children.iter().position(|c| *c == entry).unwrap_or(0);

            let mut j = position as isize;
            let (step, trick) = if position & 1 == 1 {
                j -= len as isize;
                (1isize, 0usize)
            } else {
                (-1isize, 1usize)
            };
            let endp_at = |j: isize| endps[cyclic(j - trick as isize, len)];

            // relabel the even-length path from the entry child to the base
            let mut p = self.label_end[b];
            while j != 0 {
                let first = self.endpoint[p ^ 1];
                self.label[first] = 0;
                self.label[self.endpoint[endp_at(j) ^ trick ^ 1]] = 0;
                self.assign_label(first, 2, p);
                self.allowed[endp_at(j) / 2] = true;
                j += step;
                p = endp_at(j) ^ trick;
                self.allowed[p / 2] = true;
                j += step;
            }

            let bv = children[cyclic(j, len)];
            let end = self.endpoint[p ^ 1];
            self.label[end] = 2;
            self.label[bv] = 2;
            self.label_end[end] = p;
            self.label_end[bv] = p;
            self.best_edge[bv] = NONE;
            j += step;

            // the rest of the cycle may hold inner vertices reached from outside
            while children[cyclic(j, len)] != entry {
                let bv = children[cyclic(j, len)];
                if self.label[bv] == 1 {
                    j += step;
                    continue;
                }
                let reached = self.leaves(bv).into_iter().find(|v| self.label[*v] != 0);
                if let Some(v) = reached {
                    self.label[v] = 0;
                    let partner = self.endpoint[self.mate[self.base[bv]]];
                    self.label[partner] = 0;
                    let end = self.label_end[v];
                    self.assign_label(v, 2, end);
                }
                j += step;
            }
        }

        self.label[b] = 0;
        self.label_end[b] = NONE;
        self.children[b].clear();
        self.child_endpoints[b].clear();
        self.base[b] = NONE;
        self.best_edges[b] = None;
        self.best_edge[b] = NONE;
        self.unused.push(b);
    }

    /// Swap matched and unmatched edges along the even path from `v` to
    /// the base of blossom `b`, making `v` the new base
    fn augment_blossom(&mut self, b: usize, v: usize) {
        let mut t = v;
        while self.parent[t] != b {
            t = self.parent[t];
        }
        if t >= self.n {
            self.augment_blossom(t, v);
        }

        let children = self.children[b].clone();
        let endps = self.child_endpoints[b].clone();
        let len = children.len();
        let position = children.iter().position(|c| *c == t).unwrap_or(0);

        let mut j = position as isize;
        let (step, trick) = if position & 1 == 1 {
            j -= len as isize;
            (1isize, 0usize)
        } else {
            (-1isize, 1usize)
        };

        while j != 0 {
            j += step;
            let t = children[cyclic(j, len)];
            let p = endps[cyclic(j - trick as isize, len)] ^ trick;
            if t >= self.n {
                let end = self.endpoint[p];
                self.augment_blossom(t, end);
            }
            j += step;
            let t = children[cyclic(j, len)];
            if t >= self.n {
                let end = self.endpoint[p ^ 1];
                self.augment_blossom(t, end);
            }
            let (a, c) = (self.endpoint[p], self.endpoint[p ^ 1]);
            self.mate[a] = p ^ 1;
            self.mate[c] = p;
        }

        self.children[b].rotate_left(position);
        self.child_endpoints[b].rotate_left(position);
        let first = self.children[b][0];
        self.base[b] = self.base[first];
    }

    /// Augment along the path through edge `k` joining two outer trees
    fn augment_matching(&mut self, k: usize) {
        let (v, w, _) = self.edges[k];
        for (mut s, mut p) in [(v, 2 * k + 1), (w, 2 * k)] {
            loop {
                let bs = self.in_blossom[s];
                if bs >= self.n {
                    self.augment_blossom(bs, s);
                }
                self.mate[s] = p;
                if self.label_end[bs] == NONE {
                    break;
                }
                let t = self.endpoint[self.label_end[bs]];
                let bt = self.in_blossom[t];
                s = self.endpoint[self.label_end[bt]];
                let j = self.endpoint[self.label_end[bt] ^ 1];
                if bt >= self.n {
                    self.augment_blossom(bt, j);
                }
                self.mate[j] = self.label_end[bt];
                p = self.label_end[bt] ^ 1;
            }
        }
    }

    /// Grow alternating trees from the free vertices until an edge joins
    /// two of them; returns true when the matching grew
    fn grow_and_augment(&mut self) -> bool {
        loop {
            while let Some(v) = self.queue.pop() {
                for idx in 0..self.neighbours[v].len() {
                    let p = self.neighbours[v][idx];
                    let k = p / 2;
                    let w = self.endpoint[p];
                    if self.in_blossom[v] == self.in_blossom[w] {
                        continue;
                    }

                    let mut k_slack = 0;
                    if !self.allowed[k] {
                        k_slack = self.slack(k);
                        if k_slack <= 0 {
                            self.allowed[k] = true;
                        }
                    }

                    let bw = self.in_blossom[w];
                    if self.allowed[k] {
                        if self.label[bw] == 0 {
                            self.assign_label(w, 2, p ^ 1);
                        } else if self.label[bw] == 1 {
                            let base = self.scan_blossom(v, w);
                            if base != NONE {
                                self.add_blossom(base, k);
                            } else {
                                self.augment_matching(k);
                                return true;
                            }
                        } else if self.label[w] == 0 {
                            self.label[w] = 2;
                            self.label_end[w] = p ^ 1;
                        }
                    } else if self.label[bw] == 1 {
                        let bv = self.in_blossom[v];
                        if self.best_edge[bv] == NONE || k_slack < self.slack(self.best_edge[bv]) {
                            self.best_edge[bv] = k;
                        }
                    } else if self.label[w] == 0
                        && (self.best_edge[w] == NONE || k_slack < self.slack(self.best_edge[w]))
                    {
                        self.best_edge[w] = k;
                    }
                }
            }

            if !self.adjust_duals() {
                return false;
            }
        }
    }

    /// Apply the smallest dual change that makes progress; returns false
    /// once no further augmentation is possible
    fn adjust_duals(&mut self) -> bool {
        let n = self.n;
        // 2: free vertex to outer, 3: outer to outer, 4: inner blossom dual reaches zero
        let mut delta_kind = 0u8;
        let mut delta = 0i64;
        let mut delta_edge = NONE;
        let mut delta_blossom = NONE;

        for v in 0..n {
            if self.label[self.in_blossom[v]] == 0 && self.best_edge[v] != NONE {
                let d = self.slack(self.best_edge[v]);
                if delta_kind == 0 || d < delta {
                    delta = d;
                    delta_kind = 2;
                    delta_edge = self.best_edge[v];
                }
            }
        }

        for b in 0..2 * n {
            if self.parent[b] == NONE && self.label[b] == 1 && self.best_edge[b] != NONE {
                let d = self.slack(self.best_edge[b]) / 2;
                if delta_kind == 0 || d < delta {
                    delta = d;
                    delta_kind = 3;
                    delta_edge = self.best_edge[b];
                }
            }
        }

        for b in n..2 * n {
            if self.base[b] != NONE
                && self.parent[b] == NONE
                && self.label[b] == 2
                && (delta_kind == 0 || self.dual[b] < delta)
            {
                delta = self.dual[b];
                delta_kind = 4;
                delta_blossom = b;
            }
        }

        if delta_kind == 0 {
            delta_kind = 1;
            delta = self.dual[..n].iter().copied().min().unwrap_or(0).max(0);
        }

        for v in 0..n {
            match self.label[self.in_blossom[v]] {
                1 => self.dual[v] -= delta,
                2 => self.dual[v] += delta,
                _ => {}
            }
        }
        for b in n..2 * n {
            if self.base[b] != NONE && self.parent[b] == NONE {
                match self.label[b] {
                    1 => self.dual[b] += delta,
                    2 => self.dual[b] -= delta,
                    _ => {}
                }
            }
        }

        match delta_kind {
            2 => {
                self.allowed[delta_edge] = true;
                let (i, j, _) = self.edges[delta_edge];
                let outer = if self.label[self.in_blossom[i]] == 0 { j } else { i };
                self.queue.push(outer);
                true
            }
            3 => {
                self.allowed[delta_edge] = true;
                let (i, _, _) = self.edges[delta_edge];
                self.queue.push(i);
                true
            }
            4 => {
                self.expand_blossom(delta_blossom, false);
                true
            }
            _ => false,
        }
    }

    /// Run stages until no augmenting path is left; returns each vertex's
    /// partner or `NONE`
    fn max_weight_perfect(mut self) -> Vec<usize> {
        let n = self.n;
        for _ in 0..n {
            self.label.fill(0);
            self.best_edge.fill(NONE);
            for slot in &mut self.best_edges[n..] {
                *slot = None;
            }
            self.allowed.fill(false);
            self.queue.clear();

            for v in 0..n {
                if self.mate[v] == NONE && self.label[self.in_blossom[v]] == 0 {
                    self.assign_label(v, 1, NONE);
                }
            }

            if !self.grow_and_augment() {
                break;
            }

            for b in n..2 * n {
                if self.parent[b] == NONE && self.base[b] != NONE && self.label[b] == 1 && self.dual[b] == 0 {
                    self.expand_blossom(b, true);
                }
            }
        }

        self.mate
            .iter()
            .map(|&p| if p == NONE { NONE } else { self.endpoint[p] })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force_min(sym: &[Vec<f64>], remaining: &[usize]) -> f64 {
        if remaining.is_empty() {
            return 0.0;
        }
        let first = remaining[0];
        let mut best = f64::INFINITY;
        for k in 1..remaining.len() {
            let rest: Vec<usize> = remaining[1..]
                .iter()
                .copied()
                .filter(|x| *x != remaining[k])
                .collect();
            best = best.min(sym[first][remaining[k]] + brute_force_min(sym, &rest));
        }
        best
    }

    fn assert_perfect(matching: &Matching, n: usize) {
        let mut seen = vec![0; n];
        for &(i, j) in &matching.pairs {
            assert!(i < j);
            seen[i] += 1;
            seen[j] += 1;
        }
        assert!(seen.iter().all(|c| *c == 1), "not perfect: {:?}", matching.pairs);
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert_eq!(CostMatrix::from_rows(vec![]), Err(SolverError::Empty));
        assert!(matches!(
            CostMatrix::from_rows(vec![vec![0.0, 1.0], vec![1.0]]),
            Err(SolverError::NotSquare { row: 1, .. })
        ));
        assert!(matches!(
            CostMatrix::from_rows(vec![vec![0.0, f64::NAN], vec![1.0, 0.0]]),
            Err(SolverError::NonFinite { row: 0, col: 1 })
        ));

        let odd = CostMatrix::filled(3, 1.0);
        assert_eq!(solve(&odd), Err(SolverError::OddSize(3)));
    }

    #[test]
    fn test_two_participants() {
        let costs = CostMatrix::from_rows(vec![vec![0.0, 5.0], vec![5.0, 0.0]]).unwrap();
        let matching = solve(&costs).unwrap();
        assert_eq!(matching.pairs, vec![(0, 1)]);
        assert_eq!(matching.total_cost, 5.0);
    }

    #[test]
    fn test_unique_optimum_is_found() {
        // 0-3 and 1-2 are cheap, everything else expensive
        let costs = CostMatrix::from_rows(vec![
            vec![0.0, 90.0, 80.0, 5.0],
            vec![90.0, 0.0, 10.0, 70.0],
            vec![80.0, 10.0, 0.0, 60.0],
            vec![5.0, 70.0, 60.0, 0.0],
        ])
        .unwrap();

        let matching = solve(&costs).unwrap();
        assert_eq!(matching.pairs, vec![(0, 3), (1, 2)]);
        assert_eq!(matching.total_cost, 15.0);
        assert_eq!(matching.partner_of(2), Some(1));
    }

    #[test]
    fn test_disjoint_triangles_are_bridged() {
        // Two cheap triangles: each must give up one member to the other side
        let mut rows = vec![vec![100.0; 6]; 6];
        for (a, b) in [(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5)] {
            rows[a][b] = 1.0;
            rows[b][a] = 1.0;
        }
        let costs = CostMatrix::from_rows(rows).unwrap();
        let matching = solve(&costs).unwrap();

        assert_perfect(&matching, 6);
        let sym = costs.symmetrised();
        let nodes: Vec<usize> = (0..6).collect();
        assert!((matching.total_cost - brute_force_min(&sym, &nodes)).abs() < 1e-9);
        assert_eq!(matching.total_cost, 102.0);
    }

    #[test]
    fn test_nested_odd_cycles() {
        // A cheap 5-cycle plus a pendant that can only attach through vertex 4
        let n = 6;
        let mut rows = vec![vec![500.0; n]; n];
        for (a, b, c) in [(0, 1, 2.0), (1, 2, 2.0), (2, 3, 2.0), (3, 4, 2.0), (4, 0, 2.0), (4, 5, 30.0), (2, 5, 80.0)] {
            rows[a][b] = c;
            rows[b][a] = c;
        }
        let costs = CostMatrix::from_rows(rows).unwrap();
        let matching = solve(&costs).unwrap();

        assert_perfect(&matching, n);
        assert_eq!(matching.partner_of(5), Some(4));
        assert_eq!(matching.total_cost, 34.0);
    }

    #[test]
    fn test_matches_brute_force_on_small_matrices() {
        for seed in 1..20u64 {
            let n = 2 * (1 + (seed as usize % 4));
            let mut state = seed.wrapping_mul(6364136223846793005);
            let mut rows = vec![vec![0.0; n]; n];
            for i in 0..n {
                for j in (i + 1)..n {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let value = ((state >> 33) % 100) as f64;
                    rows[i][j] = value;
                    rows[j][i] = value;
                }
            }
            let costs = CostMatrix::from_rows(rows).unwrap();
            let matching = solve(&costs).unwrap();

            assert_perfect(&matching, n);
            let sym = costs.symmetrised();
            let nodes: Vec<usize> = (0..n).collect();
            let optimum = brute_force_min(&sym, &nodes);
            assert!(
                (matching.total_cost - optimum).abs() < 1e-9,
                "seed {}: got {}, optimum {}",
                seed,
                matching.total_cost,
                optimum
            );
        }
    }

    #[test]
    fn test_asymmetric_costs_are_averaged() {
        let costs = CostMatrix::from_rows(vec![
            vec![0.0, 10.0, 50.0, 50.0],
            vec![30.0, 0.0, 50.0, 50.0],
            vec![50.0, 50.0, 0.0, 0.0],
            vec![50.0, 50.0, 40.0, 0.0],
        ])
        .unwrap();

        let matching = solve(&costs).unwrap();
        assert_eq!(matching.pairs, vec![(0, 1), (2, 3)]);
        assert_eq!(matching.total_cost, 40.0);
    }

    #[test]
    fn test_large_pool_is_perfect() {
        let n = 40;
        let mut rows = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                rows[i][j] = ((i * 31 + j * 17) % 23) as f64 + ((i + j) % 5) as f64;
            }
        }
        let costs = CostMatrix::from_rows(rows).unwrap();
        let matching = solve(&costs).unwrap();
        assert_perfect(&matching, n);
        assert_eq!(matching.pairs.len(), n / 2);
    }
}
