//! Series reduction for interactive visualization
//!
//! Two strategies: plain stride decimation (cheap, position-preserving) and
//! Largest-Triangle-Three-Buckets (shape-preserving, bounded output size).

/// Keep every k-th sample so that at most `max_points` remain.
/// Returns the input unchanged when it already fits the budget.
pub fn stride_decimate(xs: &[f64], ys: &[f64], max_points: usize) -> (Vec<f64>, Vec<f64>) {
    let n = xs.len();
    if n == 0 || n != ys.len() || max_points == 0 || n <= max_points {
        return (xs.to_vec(), ys.to_vec());
    }
    let step = n.div_ceil(max_points).max(1);
    let out_x: Vec<f64> = xs.iter().step_by(step).copied().collect();
    let out_y: Vec<f64> = ys.iter().step_by(step).copied().collect();
    (out_x, out_y)
}

/// Largest-Triangle-Three-Buckets reduction to exactly `threshold` points.
///
/// Always keeps the first and last sample; the interior is partitioned into
/// `threshold - 2` buckets of real-valued width and, per bucket, the point
/// forming the largest triangle with the previously selected point and the
/// next bucket's centroid is kept. `threshold >= n` or `threshold < 3`
/// returns the input unchanged.
pub fn lttb(xs: &[f64], ys: &[f64], threshold: usize) -> (Vec<f64>, Vec<f64>) {
    let n = xs.len();
    if n != ys.len() || threshold >= n || threshold < 3 {
        return (xs.to_vec(), ys.to_vec());
    }

    let bucket_size = (n - 2) as f64 / (threshold - 2) as f64;
    let mut out_x = Vec::with_capacity(threshold);
    let mut out_y = Vec::with_capacity(threshold);
    out_x.push(xs[0]);
    out_y.push(ys[0]);

    let mut a = 0usize; // index of the last selected point
    for i in 1..threshold - 1 {
        let start = ((i - 1) as f64 * bucket_size) as usize + 1;
        let mut end = (i as f64 * bucket_size) as usize + 1;
        if end >= n {
            end = n - 1;
        }

        // Centroid of the next bucket, or the last selected point when the
        // next bucket is empty
        let next_start = (i as f64 * bucket_size) as usize + 1;
        let mut next_end = ((i + 1) as f64 * bucket_size) as usize + 1;
        if next_end > n {
            next_end = n;
        }
        let (avg_x, avg_y) = if next_end > next_start {
            let count = (next_end - next_start) as f64;
            let sum_x: f64 = xs[next_start..next_end].iter().sum();
            let sum_y: f64 = ys[next_start..next_end].iter().sum();
            (sum_x / count, sum_y / count)
        } else {
            (xs[a], ys[a])
        };

        let ax = xs[a];
        let ay = ys[a];
        let mut max_area = -1.0f64;
        let mut chosen = start;
        for idx in start..end {
            // Shoelace half-cross-product; ties keep the first maximal index
            let area = ((ax - avg_x) * (ys[idx] - ay) - (ax - xs[idx]) * (avg_y - ay)).abs() * 0.5;
            if area > max_area {
                max_area = area;
                chosen = idx;
            }
        }

        out_x.push(xs[chosen]);
        out_y.push(ys[chosen]);
        a = chosen;
    }

    out_x.push(xs[n - 1]);
    out_y.push(ys[n - 1]);
    (out_x, out_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_respects_budget() {
        let xs: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        let ys = xs.clone();
        let (ox, oy) = stride_decimate(&xs, &ys, 100);
        assert!(ox.len() <= 100);
        assert_eq!(ox.len(), oy.len());
        assert_eq!(ox[0], 0.0);
    }

    #[test]
    fn test_stride_noop_when_under_budget() {
        let xs = vec![0.0, 1.0, 2.0];
        let ys = vec![5.0, 6.0, 7.0];
        let (ox, oy) = stride_decimate(&xs, &ys, 10);
        assert_eq!(ox, xs);
        assert_eq!(oy, ys);
    }

    #[test]
    fn test_lttb_exact_size_with_endpoints() {
        let xs: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| (x * 0.3).sin()).collect();
        let (ox, oy) = lttb(&xs, &ys, 10);
        assert_eq!(ox.len(), 10);
        assert_eq!(oy.len(), 10);
        assert_eq!(ox[0], 0.0);
        assert_eq!(*ox.last().unwrap(), 99.0);
    }

    #[test]
    fn test_lttb_noop_cases() {
        let xs = vec![0.0, 1.0, 2.0, 3.0];
        let ys = vec![1.0, 2.0, 3.0, 4.0];

        let (ox, oy) = lttb(&xs, &ys, 10); // threshold >= n
        assert_eq!(ox, xs);
        assert_eq!(oy, ys);

        let (ox, oy) = lttb(&xs, &ys, 2); // threshold < 3
        assert_eq!(ox, xs);
        assert_eq!(oy, ys);
    }

    #[test]
    fn test_lttb_square_wave_keeps_extrema() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let ys = vec![0.0, 5.0, 0.0, 5.0, 0.0, 5.0, 0.0, 5.0, 0.0, 5.0];
        let (ox, oy) = lttb(&xs, &ys, 4);
        assert_eq!(ox.len(), 4);
        assert_eq!(ox[0], 0.0);
        assert_eq!(*ox.last().unwrap(), 9.0);
        // Interior picks are deterministic for fixed data
        let (ox2, oy2) = lttb(&xs, &ys, 4);
        assert_eq!(ox, ox2);
        assert_eq!(oy, oy2);
        // Each interior point must be an original sample
        for (x, y) in ox.iter().zip(oy.iter()) {
            let idx = *x as usize;
            assert_eq!(ys[idx], *y);
        }
    }
}
