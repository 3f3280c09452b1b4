// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Dynamic time warping with a Sakoe-Chiba band

use ndarray::ArrayView2;

/// DTW distance between two `(timesteps, channels)` series.
///
/// Local cost is the squared Euclidean distance between frames; the result
/// is the square root of the cheapest accumulated path. Cells further than
/// `radius` from the diagonal are never visited. When the series lengths
/// differ the band is widened so a path always exists.
pub fn dtw_distance(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>, radius: usize) -> f64 {
    let n = a.nrows();
    let m = b.nrows();
    if n == 0 || m == 0 {
        return if n == m { 0.0 } else { f64::INFINITY };
    }

    let band = radius.max(n.abs_diff(m));

    // Two rolling rows of the (n+1) x (m+1) accumulated cost matrix
    let mut prev = vec![f64::INFINITY; m + 1];
    let mut curr = vec![f64::INFINITY; m + 1];
    prev[0] = 0.0;

    for i in 1..=n {
        curr.iter_mut().for_each(|c| *c = f64::INFINITY);

        let lo = i.saturating_sub(band).max(1);
        let hi = (i + band).min(m);
        let row_a = a.row(i - 1);

        for j in lo..=hi {
            let cost: f64 = row_a
                .iter()
                .zip(b.row(j - 1).iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum();
            let best = prev[j - 1].min(prev[j]).min(curr[j - 1]);
            curr[j] = cost + best;
        }

        std::mem::swap(&mut prev, &mut curr);
    }

    prev[m].sqrt()
}
