/// Piecewise-linear interpolation of `(xp, fp)` at `x`.
///
/// `xp` may be ascending or descending. Outside the sampled range `fill` is
/// returned; with `fill = None` the nearest end value is used instead.
pub fn interpolate(x: f64, xp: &[f64], fp: &[f64], fill: Option<f64>) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 || x.is_nan() {
        return fill.unwrap_or(f64::NAN);
    }
    let descending = n > 1 && xp[0] > xp[n - 1];
    let at = |i: usize| if descending { (xp[n - 1 - i], fp[n - 1 - i]) } else { (xp[i], fp[i]) };

    let (first_x, first_f) = at(0);
    let (last_x, last_f) = at(n - 1);
    if x < first_x {
        return fill.unwrap_or(first_f);
    }
    if x > last_x {
        return fill.unwrap_or(last_f);
    }

    // first index with xp > x
    let (mut low, mut high) = (0, n);
    while low < high {
        let mid = (low + high) / 2;
        if at(mid).0 <= x { low = mid + 1 } else { high = mid }
    }
    if low == 0 {
        return first_f;
    }
    if low == n {
        return last_f;
    }
    let (x0, f0) = at(low - 1);
    let (x1, f1) = at(low);
    if x1 == x0 {
        return f0;
    }
    f0 + (f1 - f0) * (x - x0) / (x1 - x0)
}

/// Interpolates every value of `x`.
pub fn interpolate_many(x: &[f64], xp: &[f64], fp: &[f64], fill: Option<f64>) -> Vec<f64> {
    x.iter().map(|&v| interpolate(v, xp, fp, fill)).collect()
}
