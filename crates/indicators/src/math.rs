//! Shared moving-average and dispersion helpers for the adapters.

/// True when every value is a normal, usable price.
pub fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Arithmetic mean. Returns 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1 denominator).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Exponential moving average series over `data`, oldest first.
///
/// Seeded with the SMA of the first `period` values, then the standard
/// recursive smoothing. The returned series is aligned with `data`; entries
/// before index `period - 1` are the partial seed and should not be read.
pub fn ema_series(data: &[f64], period: usize) -> Vec<f64> {
    if data.is_empty() || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed_len = period.min(data.len());
    let seed = mean(&data[..seed_len]);

    let mut out = Vec::with_capacity(data.len());
    let mut ema = seed;
    for (i, &price) in data.iter().enumerate() {
        if i >= seed_len {
            ema = price * k + ema * (1.0 - k);
        }
        out.push(ema);
    }
    out
}

/// Linearly weighted moving average of the last `period` values
/// (most recent value carries the highest weight).
pub fn wma(data: &[f64], period: usize) -> f64 {
    if data.len() < period || period == 0 {
        return f64::NAN;
    }
    let tail = &data[data.len() - period..];
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &v) in tail.iter().enumerate() {
        let w = (i + 1) as f64;
        num += w * v;
        den += w;
    }
    num / den
}

/// Hull moving average series: WMA(2·WMA(n/2) − WMA(n), √n).
///
/// Entries are NaN until enough history has accumulated
/// (`period + √period − 1` values).
pub fn hull_series(data: &[f64], period: usize) -> Vec<f64> {
    let half = (period / 2).max(1);
    let sqrt_p = (period as f64).sqrt().floor().max(1.0) as usize;

    let raw: Vec<f64> = (0..data.len())
        .map(|i| {
            let slice = &data[..=i];
            if slice.len() < period {
                f64::NAN
            } else {
                2.0 * wma(slice, half) - wma(slice, period)
            }
        })
        .collect();

    (0..raw.len())
        .map(|i| {
            let slice = &raw[..=i];
            if slice.len() < period + sqrt_p - 1 {
                return f64::NAN;
            }
            let tail = &slice[slice.len() - sqrt_p..];
            if tail.iter().any(|v| v.is_nan()) {
                f64::NAN
            } else {
                wma(slice, sqrt_p)
            }
        })
        .collect()
}
