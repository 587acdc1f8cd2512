use image::RgbImage;

const LEVELS: usize = 256;

/// Histogram specification: remap each channel of `frame` so its cumulative
/// distribution follows the matching channel of `reference`.
///
/// The two images may differ in size; the output has the frame's dimensions.
pub fn match_colors(reference: &RgbImage, frame: &RgbImage) -> RgbImage {
    let mut out = frame.clone();
    if frame.is_empty() || reference.is_empty() {
        return out;
    }
    for channel in 0..3 {
        let src_cdf = cdf(&channel_histogram(frame, channel));
        let tmpl_hist = channel_histogram(reference, channel);
        let lut = build_lut(&src_cdf, &tmpl_hist);
        for px in out.pixels_mut() {
            px.0[channel] = lut[px.0[channel] as usize];
        }
    }
    out
}

fn channel_histogram(img: &RgbImage, channel: usize) -> [u64; LEVELS] {
    let mut hist = [0u64; LEVELS];
    for px in img.pixels() {
        hist[px.0[channel] as usize] += 1;
    }
    hist
}

fn cdf(hist: &[u64; LEVELS]) -> [f64; LEVELS] {
    let total: u64 = hist.iter().sum();
    let mut out = [0.0f64; LEVELS];
    let mut running = 0u64;
    for (i, &count) in hist.iter().enumerate() {
        running += count;
        out[i] = running as f64 / total as f64;
    }
    out
}

/// Interpolate each source quantile onto the template's (quantile, value)
/// curve, built only from levels the template actually uses.
fn build_lut(src_cdf: &[f64; LEVELS], tmpl_hist: &[u64; LEVELS]) -> [u8; LEVELS] {
    let tmpl_cdf = cdf(tmpl_hist);
    let points: Vec<(f64, f64)> = (0..LEVELS)
        .filter(|&v| tmpl_hist[v] > 0)
        .map(|v| (tmpl_cdf[v], v as f64))
        .collect();

    let mut lut = [0u8; LEVELS];
    for (v, slot) in lut.iter_mut().enumerate() {
        let q = src_cdf[v];
        *slot = interp(q, &points).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn interp(x: f64, points: &[(f64, f64)]) -> f64 {
    let (first, last) = (points[0], points[points.len() - 1]);
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    let idx = points.partition_point(|p| p.0 < x);
    let (x0, y0) = points[idx - 1];
    let (x1, y1) = points[idx];
    if (x1 - x0).abs() < f64::EPSILON {
        return y1;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}
