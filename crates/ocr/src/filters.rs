//! Pixel filters not provided by `imageproc`: non-local-means denoising and
//! contrast-limited adaptive histogram equalization.

use image::{GrayImage, Luma};
use rayon::prelude::*;

/// Output rows denoised together by one worker.
const BAND_ROWS: usize = 32;

/// Patches with `mean_sq_diff / strength²` above this get zero weight.
const WEIGHT_CUTOFF: f64 = 30.0;

const MAX_TABLE_LEN: f64 = (1u32 << 20) as f64;

/// Non-local-means denoising.
///
/// Each pixel becomes a weighted mean of the pixels in a `search_window`
/// neighbourhood, weighted by how similar the surrounding
/// `template_window` patches are: `exp(-mean_sq_diff / strength²)`.
/// Patch distances are running box sums of squared differences per offset,
/// so the cost is `O(pixels × search_window²)` regardless of the template
/// size. Borders replicate the edge pixels. Bands of rows run in parallel.
pub fn non_local_means(
    image: &GrayImage,
    strength: f32,
    template_window: u32,
    search_window: u32,
) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || strength <= 0.0 {
        return image.clone();
    }

    let template_radius = (template_window / 2) as usize;
    let search_radius = (search_window / 2) as usize;
    let side = 2 * template_radius + 1;
    let pad = search_radius + template_radius;

    let denoiser = NlMeans {
        padded: pad_replicate(image, pad),
        stride: width as usize + 2 * pad,
        pad,
        width: width as usize,
        template_radius,
        search_radius: search_radius as isize,
        weights: PatchWeights::new((side * side) as u32, strength),
    };

    let mut out = GrayImage::new(width, height);
    let band_len = BAND_ROWS * denoiser.width;
    out.par_chunks_mut(band_len)
        .enumerate()
        .for_each(|(band, rows)| denoiser.denoise_band(band * BAND_ROWS, rows));
    out
}

/// Copy of `image` with `pad` replicated edge pixels on every side.
fn pad_replicate(image: &GrayImage, pad: usize) -> Vec<u8> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let raw = image.as_raw();
    let mut data = Vec::with_capacity((w + 2 * pad) * (h + 2 * pad));
    for py in 0..h + 2 * pad {
        let y = py.saturating_sub(pad).min(h - 1);
        let row = &raw[y * w..(y + 1) * w];
        data.extend(std::iter::repeat(row[0]).take(pad));
        data.extend_from_slice(row);
        data.extend(std::iter::repeat(row[w - 1]).take(pad));
    }
    data
}

/// `exp(-sum / (area · strength²))` tabulated by integer patch sum.
struct PatchWeights {
    table: Vec<f32>,
    scale: f32,
    /// Every sum past the table end is below the cutoff.
    complete: bool,
}

impl PatchWeights {
    fn new(area: u32, strength: f32) -> Self {
        let scale = 1.0 / (area as f64 * strength as f64 * strength as f64);
        let limit = (WEIGHT_CUTOFF / scale).ceil();
        let len = limit.min(MAX_TABLE_LEN) as usize;
        let table = (0..len.max(1))
            .map(|sum| (-(sum as f64) * scale).exp() as f32)
            .collect();
        Self {
            table,
            scale: scale as f32,
            complete: limit <= MAX_TABLE_LEN,
        }
    }

    #[inline]
    fn weight(&self, patch_sum: u32) -> f32 {
        match self.table.get(patch_sum as usize) {
            Some(&w) => w,
            None if self.complete => 0.0,
            None => (-(patch_sum as f32) * self.scale).exp(),
        }
    }
}

struct NlMeans {
    padded: Vec<u8>,
    stride: usize,
    pad: usize,
    width: usize,
    template_radius: usize,
    search_radius: isize,
    weights: PatchWeights,
}

impl NlMeans {
    /// Slice of `len` padded pixels starting at image coordinates `(x, y)`.
    #[inline]
    fn span(&self, x: isize, y: isize, len: usize) -> &[u8] {
        let pad = self.pad as isize;
        let start = (y + pad) as usize * self.stride + (x + pad) as usize;
        &self.padded[start..start + len]
    }

    /// Denoise image rows `y0..` into `out`, whose length is a multiple of the width.
    fn denoise_band(&self, y0: usize, out: &mut [u8]) {
        let w = self.width;
        let rows = out.len() / w;
        let tr = self.template_radius;
        let side = 2 * tr + 1;
        let span_rows = rows + 2 * tr;

        let mut diff = vec![0u32; w + 2 * tr];
        let mut row_sums = vec![0u32; span_rows * w];
        let mut column = vec![0u32; w];
        let mut weight_sum = vec![0f32; rows * w];
        let mut value_sum = vec![0f32; rows * w];

        let sr = self.search_radius;
        for dy in -sr..=sr {
            for dx in -sr..=sr {
                // Horizontal template sums for every row a patch in the band touches.
                for r in 0..span_rows {
                    let y = (y0 + r) as isize - tr as isize;
                    let reference = self.span(-(tr as isize), y, w + 2 * tr);
                    let shifted = self.span(dx - tr as isize, y + dy, w + 2 * tr);
                    for ((d, &a), &b) in diff.iter_mut().zip(reference).zip(shifted) {
                        let e = a.abs_diff(b) as u32;
                        *d = e * e;
                    }

                    let sums = &mut row_sums[r * w..(r + 1) * w];
                    let mut acc: u32 = diff[..side].iter().sum();
                    sums[0] = acc;
                    for x in 1..w {
                        acc = acc + diff[x + side - 1] - diff[x - 1];
                        sums[x] = acc;
                    }
                }

                // Vertical running sum turns row sums into full patch sums.
                column.fill(0);
                for r in 0..side - 1 {
                    add_row(&mut column, &row_sums[r * w..(r + 1) * w]);
                }
                for i in 0..rows {
                    let entering = i + side - 1;
                    add_row(&mut column, &row_sums[entering * w..(entering + 1) * w]);

                    let source = self.span(dx, (y0 + i) as isize + dy, w);
                    let ws = &mut weight_sum[i * w..(i + 1) * w];
                    let vs = &mut value_sum[i * w..(i + 1) * w];
                    for x in 0..w {
                        let weight = self.weights.weight(column[x]);
                        ws[x] += weight;
                        vs[x] += weight * source[x] as f32;
                    }

                    for (c, &s) in column.iter_mut().zip(&row_sums[i * w..(i + 1) * w]) {
                        *c -= s;
                    }
                }
            }
        }

        for ((o, &v), &wgt) in out.iter_mut().zip(&value_sum).zip(&weight_sum) {
            *o = (v / wgt).round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[inline]
fn add_row(column: &mut [u32], row: &[u32]) {
    for (c, &s) in column.iter_mut().zip(row) {
        *c += s;
    }
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into roughly `tiles × tiles` regions. Each region's
/// histogram is clipped at `max(1, clip_limit × area / 256)`, the excess is
/// spread evenly over all bins, and the resulting mapping is blended
/// bilinearly between neighbouring regions. A `clip_limit` of zero or less
/// disables clipping.
pub fn clahe(image: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tile_w = width.div_ceil(tiles.clamp(1, width));
    let tile_h = height.div_ceil(tiles.clamp(1, height));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            luts.push(tile_lut(image, (x0, y0, x1, y1), clip_limit));
        }
    }
    let lut_at = |tx: usize, ty: usize| &luts[ty * tiles_x as usize + tx];

    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;

    GrayImage::from_fn(width, height, |x, y| {
        let v = image.get_pixel(x, y)[0] as usize;

        let (tx0, tx1, xa) = neighbours(x as f32 * inv_tw - 0.5, tiles_x);
        let (ty0, ty1, ya) = neighbours(y as f32 * inv_th - 0.5, tiles_y);

        let top = lut_at(tx0, ty0)[v] as f32 * (1.0 - xa) + lut_at(tx1, ty0)[v] as f32 * xa;
        let bottom = lut_at(tx0, ty1)[v] as f32 * (1.0 - xa) + lut_at(tx1, ty1)[v] as f32 * xa;
        let out = top * (1.0 - ya) + bottom * ya;
        Luma([out.round().clamp(0.0, 255.0) as u8])
    })
}

/// Indices of the two tiles around a fractional tile coordinate, plus the
/// blend factor towards the second.
fn neighbours(pos: f32, count: u32) -> (usize, usize, f32) {
    let first = pos.floor();
    let frac = pos - first;
    let last = count as i64 - 1;
    let a = (first as i64).clamp(0, last) as usize;
    let b = (first as i64 + 1).clamp(0, last) as usize;
    (a, b, frac)
}

fn tile_lut(
    image: &GrayImage,
    (x0, y0, x1, y1): (u32, u32, u32, u32),
    clip_limit: f32,
) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[image.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let area = (x1 - x0) * (y1 - y0);

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }

        let spread = excess / 256;
        let mut residual = excess % 256;
        for bin in hist.iter_mut() {
            *bin += spread;
        }
        if residual > 0 {
            let step = (256 / residual).max(1) as usize;
            for bin in hist.iter_mut().step_by(step) {
                if residual == 0 {
                    break;
                }
                *bin += 1;
                residual -= 1;
            }
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (value, count) in hist.iter().enumerate() {
        cdf += count;
        lut[value] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([value]))
    }

    #[test]
    fn nl_means_keeps_uniform_image() {
        let img = solid(12, 9, 140);
        assert_eq!(non_local_means(&img, 7.0, 7, 21), img);
    }

    #[test]
    fn nl_means_suppresses_isolated_speckle() {
        let mut img = solid(15, 15, 200);
        img.put_pixel(7, 7, Luma([0]));
        let out = non_local_means(&img, 100.0, 7, 21);
        assert!(out.get_pixel(7, 7)[0] > 150, "speckle survived: {}", out.get_pixel(7, 7)[0]);
        assert!(out.get_pixel(0, 0)[0] > 190);
    }

    #[test]
    fn nl_means_flattens_noise_on_flat_background() {
        let img = GrayImage::from_fn(40, 40, |x, y| {
            Luma([if (x * 7 + y * 13) % 5 == 0 { 190 } else { 200 }])
        });
        let out = non_local_means(&img, 15.0, 7, 21);
        let spread = |g: &GrayImage| {
            let lo = g.pixels().map(|p| p[0]).min().unwrap();
            let hi = g.pixels().map(|p| p[0]).max().unwrap();
            hi - lo
        };
        assert!(spread(&out) < spread(&img), "spread {}", spread(&out));
    }

    /// Direct per-pixel evaluation with clamped coordinates.
    fn reference_nl_means(
        img: &GrayImage,
        strength: f64,
        template: i64,
        search: i64,
    ) -> GrayImage {
        let (w, h) = (img.width() as i64, img.height() as i64);
        let at = |x: i64, y: i64| {
            img.get_pixel(x.clamp(0, w - 1) as u32, y.clamp(0, h - 1) as u32)[0] as f64
        };
        let (tr, sr) = (template / 2, search / 2);
        let area = ((2 * tr + 1) * (2 * tr + 1)) as f64;
        GrayImage::from_fn(img.width(), img.height(), |x, y| {
            let (x, y) = (x as i64, y as i64);
            let (mut weights, mut values) = (0.0, 0.0);
            for dy in -sr..=sr {
                for dx in -sr..=sr {
                    let mut sum = 0.0;
                    for ky in -tr..=tr {
                        for kx in -tr..=tr {
                            let d = at(x + kx, y + ky) - at(x + dx + kx, y + dy + ky);
                            sum += d * d;
                        }
                    }
                    let weight = (-sum / area / (strength * strength)).exp();
                    weights += weight;
                    values += weight * at(x + dx, y + dy);
                }
            }
            Luma([(values / weights).round() as u8])
        })
    }

    #[test]
    fn nl_means_matches_direct_evaluation_across_bands() {
        // Taller than one band so several workers share the image.
        let img = GrayImage::from_fn(11, 70, |x, y| Luma([((x * 31 + y * 17) % 256) as u8]));
        let fast = non_local_means(&img, 40.0, 5, 7);
        let slow = reference_nl_means(&img, 40.0, 5, 7);
        for (x, y, p) in fast.enumerate_pixels() {
            let expected = slow.get_pixel(x, y)[0];
            assert!(p[0].abs_diff(expected) <= 1, "({x},{y}): {} vs {expected}", p[0]);
        }
    }

    #[test]
    #[cfg_attr(debug_assertions, ignore = "timing only holds in optimized builds")]
    fn nl_means_megapixel_finishes_quickly() {
        let img = GrayImage::from_fn(1000, 1000, |x, y| {
            Luma([if (x / 4 + y / 9) % 3 == 0 { 40 } else { 210 }])
        });
        let started = std::time::Instant::now();
        let out = non_local_means(&img, 7.0, 7, 21);
        let elapsed = started.elapsed();
        assert_eq!(out.dimensions(), (1000, 1000));
        assert!(elapsed.as_secs() < 10, "1 MP denoise took {elapsed:?}");
    }

    #[test]
    fn replicated_padding_copies_edges() {
        let img = GrayImage::from_fn(2, 2, |x, y| Luma([(1 + x + 2 * y) as u8]));
        let padded = pad_replicate(&img, 1);
        assert_eq!(padded, vec![1, 1, 2, 2, 1, 1, 2, 2, 3, 3, 4, 4, 3, 3, 4, 4]);
    }

    #[test]
    fn patch_weights_match_exponential() {
        let weights = PatchWeights::new(49, 7.0);
        assert_eq!(weights.weight(0), 1.0);
        let expected = (-(4802.0f64) / (49.0 * 49.0)).exp() as f32;
        assert!((weights.weight(4802) - expected).abs() < 1e-6);
        assert_eq!(weights.weight(u32::MAX), 0.0);

        let wide = PatchWeights::new(49, 100.0);
        assert!(wide.weight(u32::MAX / 2) >= 0.0);
        assert!(wide.weight(3_000_000) > 0.0);
    }

    #[test]
    fn nl_means_zero_strength_is_identity() {
        let img = GrayImage::from_fn(8, 8, |x, y| Luma([(x * 30 + y) as u8]));
        assert_eq!(non_local_means(&img, 0.0, 7, 21), img);
    }

    #[test]
    fn clahe_stretches_low_contrast_gradient() {
        let img = GrayImage::from_fn(64, 16, |x, _| Luma([100 + (x / 2) as u8]));
        let out = clahe(&img, 2.0, 1);
        let min = out.pixels().map(|p| p[0]).min().unwrap();
        let max = out.pixels().map(|p| p[0]).max().unwrap();
        assert!(max - min > 31, "range {min}..{max}");
    }

    #[test]
    fn clahe_preserves_ordering_within_tile() {
        let img = GrayImage::from_fn(32, 4, |x, _| Luma([50 + x as u8]));
        let out = clahe(&img, 2.0, 1);
        for x in 1..32 {
            assert!(out.get_pixel(x, 0)[0] >= out.get_pixel(x - 1, 0)[0]);
        }
    }

    #[test]
    fn clahe_handles_more_tiles_than_pixels() {
        let img = GrayImage::from_fn(3, 5, |x, y| Luma([(x * 40 + y * 10) as u8]));
        let out = clahe(&img, 2.0, 8);
        assert_eq!(out.dimensions(), (3, 5));
    }

    #[test]
    fn clahe_is_deterministic() {
        let img = GrayImage::from_fn(40, 40, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]));
        assert_eq!(clahe(&img, 2.0, 8), clahe(&img, 2.0, 8));
    }

    #[test]
    fn empty_images_pass_through() {
        let img = GrayImage::new(0, 0);
        assert_eq!(non_local_means(&img, 7.0, 7, 21).dimensions(), (0, 0));
        assert_eq!(clahe(&img, 2.0, 8).dimensions(), (0, 0));
    }
}
