use image::RgbImage;

// Catmull-Rom flavoured cubic, the same kernel PIL calls "bicubic".
const KERNEL_A: f32 = -0.5;

fn cubic_weight(x: f32) -> f32 {
    let x = x.abs();
    if x < 1.0 {
        ((KERNEL_A + 2.0) * x - (KERNEL_A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        (((x - 5.0) * x + 8.0) * x - 4.0) * KERNEL_A
    } else {
        0.0
    }
}

/// Precomputed sampling window for one output coordinate along one axis.
struct TapSet {
    start: usize,
    weights: Vec<f32>,
}

fn axis_taps(src_len: usize, dst_len: usize) -> Vec<TapSet> {
    let scale = src_len as f32 / dst_len as f32;
    // Widen the kernel footprint when minifying.
    let filter_scale = scale.max(1.0);
    let support = 2.0 * filter_scale;

    let mut taps = Vec::with_capacity(dst_len);
    for out in 0..dst_len {
        let center = (out as f32 + 0.5) * scale;
        let lo = ((center - support).floor().max(0.0)) as usize;
        let hi = ((center + support).ceil() as usize).min(src_len);
        let lo = lo.min(src_len - 1);
        let hi = hi.max(lo + 1);

        let mut weights = Vec::with_capacity(hi - lo);
        let mut total = 0.0f32;
        for src in lo..hi {
            let w = cubic_weight((src as f32 + 0.5 - center) / filter_scale);
            weights.push(w);
            total += w;
        }
        if total != 0.0 {
            for w in &mut weights {
                *w /= total;
            }
        }
        taps.push(TapSet { start: lo, weights });
    }
    taps
}

/// Separable bicubic resize of an RGB image, accumulating in f32.
pub fn resize_bicubic(source: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = (source.width() as usize, source.height() as usize);
    let (dst_w, dst_h) = (width as usize, height as usize);
    if dst_w == 0 || dst_h == 0 || src_w == 0 || src_h == 0 {
        return RgbImage::new(width, height);
    }

    let x_taps = axis_taps(src_w, dst_w);
    let y_taps = axis_taps(src_h, dst_h);
    let src = source.as_raw();

    // Horizontal pass, keeping f32 until the final rounding.
    let mut mid = vec![0.0f32; src_h * dst_w * 3];
    for y in 0..src_h {
        let row = y * src_w * 3;
        for (x, tap) in x_taps.iter().enumerate() {
            let mut acc = [0.0f32; 3];
            for (k, &w) in tap.weights.iter().enumerate() {
                let p = row + (tap.start + k) * 3;
                acc[0] += src[p] as f32 * w;
                acc[1] += src[p + 1] as f32 * w;
                acc[2] += src[p + 2] as f32 * w;
            }
            let out = (y * dst_w + x) * 3;
            mid[out..out + 3].copy_from_slice(&acc);
        }
    }

    // Vertical pass.
    let mut dst = vec![0u8; dst_w * dst_h * 3];
    for (y, tap) in y_taps.iter().enumerate() {
        for x in 0..dst_w {
            let mut acc = [0.0f32; 3];
            for (k, &w) in tap.weights.iter().enumerate() {
                let p = ((tap.start + k) * dst_w + x) * 3;
                acc[0] += mid[p] * w;
                acc[1] += mid[p + 1] * w;
                acc[2] += mid[p + 2] * w;
            }
            let out = (y * dst_w + x) * 3;
            for c in 0..3 {
                dst[out + c] = (acc[c] + 0.5).clamp(0.0, 255.0) as u8;
            }
        }
    }

    RgbImage::from_raw(width, height, dst).expect("resized buffer matches target dimensions")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn identity_resize_preserves_pixels() {
        let mut img = RgbImage::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                img.put_pixel(x, y, Rgb([(x * 50) as u8, (y * 50) as u8, 7]));
            }
        }
        let out = resize_bicubic(&img, 4, 4);
        assert_eq!(img.as_raw(), out.as_raw());
    }

    #[test]
    fn constant_image_stays_constant() {
        let img = RgbImage::from_pixel(10, 6, Rgb([120, 33, 250]));
        let out = resize_bicubic(&img, 5, 3);
        assert!(out.pixels().all(|p| *p == Rgb([120, 33, 250])));
    }

    #[test]
    fn upscale_has_target_dimensions() {
        let img = RgbImage::from_pixel(3, 5, Rgb([1, 2, 3]));
        let out = resize_bicubic(&img, 9, 10);
        assert_eq!((out.width(), out.height()), (9, 10));
    }
}
