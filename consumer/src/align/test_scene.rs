use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Overlapping flat rectangles on a mid-grey background; corner-rich and
/// deterministic for a given seed. Scenes narrower or shorter than 10 pixels
/// stay blank.
pub(crate) fn blocks(w: u32, h: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = RgbImage::from_pixel(w, h, Rgb([110, 110, 110]));
    if w < 10 || h < 10 {
        return img;
    }
    // Blocks are at least 8 pixels and at most a fifth of the scene, never
    // wider than the scene minus one column.
    let max_w = (w / 5).clamp(9, w - 1);
    let max_h = (h / 5).clamp(9, h - 1);
    for _ in 0..(w * h / 1200).max(1) {
        let bw = rng.gen_range(8..max_w);
        let bh = rng.gen_range(8..max_h);
        let x0 = rng.gen_range(0..w - bw);
        let y0 = rng.gen_range(0..h - bh);
        let color = Rgb([rng.gen(), rng.gen(), rng.gen()]);
        for y in y0..y0 + bh {
            for x in x0..x0 + bw {
                img.put_pixel(x, y, color);
            }
        }
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_scenes_are_drawn() {
        for (w, h) in [(40, 30), (20, 12), (10, 10), (96, 72)] {
            let img = blocks(w, h, 8);
            assert_eq!(img.dimensions(), (w, h));
            assert!(img.pixels().any(|p| p.0 != [110, 110, 110]), "{w}x{h} has no blocks");
        }
    }

    #[test]
    fn tiny_scene_stays_blank() {
        let img = blocks(6, 40, 1);
        assert!(img.pixels().all(|p| p.0 == [110, 110, 110]));
    }

    #[test]
    fn same_seed_same_scene() {
        assert_eq!(blocks(64, 48, 4), blocks(64, 48, 4));
    }
}
