use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Seed used for the default palette so colors stay stable across runs.
pub const DEFAULT_PALETTE_SEED: u64 = 10101;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// OpenCV scalars are BGR ordered.
    pub fn to_bgr_scalar(self) -> opencv::core::Scalar {
        opencv::core::Scalar::new(self.2 as f64, self.1 as f64, self.0 as f64, 0.0)
    }
}

/// One color per class index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorPalette {
    colors: Vec<Rgb>,
}

impl ColorPalette {
    /// Evenly spaced hues at full saturation and value, shuffled with `seed` so
    /// neighbouring class indices do not get neighbouring hues.
    pub fn generate(num_classes: usize, seed: u64) -> Self {
        let mut colors: Vec<Rgb> = (0..num_classes)
            .map(|i| hsv_to_rgb(i as f32 / num_classes as f32, 1.0, 1.0))
            .map(|(r, g, b)| Rgb(to_u8(r), to_u8(g), to_u8(b)))
            .collect();

        let mut rng = StdRng::seed_from_u64(seed);
        colors.shuffle(&mut rng);

        Self { colors }
    }

    pub fn color(&self, class_index: usize) -> Option<Rgb> {
        self.colors.get(class_index).copied()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

fn to_u8(channel: f32) -> u8 {
    (channel * 255.0) as u8
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (v, v, v);
    }
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as i32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}
