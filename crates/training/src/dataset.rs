//! Toy particle-physics images: straight tracks with kinks and one
//! electromagnetic-shower-like fan of rays per image.

use data_contracts::{GtPixel, ImageBlob, ImageTensor, PointClass};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use vision_core::interfaces::BlobSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToyDataConfig {
    pub max_tracks: usize,
    pub max_kinks: usize,
    /// Longest track segment in pixels; a quarter of the image when unset.
    pub max_track_length: Option<f32>,
    /// Ground-truth points stay this far from the image border.
    pub padding: usize,
    pub shower_rays: usize,
    /// Half opening angle of the shower fan, radians.
    pub shower_opening: f32,
    pub shower_min_length: f32,
    pub shower_max_length: f32,
    /// Probability that a pixel along a shower ray is deposited.
    pub shower_keep_prob: f64,
    pub seed: u64,
}

impl Default for ToyDataConfig {
    fn default() -> Self {
        Self {
            max_tracks: 5,
            max_kinks: 2,
            max_track_length: None,
            padding: 5,
            shower_rays: 10,
            shower_opening: 0.3,
            shower_min_length: 40.0,
            shower_max_length: 127.0,
            shower_keep_prob: 0.6,
            seed: 123,
        }
    }
}

pub struct ToyDataGenerator {
    size: usize,
    cfg: ToyDataConfig,
    rng: StdRng,
}

impl ToyDataGenerator {
    /// Fails when the padded band leaves no room for points.
    pub fn new(size: usize, cfg: ToyDataConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            size > 2 * cfg.padding,
            "toy image size {size} leaves no room inside a padding of {}",
            cfg.padding
        );
        let rng = StdRng::seed_from_u64(cfg.seed);
        Ok(Self { size, cfg, rng })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn generate(&mut self) -> ImageBlob {
        let mut canvas = vec![0.0f32; self.size * self.size];
        let mut gt_pixels = Vec::new();

        let start = self.random_point();
        self.draw_shower(&mut canvas, start);
        gt_pixels.push(GtPixel::new(start.to_vec(), PointClass::ShowerStart));

        let tracks = self.rng.random_range(1..=self.cfg.max_tracks.max(1));
        for _ in 0..tracks {
            let (first, last) = self.draw_track(&mut canvas);
            gt_pixels.push(GtPixel::new(first.to_vec(), PointClass::TrackEdge));
            gt_pixels.push(GtPixel::new(last.to_vec(), PointClass::TrackEdge));
        }

        let values = canvas.iter().flat_map(|&v| [v, v, v]).collect();
        let data = ImageTensor {
            shape: vec![1, self.size, self.size, 3],
            values,
        };
        ImageBlob::new(data, gt_pixels)
    }

    fn lo(&self) -> f32 {
        self.cfg.padding as f32
    }

    fn hi(&self) -> f32 {
        (self.size - 1 - self.cfg.padding) as f32
    }

    fn random_point(&mut self) -> [f32; 2] {
        let (lo, hi) = (self.lo(), self.hi());
        [
            self.rng.random_range(lo..=hi).floor(),
            self.rng.random_range(lo..=hi).floor(),
        ]
    }

    fn clamp_point(&self, p: [f32; 2]) -> [f32; 2] {
        p.map(|v| v.clamp(self.lo(), self.hi()).floor())
    }

    /// Polyline of `1 + kinks` segments; returns its two ends.
    fn draw_track(&mut self, canvas: &mut [f32]) -> ([f32; 2], [f32; 2]) {
        let max_len = self
            .cfg
            .max_track_length
            .unwrap_or(self.size as f32 / 4.0)
            .max(2.0);
        let first = self.random_point();
        let kinks = self.rng.random_range(0..=self.cfg.max_kinks);
        let mut angle = self.rng.random_range(0.0..2.0 * PI);
        let mut at = first;
        for _ in 0..=kinks {
            let length = self.rng.random_range(1.0..=max_len);
            let next = self.clamp_point([at[0] + length * angle.sin(), at[1] + length * angle.cos()]);
            draw_line(canvas, self.size, at, next, |_| Some(1.0));
            at = next;
            angle += self.rng.random_range(-PI / 3.0..PI / 3.0);
        }
        (first, at)
    }

    fn draw_shower(&mut self, canvas: &mut [f32], start: [f32; 2]) {
        let axis = self.rng.random_range(0.0..2.0 * PI);
        for _ in 0..self.cfg.shower_rays {
            let spread = self.cfg.shower_opening.abs();
            let angle = axis + if spread > 0.0 { self.rng.random_range(-spread..=spread) } else { 0.0 };
            let length = self
                .rng
                .random_range(self.cfg.shower_min_length..=self.cfg.shower_max_length.max(self.cfg.shower_min_length));
            let end = [start[0] + length * angle.sin(), start[1] + length * angle.cos()];
            let keep = self.cfg.shower_keep_prob.clamp(0.0, 1.0);
            let rng = &mut self.rng;
            draw_line(canvas, self.size, start, end, |step| {
                (step == 0 || rng.random_bool(keep)).then(|| rng.random_range(0.5..=1.0))
            });
        }
    }
}

impl BlobSource for ToyDataGenerator {
    fn forward(&mut self) -> anyhow::Result<ImageBlob> {
        Ok(self.generate())
    }
}

/// Walks from `from` to `to` one pixel at a time, keeping the brightest deposit
/// per pixel. Pixels outside the canvas are skipped.
fn draw_line(
    canvas: &mut [f32],
    size: usize,
    from: [f32; 2],
    to: [f32; 2],
    mut deposit: impl FnMut(usize) -> Option<f32>,
) {
    let delta = [to[0] - from[0], to[1] - from[1]];
    let steps = delta[0].abs().max(delta[1].abs()).ceil() as usize;
    for step in 0..=steps {
        let t = if steps == 0 { 0.0 } else { step as f32 / steps as f32 };
        let row = (from[0] + t * delta[0]).round();
        let col = (from[1] + t * delta[1]).round();
        if row < 0.0 || col < 0.0 || row >= size as f32 || col >= size as f32 {
            continue;
        }
        if let Some(value) = deposit(step) {
            let cell = &mut canvas[row as usize * size + col as usize];
            *cell = cell.max(value);
        }
    }
}
