//! Depth target and the hierarchical depth pyramid built from it.
//!
//! Depth is reverse-Z: 1 at the near plane, 0 at infinity. Each HZB texel
//! stores the minimum (farthest) depth under it, so a sphere whose nearest
//! depth is below that value is hidden behind everything in the texel.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

pub struct DepthBuffer {
    width: u32,
    height: u32,
    texels: Vec<AtomicU32>,
}

impl DepthBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let count = width as usize * height as usize;
        Self { width, height, texels: (0..count).map(|_| AtomicU32::new(0)).collect() }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Resets every texel to the far value.
    pub fn clear(&self) {
        self.fill(0.0);
    }

    pub fn fill(&self, depth: f32) {
        let bits = depth.max(0.0).to_bits();
        self.texels.par_iter().for_each(|t| t.store(bits, Ordering::Relaxed));
    }

    /// Depth test and write in one step; nearer (larger) depth wins.
    ///
    /// Non-negative floats order the same as their bit patterns, so the
    /// comparison can run on the integer representation.
    #[inline]
    pub fn write(&self, x: u32, y: u32, depth: f32) -> bool {
        let i = y as usize * self.width as usize + x as usize;
        let bits = depth.max(0.0).to_bits();
        self.texels[i].fetch_max(bits, Ordering::Relaxed) < bits
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        f32::from_bits(self.texels[y as usize * self.width as usize + x as usize].load(Ordering::Relaxed))
    }

    /// Minimum depth over `[x0, x1) x [y0, y1)`.
    fn min_in(&self, x0: u32, x1: u32, y0: u32, y1: u32) -> f32 {
        let mut m = f32::INFINITY;
        for y in y0..y1 {
            let row = y as usize * self.width as usize;
            for x in x0..x1 {
                m = m.min(f32::from_bits(self.texels[row + x as usize].load(Ordering::Relaxed)));
            }
        }
        m
    }
}

pub struct Hzb {
    size: u32,
    mips: Vec<Vec<f32>>,
}

impl Hzb {
    /// Square pyramid whose base is the next power of two covering `width`
    /// and `height`. Starts out all far, so it occludes nothing.
    pub fn new(width: u32, height: u32) -> Self {
        let size = width.max(height).max(1).next_power_of_two();
        let mips = (0..=size.trailing_zeros())
            .map(|level| {
                let s = (size >> level) as usize;
                vec![0.0; s * s]
            })
            .collect();
        Self { size, mips }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mip_count(&self) -> u32 {
        self.mips.len() as u32
    }

    pub fn level_size(&self, level: u32) -> u32 {
        (self.size >> level).max(1)
    }

    pub fn mip(&self, level: u32) -> &[f32] {
        &self.mips[level as usize]
    }

    /// Rebuilds every mip from `depth`.
    pub fn build(&mut self, depth: &DepthBuffer) {
        let size = self.size as u64;
        let row_len = self.size as usize;
        let (w, h) = (depth.width() as u64, depth.height() as u64);

        if w > 0 && h > 0 {
            // mip 0: 每个 texel 覆盖深度图的一块区域，取最小值
            self.mips[0].par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
                let y = y as u64;
                let y0 = (y * h / size).min(h - 1);
                let y1 = ((y + 1) * h).div_ceil(size).clamp(y0 + 1, h);
                for (x, texel) in row.iter_mut().enumerate() {
                    let x = x as u64;
                    let x0 = (x * w / size).min(w - 1);
                    let x1 = ((x + 1) * w).div_ceil(size).clamp(x0 + 1, w);
                    *texel = depth.min_in(x0 as u32, x1 as u32, y0 as u32, y1 as u32);
                }
            });
        }

        for level in 1..self.mips.len() {
            let (prev, rest) = self.mips.split_at_mut(level);
            let src = &prev[level - 1];
            let src_size = row_len >> (level - 1);
            let dst_size = src_size / 2;
            rest[0].par_chunks_mut(dst_size).enumerate().for_each(|(y, row)| {
                for (x, texel) in row.iter_mut().enumerate() {
                    let i = 2 * y * src_size + 2 * x;
                    *texel = src[i].min(src[i + 1]).min(src[i + src_size]).min(src[i + src_size + 1]);
                }
            });
        }
    }

    /// Minimum over the inclusive texel rectangle at `level`, clamped to the mip.
    pub fn sample_min(&self, level: u32, x0: i64, y0: i64, x1: i64, y1: i64) -> f32 {
        let level = level.min(self.mip_count() - 1);
        let s = self.level_size(level) as i64;
        let (x0, x1) = (x0.clamp(0, s - 1), x1.clamp(0, s - 1));
        let (y0, y1) = (y0.clamp(0, s - 1), y1.clamp(0, s - 1));
        let mip = &self.mips[level as usize];
        let mut m = f32::INFINITY;
        for y in y0..=y1 {
            for x in x0..=x1 {
                m = m.min(mip[(y * s + x) as usize]);
            }
        }
        m
    }
}
