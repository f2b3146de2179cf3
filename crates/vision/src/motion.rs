//! Inter-frame motion estimation.
//!
//! A cheap optical-flow proxy: frames are reduced to a coarse luma grid and
//! the per-cell absolute difference against the previous processed frame is
//! scaled into an activity score. The violence detector reads the mean
//! activity inside the union of a candidate pair's bounding boxes.

use common::{BoundingBox, Frame};

const DEFAULT_CELL: u32 = 8;
const DEFAULT_GAIN: f32 = 10.0;

/// Per-frame motion activity grid.
#[derive(Debug, Clone)]
pub struct MotionMap {
    grid_w: u32,
    grid_h: u32,
    cell: u32,
    cells: Vec<f32>,
    uniform: Option<f32>,
}

impl MotionMap {
    /// Map with no motion anywhere (first frame, or no previous frame).
    pub fn zero() -> Self {
        Self::uniform(0.0)
    }

    /// Map reporting the same activity for any region. Test hook and
    /// first-frame placeholder.
    pub fn uniform(value: f32) -> Self {
        Self {
            grid_w: 0,
            grid_h: 0,
            cell: DEFAULT_CELL,
            cells: Vec::new(),
            uniform: Some(value),
        }
    }

    /// Mean activity inside a bounding box, in the same units as the
    /// configured motion threshold.
    pub fn magnitude(&self, bbox: &BoundingBox) -> f32 {
        if let Some(value) = self.uniform {
            return value;
        }
        if self.grid_w == 0 || self.grid_h == 0 {
            return 0.0;
        }

        let gx1 = ((bbox.x1 / self.cell as f32).floor().max(0.0) as u32).min(self.grid_w - 1);
        let gy1 = ((bbox.y1 / self.cell as f32).floor().max(0.0) as u32).min(self.grid_h - 1);
        let gx2 = ((bbox.x2 / self.cell as f32).ceil().max(0.0) as u32).min(self.grid_w);
        let gy2 = ((bbox.y2 / self.cell as f32).ceil().max(0.0) as u32).min(self.grid_h);
        if gx2 <= gx1 || gy2 <= gy1 {
            return 0.0;
        }

        let mut total = 0.0f32;
        let mut count = 0u32;
        for gy in gy1..gy2 {
            for gx in gx1..gx2 {
                total += self.cells[(gy * self.grid_w + gx) as usize];
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            total / count as f32
        }
    }
}

/// Running motion estimator owned by one unified detector.
pub struct MotionEstimator {
    cell: u32,
    gain: f32,
    prev: Option<(u32, u32, Vec<f32>)>,
}

impl MotionEstimator {
    pub fn new() -> Self {
        Self {
            cell: DEFAULT_CELL,
            gain: DEFAULT_GAIN,
            prev: None,
        }
    }

    /// Fold the next processed frame in and return its motion map.
    pub fn update(&mut self, frame: &Frame) -> MotionMap {
        let grid_w = frame.width().div_ceil(self.cell);
        let grid_h = frame.height().div_ceil(self.cell);
        let grid = self.downsample(frame, grid_w, grid_h);

        let map = match &self.prev {
            Some((pw, ph, prev)) if *pw == grid_w && *ph == grid_h => {
                let cells = grid
                    .iter()
                    .zip(prev.iter())
                    .map(|(cur, old)| (cur - old).abs() * self.gain)
                    .collect();
                MotionMap {
                    grid_w,
                    grid_h,
                    cell: self.cell,
                    cells,
                    uniform: None,
                }
            }
            _ => MotionMap::zero(),
        };

        self.prev = Some((grid_w, grid_h, grid));
        map
    }

    fn downsample(&self, frame: &Frame, grid_w: u32, grid_h: u32) -> Vec<f32> {
        let mut grid = vec![0.0f32; (grid_w * grid_h) as usize];
        for gy in 0..grid_h {
            for gx in 0..grid_w {
                let x1 = gx * self.cell;
                let y1 = gy * self.cell;
                let x2 = (x1 + self.cell).min(frame.width());
                let y2 = (y1 + self.cell).min(frame.height());

                let mut sum = 0.0f32;
                let mut count = 0u32;
                for y in y1..y2 {
                    for x in x1..x2 {
                        let [b, g, r] = frame.pixel(x, y);
                        sum += 0.114 * b as f32 + 0.587 * g as f32 + 0.299 * r as f32;
                        count += 1;
                    }
                }
                if count > 0 {
                    grid[(gy * grid_w + gx) as usize] = sum / count as f32;
                }
            }
        }
        grid
    }
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new()
    }
}
