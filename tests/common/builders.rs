//! Test data builders for frames and graphs

use tomoflow::pipeline::{Buffer, Dims};

/// Builder for host-resident test frames
pub struct FrameBuilder {
    width: usize,
    height: usize,
    fill: Fill,
}

enum Fill {
    Constant(f32),
    /// `value = row * width + col`
    Index,
}

impl FrameBuilder {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            fill: Fill::Index,
        }
    }

    pub fn constant(mut self, value: f32) -> Self {
        self.fill = Fill::Constant(value);
        self
    }

    pub fn indexed(mut self) -> Self {
        self.fill = Fill::Index;
        self
    }

    pub fn data(&self) -> Vec<f32> {
        let len = self.width * self.height;
        match self.fill {
            Fill::Constant(v) => vec![v; len],
            Fill::Index => (0..len).map(|i| i as f32).collect(),
        }
    }

    pub fn build(self) -> Buffer {
        let data = self.data();
        Buffer::from_vec(Dims::d2(self.width, self.height), data)
            .expect("builder produces consistent dims")
    }
}

/// Row-major crop of `data` (a `width`-wide frame), used as the reference result.
pub fn reference_crop(
    data: &[f32],
    width: usize,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
) -> Vec<f32> {
    let mut out = Vec::with_capacity(w * h);
    for row in y..y + h {
        out.extend_from_slice(&data[row * width + x..row * width + x + w]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder() {
        let frame = FrameBuilder::new(3, 2).build();
        assert_eq!(frame.dims().as_slice(), &[3, 2]);
        assert_eq!(frame.try_host().unwrap()[5], 5.0);
    }

    #[test]
    fn test_reference_crop() {
        let data = FrameBuilder::new(4, 4).data();
        assert_eq!(reference_crop(&data, 4, 1, 1, 2, 2), vec![5.0, 6.0, 9.0, 10.0]);
    }
}
