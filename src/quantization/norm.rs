//! 8-bit uniform scalar quantizer for row norms.

use std::io::{Read, Write};

use crate::error::Result;
use crate::persistence::codec;

const LEVELS: f32 = 255.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormQuantizer {
    min: f32,
    max: f32,
}

impl NormQuantizer {
    /// Range fitted to `norms`.
    pub fn fit(norms: &[f32]) -> Self {
        let (min, max) = norms
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &n| {
                (lo.min(n), hi.max(n))
            });
        if norms.is_empty() {
            return Self { min: 0.0, max: 0.0 };
        }
        Self { min, max }
    }

    pub fn encode(&self, x: f32) -> u8 {
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0;
        }
        (((x - self.min) / span).clamp(0.0, 1.0) * LEVELS).round() as u8
    }

    pub fn decode(&self, code: u8) -> f32 {
        self.min + (self.max - self.min) * code as f32 / LEVELS
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        codec::write_f32(writer, self.min)?;
        codec::write_f32(writer, self.max)
    }

    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            min: codec::read_f32(reader, "norm range")?,
            max: codec::read_f32(reader, "norm range")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_exact() {
        let q = NormQuantizer::fit(&[0.5, 2.0, 1.0]);
        assert_eq!(q.decode(q.encode(0.5)), 0.5);
        assert_eq!(q.decode(q.encode(2.0)), 2.0);
        let mid = q.decode(q.encode(1.0));
        assert!((mid - 1.0).abs() <= 1.5 / 255.0);
    }

    #[test]
    fn constant_norms_decode_to_the_constant() {
        let q = NormQuantizer::fit(&[3.0, 3.0]);
        assert_eq!(q.decode(q.encode(3.0)), 3.0);
    }
}
