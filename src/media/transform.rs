// SPDX-License-Identifier: GPL-3.0-only

//! Per-byte transforms applied after conversion

use crate::errors::{PipelineError, PipelineResult};

/// Linear brightness adjustment: `min(round(x * alpha) + beta, 255)`
///
/// The mapping is evaluated once per input value into a lookup table, so the
/// per-frame cost is one indexed load per byte.
#[derive(Clone)]
pub struct Brightness {
    alpha: f64,
    beta: u8,
    table: [u8; 256],
}

impl Brightness {
    pub fn new(alpha: f64, beta: u8) -> Self {
        let mut table = [0u8; 256];
        for (x, out) in table.iter_mut().enumerate() {
            let scaled = (x as f64 * alpha).round().max(0.0);
            *out = (scaled + beta as f64).min(255.0) as u8;
        }
        Self { alpha, beta, table }
    }

    #[inline]
    pub fn apply(&self, x: u8) -> u8 {
        self.table[x as usize]
    }

    /// Transform `src` into the front of `dst`
    pub fn apply_into(&self, src: &[u8], dst: &mut [u8]) -> PipelineResult<usize> {
        let dst_len = dst.len();
        let out = dst.get_mut(..src.len()).ok_or_else(|| {
            PipelineError::InputContract(format!(
                "transform output holds {} bytes, frame has {}",
                dst_len,
                src.len()
            ))
        })?;
        for (o, &x) in out.iter_mut().zip(src) {
            *o = self.table[x as usize];
        }
        Ok(src.len())
    }

    pub fn apply_in_place(&self, data: &mut [u8]) {
        for x in data.iter_mut() {
            *x = self.table[*x as usize];
        }
    }
}

impl std::fmt::Debug for Brightness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brightness")
            .field("alpha", &self.alpha)
            .field("beta", &self.beta)
            .finish()
    }
}

/// Photographic negative, `255 - x` per byte
pub fn negative_into(src: &[u8], dst: &mut [u8]) -> PipelineResult<usize> {
    let dst_len = dst.len();
    let out = dst.get_mut(..src.len()).ok_or_else(|| {
        PipelineError::InputContract(format!(
            "negative output holds {} bytes, image has {}",
            dst_len,
            src.len()
        ))
    })?;
    for (o, &x) in out.iter_mut().zip(src) {
        *o = 255 - x;
    }
    Ok(src.len())
}
