// SPDX-License-Identifier: GPL-3.0-only

//! Standalone file tools built on the frame transforms
//!
//! Both tools read a PPM or PGM file, transform every sample and write the
//! result with the input's header comments (the capture timestamp) intact.

use std::path::Path;

use tracing::info;

use super::ppm::{self, PnmImage};
use super::transform::{self, Brightness};
use crate::errors::{PipelineError, PipelineResult};

/// Brighten `input` with gain `alpha` and bias `beta`, saving to `output`
///
/// Returns the number of bytes written.
pub fn brighten_file(input: &Path, output: &Path, alpha: f64, beta: u8) -> PipelineResult<usize> {
    if !alpha.is_finite() || alpha < 0.0 {
        return Err(PipelineError::Config(format!(
            "alpha must be a non-negative number, got {}",
            alpha
        )));
    }

    let mut image = ppm::read_pnm(input)?;
    Brightness::new(alpha, beta).apply_in_place(&mut image.data);
    let written = save(output, &image)?;
    info!(input = %input.display(), output = %output.display(), alpha, beta, "Brightened image");
    Ok(written)
}

/// Write the negative of `input` to `output`
pub fn negative_file(input: &Path, output: &Path) -> PipelineResult<usize> {
    let mut image = ppm::read_pnm(input)?;
    let mut inverted = vec![0; image.data.len()];
    transform::negative_into(&image.data, &mut inverted)?;
    image.data = inverted;
    let written = save(output, &image)?;
    info!(input = %input.display(), output = %output.display(), "Wrote negative image");
    Ok(written)
}

fn save(output: &Path, image: &PnmImage) -> PipelineResult<usize> {
    ppm::write_frame(output, image.header().as_bytes(), &image.data)
}
