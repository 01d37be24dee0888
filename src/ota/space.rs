// Free-space guard for incoming firmware images.

use super::OtaError;

/// Safety margin applied on top of the declared image size.
const DEFAULT_MARGIN: f64 = 0.10;

#[derive(Debug, Clone, Copy)]
pub struct SpaceGuard {
    margin: f64,
}

impl Default for SpaceGuard {
    fn default() -> Self {
        Self {
            margin: DEFAULT_MARGIN,
        }
    }
}

impl SpaceGuard {
    /// Free bytes required before an image of `size` bytes is accepted.
    pub fn required(&self, size: u64) -> u64 {
        (size as f64 * (1.0 + self.margin)).ceil() as u64
    }

    pub fn check(&self, size: u64, free: u64) -> Result<(), OtaError> {
        let needed = self.required(size);
        if free < needed {
            return Err(OtaError::InsufficientSpace { needed, free });
        }
        Ok(())
    }
}
