//! Stochastic-depth rates across the blocks of all stages.

/// `count` evenly spaced values from `start` to `end` inclusive; a single value is `start`.
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Linearly increasing drop-path rates over the concatenated depths, sliced per stage.
#[derive(Debug, Clone)]
pub struct DropPathSchedule {
    rates: Vec<f64>,
    depths: Vec<usize>,
}

impl DropPathSchedule {
    pub fn new(drop_path_rate: f64, depths: &[usize]) -> Self {
        Self {
            rates: linspace(0.0, drop_path_rate, depths.iter().sum()),
            depths: depths.to_vec(),
        }
    }

    /// All rates, one per block.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// Rates for the blocks of `stage`.
    ///
    /// # Panics
    /// If `stage` is out of range.
    pub fn stage(&self, stage: usize) -> &[f64] {
        let start: usize = self.depths[..stage].iter().sum();
        &self.rates[start..start + self.depths[stage]]
    }
}
