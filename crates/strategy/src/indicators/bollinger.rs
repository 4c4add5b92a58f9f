/// Bollinger Bands: SMA middle band with bands at `k` standard deviations.
/// Returns `None` until `period` values are available.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub period: usize,
    pub k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    pub fn new(period: usize, k: f64) -> Self {
        assert!(period >= 2, "Bollinger period must be >= 2");
        Self { period, k }
    }

    /// Compute the bands over the last `period` closes (oldest first).
    pub fn compute(&self, closes: &[f64]) -> Option<Bands> {
        if closes.len() < self.period {
            return None;
        }
        let window = &closes[closes.len() - self.period..];
        let middle = window.iter().sum::<f64>() / self.period as f64;
        // Population standard deviation, the common charting convention
        let variance =
            window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / self.period as f64;
        let sd = variance.sqrt();
        Some(Bands {
            upper: middle + self.k * sd,
            middle,
            lower: middle - self.k * sd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_return_none_when_insufficient_data() {
        let bb = BollingerBands::new(20, 2.0);
        assert!(bb.compute(&vec![100.0; 19]).is_none());
    }

    #[test]
    fn flat_series_collapses_the_bands() {
        let bb = BollingerBands::new(5, 2.0);
        let bands = bb.compute(&vec![50.0; 5]).unwrap();
        assert!((bands.upper - 50.0).abs() < 1e-9);
        assert!((bands.lower - 50.0).abs() < 1e-9);
    }

    #[test]
    fn bands_are_symmetric_around_the_middle() {
        let bb = BollingerBands::new(4, 2.0);
        let bands = bb.compute(&[10.0, 12.0, 14.0, 16.0]).unwrap();
        assert!((bands.middle - 13.0).abs() < 1e-9);
        assert!(((bands.upper - bands.middle) - (bands.middle - bands.lower)).abs() < 1e-9);
        assert!(bands.upper > bands.middle && bands.middle > bands.lower);
    }
}
