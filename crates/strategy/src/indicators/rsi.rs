/// Wilder-smoothed relative strength index over closed 1-minute bars.
///
/// The first `period` deltas seed the running up/down averages; every later
/// delta is folded in with Wilder's `1/period` weighting, so a value only
/// appears once `period + 1` closes exist.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
}

impl RsiIndicator {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self { period }
    }

    /// RSI in `[0, 100]` for `closes` (oldest first), `None` while the
    /// series is shorter than `period + 1`.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() <= self.period {
            return None;
        }

        let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

        // Seed: plain averages of the first `period` moves
        let mut up = 0.0f64;
        let mut down = 0.0f64;
        for &delta in &deltas[..self.period] {
            if delta > 0.0 {
                up += delta;
            } else {
                down -= delta;
            }
        }
        let mut up = up / self.period as f64;
        let mut down = down / self.period as f64;

        // Wilder smoothing for the rest of the series
        let carry = (self.period - 1) as f64;
        for &delta in &deltas[self.period..] {
            up = (up * carry + delta.max(0.0)) / self.period as f64;
            down = (down * carry + (-delta).max(0.0)) / self.period as f64;
        }

        if up + down == 0.0 {
            // Dead-flat series: no strength either way
            return Some(50.0);
        }
        // Ratio form of 100 - 100/(1 + RS)
        Some(100.0 * up / (up + down))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_period_plus_one_closes() {
        let rsi = RsiIndicator::new(14);
        let closes = vec![100.0; 14];
        assert!(rsi.compute(&closes).is_none());
        let closes = vec![100.0; 15];
        assert!(rsi.compute(&closes).is_some());
    }

    #[test]
    fn uninterrupted_rally_pins_rsi_at_100() {
        let rsi = RsiIndicator::new(3);
        let closes = vec![50.0, 52.0, 55.0, 55.5, 60.0];
        let value = rsi.compute(&closes).unwrap();
        assert!((value - 100.0).abs() < 1e-9, "expected 100, got {value}");
    }

    #[test]
    fn uninterrupted_selloff_pins_rsi_at_0() {
        let rsi = RsiIndicator::new(3);
        let closes = vec![60.0, 55.5, 55.0, 52.0, 50.0];
        let value = rsi.compute(&closes).unwrap();
        assert!(value.abs() < 1e-9, "expected 0, got {value}");
    }

    #[test]
    fn balanced_chop_sits_between_the_bands() {
        let rsi = RsiIndicator::new(3);
        // Alternating one-point moves either way
        let closes = vec![100.0, 101.0, 100.0, 101.0, 100.0, 101.0, 100.0];
        let value = rsi.compute(&closes).unwrap();
        assert!((30.0..=70.0).contains(&value), "chop should read neutral, got {value}");
    }

    #[test]
    fn flat_series_reads_neutral() {
        let rsi = RsiIndicator::new(3);
        let closes = vec![42.0; 8];
        assert_eq!(rsi.compute(&closes), Some(50.0));
    }
}
