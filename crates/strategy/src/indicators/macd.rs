/// MACD crossover detector.
///
/// Tracks the spread between a fast and a slow running EMA and compares it
/// against its own signal-line EMA. Strategies only care about the newest
/// bar, so the result is a crossover direction rather than raw line values.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// Crossover direction on the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdSignal {
    /// Spread crossed above the signal line.
    Bullish,
    /// Spread crossed below the signal line.
    Bearish,
    /// No crossing on this bar.
    Neutral,
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        Self { fast, slow, signal }
    }

    /// Crossover direction for `closes` (oldest first), `None` until
    /// `slow + signal` closes are available.
    pub fn compute(&self, closes: &[f64]) -> Option<MacdSignal> {
        if closes.len() < self.slow + self.signal {
            return None;
        }

        let fast_line = ema_series(closes, self.fast);
        let slow_line = ema_series(closes, self.slow);
        let spread: Vec<f64> = fast_line
            .iter()
            .zip(&slow_line)
            .map(|(fast, slow)| fast - slow)
            .collect();
        let signal_line = ema_series(&spread, self.signal);

        let bars = spread.len();
        if bars < 2 {
            return None;
        }
        let was_above = spread[bars - 2] > signal_line[bars - 2];
        let is_above = spread[bars - 1] > signal_line[bars - 1];

        Some(match (was_above, is_above) {
            (false, true) => MacdSignal::Bullish,
            (true, false) => MacdSignal::Bearish,
            _ => MacdSignal::Neutral,
        })
    }
}

/// Running EMA over the whole series, seeded on the first value.
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let Some(&first) = values.first() else {
        return Vec::new();
    };
    let alpha = 2.0 / (period as f64 + 1.0);

    let mut out = Vec::with_capacity(values.len());
    let mut current = first;
    out.push(current);
    for &value in &values[1..] {
        current = value * alpha + current * (1.0 - alpha);
        out.push(current);
    }
    out
}
