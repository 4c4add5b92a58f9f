use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::warn;

/// Escalation decided by [`DailyLossTracker::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossAction {
    /// Within limits.
    None,
    /// Emergency-stop threshold crossed; notify once, keep trading.
    Emergency,
    /// Daily loss limit breached; close everything, refuse opens until the
    /// next UTC day.
    Halt,
}

#[derive(Debug)]
struct DayState {
    day: NaiveDate,
    realized: Decimal,
    emergency_notified: bool,
    halted: bool,
}

/// Tracks realized P&L per UTC day against the configured capital base and
/// escalates when losses cross the emergency / hard-halt thresholds.
///
/// The halt clears itself at the UTC day rollover.
#[derive(Debug)]
pub struct DailyLossTracker {
    initial_capital: Decimal,
    emergency_stop_pct: Decimal,
    max_daily_loss_pct: Decimal,
    state: Mutex<DayState>,
}

impl DailyLossTracker {
    pub fn new(
        initial_capital: Decimal,
        emergency_stop_pct: Decimal,
        max_daily_loss_pct: Decimal,
    ) -> Self {
        Self {
            initial_capital,
            emergency_stop_pct,
            max_daily_loss_pct,
            state: Mutex::new(DayState {
                day: Utc::now().date_naive(),
                realized: Decimal::ZERO,
                emergency_notified: false,
                halted: false,
            }),
        }
    }

    /// Record a realized P&L and return the escalation it causes.
    pub fn record(&self, pnl: Decimal, now: DateTime<Utc>) -> LossAction {
        let mut state = self.state.lock().unwrap();
        Self::roll_over(&mut state, now);

        state.realized += pnl;
        let loss = -state.realized;
        if loss <= Decimal::ZERO {
            return LossAction::None;
        }

        let halt_at = self.initial_capital * self.max_daily_loss_pct;
        let emergency_at = self.initial_capital * self.emergency_stop_pct;

        if loss >= halt_at && !state.halted {
            state.halted = true;
            warn!(%loss, limit = %halt_at, "daily loss limit breached, halting opens");
            LossAction::Halt
        } else if loss >= emergency_at && !state.emergency_notified && !state.halted {
            state.emergency_notified = true;
            warn!(%loss, threshold = %emergency_at, "emergency-stop threshold crossed");
            LossAction::Emergency
        } else {
            LossAction::None
        }
    }

    /// Whether opens are currently refused.
    pub fn is_halted(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().unwrap();
        Self::roll_over(&mut state, now);
        state.halted
    }

    /// Realized P&L accumulated so far today.
    pub fn realized_today(&self, now: DateTime<Utc>) -> Decimal {
        let mut state = self.state.lock().unwrap();
        Self::roll_over(&mut state, now);
        state.realized
    }

    fn roll_over(state: &mut DayState, now: DateTime<Utc>) {
        let today = now.date_naive();
        if state.day != today {
            state.day = today;
            state.realized = Decimal::ZERO;
            state.emergency_notified = false;
            state.halted = false;
        }
    }
}
