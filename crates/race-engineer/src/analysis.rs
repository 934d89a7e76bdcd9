//! Lap analysis: per-driver summaries, head-to-head deltas and simple
//! strategy heuristics.
//!
//! Every function takes a loaded [`Session`] and returns plain rows, so the
//! results can be rendered as tables, serialized, or turned into tool
//! observations for the agent.

use std::fmt;

use serde::Serialize;

use crate::config::StrategyConfig;
use crate::telemetry::{normalize_driver, Compound, Session};

/// One timed lap of a driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LapRow {
    /// Lap number.
    pub lap_number: u32,
    /// Lap time in seconds.
    pub lap_time_s: f64,
    /// Sector 1 time in seconds.
    pub s1_s: Option<f64>,
    /// Sector 2 time in seconds.
    pub s2_s: Option<f64>,
    /// Sector 3 time in seconds.
    pub s3_s: Option<f64>,
    /// Tyre compound.
    pub compound: Option<Compound>,
    /// Stint number.
    pub stint: Option<u32>,
}

/// Aggregate of one stint on one compound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StintRow {
    /// Stint number.
    pub stint: Option<u32>,
    /// Tyre compound.
    pub compound: Option<Compound>,
    /// Timed laps in the stint.
    pub laps: usize,
    /// Mean lap time in seconds.
    pub avg_lap_time_s: f64,
    /// Best lap time in seconds.
    pub best_lap_s: f64,
}

/// Lap time difference between two drivers on the same lap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeltaRow {
    /// Lap number.
    pub lap_number: u32,
    /// `A - B` in seconds; negative means A was faster.
    pub delta_s: f64,
}

/// Recommended pit lap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitSuggestion {
    /// Driver code.
    pub driver: String,
    /// Recommended lap, `None` without data.
    pub recommend_lap: Option<u32>,
    /// Why this lap was chosen.
    pub reason: String,
}

impl fmt::Display for PitSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.recommend_lap {
            Some(lap) => write!(f, "Recommend pit on lap≈{lap} | {}", self.reason),
            None => write!(f, "Recommend pit on lap≈? | {}", self.reason),
        }
    }
}

/// Result of an undercut evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndercutVerdict {
    /// Attacking driver.
    pub attacker: String,
    /// Defending driver.
    pub defender: String,
    /// `Some(true)` when the undercut pays off, `None` when undecidable.
    pub viable: Option<bool>,
    /// Fitted defender degradation in s/lap (never negative).
    pub defender_deg_s_per_lap: Option<f64>,
    /// Expected time gained over the horizon.
    pub expected_gain_s: Option<f64>,
    /// Pit loss the gain was compared against.
    pub pit_loss_s: f64,
    /// Explanation.
    pub reason: String,
}

impl fmt::Display for UndercutVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.viable {
            Some(true) => "viable",
            Some(false) => "not viable",
            None => "unknown",
        };
        write!(
            f,
            "Undercut {} on {}: {verdict} | {}",
            self.attacker, self.defender, self.reason
        )
    }
}

/// Timed laps of `driver`, ordered by lap number.
///
/// Laps without a finite lap time are dropped. An unknown driver yields no
/// rows.
#[must_use]
pub fn lap_summary(session: &Session, driver: &str) -> Vec<LapRow> {
    let mut rows: Vec<LapRow> = session
        .laps_for(driver)
        .filter_map(|lap| {
            lap.lap_time_s.filter(|t| t.is_finite()).map(|t| LapRow {
                lap_number: lap.lap_number,
                lap_time_s: t,
                s1_s: lap.sector1_s,
                s2_s: lap.sector2_s,
                s3_s: lap.sector3_s,
                compound: lap.compound,
                stint: lap.stint,
            })
        })
        .collect();
    rows.sort_by_key(|r| r.lap_number);
    rows
}

/// Group the driver's laps by stint and compound.
///
/// Ordered by stint, then compound; missing stints and compounds sort last.
#[must_use]
pub fn stint_summary(session: &Session, driver: &str) -> Vec<StintRow> {
    let mut groups: Vec<StintRow> = Vec::new();
    for row in lap_summary(session, driver) {
        match groups
            .iter_mut()
            .find(|g| g.stint == row.stint && g.compound == row.compound)
        {
            Some(g) => {
                // avg_lap_time_s holds the running sum until the end
                g.laps += 1;
                g.avg_lap_time_s += row.lap_time_s;
                g.best_lap_s = g.best_lap_s.min(row.lap_time_s);
            }
            None => groups.push(StintRow {
                stint: row.stint,
                compound: row.compound,
                laps: 1,
                avg_lap_time_s: row.lap_time_s,
                best_lap_s: row.lap_time_s,
            }),
        }
    }
    for g in &mut groups {
        g.avg_lap_time_s /= g.laps as f64;
    }
    groups.sort_by_key(|g| (g.stint.is_none(), g.stint, g.compound.is_none(), g.compound));
    groups
}

/// Per-lap difference `a - b` over laps both drivers completed.
#[must_use]
pub fn lap_delta(session: &Session, driver_a: &str, driver_b: &str) -> Vec<DeltaRow> {
    let b = lap_summary(session, driver_b);
    lap_summary(session, driver_a)
        .into_iter()
        .filter_map(|ra| {
            b.iter()
                .find(|rb| rb.lap_number == ra.lap_number)
                .map(|rb| DeltaRow {
                    lap_number: ra.lap_number,
                    delta_s: ra.lap_time_s - rb.lap_time_s,
                })
        })
        .collect()
}

/// Recommend a pit lap from the driver's pace.
///
/// The first lap slower than its predecessor by more than the degradation
/// threshold is recommended. With stable pace the median lap is suggested.
#[must_use]
pub fn suggest_pit_lap(session: &Session, driver: &str, config: &StrategyConfig) -> PitSuggestion {
    let driver = normalize_driver(driver);
    let rows = lap_summary(session, &driver);
    if rows.is_empty() {
        return PitSuggestion {
            reason: format!("No data for {driver}"),
            driver,
            recommend_lap: None,
        };
    }

    let threshold = config.degradation_threshold_s;
    if let Some(w) = rows
        .windows(2)
        .find(|w| w[1].lap_time_s - w[0].lap_time_s > threshold)
    {
        let lap = w[1].lap_number;
        return PitSuggestion {
            driver,
            recommend_lap: Some(lap),
            reason: format!("Pace drop detected (Δ>{threshold:.2}s) around lap {lap}"),
        };
    }

    let best = best_lap(&rows).unwrap_or_default();
    let avg = mean_lap(&rows).unwrap_or_default();
    PitSuggestion {
        driver,
        recommend_lap: Some(median_lap_number(&rows)),
        reason: format!("Stable pace (best={best:.2}, avg={avg:.2}), no urgent pit need"),
    }
}

/// Decide whether `attacker` can undercut `defender`.
///
/// Fits a line through the defender's most recent laps; the positive slope
/// is the tyre degradation the attacker gains back per lap on fresh tyres.
#[must_use]
pub fn evaluate_undercut(
    session: &Session,
    attacker: &str,
    defender: &str,
    config: &StrategyConfig,
) -> UndercutVerdict {
    let attacker = normalize_driver(attacker);
    let defender = normalize_driver(defender);
    let pit_loss = config.pit_loss_s;
    let unknown = |attacker: String, defender: String, reason: &str| UndercutVerdict {
        attacker,
        defender,
        viable: None,
        defender_deg_s_per_lap: None,
        expected_gain_s: None,
        pit_loss_s: pit_loss,
        reason: reason.to_string(),
    };

    let a = lap_summary(session, &attacker);
    let d = lap_summary(session, &defender);
    if a.is_empty() || d.is_empty() {
        return unknown(attacker, defender, "missing laps");
    }

    let tail = &d[d.len().saturating_sub(config.defender_tail_laps)..];
    if tail.len() < config.min_fit_laps {
        return unknown(attacker, defender, "too few laps for defender");
    }

    let points: Vec<(f64, f64)> = tail
        .iter()
        .map(|r| (f64::from(r.lap_number), r.lap_time_s))
        .collect();
    let deg = linear_slope(&points).max(0.0);
    let horizon = config.undercut_horizon_laps;
    let gain = deg * f64::from(horizon);

    UndercutVerdict {
        attacker,
        defender,
        viable: Some(gain > pit_loss),
        defender_deg_s_per_lap: Some(deg),
        expected_gain_s: Some(gain),
        pit_loss_s: pit_loss,
        reason: format!(
            "defender_deg≈{deg:.3}s/lap, horizon={horizon}, gain≈{gain:.1}s vs pit_loss={pit_loss:.1}s"
        ),
    }
}

/// Fastest lap time.
#[must_use]
pub fn best_lap(rows: &[LapRow]) -> Option<f64> {
    rows.iter().map(|r| r.lap_time_s).reduce(f64::min)
}

/// Mean lap time.
#[must_use]
pub fn mean_lap(rows: &[LapRow]) -> Option<f64> {
    mean(rows.iter().map(|r| r.lap_time_s))
}

/// Mean delta.
#[must_use]
pub fn mean_delta(rows: &[DeltaRow]) -> Option<f64> {
    mean(rows.iter().map(|r| r.delta_s))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0_usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Median lap number, truncated toward zero. `rows` must be non-empty.
fn median_lap_number(rows: &[LapRow]) -> u32 {
    let mut laps: Vec<u32> = rows.iter().map(|r| r.lap_number).collect();
    laps.sort_unstable();
    let mid = laps.len() / 2;
    if laps.len() % 2 == 1 {
        laps[mid]
    } else {
        // mean of the two middle values, truncated
        let sum = u64::from(laps[mid - 1]) + u64::from(laps[mid]);
        u32::try_from(sum / 2).unwrap_or(u32::MAX)
    }
}

/// Least-squares slope of `y` over `x`. Returns 0 when `x` has no spread.
fn linear_slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    if points.len() < 2 {
        return 0.0;
    }
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
        let dx = x - mean_x;
        (sxy + dx * (y - mean_y), sxx + dx * dx)
    });
    if sxx.abs() < f64::EPSILON {
        0.0
    } else {
        sxy / sxx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::fixtures::{lap, session};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn race() -> Session {
        session(vec![
            lap("VER", 3, Some(95.6), Some(1), Some(Compound::Soft)),
            lap("VER", 1, Some(95.0), Some(1), Some(Compound::Soft)),
            lap("VER", 2, Some(95.1), Some(1), Some(Compound::Soft)),
            lap("VER", 4, None, Some(1), Some(Compound::Soft)),
            lap("VER", 5, Some(97.0), Some(2), Some(Compound::Hard)),
            lap("LEC", 1, Some(95.4), Some(1), Some(Compound::Medium)),
            lap("LEC", 2, Some(95.3), Some(1), Some(Compound::Medium)),
            lap("LEC", 6, Some(96.0), None, None),
        ])
    }

    #[test]
    fn test_lap_summary_sorted_and_timed_only() {
        let rows = lap_summary(&race(), "ver");
        let laps: Vec<u32> = rows.iter().map(|r| r.lap_number).collect();
        assert_eq!(laps, vec![1, 2, 3, 5]);
        assert_eq!(rows[0].compound, Some(Compound::Soft));
        assert!(rows[0].s1_s.is_some());
    }

    #[test]
    fn test_lap_summary_skips_non_finite_times() {
        let s = session(vec![
            lap("VER", 1, Some(95.0), Some(1), None),
            lap("VER", 2, Some(f64::NAN), Some(1), None),
            lap("VER", 3, Some(95.2), Some(1), None),
            lap("VER", 4, Some(f64::INFINITY), Some(1), None),
        ]);
        let rows = lap_summary(&s, "VER");
        let laps: Vec<u32> = rows.iter().map(|r| r.lap_number).collect();
        assert_eq!(laps, vec![1, 3]);
        assert!(close(mean_lap(&rows).unwrap(), 95.1));
    }

    #[test]
    fn test_lap_summary_unknown_driver() {
        assert!(lap_summary(&race(), "HAM").is_empty());
    }

    #[test]
    fn test_stint_summary_groups() {
        let rows = stint_summary(&race(), "VER");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stint, Some(1));
        assert_eq!(rows[0].laps, 3);
        assert!(close(rows[0].avg_lap_time_s, (95.0 + 95.1 + 95.6) / 3.0));
        assert!(close(rows[0].best_lap_s, 95.0));
        assert_eq!(rows[1].compound, Some(Compound::Hard));
    }

    #[test]
    fn test_stint_summary_missing_stint_last() {
        let rows = stint_summary(&race(), "LEC");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stint, Some(1));
        assert!(rows[1].stint.is_none());
    }

    #[test]
    fn test_stint_summary_missing_compound_last() {
        let s = session(vec![
            lap("VER", 1, Some(95.0), Some(1), None),
            lap("VER", 2, Some(95.1), Some(1), Some(Compound::Soft)),
            lap("VER", 3, Some(95.2), Some(1), Some(Compound::Soft)),
        ]);
        let rows = stint_summary(&s, "VER");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].compound, Some(Compound::Soft));
        assert_eq!(rows[0].laps, 2);
        assert!(rows[1].compound.is_none());
    }

    #[test]
    fn test_lap_delta_inner_join() {
        let rows = lap_delta(&race(), "VER", "LEC");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].lap_number, 1);
        assert!(close(rows[0].delta_s, -0.4));
        assert!(close(rows[1].delta_s, 95.1 - 95.3));
        assert!(close(mean_delta(&rows).unwrap(), (-0.4 + (95.1 - 95.3)) / 2.0));
    }

    #[test]
    fn test_lap_delta_missing_driver() {
        assert!(lap_delta(&race(), "VER", "HAM").is_empty());
        assert!(mean_delta(&[]).is_none());
    }

    #[test]
    fn test_suggest_pit_lap_detects_drop() {
        let s = suggest_pit_lap(&race(), "VER", &StrategyConfig::default());
        assert_eq!(s.recommend_lap, Some(3));
        assert_eq!(s.reason, "Pace drop detected (Δ>0.25s) around lap 3");
        assert_eq!(
            s.to_string(),
            "Recommend pit on lap≈3 | Pace drop detected (Δ>0.25s) around lap 3"
        );
    }

    #[test]
    fn test_suggest_pit_lap_stable_pace() {
        let stable = session(vec![
            lap("VER", 1, Some(95.0), None, None),
            lap("VER", 2, Some(95.2), None, None),
            lap("VER", 3, Some(95.0), None, None),
            lap("VER", 4, Some(95.2), None, None),
        ]);
        let s = suggest_pit_lap(&stable, "VER", &StrategyConfig::default());
        assert_eq!(s.recommend_lap, Some(2));
        assert_eq!(
            s.reason,
            "Stable pace (best=95.00, avg=95.10), no urgent pit need"
        );
    }

    #[test]
    fn test_suggest_pit_lap_no_data() {
        let s = suggest_pit_lap(&race(), "ham", &StrategyConfig::default());
        assert!(s.recommend_lap.is_none());
        assert_eq!(s.reason, "No data for HAM");
    }

    #[test]
    fn test_undercut_missing_laps() {
        let v = evaluate_undercut(&race(), "HAM", "VER", &StrategyConfig::default());
        assert!(v.viable.is_none());
        assert_eq!(v.reason, "missing laps");
    }

    #[test]
    fn test_undercut_too_few_defender_laps() {
        let s = session(vec![
            lap("VER", 1, Some(95.0), None, None),
            lap("LEC", 1, Some(95.0), None, None),
            lap("LEC", 2, Some(95.5), None, None),
        ]);
        let v = evaluate_undercut(&s, "VER", "LEC", &StrategyConfig::default());
        assert!(v.viable.is_none());
        assert_eq!(v.reason, "too few laps for defender");
    }

    #[test]
    fn test_undercut_uses_defender_tail() {
        // LEC loses 0.5s/lap over the last 8 laps; earlier laps are ignored
        let mut laps = vec![lap("VER", 1, Some(95.0), None, None)];
        laps.push(lap("LEC", 1, Some(120.0), None, None));
        for n in 2..=9 {
            laps.push(lap("LEC", n, Some(90.0 + 0.5 * f64::from(n)), None, None));
        }
        let s = session(laps);

        let v = evaluate_undercut(&s, "ver", "lec", &StrategyConfig::default());
        assert!(close(v.defender_deg_s_per_lap.unwrap(), 0.5));
        assert!(close(v.expected_gain_s.unwrap(), 1.0));
        assert_eq!(v.viable, Some(false));
        assert_eq!(
            v.reason,
            "defender_deg≈0.500s/lap, horizon=2, gain≈1.0s vs pit_loss=20.0s"
        );

        let cheap = StrategyConfig {
            pit_loss_s: 0.5,
            ..StrategyConfig::default()
        };
        let v = evaluate_undercut(&s, "VER", "LEC", &cheap);
        assert_eq!(v.viable, Some(true));
        assert!(v.to_string().starts_with("Undercut VER on LEC: viable |"));
    }

    #[test]
    fn test_undercut_improving_defender_clamps_to_zero() {
        let mut laps = vec![lap("VER", 1, Some(95.0), None, None)];
        for n in 1..=5 {
            laps.push(lap("LEC", n, Some(100.0 - f64::from(n)), None, None));
        }
        let v = evaluate_undercut(&session(laps), "VER", "LEC", &StrategyConfig::default());
        assert!(close(v.defender_deg_s_per_lap.unwrap(), 0.0));
        assert_eq!(v.viable, Some(false));
    }

    #[test]
    fn test_linear_slope_degenerate() {
        assert!(close(linear_slope(&[(1.0, 2.0), (1.0, 3.0)]), 0.0));
        assert!(close(linear_slope(&[(1.0, 1.0), (2.0, 3.0), (3.0, 5.0)]), 2.0));
    }

    #[test]
    fn test_aggregates() {
        let rows = lap_summary(&race(), "VER");
        assert!(close(best_lap(&rows).unwrap(), 95.0));
        assert!(close(mean_lap(&rows).unwrap(), (95.0 + 95.1 + 95.6 + 97.0) / 4.0));
        assert!(best_lap(&[]).is_none());
    }
}
