use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::report::{
    BacktestReport, EquityPoint, ExitReason, MetricsCalculator, TradeRecord, WalkForwardReport,
    WindowResult,
};
use crate::indicators::Rsi;
use crate::ml::{build_dataset, latest_features, EnsembleModel};
use crate::types::{BarSeries, MarketBar, Symbol};

const MIN_BACKTEST_BARS: usize = 120;
const MIN_DATASET_ROWS: usize = 40;
const MIN_TRADES_FOR_KELLY: usize = 5;
const KELLY_FLOOR: Decimal = dec!(0.05);

/// Configuration for backtesting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub initial_capital: Decimal,
    pub fee_rate: Decimal,
    pub slippage_rate: Decimal,
    /// Enter long when the predicted return clears this many pct points.
    pub entry_threshold_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    /// Hard cap on the Kelly position fraction.
    pub kelly_cap: Decimal,
    /// Retrain the ensemble every N bars on history seen so far.
    pub retrain_every: usize,
    pub rsi_overbought: Decimal,
    /// Emergency stop: liquidate and halt above this drawdown.
    pub max_drawdown_pct: Decimal,
    pub walk_forward_windows: Option<usize>,
    pub walk_forward_oos_pct: Decimal,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            initial_capital: dec!(10000),
            fee_rate: dec!(0.001),
            slippage_rate: dec!(0.0005),
            entry_threshold_pct: dec!(0.75),
            stop_loss_pct: dec!(5),
            take_profit_pct: dec!(10),
            kelly_cap: dec!(0.25),
            retrain_every: 21,
            rsi_overbought: dec!(70),
            max_drawdown_pct: dec!(25),
            walk_forward_windows: None,
            walk_forward_oos_pct: dec!(0.25),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.initial_capital <= Decimal::ZERO {
            errors.push("initial_capital must be positive".to_string());
        }
        if self.fee_rate < Decimal::ZERO || self.fee_rate > dec!(0.1) {
            errors.push("fee_rate must be in [0, 0.1]".to_string());
        }
        if self.slippage_rate < Decimal::ZERO || self.slippage_rate > dec!(0.1) {
            errors.push("slippage_rate must be in [0, 0.1]".to_string());
        }
        if self.entry_threshold_pct <= Decimal::ZERO {
            errors.push("entry_threshold_pct must be positive".to_string());
        }
        if self.stop_loss_pct <= Decimal::ZERO || self.stop_loss_pct >= dec!(100) {
            errors.push("stop_loss_pct must be in (0, 100)".to_string());
        }
        if self.take_profit_pct <= Decimal::ZERO {
            errors.push("take_profit_pct must be positive".to_string());
        }
        if self.kelly_cap <= Decimal::ZERO || self.kelly_cap > Decimal::ONE {
            errors.push("kelly_cap must be in (0, 1]".to_string());
        }
        if self.retrain_every == 0 {
            errors.push("retrain_every must be at least 1".to_string());
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start >= end {
                errors.push("start_date must precede end_date".to_string());
            }
        }
        if let Some(windows) = self.walk_forward_windows {
            if windows < 2 {
                errors.push("walk_forward_windows must be at least 2".to_string());
            }
            if self.walk_forward_oos_pct <= Decimal::ZERO
                || self.walk_forward_oos_pct >= Decimal::ONE
            {
                errors.push("walk_forward_oos_pct must be in (0, 1)".to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Capped Kelly fraction from the running trade history. Before enough trades
/// exist the sizer uses half the cap; a negative Kelly is floored rather than
/// zeroed so the loop keeps producing samples.
pub fn kelly_fraction(trades: &[TradeRecord], cap: Decimal) -> Decimal {
    if trades.len() < MIN_TRADES_FOR_KELLY {
        return cap / dec!(2);
    }

    let wins: Vec<&TradeRecord> = trades.iter().filter(|t| t.pnl > Decimal::ZERO).collect();
    let losses: Vec<&TradeRecord> = trades.iter().filter(|t| t.pnl < Decimal::ZERO).collect();

    if losses.is_empty() {
        return cap;
    }
    if wins.is_empty() {
        return KELLY_FLOOR;
    }

    let win_rate = Decimal::from(wins.len() as u64) / Decimal::from(trades.len() as u64);
    let avg_win: Decimal =
        wins.iter().map(|t| t.pnl_pct).sum::<Decimal>() / Decimal::from(wins.len() as u64);
    let avg_loss: Decimal = losses.iter().map(|t| t.pnl_pct.abs()).sum::<Decimal>()
        / Decimal::from(losses.len() as u64);

    if avg_loss.is_zero() {
        return cap;
    }
    let payoff = avg_win / avg_loss;
    if payoff.is_zero() {
        return KELLY_FLOOR;
    }

    let kelly = win_rate - (Decimal::ONE - win_rate) / payoff;
    kelly.max(KELLY_FLOOR).min(cap)
}

/// Notional and entry fees for a new position. The notional is sized so the
/// full cash outlay (notional plus fees) stays within the Kelly budget, even
/// at a fraction of 1.
pub fn entry_outlay(cash: Decimal, fraction: Decimal, fee_rate: Decimal) -> (Decimal, Decimal) {
    let budget = cash * fraction;
    let notional = (budget / (Decimal::ONE + fee_rate))
        .round_dp_with_strategy(6, RoundingStrategy::ToZero);
    let fees = notional * fee_rate;
    (notional, fees)
}

#[derive(Debug, Clone)]
struct OpenPosition {
    id: Uuid,
    entry_time: DateTime<Utc>,
    entry_price: Decimal,
    quantity: Decimal,
    entry_fees: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
}

/// Prediction-driven long-only backtesting engine.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, symbol: &Symbol, bars: &[MarketBar]) -> Result<BacktestReport> {
        let bars = self.filter_bars(bars);
        if bars.len() < MIN_BACKTEST_BARS {
            return Err(anyhow!(
                "not enough bars to backtest {}: {} < {}",
                symbol,
                bars.len(),
                MIN_BACKTEST_BARS
            ));
        }

        let start_date = bars[0].timestamp.date_naive();
        let end_date = bars[bars.len() - 1].timestamp.date_naive();
        info!(symbol = %symbol, bars = bars.len(), %start_date, %end_date, "starting backtest");

        let mut prefix = BarSeries::new(bars.len());
        let mut rsi = Rsi::new(14);
        let mut model: Option<EnsembleModel> = None;
        let mut bars_since_train = self.config.retrain_every;

        let mut cash = self.config.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut trades: Vec<TradeRecord> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();
        let mut peak_equity = self.config.initial_capital;
        let mut emergency_stopped = false;

        for bar in &bars {
            prefix.push(bar.clone());
            rsi.update(bar.close);

            // Intrabar exits first.
            if let Some(pos) = &position {
                if bar.low <= pos.stop_loss {
                    let exit_price = pos.stop_loss;
                    cash += self.close_position(
                        symbol,
                        pos,
                        exit_price,
                        bar.timestamp,
                        ExitReason::StopLoss,
                        &mut trades,
                    );
                    position = None;
                } else if bar.high >= pos.take_profit {
                    let exit_price = pos.take_profit;
                    cash += self.close_position(
                        symbol,
                        pos,
                        exit_price,
                        bar.timestamp,
                        ExitReason::TakeProfit,
                        &mut trades,
                    );
                    position = None;
                }
            }

            // Retrain on schedule with history seen so far.
            bars_since_train += 1;
            if bars_since_train > self.config.retrain_every {
                let dataset = build_dataset(&prefix, 1);
                if dataset.len() >= MIN_DATASET_ROWS {
                    match EnsembleModel::train(&dataset) {
                        Ok((trained, report)) => {
                            debug!(
                                bars = prefix.len(),
                                validation_mse = report.validation_mse,
                                "retrained ensemble"
                            );
                            model = Some(trained);
                        }
                        Err(e) => warn!("retrain failed, keeping previous model: {}", e),
                    }
                }
                bars_since_train = 0;
            }

            let predicted = model
                .as_ref()
                .and_then(|m| latest_features(&prefix).map(|row| m.predict(&row)));

            if let Some(predicted) = predicted {
                let threshold: f64 = self
                    .config
                    .entry_threshold_pct
                    .try_into()
                    .unwrap_or(f64::MAX);

                match &position {
                    Some(pos) if predicted < -threshold => {
                        let exit_price = bar.close;
                        cash += self.close_position(
                            symbol,
                            pos,
                            exit_price,
                            bar.timestamp,
                            ExitReason::Signal,
                            &mut trades,
                        );
                        position = None;
                    }
                    None if predicted > threshold && !emergency_stopped => {
                        let overbought = rsi
                            .value()
                            .map(|v| v > self.config.rsi_overbought)
                            .unwrap_or(true);
                        if !overbought {
                            let fraction = kelly_fraction(&trades, self.config.kelly_cap);
                            let (notional, fees) =
                                entry_outlay(cash, fraction, self.config.fee_rate);
                            let entry_price =
                                bar.close * (Decimal::ONE + self.config.slippage_rate);
                            if notional > Decimal::ZERO && !entry_price.is_zero() {
                                let quantity = notional / entry_price;
                                cash -= notional + fees;
                                position = Some(OpenPosition {
                                    id: Uuid::new_v4(),
                                    entry_time: bar.timestamp,
                                    entry_price,
                                    quantity,
                                    entry_fees: fees,
                                    stop_loss: entry_price
                                        * (Decimal::ONE - self.config.stop_loss_pct / dec!(100)),
                                    take_profit: entry_price
                                        * (Decimal::ONE + self.config.take_profit_pct / dec!(100)),
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }

            // Mark to market.
            let equity = cash
                + position
                    .as_ref()
                    .map(|p| p.quantity * bar.close)
                    .unwrap_or(Decimal::ZERO);
            if equity > peak_equity {
                peak_equity = equity;
            }
            let drawdown_pct = if peak_equity.is_zero() {
                Decimal::ZERO
            } else {
                (peak_equity - equity) / peak_equity * dec!(100)
            };
            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                equity,
                drawdown_pct,
            });

            if drawdown_pct > self.config.max_drawdown_pct && !emergency_stopped {
                warn!(
                    drawdown = %drawdown_pct,
                    limit = %self.config.max_drawdown_pct,
                    "max drawdown exceeded, halting entries"
                );
                emergency_stopped = true;
                if let Some(pos) = &position {
                    let exit_price = bar.close;
                    cash += self.close_position(
                        symbol,
                        pos,
                        exit_price,
                        bar.timestamp,
                        ExitReason::EmergencyStop,
                        &mut trades,
                    );
                    position = None;
                }
            }
        }

        // Flatten at the end of data.
        if let Some(pos) = &position {
            let last = &bars[bars.len() - 1];
            cash += self.close_position(
                symbol,
                pos,
                last.close,
                last.timestamp,
                ExitReason::EndOfBacktest,
                &mut trades,
            );
        }

        let report = MetricsCalculator::calculate(
            symbol,
            start_date,
            end_date,
            self.config.initial_capital,
            cash,
            &trades,
            &equity_curve,
        );
        info!(
            symbol = %symbol,
            trades = report.total_trades,
            return_pct = %report.total_return_pct,
            "backtest finished"
        );
        Ok(report)
    }

    /// Split the range into windows, run each window's in-sample head and
    /// out-of-sample tail independently, and aggregate.
    pub fn run_walk_forward(&self, symbol: &Symbol, bars: &[MarketBar]) -> Result<WalkForwardReport> {
        let windows = self
            .config
            .walk_forward_windows
            .ok_or_else(|| anyhow!("walk_forward_windows not set"))?;
        let bars = self.filter_bars(bars);

        let window_len = bars.len() / windows;
        let oos_pct: f64 = self.config.walk_forward_oos_pct.try_into().unwrap_or(0.25);
        let oos_len = (window_len as f64 * oos_pct) as usize;
        if window_len - oos_len < MIN_BACKTEST_BARS || oos_len < MIN_BACKTEST_BARS {
            return Err(anyhow!(
                "walk-forward windows too small: {} in-sample / {} out-of-sample bars per window",
                window_len - oos_len,
                oos_len
            ));
        }

        let sub_config = BacktestConfig {
            start_date: None,
            end_date: None,
            walk_forward_windows: None,
            ..self.config.clone()
        };
        let sub_engine = BacktestEngine::new(sub_config);

        let mut results = Vec::with_capacity(windows);
        for w in 0..windows {
            let start = w * window_len;
            let end = if w == windows - 1 {
                bars.len()
            } else {
                start + window_len
            };
            let window = &bars[start..end];
            let split = window.len() - oos_len;

            let is_report = sub_engine.run(symbol, &window[..split])?;
            let oos_report = sub_engine.run(symbol, &window[split..])?;
            info!(
                window = w,
                is_return = %is_report.total_return_pct,
                oos_return = %oos_report.total_return_pct,
                "walk-forward window done"
            );

            results.push(WindowResult {
                index: w,
                is_return_pct: is_report.total_return_pct,
                oos_return_pct: oos_report.total_return_pct,
                is_sharpe: is_report.sharpe_ratio,
                oos_sharpe: oos_report.sharpe_ratio,
                is_trades: is_report.total_trades,
                oos_trades: oos_report.total_trades,
            });
        }

        let n = Decimal::from(results.len() as u64);
        let avg = |f: fn(&WindowResult) -> Decimal| -> Decimal {
            results.iter().map(f).sum::<Decimal>() / n
        };
        let avg_is_sharpe = avg(|w| w.is_sharpe);
        let avg_oos_sharpe = avg(|w| w.oos_sharpe);
        let overfitting_ratio = if !avg_oos_sharpe.is_zero() {
            avg_is_sharpe / avg_oos_sharpe
        } else if avg_is_sharpe > Decimal::ZERO {
            dec!(100)
        } else {
            Decimal::ONE
        };

        let avg_is_return_pct = avg(|w| w.is_return_pct);
        let avg_oos_return_pct = avg(|w| w.oos_return_pct);

        Ok(WalkForwardReport {
            symbol: symbol.clone(),
            windows: results,
            avg_is_return_pct,
            avg_oos_return_pct,
            avg_is_sharpe,
            avg_oos_sharpe,
            overfitting_ratio,
        })
    }

    fn filter_bars(&self, bars: &[MarketBar]) -> Vec<MarketBar> {
        bars.iter()
            .filter(|b| {
                let date = b.timestamp.date_naive();
                self.config.start_date.map(|s| date >= s).unwrap_or(true)
                    && self.config.end_date.map(|e| date <= e).unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Returns the cash proceeds of the exit and records the trade.
    fn close_position(
        &self,
        symbol: &Symbol,
        pos: &OpenPosition,
        raw_exit_price: Decimal,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
        trades: &mut Vec<TradeRecord>,
    ) -> Decimal {
        let exit_price = raw_exit_price * (Decimal::ONE - self.config.slippage_rate);
        let proceeds = pos.quantity * exit_price;
        let exit_fees = proceeds * self.config.fee_rate;
        let cost_basis = pos.quantity * pos.entry_price;
        let total_fees = pos.entry_fees + exit_fees;
        let pnl = proceeds - cost_basis - total_fees;
        let pnl_pct = if cost_basis.is_zero() {
            Decimal::ZERO
        } else {
            pnl / cost_basis * dec!(100)
        };

        trades.push(TradeRecord {
            id: pos.id.to_string(),
            symbol: symbol.clone(),
            entry_time: pos.entry_time,
            exit_time,
            entry_price: pos.entry_price,
            exit_price,
            quantity: pos.quantity,
            pnl,
            pnl_pct,
            fees: total_fees,
            exit_reason: reason,
        });

        proceeds - exit_fees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn trade(pnl_pct: Decimal) -> TradeRecord {
        TradeRecord {
            id: "t".to_string(),
            symbol: Symbol::parse("TEST").unwrap(),
            entry_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            exit_time: Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl_pct,
            quantity: Decimal::ONE,
            pnl: pnl_pct,
            pnl_pct,
            fees: Decimal::ZERO,
            exit_reason: ExitReason::Signal,
        }
    }

    fn synthetic_bars(n: usize) -> Vec<MarketBar> {
        let symbol = Symbol::parse("TEST").unwrap();
        let start = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.2 + 6.0 * ((i as f64) * 0.25).sin();
                let close = Decimal::from_f64_retain(base).unwrap().round_dp(4);
                MarketBar {
                    symbol: symbol.clone(),
                    timestamp: start + Duration::days(i as i64),
                    open: close - Decimal::ONE,
                    high: close + dec!(1.5),
                    low: close - dec!(1.5),
                    close,
                    volume: 50_000,
                }
            })
            .collect()
    }

    #[test]
    fn kelly_uses_half_cap_without_history() {
        assert_eq!(kelly_fraction(&[], dec!(0.25)), dec!(0.125));
    }

    #[test]
    fn kelly_is_capped_and_floored() {
        // Overwhelming winners cap out.
        let winners: Vec<TradeRecord> = (0..10).map(|_| trade(dec!(5))).collect();
        assert_eq!(kelly_fraction(&winners, dec!(0.25)), dec!(0.25));

        // Overwhelming losers floor out instead of going negative.
        let mut losers: Vec<TradeRecord> = (0..9).map(|_| trade(dec!(-5))).collect();
        losers.push(trade(dec!(1)));
        assert_eq!(kelly_fraction(&losers, dec!(0.25)), KELLY_FLOOR);
    }

    #[test]
    fn kelly_balanced_history_is_between_bounds() {
        let mut trades: Vec<TradeRecord> = (0..6).map(|_| trade(dec!(10))).collect();
        trades.extend((0..4).map(|_| trade(dec!(-5))));
        let k = kelly_fraction(&trades, dec!(0.5));
        assert!(k > KELLY_FLOOR && k <= dec!(0.5));
    }

    #[test]
    fn entry_outlay_fits_in_budget_at_full_fraction() {
        let cash = dec!(10000);
        let (notional, fees) = entry_outlay(cash, Decimal::ONE, dec!(0.001));
        assert!(notional > Decimal::ZERO);
        assert!(fees > Decimal::ZERO);
        assert!(notional + fees <= cash);

        // A heavy fee rate still cannot push the outlay past the budget.
        let (notional, fees) = entry_outlay(cash, dec!(0.5), dec!(0.05));
        assert!(notional + fees <= cash * dec!(0.5));
    }

    #[test]
    fn config_validation_collects_errors() {
        let config = BacktestConfig {
            initial_capital: Decimal::ZERO,
            kelly_cap: dec!(2),
            retrain_every: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(BacktestConfig::default().validate().is_ok());
    }

    #[test]
    fn run_rejects_short_history() {
        let engine = BacktestEngine::new(BacktestConfig::default());
        let bars = synthetic_bars(50);
        assert!(engine
            .run(&Symbol::parse("TEST").unwrap(), &bars)
            .is_err());
    }

    #[test]
    fn run_produces_consistent_accounting() {
        let engine = BacktestEngine::new(BacktestConfig::default());
        let bars = synthetic_bars(300);
        let report = engine.run(&Symbol::parse("TEST").unwrap(), &bars).unwrap();

        assert_eq!(report.equity_curve.len(), 300);
        assert!(report.final_equity > Decimal::ZERO);
        for t in &report.trades {
            assert!(t.exit_time >= t.entry_time);
            assert!(t.quantity > Decimal::ZERO);
            assert!(t.fees >= Decimal::ZERO);
        }
        for point in &report.equity_curve {
            assert!(point.drawdown_pct >= Decimal::ZERO);
        }
        // Net profit must reconcile with equity.
        assert_eq!(
            report.net_profit,
            report.final_equity - report.initial_capital
        );
    }

    #[test]
    fn date_filter_narrows_the_run() {
        let bars = synthetic_bars(400);
        let config = BacktestConfig {
            start_date: Some(NaiveDate::from_ymd_opt(2022, 6, 1).unwrap()),
            end_date: Some(NaiveDate::from_ymd_opt(2022, 12, 31).unwrap()),
            ..Default::default()
        };
        let engine = BacktestEngine::new(config);
        let report = engine.run(&Symbol::parse("TEST").unwrap(), &bars).unwrap();
        assert!(report.start_date >= NaiveDate::from_ymd_opt(2022, 6, 1).unwrap());
        assert!(report.end_date <= NaiveDate::from_ymd_opt(2022, 12, 31).unwrap());
        assert!(report.equity_curve.len() < 400);
    }

    #[test]
    fn walk_forward_aggregates_windows() {
        let bars = synthetic_bars(1100);
        let config = BacktestConfig {
            walk_forward_windows: Some(2),
            walk_forward_oos_pct: dec!(0.3),
            ..Default::default()
        };
        let engine = BacktestEngine::new(config);
        let report = engine
            .run_walk_forward(&Symbol::parse("TEST").unwrap(), &bars)
            .unwrap();

        assert_eq!(report.windows.len(), 2);
        let expected_is = (report.windows[0].is_return_pct + report.windows[1].is_return_pct)
            / Decimal::from(2);
        assert_eq!(report.avg_is_return_pct, expected_is);
    }

    #[test]
    fn walk_forward_requires_window_config() {
        let engine = BacktestEngine::new(BacktestConfig::default());
        let bars = synthetic_bars(600);
        assert!(engine
            .run_walk_forward(&Symbol::parse("TEST").unwrap(), &bars)
            .is_err());
    }
}
