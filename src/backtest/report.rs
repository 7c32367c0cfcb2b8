use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::Symbol;

/// Backtest results with all metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbol: Symbol,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,

    pub total_return_pct: Decimal,
    pub annualized_return_pct: Decimal,

    pub max_drawdown_pct: Decimal,
    pub sharpe_ratio: Decimal,
    pub sortino_ratio: Decimal,

    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate_pct: Decimal,
    pub profit_factor: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,

    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub net_profit: Decimal,
    pub total_fees: Decimal,

    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
}

impl BacktestReport {
    /// Pretty print results to console
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("                    BACKTEST RESULTS");
        println!("{}", "=".repeat(60));
        println!("Symbol:             {}", self.symbol);
        println!(
            "Period:             {} to {}",
            self.start_date, self.end_date
        );
        println!("Initial Capital:    ${:.2}", self.initial_capital);
        println!("Final Equity:       ${:.2}", self.final_equity);
        println!("{}", "-".repeat(60));
        println!("PERFORMANCE");
        println!(
            "  Total Return:       ${:.2} ({:.2}%)",
            self.net_profit, self.total_return_pct
        );
        println!("  Annualized Return:  {:.2}%", self.annualized_return_pct);
        println!("  Max Drawdown:       {:.2}%", self.max_drawdown_pct);
        println!("  Sharpe Ratio:       {:.2}", self.sharpe_ratio);
        println!("  Sortino Ratio:      {:.2}", self.sortino_ratio);
        println!("{}", "-".repeat(60));
        println!("TRADES");
        println!("  Total Trades:       {}", self.total_trades);
        println!(
            "  Winning Trades:     {} ({:.1}%)",
            self.winning_trades, self.win_rate_pct
        );
        println!("  Losing Trades:      {}", self.losing_trades);
        println!("  Profit Factor:      {:.2}", self.profit_factor);
        println!("  Average Win:        ${:.2}", self.average_win);
        println!("  Average Loss:       ${:.2}", self.average_loss);
        println!("  Largest Win:        ${:.2}", self.largest_win);
        println!("  Largest Loss:       ${:.2}", self.largest_loss);
        println!("  Total Fees:         ${:.2}", self.total_fees);
        println!("{}", "=".repeat(60));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
    pub drawdown_pct: Decimal,
}

/// Record of a completed trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: Symbol,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub fees: Decimal,
    pub exit_reason: ExitReason,
}

/// Reason for exiting a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    EmergencyStop,
    EndOfBacktest,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Signal => write!(f, "Signal"),
            ExitReason::StopLoss => write!(f, "Stop Loss"),
            ExitReason::TakeProfit => write!(f, "Take Profit"),
            ExitReason::EmergencyStop => write!(f, "Emergency Stop"),
            ExitReason::EndOfBacktest => write!(f, "End of Backtest"),
        }
    }
}

/// One walk-forward window outcome: in-sample vs out-of-sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    pub index: usize,
    pub is_return_pct: Decimal,
    pub oos_return_pct: Decimal,
    pub is_sharpe: Decimal,
    pub oos_sharpe: Decimal,
    pub is_trades: u64,
    pub oos_trades: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub symbol: Symbol,
    pub windows: Vec<WindowResult>,
    pub avg_is_return_pct: Decimal,
    pub avg_oos_return_pct: Decimal,
    pub avg_is_sharpe: Decimal,
    pub avg_oos_sharpe: Decimal,
    /// IS Sharpe over OOS Sharpe. Far above 1 means the strategy fit noise.
    pub overfitting_ratio: Decimal,
}

impl WalkForwardReport {
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("               WALK-FORWARD RESULTS ({})", self.symbol);
        println!("{}", "=".repeat(60));
        for w in &self.windows {
            println!(
                "  Window {}: IS {:.2}% (Sharpe {:.2}, {} trades) | OOS {:.2}% (Sharpe {:.2}, {} trades)",
                w.index, w.is_return_pct, w.is_sharpe, w.is_trades,
                w.oos_return_pct, w.oos_sharpe, w.oos_trades
            );
        }
        println!("{}", "-".repeat(60));
        println!("  Avg IS Return:      {:.2}%", self.avg_is_return_pct);
        println!("  Avg OOS Return:     {:.2}%", self.avg_oos_return_pct);
        println!("  Avg IS Sharpe:      {:.2}", self.avg_is_sharpe);
        println!("  Avg OOS Sharpe:     {:.2}", self.avg_oos_sharpe);
        println!("  Overfitting Ratio:  {:.2}", self.overfitting_ratio);
        println!("{}", "=".repeat(60));
    }
}

/// Calculator for backtest metrics
pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn calculate(
        symbol: &Symbol,
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_capital: Decimal,
        final_equity: Decimal,
        trades: &[TradeRecord],
        equity_curve: &[EquityPoint],
    ) -> BacktestReport {
        let total_trades = trades.len() as u64;
        let winning: Vec<_> = trades.iter().filter(|t| t.pnl > Decimal::ZERO).collect();
        let losing: Vec<_> = trades.iter().filter(|t| t.pnl < Decimal::ZERO).collect();

        let wins = winning.len() as u64;
        let losses = losing.len() as u64;

        let gross_profit: Decimal = winning.iter().map(|t| t.pnl).sum();
        let gross_loss: Decimal = losing.iter().map(|t| t.pnl.abs()).sum();
        let total_fees: Decimal = trades.iter().map(|t| t.fees).sum();

        let net_profit = final_equity - initial_capital;
        let total_return_pct = if !initial_capital.is_zero() {
            net_profit / initial_capital * dec!(100)
        } else {
            Decimal::ZERO
        };

        let days = (end_date - start_date).num_days().max(1) as f64;
        let years = days / 365.0;
        let annualized_return_pct = {
            let return_factor = Decimal::ONE + total_return_pct / dec!(100);
            let return_f64: f64 = return_factor.try_into().unwrap_or(1.0);
            if return_f64 > 0.0 {
                let annual = return_f64.powf(1.0 / years) - 1.0;
                Decimal::try_from(annual * 100.0).unwrap_or(Decimal::ZERO)
            } else {
                dec!(-100)
            }
        };

        let win_rate_pct = if total_trades > 0 {
            Decimal::from(wins) / Decimal::from(total_trades) * dec!(100)
        } else {
            Decimal::ZERO
        };

        let profit_factor = if !gross_loss.is_zero() {
            gross_profit / gross_loss
        } else if gross_profit > Decimal::ZERO {
            dec!(100)
        } else {
            Decimal::ONE
        };

        let average_win = if wins > 0 {
            gross_profit / Decimal::from(wins)
        } else {
            Decimal::ZERO
        };
        let average_loss = if losses > 0 {
            gross_loss / Decimal::from(losses)
        } else {
            Decimal::ZERO
        };
        let largest_win = winning.iter().map(|t| t.pnl).max().unwrap_or(Decimal::ZERO);
        let largest_loss = losing
            .iter()
            .map(|t| t.pnl.abs())
            .max()
            .unwrap_or(Decimal::ZERO);

        let max_drawdown_pct = equity_curve
            .iter()
            .map(|e| e.drawdown_pct)
            .max()
            .unwrap_or(Decimal::ZERO);

        let (sharpe_ratio, sortino_ratio) = Self::calculate_ratios(trades);

        BacktestReport {
            symbol: symbol.clone(),
            start_date,
            end_date,
            initial_capital,
            final_equity,
            total_return_pct,
            annualized_return_pct,
            max_drawdown_pct,
            sharpe_ratio,
            sortino_ratio,
            total_trades,
            winning_trades: wins,
            losing_trades: losses,
            win_rate_pct,
            profit_factor,
            average_win,
            average_loss,
            largest_win,
            largest_loss,
            gross_profit,
            gross_loss,
            net_profit,
            total_fees,
            equity_curve: equity_curve.to_vec(),
            trades: trades.to_vec(),
        }
    }

    /// Sharpe and Sortino from per-trade returns, annualized at 252 bars.
    fn calculate_ratios(trades: &[TradeRecord]) -> (Decimal, Decimal) {
        if trades.is_empty() {
            return (Decimal::ZERO, Decimal::ZERO);
        }

        let returns: Vec<f64> = trades
            .iter()
            .map(|t| {
                let pnl_pct: f64 = t.pnl_pct.try_into().unwrap_or(0.0);
                pnl_pct / 100.0
            })
            .collect();

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        let sharpe = if std_dev > 0.0 {
            mean / std_dev * 252_f64.sqrt()
        } else {
            0.0
        };

        let downside: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).copied().collect();
        let sortino = if downside.is_empty() {
            sharpe.max(0.0)
        } else {
            let down_var =
                downside.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / downside.len() as f64;
            let down_dev = down_var.sqrt();
            if down_dev > 0.0 {
                mean / down_dev * 252_f64.sqrt()
            } else {
                0.0
            }
        };

        (
            Decimal::try_from(sharpe).unwrap_or(Decimal::ZERO),
            Decimal::try_from(sortino).unwrap_or(Decimal::ZERO),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trade(pnl: Decimal, pnl_pct: Decimal, fees: Decimal) -> TradeRecord {
        TradeRecord {
            id: "t".to_string(),
            symbol: Symbol::parse("AAPL").unwrap(),
            entry_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            exit_time: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            quantity: Decimal::ONE,
            pnl,
            pnl_pct,
            fees,
            exit_reason: ExitReason::Signal,
        }
    }

    #[test]
    fn win_rate_and_profit_factor() {
        let trades = vec![
            trade(dec!(10), dec!(10), dec!(0.1)),
            trade(dec!(20), dec!(20), dec!(0.1)),
            trade(dec!(-10), dec!(-10), dec!(0.1)),
            trade(dec!(-5), dec!(-5), dec!(0.1)),
        ];
        let report = MetricsCalculator::calculate(
            &Symbol::parse("AAPL").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            dec!(1000),
            dec!(1015),
            &trades,
            &[],
        );
        assert_eq!(report.total_trades, 4);
        assert_eq!(report.winning_trades, 2);
        assert_eq!(report.win_rate_pct, dec!(50));
        assert_eq!(report.profit_factor, dec!(2));
        assert_eq!(report.average_win, dec!(15));
        assert_eq!(report.average_loss, dec!(7.5));
        assert_eq!(report.largest_win, dec!(20));
        assert_eq!(report.net_profit, dec!(15));
    }

    #[test]
    fn drawdown_comes_from_equity_curve() {
        let curve = vec![
            EquityPoint {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
                equity: dec!(1000),
                drawdown_pct: Decimal::ZERO,
            },
            EquityPoint {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
                equity: dec!(880),
                drawdown_pct: dec!(12),
            },
        ];
        let report = MetricsCalculator::calculate(
            &Symbol::parse("AAPL").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            dec!(1000),
            dec!(880),
            &[],
            &curve,
        );
        assert_eq!(report.max_drawdown_pct, dec!(12));
        assert!(report.total_return_pct < Decimal::ZERO);
        assert_eq!(report.sharpe_ratio, Decimal::ZERO);
    }

    #[test]
    fn all_wins_gives_capped_profit_factor() {
        let trades = vec![trade(dec!(10), dec!(10), Decimal::ZERO)];
        let report = MetricsCalculator::calculate(
            &Symbol::parse("AAPL").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            dec!(1000),
            dec!(1010),
            &trades,
            &[],
        );
        assert_eq!(report.profit_factor, dec!(100));
        assert_eq!(report.losing_trades, 0);
    }
}
