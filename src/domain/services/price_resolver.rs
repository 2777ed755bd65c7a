//! Executable price resolution and the slippage gate.

use crate::config::PricingConfig;
use crate::domain::entities::intent::{OrderType, PositionType};
use crate::domain::value_objects::price::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Liquidity class deciding which slippage threshold applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolClass {
    Major,
    Memecoin,
    LowLiquidity,
}

impl fmt::Display for SymbolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolClass::Major => "major",
            SymbolClass::Memecoin => "memecoin",
            SymbolClass::LowLiquidity => "low-liquidity",
        };
        write!(f, "{}", name)
    }
}

/// Execution refused by the slippage gate
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceVeto {
    #[error("Slippage {diff_pct}% on {symbol} exceeds the {class} threshold of {threshold_pct}%")]
    SlippageExceeded {
        symbol: String,
        class: SymbolClass,
        diff_pct: Decimal,
        threshold_pct: Decimal,
    },

    #[error("Invalid reference price {price} for {symbol}")]
    InvalidReferencePrice { symbol: String, price: Decimal },
}

impl PriceVeto {
    pub fn error_code(&self) -> &'static str {
        match self {
            PriceVeto::SlippageExceeded { .. } => "VETO_SLIPPAGE",
            PriceVeto::InvalidReferencePrice { .. } => "VETO_INVALID_REFERENCE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceResolution {
    pub price: Decimal,
    pub rationale: String,
    /// Set when the inputs did not allow a principled choice
    pub degraded: bool,
}

impl PriceResolution {
    fn new(price: Decimal, rationale: impl Into<String>) -> Self {
        Self {
            price,
            rationale: rationale.into(),
            degraded: false,
        }
    }
}

/// Slippage gate outcome when execution is allowed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlippageCheck {
    pub class: SymbolClass,
    pub diff_pct: Decimal,
    pub threshold_pct: Decimal,
}

#[derive(Debug, Clone)]
pub struct PriceResolver {
    config: PricingConfig,
}

impl PriceResolver {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    /// Picks one executable price out of the signal's entry prices.
    ///
    /// `None` for the order or position type means the signal did not say;
    /// the first listed price is then used and the result marked degraded.
    pub fn resolve(
        &self,
        entry_prices: &[Decimal],
        order_type: Option<OrderType>,
        position_type: Option<PositionType>,
        current_price: Decimal,
    ) -> PriceResolution {
        let Some(&first) = entry_prices.first() else {
            return PriceResolution::new(current_price, "no entry price provided");
        };

        if order_type == Some(OrderType::Market) {
            return PriceResolution::new(
                current_price,
                format!("market order fills at current price {}", current_price),
            );
        }

        if entry_prices.len() == 1 {
            return PriceResolution::new(first, format!("single entry price {}", first));
        }

        let (Some(order_type), Some(position_type)) = (order_type, position_type) else {
            return degraded(first, "order or position type unknown");
        };
        if order_type == OrderType::Spot {
            return degraded(first, "spot order with a price range");
        }

        let low = entry_prices.iter().copied().min().unwrap_or(first);
        let high = entry_prices.iter().copied().max().unwrap_or(first);
        let range = if entry_prices.len() == 2 {
            format!("range {}-{}", low, high)
        } else {
            format!("{} prices spanning {}-{}", entry_prices.len(), low, high)
        };

        let (price, side) = match position_type {
            PositionType::Long => (low, "lowest buy price"),
            PositionType::Short => (high, "highest sell price"),
        };

        let placement = match position_type {
            PositionType::Long if current_price > high => "waiting for entry (price above range)",
            PositionType::Long if current_price < low => "may fill immediately (price below range)",
            PositionType::Short if current_price < low => "waiting for entry (price below range)",
            PositionType::Short if current_price > high => "may fill immediately (price above range)",
            _ => "price inside range",
        };

        PriceResolution::new(
            price,
            format!("limit {} {}: {} {}; {}", position_type, range, side, price, placement),
        )
    }

    pub fn classify(&self, symbol: &str) -> SymbolClass {
        let symbol = symbol.trim_start_matches(|c: char| c.is_ascii_digit());
        if self.config.major_symbols.iter().any(|s| s == symbol) {
            SymbolClass::Major
        } else if self.config.memecoin_symbols.iter().any(|s| s == symbol) {
            SymbolClass::Memecoin
        } else {
            SymbolClass::LowLiquidity
        }
    }

    pub fn threshold_for(&self, class: SymbolClass) -> Decimal {
        match class {
            SymbolClass::Major => self.config.slippage_major_pct,
            SymbolClass::Memecoin => self.config.slippage_memecoin_pct,
            SymbolClass::LowLiquidity => self.config.slippage_low_liquidity_pct,
        }
    }

    /// Vetoes execution when the market has moved too far from the signal.
    ///
    /// For a range the distance is measured to the nearest bound, so a
    /// market price inside the range never trips the gate.
    pub fn check_slippage(
        &self,
        symbol: &str,
        signal_prices: &[Decimal],
        current_price: Decimal,
    ) -> Result<SlippageCheck, PriceVeto> {
        let class = self.classify(symbol);
        let threshold_pct = self.threshold_for(class);

        let (Some(low), Some(high)) = (
            signal_prices.iter().copied().min(),
            signal_prices.iter().copied().max(),
        ) else {
            return Ok(SlippageCheck {
                class,
                diff_pct: Decimal::ZERO,
                threshold_pct,
            });
        };

        let reference = if current_price < low {
            low
        } else if current_price > high {
            high
        } else {
            current_price
        };
        let reference = Price::new("reference_price", reference).map_err(|_| {
            PriceVeto::InvalidReferencePrice {
                symbol: symbol.to_string(),
                price: reference,
            }
        })?;

        let diff_pct = reference.percent_diff(current_price).round_dp(4);
        if diff_pct > threshold_pct {
            return Err(PriceVeto::SlippageExceeded {
                symbol: symbol.to_string(),
                class,
                diff_pct,
                threshold_pct,
            });
        }

        Ok(SlippageCheck {
            class,
            diff_pct,
            threshold_pct,
        })
    }
}

fn degraded(price: Decimal, why: &str) -> PriceResolution {
    PriceResolution {
        price,
        rationale: format!("{}: fell back to first entry price {}", why, price),
        degraded: true,
    }
}
