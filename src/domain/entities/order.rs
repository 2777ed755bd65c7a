use crate::domain::entities::intent::{OrderType, PositionType};
use crate::domain::errors::ValidationError;
use crate::domain::value_objects::price::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order handed to the execution collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: PositionType,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub quantity: Decimal,
    pub stop_loss: Option<Price>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn new(
        client_order_id: String,
        symbol: String,
        side: PositionType,
        order_type: OrderType,
        price: Option<Decimal>,
        quantity: Decimal,
    ) -> Result<Self, ValidationError> {
        let price = price.map(|p| Price::new("price", p)).transpose()?;
        if quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveNumber {
                field: "quantity".to_string(),
                value: quantity,
            });
        }

        // Validation: limit orders must have price
        if matches!(order_type, OrderType::Limit) && price.is_none() {
            return Err(ValidationError::MissingField("price".to_string()));
        }

        Ok(OrderRequest {
            client_order_id,
            symbol,
            side,
            order_type,
            price,
            quantity,
            stop_loss: None,
            reduce_only: false,
        })
    }

    pub fn with_stop_loss(mut self, stop_loss: Option<Price>) -> Self {
        self.stop_loss = stop_loss;
        self
    }

    pub fn notional(&self) -> Option<Decimal> {
        self.price.map(|p| p.value() * self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_new_market_long() {
        let order = OrderRequest::new(
            "sig-1".to_string(),
            "BTC".to_string(),
            PositionType::Long,
            OrderType::Market,
            None,
            dec!(0.5),
        )
        .unwrap();
        assert!(order.price.is_none());
        assert!(order.notional().is_none());
        assert!(!order.reduce_only);
    }

    #[test]
    fn test_order_limit_without_price() {
        let order = OrderRequest::new(
            "sig-2".to_string(),
            "BTC".to_string(),
            PositionType::Short,
            OrderType::Limit,
            None,
            dec!(1),
        );
        assert_eq!(
            order.unwrap_err(),
            ValidationError::MissingField("price".to_string())
        );
    }

    #[test]
    fn test_order_rejects_zero_quantity() {
        let order = OrderRequest::new(
            "sig-3".to_string(),
            "ETH".to_string(),
            PositionType::Long,
            OrderType::Limit,
            Some(dec!(2000)),
            Decimal::ZERO,
        );
        assert!(matches!(
            order,
            Err(ValidationError::NonPositiveNumber { .. })
        ));
    }

    #[test]
    fn test_order_notional() {
        let order = OrderRequest::new(
            "sig-4".to_string(),
            "ETH".to_string(),
            PositionType::Long,
            OrderType::Limit,
            Some(dec!(2000)),
            dec!(0.25),
        )
        .unwrap();
        assert_eq!(order.notional(), Some(dec!(500)));
    }
}
