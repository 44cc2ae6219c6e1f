//! Order line items passed to the ordering worker.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

fn default_quantity() -> u32 {
    1
}

/// Individual order item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,

    #[serde(default = "default_quantity")]
    pub quantity: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customizations: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl OrderItem {
    /// Create an item with quantity 1.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity: default_quantity(),
            price: None,
            customizations: Vec::new(),
            notes: None,
        }
    }

    /// Builder method to set the quantity.
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    /// Builder method to add a customization.
    pub fn with_customization(mut self, customization: impl Into<String>) -> Self {
        self.customizations.push(customization.into());
        self
    }

    /// Check that the item can be sent to the ordering worker.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("order item name is empty".to_string()));
        }
        if self.quantity == 0 {
            return Err(CoreError::InvalidInput(format!(
                "order item '{}' has quantity 0",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quantity_defaults_to_one() {
        let item: OrderItem = serde_json::from_value(json!({ "name": "Al Pastor Taco" })).unwrap();
        assert_eq!(item.quantity, 1);
        assert!(item.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_and_zero() {
        assert!(OrderItem::new("  ").validate().is_err());
        assert!(OrderItem::new("Migas").with_quantity(0).validate().is_err());
    }

    #[test]
    fn test_optional_fields_skipped() {
        let item = OrderItem::new("Queso").with_customization("extra spicy");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            json!({ "name": "Queso", "quantity": 1, "customizations": ["extra spicy"] })
        );
    }
}
