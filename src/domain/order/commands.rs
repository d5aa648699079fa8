use super::value_objects::OrderItem;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum OrderCommand {
    CreateOrder {
        customer_id: String,
        items: Vec<OrderItem>,
    },
    ConfirmOrder,
    ShipOrder {
        tracking_number: String,
        carrier: String,
    },
    CancelOrder {
        reason: Option<String>,
    },
    NotifyCustomer {
        message: String,
    },
}

impl OrderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::CreateOrder { .. } => "CreateOrder",
            OrderCommand::ConfirmOrder => "ConfirmOrder",
            OrderCommand::ShipOrder { .. } => "ShipOrder",
            OrderCommand::CancelOrder { .. } => "CancelOrder",
            OrderCommand::NotifyCustomer { .. } => "NotifyCustomer",
        }
    }
}
