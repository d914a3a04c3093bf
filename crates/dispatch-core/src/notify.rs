// Notification records and the order-event to notification mapping.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::routing::metrics::format_duration;
use crate::routing::DeliveryRoute;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationType {
    Order,
    Inventory,
    Payment,
    Delivery,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Order => "ORDER",
            NotificationType::Inventory => "INVENTORY",
            NotificationType::Payment => "PAYMENT",
            NotificationType::Delivery => "DELIVERY",
            NotificationType::System => "SYSTEM",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown notification type: {0}")]
pub struct UnknownNotificationType(pub String);

impl FromStr for NotificationType {
    type Err = UnknownNotificationType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ORDER" => Ok(NotificationType::Order),
            "INVENTORY" => Ok(NotificationType::Inventory),
            "PAYMENT" => Ok(NotificationType::Payment),
            "DELIVERY" => Ok(NotificationType::Delivery),
            "SYSTEM" => Ok(NotificationType::System),
            _ => Err(UnknownNotificationType(s.to_string())),
        }
    }
}

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    pub message: String,
    pub notification_type: NotificationType,
    /// `YYYY-MM-DD HH:MM:SS` in UTC.
    pub created_at: String,
    pub is_read: bool,
    pub metadata: Option<serde_json::Value>,
}

/// A notification that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub metadata: Option<serde_json::Value>,
}

/// Per-user counts, as shown in the notification panel header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub total_notifications: u64,
    pub unread_count: u64,
    pub read_count: u64,
    pub type_breakdown: BTreeMap<NotificationType, u64>,
    pub latest_notification: Option<Notification>,
}

// ---------------------------------------------------------------------------
// Order events
// ---------------------------------------------------------------------------

/// An order lifecycle event published by the order service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub order_id: i64,
    pub customer_id: i64,
    pub event_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl OrderEvent {
    /// Customer-facing text. An explicit event message always wins.
    pub fn describe(&self) -> String {
        if let Some(msg) = self.message.as_deref().filter(|m| !m.is_empty()) {
            return msg.to_string();
        }
        let id = self.order_id;
        match self.event_type.to_ascii_uppercase().as_str() {
            "ORDER_CREATED" => format!(
                "Your order #{id} has been placed successfully! Total amount: ${:.2}. Status: {}",
                self.total_amount, self.status
            ),
            "ORDER_CONFIRMED" => {
                format!("Your order #{id} has been confirmed and is being processed.")
            }
            "ORDER_SHIPPED" => {
                format!("Great news! Your order #{id} has been shipped and is on its way.")
            }
            "ORDER_DELIVERED" => format!(
                "Your order #{id} has been delivered successfully! Thank you for your purchase."
            ),
            "ORDER_CANCELLED" => format!(
                "Your order #{id} has been cancelled. If you have any questions, please contact support."
            ),
            "ORDER_STATUS_UPDATED" => format!("Your order #{id} status has been updated."),
            other => format!("Update on your order #{id}: {other}"),
        }
    }

    /// Build the notification delivered to the ordering customer.
    pub fn to_notification(&self) -> NewNotification {
        NewNotification {
            user_id: self.customer_id.to_string(),
            message: self.describe(),
            notification_type: NotificationType::Order,
            metadata: Some(serde_json::json!({
                "orderId": self.order_id,
                "eventType": self.event_type,
                "totalAmount": self.total_amount,
                "status": self.status,
                "timestamp": self.timestamp,
            })),
        }
    }
}

/// Notification telling a driver about a newly planned route. Returns `None`
/// for routes without a driver.
pub fn route_assignment(route: &DeliveryRoute) -> Option<NewNotification> {
    let driver = route.driver.as_ref()?;
    let message = format!(
        "Route {} assigned to {} ({}): {} stops, {:.1} km, about {}",
        route.index + 1,
        driver.name,
        driver.vehicle,
        route.stops.len(),
        route.metrics.distance_km,
        format_duration(route.metrics.estimated_minutes)
    );
    Some(NewNotification {
        user_id: driver.user_id.clone(),
        message,
        notification_type: NotificationType::Delivery,
        metadata: Some(serde_json::json!({
            "route": route.index,
            "driverId": driver.id,
            "orderIds": route.order_ids(),
            "distanceKm": route.metrics.distance_km,
            "estimatedMinutes": route.metrics.estimated_minutes,
        })),
    })
}
