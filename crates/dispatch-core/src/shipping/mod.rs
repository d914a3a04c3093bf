// Shipping orders: the delivery-side view of a customer order, plus the
// depot and driver records the planner works with.

pub mod manifest;

use serde::{Deserialize, Serialize};

use crate::routing::geo::GeoPoint;

// ---------------------------------------------------------------------------
// Order status
// ---------------------------------------------------------------------------

/// Delivery readiness derived from the backend order status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Processing,
    Ready,
    /// Any backend status without a delivery mapping, kept verbatim.
    Other(String),
}

impl OrderStatus {
    /// Map a backend status (`PENDING`, `PROCESSED`, `CONFIRMED`, ...).
    ///
    /// Already-mapped labels (`Pending`, `Processing`, `Ready`) are accepted
    /// too so statuses read back from storage map to themselves.
    pub fn from_backend(status: &str) -> Self {
        match status.trim() {
            "PENDING" | "Pending" => OrderStatus::Pending,
            "PROCESSED" | "Processing" => OrderStatus::Processing,
            "CONFIRMED" | "Ready" => OrderStatus::Ready,
            other => OrderStatus::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::Ready => "Ready",
            OrderStatus::Other(s) => s,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Depot and drivers
// ---------------------------------------------------------------------------

/// The store every route starts from (and returns to).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Depot {
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Depot {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

impl Default for Depot {
    fn default() -> Self {
        Self {
            name: "Main Store".into(),
            address: "Kegalle, Sri Lanka".into(),
            latitude: 7.2513,
            longitude: 80.3464,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: u32,
    pub name: String,
    pub vehicle: String,
    /// Notification recipient id for this driver.
    pub user_id: String,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Raw order row as it arrives from the order backend or a manifest file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderRecord {
    pub order_id: i64,
    pub customer_id: Option<i64>,
    pub customer_name: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: Option<String>,
    pub total_amount: Option<f64>,
}

/// An order ready for route planning: it always has a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingOrder {
    pub id: i64,
    pub customer_id: Option<i64>,
    pub name: String,
    pub address: String,
    pub location: GeoPoint,
    pub status: OrderStatus,
}

pub const DEFAULT_CITY: (&str, GeoPoint) = ("Colombo", GeoPoint::new(6.9271, 79.8612));

/// Cities recognized by keyword in free-text addresses.
const KNOWN_CITIES: &[(&str, GeoPoint)] = &[
    ("kandy", GeoPoint::new(7.2906, 80.6337)),
    ("galle", GeoPoint::new(6.0535, 80.221)),
    ("negombo", GeoPoint::new(7.2083, 79.8358)),
    ("matara", GeoPoint::new(5.9549, 80.555)),
    ("anuradhapura", GeoPoint::new(7.8731, 80.7718)),
    ("batticaloa", GeoPoint::new(6.9534, 81.0077)),
    ("kurunegala", GeoPoint::new(8.3114, 80.4037)),
];

/// Rotation used for orders with no usable address at all.
const FALLBACK_LOCATIONS: &[(&str, GeoPoint)] = &[
    DEFAULT_CITY,
    ("Kandy", GeoPoint::new(7.2906, 80.6337)),
    ("Galle", GeoPoint::new(6.0535, 80.221)),
];

const MISSING_ADDRESS_MARKERS: &[&str] = &["Address not available", "Address not provided"];

/// Display name for an order id, e.g. `Order #007`.
pub fn order_name(id: i64) -> String {
    format!("Order #{id:03}")
}

/// Look up a known city mentioned in `address` (case-insensitive).
pub fn city_from_address(address: &str) -> Option<GeoPoint> {
    let lower = address.to_lowercase();
    KNOWN_CITIES
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, point)| *point)
}

fn usable_address(address: Option<&str>) -> Option<&str> {
    let a = address?.trim();
    if a.is_empty() || MISSING_ADDRESS_MARKERS.contains(&a) {
        None
    } else {
        Some(a)
    }
}

impl ShippingOrder {
    /// Convert a raw record, resolving a location when coordinates are
    /// missing. `index` is the record's position in its batch and selects the
    /// fallback city for address-less orders.
    pub fn from_record(record: &OrderRecord, index: usize) -> Self {
        let (address, location) = match usable_address(record.address.as_deref()) {
            Some(addr) => {
                let coords = match (record.latitude, record.longitude) {
                    (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
                    _ => None,
                };
                let location = coords
                    .or_else(|| city_from_address(addr))
                    .unwrap_or(DEFAULT_CITY.1);
                (addr.to_string(), location)
            }
            None => {
                let (city, point) = FALLBACK_LOCATIONS[index % FALLBACK_LOCATIONS.len()];
                (format!("{city}, Sri Lanka (Default)"), point)
            }
        };

        Self {
            id: record.order_id,
            customer_id: record.customer_id,
            name: order_name(record.order_id),
            address,
            location,
            status: record
                .status
                .as_deref()
                .map(OrderStatus::from_backend)
                .unwrap_or(OrderStatus::Pending),
        }
    }
}

/// Convert a batch of records, preserving order.
pub fn from_records(records: &[OrderRecord]) -> Vec<ShippingOrder> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| ShippingOrder::from_record(r, i))
        .collect()
}
