// Delivery manifest loading.
//
// A manifest is a CSV export of open orders. Only the `order_id` column is
// required; every other column may be missing or blank. Unknown columns are
// ignored by the csv deserializer.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::shipping::{from_records, OrderRecord, ShippingOrder};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("manifest {path} has no `{column}` column")]
    MissingColumn { path: String, column: &'static str },
}

/// The one column every manifest must carry.
const REQUIRED_COLUMN: &str = "order_id";

/// One manifest row as written by the order export.
#[derive(Debug, Deserialize)]
struct RawManifestRow {
    order_id: i64,
    #[serde(default)]
    customer_id: Option<i64>,
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total_amount: Option<f64>,
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl From<RawManifestRow> for OrderRecord {
    fn from(raw: RawManifestRow) -> Self {
        OrderRecord {
            order_id: raw.order_id,
            customer_id: raw.customer_id,
            customer_name: non_blank(raw.customer_name),
            address: non_blank(raw.address),
            latitude: finite(raw.latitude),
            longitude: finite(raw.longitude),
            status: non_blank(raw.status),
            total_amount: finite(raw.total_amount),
        }
    }
}

/// Parse manifest rows from any reader. `source` names the input in errors
/// and logs.
///
/// A header without `order_id` is an error. Malformed rows are logged with
/// their file line and skipped.
pub fn records_from_reader<R: Read>(
    rdr: R,
    source: &str,
) -> Result<Vec<OrderRecord>, ManifestError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let headers = reader.headers().map_err(|e| ManifestError::Csv {
        path: source.to_string(),
        source: e,
    })?;
    if !headers.iter().any(|h| h == REQUIRED_COLUMN) {
        return Err(ManifestError::MissingColumn {
            path: source.to_string(),
            column: REQUIRED_COLUMN,
        });
    }

    let mut records = Vec::new();
    for (index, result) in reader.deserialize::<RawManifestRow>().enumerate() {
        match result {
            Ok(raw) => records.push(OrderRecord::from(raw)),
            Err(e) => {
                // Line 1 is the header.
                let line = e
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(index as u64 + 2);
                warn!("skipping malformed row at {source}:{line}: {e}");
            }
        }
    }
    Ok(records)
}

/// Load a manifest file and resolve every row into a [`ShippingOrder`].
pub fn load_orders(path: &Path) -> Result<Vec<ShippingOrder>, ManifestError> {
    let display = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|source| ManifestError::Io {
        path: display.clone(),
        source,
    })?;
    let records = records_from_reader(file, &display)?;
    let source_path = &display;
    info!("Loaded {} manifest rows from {}", records.len(), source_path);
    Ok(from_records(&records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::geo::GeoPoint;
    use crate::shipping::OrderStatus;

    #[test]
    fn full_rows_parse() {
        let csv = "\
order_id,customer_id,customer_name,address,latitude,longitude,status,total_amount
1,25,Nimal,\"Kandy Road, Kandy\",7.29,80.63,CONFIRMED,1500.50
2,26,Kamala,Galle Fort,,,PENDING,
";
        let records = records_from_reader(csv.as_bytes(), "test.csv").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].customer_id, Some(25));
        assert_eq!(records[0].latitude, Some(7.29));
        assert_eq!(records[0].total_amount, Some(1500.50));
        assert_eq!(records[1].latitude, None);
        assert_eq!(records[1].total_amount, None);
    }

    #[test]
    fn only_order_id_is_required() {
        let csv = "order_id\n7\n8\n";
        let records = records_from_reader(csv.as_bytes(), "test.csv").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].order_id, 8);
        assert!(records[1].address.is_none());
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let csv = "order_id,latitude\n1,7.0\nnot-a-number,7.1\n3,oops\n4,7.3\n";
        let records = records_from_reader(csv.as_bytes(), "test.csv").unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.order_id).collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[test]
    fn extra_columns_are_ignored() {
        let csv = "order_id,warehouse,address\n5,WH-2,Negombo beach road\n";
        let records = records_from_reader(csv.as_bytes(), "test.csv").unwrap();
        assert_eq!(records[0].address.as_deref(), Some("Negombo beach road"));
    }

    #[test]
    fn load_orders_resolves_locations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        std::fs::write(
            &path,
            "order_id,address,status\n11,Matara town,PROCESSED\n12,,CONFIRMED\n",
        )
        .unwrap();

        let orders = load_orders(&path).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].location, GeoPoint::new(5.9549, 80.555));
        assert_eq!(orders[0].status, OrderStatus::Processing);
        assert_eq!(orders[1].address, "Kandy, Sri Lanka (Default)");
        assert_eq!(orders[1].status, OrderStatus::Ready);
    }

    #[test]
    fn missing_order_id_column_is_an_error() {
        let csv = "id,address\n1,Galle Fort\n";
        let err = records_from_reader(csv.as_bytes(), "orders.csv").unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MissingColumn {
                column: "order_id",
                ..
            }
        ));
        assert_eq!(err.to_string(), "manifest orders.csv has no `order_id` column");
    }

    #[test]
    fn header_only_manifest_is_empty_not_an_error() {
        let records = records_from_reader("order_id,address\n".as_bytes(), "test.csv").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn load_orders_rejects_manifest_without_order_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        std::fs::write(&path, "customer_id,address\n25,Kandy\n").unwrap();
        assert!(matches!(
            load_orders(&path).unwrap_err(),
            ManifestError::MissingColumn { .. }
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_orders(Path::new("/nonexistent/orders.csv")).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }
}
