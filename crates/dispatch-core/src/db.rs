// SQLite persistence for shipping orders, notifications, and saved route plans.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::notify::{NewNotification, Notification, NotificationStats, NotificationType};
use crate::routing::geo::GeoPoint;
use crate::routing::RoutePlan;
use crate::shipping::{OrderStatus, ShippingOrder};

/// SQLite-backed store shared by the CLI and the notification server.
pub struct Database {
    conn: Mutex<Connection>,
}

/// A route plan read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedPlan {
    pub id: i64,
    pub created_at: String,
    pub plan: RoutePlan,
}

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, message, notification_type, created_at, is_read, metadata";

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS orders (
                id          INTEGER PRIMARY KEY,
                customer_id INTEGER,
                name        TEXT NOT NULL,
                address     TEXT NOT NULL,
                latitude    REAL NOT NULL,
                longitude   REAL NOT NULL,
                status      TEXT NOT NULL,
                updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id           TEXT NOT NULL,
                message           TEXT NOT NULL,
                notification_type TEXT NOT NULL,
                created_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
                is_read           INTEGER NOT NULL DEFAULT 0,
                metadata          TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_user
                ON notifications(user_id, is_read);

            CREATE TABLE IF NOT EXISTS route_plans (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
                plan       TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Insert or replace a batch of orders in one transaction. Returns the
    /// number of rows written.
    pub fn import_orders(&self, orders: &[ShippingOrder]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin import transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO orders (id, customer_id, name, address, latitude, longitude, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        customer_id = excluded.customer_id,
                        name        = excluded.name,
                        address     = excluded.address,
                        latitude    = excluded.latitude,
                        longitude   = excluded.longitude,
                        status      = excluded.status,
                        updated_at  = strftime('%Y-%m-%d %H:%M:%S', 'now')",
                )
                .context("failed to prepare order upsert")?;
            for o in orders {
                stmt.execute(params![
                    o.id,
                    o.customer_id,
                    o.name,
                    o.address,
                    o.location.lat,
                    o.location.lng,
                    o.status.label(),
                ])
                .with_context(|| format!("failed to upsert order {}", o.id))?;
            }
        }
        tx.commit().context("failed to commit order import")?;
        Ok(orders.len())
    }

    /// Load stored orders by id. With `status`, only orders in that status.
    pub fn load_orders(&self, status: Option<&OrderStatus>) -> Result<Vec<ShippingOrder>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, customer_id, name, address, latitude, longitude, status
                 FROM orders WHERE ?1 IS NULL OR status = ?1 ORDER BY id",
            )
            .context("failed to prepare load_orders query")?;

        let orders = stmt
            .query_map(params![status.map(|s| s.label())], |row| {
                let status: String = row.get(6)?;
                Ok(ShippingOrder {
                    id: row.get(0)?,
                    customer_id: row.get(1)?,
                    name: row.get(2)?,
                    address: row.get(3)?,
                    location: GeoPoint::new(row.get(4)?, row.get(5)?),
                    status: OrderStatus::from_backend(&status),
                })
            })
            .context("failed to query orders")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map order rows")?;

        Ok(orders)
    }

    pub fn order_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
            .context("failed to count orders")?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Persist a notification and return the stored row.
    pub fn insert_notification(&self, n: &NewNotification) -> Result<Notification> {
        let conn = self.conn();
        let metadata = n
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize notification metadata")?;

        conn.query_row(
            &format!(
                "INSERT INTO notifications (user_id, message, notification_type, metadata)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING {NOTIFICATION_COLUMNS}"
            ),
            params![n.user_id, n.message, n.notification_type.as_str(), metadata],
            notification_from_row,
        )
        .context("failed to insert notification")
    }

    /// All notifications for a user, newest first.
    pub fn user_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        self.query_notifications(
            "WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
            params![user_id],
        )
    }

    /// Unread notifications for a user, newest first.
    pub fn unread_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        self.query_notifications(
            "WHERE user_id = ?1 AND is_read = 0 ORDER BY created_at DESC, id DESC",
            params![user_id],
        )
    }

    /// One page of a user's history (0-based `page`), newest first. With
    /// `kind`, only notifications of that type are listed.
    pub fn notification_page(
        &self,
        user_id: &str,
        kind: Option<NotificationType>,
        page: usize,
        size: usize,
    ) -> Result<Vec<Notification>> {
        let limit = i64::try_from(size).context("history page size out of range")?;
        let offset = page
            .checked_mul(size)
            .and_then(|offset| i64::try_from(offset).ok())
            .ok_or_else(|| anyhow!("history page {page} out of range"))?;
        self.query_notifications(
            "WHERE user_id = ?1 AND (?2 IS NULL OR notification_type = ?2)
             ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4",
            params![user_id, kind.map(|k| k.as_str()), limit, offset],
        )
    }

    fn query_notifications(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Notification>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications {clause}"
            ))
            .context("failed to prepare notification query")?;
        let rows = stmt
            .query_map(params, notification_from_row)
            .context("failed to query notifications")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map notification rows")?;
        Ok(rows)
    }

    pub fn unread_count(&self, user_id: &str) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                params![user_id],
                |row| row.get(0),
            )
            .context("failed to count unread notifications")?;
        Ok(count as u64)
    }

    /// Mark one notification read. Returns `false` if no such id exists.
    pub fn mark_read(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1",
                params![id],
            )
            .context("failed to mark notification read")?;
        Ok(changed > 0)
    }

    /// Mark every unread notification of a user read. Returns how many
    /// changed.
    pub fn mark_all_read(&self, user_id: &str) -> Result<usize> {
        self.conn()
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                params![user_id],
            )
            .context("failed to mark notifications read")
    }

    /// Delete notifications older than `days`. Returns how many were removed.
    pub fn delete_notifications_older_than(&self, days: u32) -> Result<usize> {
        self.conn()
            .execute(
                "DELETE FROM notifications
                 WHERE created_at < strftime('%Y-%m-%d %H:%M:%S', 'now', ?1)",
                params![format!("-{days} days")],
            )
            .context("failed to delete old notifications")
    }

    pub fn notification_stats(&self, user_id: &str) -> Result<NotificationStats> {
        let all = self.user_notifications(user_id)?;
        let unread = all.iter().filter(|n| !n.is_read).count() as u64;
        let mut type_breakdown = BTreeMap::new();
        for n in &all {
            *type_breakdown.entry(n.notification_type).or_insert(0) += 1;
        }
        Ok(NotificationStats {
            total_notifications: all.len() as u64,
            unread_count: unread,
            read_count: all.len() as u64 - unread,
            type_breakdown,
            latest_notification: all.into_iter().next(),
        })
    }

    // ------------------------------------------------------------------
    // Route plans
    // ------------------------------------------------------------------

    /// Store a plan as JSON and return its id.
    pub fn save_route_plan(&self, plan: &RoutePlan) -> Result<i64> {
        let json = serde_json::to_string(plan).context("failed to serialize route plan")?;
        let conn = self.conn();
        conn.execute("INSERT INTO route_plans (plan) VALUES (?1)", params![json])
            .context("failed to save route plan")?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recently saved plan, if any.
    pub fn latest_route_plan(&self) -> Result<Option<SavedPlan>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, created_at, plan FROM route_plans ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to query latest route plan")?;

        match row {
            Some((id, created_at, json)) => {
                let plan: RoutePlan =
                    serde_json::from_str(&json).context("failed to deserialize route plan")?;
                Ok(Some(SavedPlan {
                    id,
                    created_at,
                    plan,
                }))
            }
            None => Ok(None),
        }
    }
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(3)?;
    let notification_type = kind.parse::<NotificationType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let metadata: Option<String> = row.get(6)?;
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message: row.get(2)?,
        notification_type,
        created_at: row.get(4)?,
        is_read: row.get(5)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
    })
}
