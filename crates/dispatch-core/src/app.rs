// Notification service event loop.
//
// A single task owns the database handle and the session registry. WebSocket
// connections feed it through `WsEvent`s; local callers feed it through
// `AppCommand`s. Outbound frames go back through each session's own queue.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::notify::{NewNotification, Notification, NotificationType};
use crate::protocol::{self, ClientMessage, MarkStatus, ServerMessage};
use crate::ws_server::WsEvent;

/// How often closed sessions are swept out of the registry.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// User id carried by broadcast notification frames.
pub const BROADCAST_USER: &str = "*";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// One connected client.
#[derive(Debug)]
pub struct Session {
    pub addr: String,
    pub user_id: Option<String>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Commands from inside the process (CLI, tests).
#[derive(Debug)]
pub enum AppCommand {
    /// Persist a notification and push it to its user's sessions.
    Publish(NewNotification),
    /// Push a transient notification to every session.
    Broadcast {
        message: String,
        notification_type: NotificationType,
    },
    Shutdown,
}

pub struct AppState {
    pub config: Config,
    pub db: Database,
    sessions: HashMap<u64, Session>,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Self {
        Self {
            config,
            db,
            sessions: HashMap::new(),
        }
    }

    fn register(&mut self, conn_id: u64, addr: String, outbound: mpsc::UnboundedSender<String>) {
        self.sessions.insert(
            conn_id,
            Session {
                addr,
                user_id: None,
                outbound,
            },
        );
    }

    /// Queue a frame for one session. Returns `false` if the session is gone.
    fn send_to(&self, conn_id: u64, msg: &ServerMessage) -> bool {
        let Some(session) = self.sessions.get(&conn_id) else {
            return false;
        };
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Dropping unencodable frame for {conn_id}: {e}");
                return false;
            }
        };
        session.outbound.send(json).is_ok()
    }

    /// Push a stored notification to every session subscribed as its user.
    /// Returns how many sessions it reached.
    pub fn deliver(&self, notification: &Notification) -> usize {
        let frame = ServerMessage::Notification(notification.clone());
        let targets: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.user_id.as_deref() == Some(notification.user_id.as_str()))
            .map(|(id, _)| *id)
            .collect();
        targets
            .into_iter()
            .filter(|id| self.send_to(*id, &frame))
            .count()
    }

    /// Persist a notification, then deliver it.
    pub fn publish(&self, new: &NewNotification) -> Result<Notification> {
        let stored = self.db.insert_notification(new)?;
        let reached = self.deliver(&stored);
        info!(
            "Notification {} for user {} delivered to {} session(s)",
            stored.id, stored.user_id, reached
        );
        Ok(stored)
    }

    /// Push a transient notification to every session. Nothing is stored.
    pub fn broadcast(&self, message: &str, notification_type: NotificationType) -> usize {
        let notification = Notification {
            id: 0,
            user_id: BROADCAST_USER.to_string(),
            message: message.to_string(),
            notification_type,
            created_at: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            is_read: false,
            metadata: None,
        };
        let frame = ServerMessage::Notification(notification);
        let ids: Vec<u64> = self.sessions.keys().copied().collect();
        let reached = ids.into_iter().filter(|id| self.send_to(*id, &frame)).count();
        info!("Broadcast delivered to {reached} session(s)");
        reached
    }

    /// Drop sessions whose connection task has gone away.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.outbound.is_closed());
        before - self.sessions.len()
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the notification service until the WebSocket channel closes or a
/// `Shutdown` command arrives.
pub async fn run(
    mut ws_rx: mpsc::Receiver<WsEvent>,
    mut cmd_rx: mpsc::Receiver<AppCommand>,
    mut state: AppState,
) -> Result<()> {
    info!("Application event loop started");

    let retention = state.config.notifications.retention_days;
    if retention > 0 {
        match state.db.delete_notifications_older_than(retention) {
            Ok(0) => {}
            Ok(n) => info!("Purged {n} notification(s) older than {retention} days"),
            Err(e) => warn!("Notification retention purge failed: {e:#}"),
        }
    }

    let mut cmd_open = true;

    let mut prune_interval = tokio::time::interval(PRUNE_INTERVAL);
    // The first tick completes immediately.
    prune_interval.tick().await;

    loop {
        tokio::select! {
            ws_event = ws_rx.recv() => {
                match ws_event {
                    Some(WsEvent::Connected { conn_id, addr, outbound }) => {
                        info!("Client {} connected from {}", conn_id, addr);
                        state.register(conn_id, addr, outbound);
                        state.send_to(conn_id, &ServerMessage::Connection {
                            session_id: conn_id,
                            message: "Connected to notification service".into(),
                            timestamp: protocol::now_millis(),
                        });
                    }
                    Some(WsEvent::Disconnected { conn_id }) => {
                        if let Some(session) = state.sessions.remove(&conn_id) {
                            info!(
                                "Client {} disconnected (user {})",
                                conn_id,
                                session.user_id.as_deref().unwrap_or("-")
                            );
                        }
                    }
                    Some(WsEvent::Message { conn_id, text }) => {
                        if let Err(e) = handle_ws_message(&mut state, conn_id, &text) {
                            warn!("Failed to handle message from {}: {:#}", conn_id, e);
                            state.send_to(conn_id, &ServerMessage::error(format!("{e:#}")));
                        }
                    }
                    None => {
                        info!("WebSocket channel closed, shutting down event loop");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv(), if cmd_open => {
                match cmd {
                    Some(AppCommand::Publish(new)) => {
                        if let Err(e) = state.publish(&new) {
                            warn!("Failed to publish notification: {:#}", e);
                        }
                    }
                    Some(AppCommand::Broadcast { message, notification_type }) => {
                        state.broadcast(&message, notification_type);
                    }
                    Some(AppCommand::Shutdown) => {
                        info!("Shutdown requested");
                        break;
                    }
                    None => {
                        cmd_open = false;
                    }
                }
            }

            _ = prune_interval.tick() => {
                let pruned = state.prune_closed();
                if pruned > 0 {
                    debug!("Pruned {} closed session(s)", pruned);
                }
            }
        }
    }

    Ok(())
}

/// Handle one text frame from a client.
///
/// Protocol problems are answered with an `error` frame here. Storage
/// failures are returned to the caller.
pub fn handle_ws_message(state: &mut AppState, conn_id: u64, text: &str) -> Result<()> {
    let msg = match protocol::parse_client_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Invalid frame from {}: {}", conn_id, e);
            state.send_to(conn_id, &ServerMessage::error(format!("Invalid message: {e}")));
            return Ok(());
        }
    };

    match msg {
        ClientMessage::Subscribe { user_id } => {
            let Some(session) = state.sessions.get_mut(&conn_id) else {
                return Ok(());
            };
            session.user_id = Some(user_id.clone());
            let unread = state.db.unread_notifications(&user_id)?;
            info!(
                "Session {} subscribed as user {} ({} unread)",
                conn_id,
                user_id,
                unread.len()
            );
            state.send_to(
                conn_id,
                &ServerMessage::Subscribed {
                    user_id: user_id.clone(),
                    message: format!("Subscribed to notifications for user {user_id}"),
                    unread_count: unread.len() as u64,
                    timestamp: protocol::now_millis(),
                },
            );
            for n in unread {
                state.send_to(conn_id, &ServerMessage::Notification(n));
            }
        }

        ClientMessage::Ping { .. } => {
            state.send_to(
                conn_id,
                &ServerMessage::Pong {
                    timestamp: protocol::now_millis(),
                },
            );
        }

        ClientMessage::MarkRead { notification_id } => {
            let status = if state.db.mark_read(notification_id)? {
                MarkStatus::Success
            } else {
                MarkStatus::NotFound
            };
            state.send_to(
                conn_id,
                &ServerMessage::MarkedRead {
                    notification_id,
                    status,
                    timestamp: protocol::now_millis(),
                },
            );
        }

        ClientMessage::MarkAllRead => {
            let Some(user_id) = subscribed_user(state, conn_id) else {
                return Ok(());
            };
            let count = state.db.mark_all_read(&user_id)?;
            state.send_to(
                conn_id,
                &ServerMessage::MarkedAllRead {
                    user_id,
                    count,
                    timestamp: protocol::now_millis(),
                },
            );
        }

        ClientMessage::History {
            page,
            size,
            notification_type,
        } => {
            let Some(user_id) = subscribed_user(state, conn_id) else {
                return Ok(());
            };
            let size = size
                .unwrap_or(state.config.notifications.history_page_size)
                .max(1);
            let notifications =
                state
                    .db
                    .notification_page(&user_id, notification_type, page, size)?;
            let unread_count = state.db.unread_count(&user_id)?;
            state.send_to(
                conn_id,
                &ServerMessage::History {
                    user_id,
                    page,
                    size,
                    notification_type,
                    notifications,
                    unread_count,
                },
            );
        }

        ClientMessage::Stats => {
            let Some(user_id) = subscribed_user(state, conn_id) else {
                return Ok(());
            };
            let stats = state.db.notification_stats(&user_id)?;
            state.send_to(conn_id, &ServerMessage::Stats { user_id, stats });
        }

        ClientMessage::OrderEvent(event) => {
            debug!(
                "Order event {} for order {} from session {}",
                event.event_type, event.order_id, conn_id
            );
            state.publish(&event.to_notification())?;
        }

        ClientMessage::Broadcast {
            message,
            notification_type,
        } => {
            state.broadcast(&message, notification_type);
        }
    }

    Ok(())
}

/// The user a session subscribed as, or an error frame when it has not.
fn subscribed_user(state: &AppState, conn_id: u64) -> Option<String> {
    let user = state
        .sessions
        .get(&conn_id)
        .and_then(|s| s.user_id.clone());
    if user.is_none() {
        state.send_to(conn_id, &ServerMessage::error("Subscribe first"));
    }
    user
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn test_state() -> AppState {
        AppState::new(Config::default(), Database::open(":memory:").unwrap())
    }

    fn connect(state: &mut AppState, conn_id: u64) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.register(conn_id, format!("127.0.0.1:{}", 50000 + conn_id), tx);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    fn note(user: &str, message: &str) -> NewNotification {
        NewNotification {
            user_id: user.into(),
            message: message.into(),
            notification_type: NotificationType::Order,
            metadata: None,
        }
    }

    #[test]
    fn ping_gets_pong() {
        let mut state = test_state();
        let mut rx = connect(&mut state, 1);
        handle_ws_message(&mut state, 1, r#"{"type":"ping","timestamp":1}"#).unwrap();
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "pong");
    }

    #[test]
    fn malformed_frame_gets_error() {
        let mut state = test_state();
        let mut rx = connect(&mut state, 1);
        handle_ws_message(&mut state, 1, "{not json").unwrap();
        handle_ws_message(&mut state, 1, r#"{"type":"warp"}"#).unwrap();
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f["type"] == "error"));
    }

    #[test]
    fn subscribe_sends_ack_then_unread_newest_first() {
        let mut state = test_state();
        let first = state.db.insert_notification(&note("25", "older")).unwrap();
        state.db.insert_notification(&note("25", "newer")).unwrap();
        state.db.insert_notification(&note("25", "read")).unwrap();
        state.db.insert_notification(&note("26", "someone else")).unwrap();
        let read = state.db.user_notifications("25").unwrap()[0].id;
        state.db.mark_read(read).unwrap();
        assert!(first.id < read);

        let mut rx = connect(&mut state, 1);
        handle_ws_message(&mut state, 1, r#"{"type":"subscribe","userId":"25"}"#).unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames[0]["type"], "subscribed");
        assert_eq!(frames[0]["unreadCount"], 2);
        let backlog: Vec<&str> = frames[1..]
            .iter()
            .map(|f| f["message"].as_str().unwrap())
            .collect();
        assert_eq!(backlog, vec!["newer", "older"]);
        assert_eq!(state.sessions[&1].user_id.as_deref(), Some("25"));
    }

    #[test]
    fn order_event_reaches_only_the_customer() {
        let mut state = test_state();
        let mut customer = connect(&mut state, 1);
        let mut other = connect(&mut state, 2);
        handle_ws_message(&mut state, 1, r#"{"type":"subscribe","userId":"25"}"#).unwrap();
        handle_ws_message(&mut state, 2, r#"{"type":"subscribe","userId":"26"}"#).unwrap();
        drain(&mut customer);
        drain(&mut other);

        handle_ws_message(
            &mut state,
            2,
            r#"{"type":"orderEvent","orderId":9,"customerId":25,"eventType":"ORDER_SHIPPED","status":"SHIPPED","totalAmount":10.0}"#,
        )
        .unwrap();

        let frames = drain(&mut customer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "notification");
        assert_eq!(frames[0]["userId"], "25");
        assert_eq!(frames[0]["metadata"]["orderId"], 9);
        assert!(drain(&mut other).is_empty());
        assert_eq!(state.db.unread_count("25").unwrap(), 1);
    }

    #[test]
    fn mark_read_reports_status() {
        let mut state = test_state();
        let n = state.db.insert_notification(&note("25", "x")).unwrap();
        let mut rx = connect(&mut state, 1);

        handle_ws_message(
            &mut state,
            1,
            &format!(r#"{{"type":"markRead","notificationId":{}}}"#, n.id),
        )
        .unwrap();
        handle_ws_message(&mut state, 1, r#"{"type":"markRead","notificationId":999}"#).unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames[0]["status"], "success");
        assert_eq!(frames[1]["status"], "not_found");
        assert_eq!(state.db.unread_count("25").unwrap(), 0);
    }

    #[test]
    fn mark_all_read_and_history_need_subscription() {
        let mut state = test_state();
        let mut rx = connect(&mut state, 1);
        handle_ws_message(&mut state, 1, r#"{"type":"markAllRead"}"#).unwrap();
        handle_ws_message(&mut state, 1, r#"{"type":"history"}"#).unwrap();
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f["type"] == "error"));
    }

    #[test]
    fn mark_all_read_and_history_for_subscriber() {
        let mut state = test_state();
        for i in 0..3 {
            state.db.insert_notification(&note("25", &format!("m{i}"))).unwrap();
        }
        let mut rx = connect(&mut state, 1);
        handle_ws_message(&mut state, 1, r#"{"type":"subscribe","userId":"25"}"#).unwrap();
        drain(&mut rx);

        handle_ws_message(&mut state, 1, r#"{"type":"markAllRead"}"#).unwrap();
        handle_ws_message(&mut state, 1, r#"{"type":"history","page":0,"size":2}"#).unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames[0]["type"], "marked_all_read");
        assert_eq!(frames[0]["count"], 3);
        assert_eq!(frames[1]["type"], "history");
        assert_eq!(frames[1]["notifications"].as_array().unwrap().len(), 2);
        assert_eq!(frames[1]["unreadCount"], 0);
    }

    #[test]
    fn subscribe_delivers_entire_large_backlog() {
        let mut state = test_state();
        for i in 0..100 {
            state.db.insert_notification(&note("25", &format!("m{i}"))).unwrap();
        }
        let mut rx = connect(&mut state, 1);
        handle_ws_message(&mut state, 1, r#"{"type":"subscribe","userId":"25"}"#).unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 101);
        assert_eq!(frames[0]["unreadCount"], 100);
        assert_eq!(frames[1]["message"], "m99");
        assert_eq!(frames[100]["message"], "m0");
    }

    #[test]
    fn history_filters_by_type() {
        let mut state = test_state();
        state.db.insert_notification(&note("25", "order")).unwrap();
        state
            .db
            .insert_notification(&NewNotification {
                notification_type: NotificationType::Delivery,
                ..note("25", "delivery")
            })
            .unwrap();
        let mut rx = connect(&mut state, 1);
        handle_ws_message(&mut state, 1, r#"{"type":"subscribe","userId":"25"}"#).unwrap();
        drain(&mut rx);

        handle_ws_message(
            &mut state,
            1,
            r#"{"type":"history","notificationType":"DELIVERY"}"#,
        )
        .unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["notificationType"], "DELIVERY");
        let listed = frames[0]["notifications"].as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["message"], "delivery");
        assert_eq!(frames[0]["unreadCount"], 2);
    }

    #[test]
    fn history_page_out_of_range_is_an_error() {
        let mut state = test_state();
        let mut rx = connect(&mut state, 1);
        handle_ws_message(&mut state, 1, r#"{"type":"subscribe","userId":"25"}"#).unwrap();
        drain(&mut rx);

        let huge = format!(r#"{{"type":"history","page":{},"size":20}}"#, usize::MAX);
        assert!(handle_ws_message(&mut state, 1, &huge).is_err());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn stats_for_subscriber() {
        let mut state = test_state();
        let first = state.db.insert_notification(&note("25", "a")).unwrap();
        state.db.insert_notification(&note("25", "b")).unwrap();
        state.db.mark_read(first.id).unwrap();
        let mut rx = connect(&mut state, 1);

        handle_ws_message(&mut state, 1, r#"{"type":"stats"}"#).unwrap();
        assert_eq!(drain(&mut rx)[0]["type"], "error");

        handle_ws_message(&mut state, 1, r#"{"type":"subscribe","userId":"25"}"#).unwrap();
        drain(&mut rx);
        handle_ws_message(&mut state, 1, r#"{"type":"stats"}"#).unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "stats");
        assert_eq!(frames[0]["userId"], "25");
        let stats = &frames[0]["stats"];
        assert_eq!(stats["totalNotifications"], 2);
        assert_eq!(stats["unreadCount"], 1);
        assert_eq!(stats["readCount"], 1);
        assert_eq!(stats["typeBreakdown"]["ORDER"], 2);
    }

    #[tokio::test]
    async fn history_error_becomes_error_frame() {
        let (ws_tx, ws_rx) = mpsc::channel(16);
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let handle = tokio::spawn(run(ws_rx, cmd_rx, test_state()));

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        ws_tx
            .send(WsEvent::Connected {
                conn_id: 1,
                addr: "test".into(),
                outbound: out_tx,
            })
            .await
            .unwrap();
        for text in [
            r#"{"type":"subscribe","userId":"25"}"#.to_string(),
            format!(r#"{{"type":"history","page":{},"size":2}}"#, usize::MAX),
        ] {
            ws_tx
                .send(WsEvent::Message { conn_id: 1, text })
                .await
                .unwrap();
        }

        let mut types = Vec::new();
        for _ in 0..3 {
            let frame: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
            types.push(frame["type"].as_str().unwrap().to_string());
        }
        assert_eq!(types, vec!["connection", "subscribed", "error"]);

        drop(ws_tx);
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn broadcast_reaches_everyone_and_is_not_stored() {
        let mut state = test_state();
        let mut a = connect(&mut state, 1);
        let mut b = connect(&mut state, 2);

        handle_ws_message(
            &mut state,
            1,
            r#"{"type":"broadcast","message":"Warehouse closes at 6","notificationType":"INVENTORY"}"#,
        )
        .unwrap();

        for rx in [&mut a, &mut b] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0]["notificationType"], "INVENTORY");
            assert_eq!(frames[0]["userId"], BROADCAST_USER);
        }
        assert_eq!(state.db.user_notifications(BROADCAST_USER).unwrap().len(), 0);
    }

    #[test]
    fn prune_drops_closed_sessions() {
        let mut state = test_state();
        let rx = connect(&mut state, 1);
        let _keep = connect(&mut state, 2);
        drop(rx);
        assert_eq!(state.prune_closed(), 1);
        assert_eq!(state.sessions.len(), 1);
        assert!(state.sessions.contains_key(&2));
    }

    #[tokio::test]
    async fn run_handles_connect_and_shutdown() {
        let (ws_tx, ws_rx) = mpsc::channel(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let handle = tokio::spawn(run(ws_rx, cmd_rx, test_state()));

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        ws_tx
            .send(WsEvent::Connected {
                conn_id: 1,
                addr: "test".into(),
                outbound: out_tx,
            })
            .await
            .unwrap();
        let hello: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        assert_eq!(hello["type"], "connection");
        assert_eq!(hello["sessionId"], 1);

        ws_tx
            .send(WsEvent::Message {
                conn_id: 1,
                text: r#"{"type":"subscribe","userId":"driver-1"}"#.into(),
            })
            .await
            .unwrap();
        let ack: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        assert_eq!(ack["type"], "subscribed");

        cmd_tx
            .send(AppCommand::Publish(NewNotification {
                user_id: "driver-1".into(),
                message: "Route 1 assigned".into(),
                notification_type: NotificationType::Delivery,
                metadata: None,
            }))
            .await
            .unwrap();
        let pushed: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["type"], "notification");
        assert_eq!(pushed["notificationType"], "DELIVERY");

        cmd_tx.send(AppCommand::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}
