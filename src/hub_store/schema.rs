use crate::sqlite_persistence::VersionedSchema;

/// Schema for hub.db. Boxes, clients and notifications share one database so
/// the retry sweep can join notifications to their box in a single query.
pub const HUB_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    up: r#"
        CREATE TABLE clients (
            client_id TEXT PRIMARY KEY,
            secrets TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE boxes (
            box_id TEXT PRIMARY KEY,
            box_name TEXT NOT NULL,
            client_id TEXT NOT NULL,
            application_id TEXT,
            subscriber_type TEXT,
            callback_url TEXT,
            subscribed_at TEXT,
            created_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX idx_boxes_client_name ON boxes(client_id, box_name);

        CREATE TABLE notifications (
            notification_id TEXT PRIMARY KEY,
            box_id TEXT NOT NULL,
            message_content_type TEXT NOT NULL,
            message_nonce TEXT NOT NULL,
            message_ciphertext TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            retry_after TEXT,
            read_at TEXT,
            pushed_at TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE UNIQUE INDEX idx_notifications_id_box_status
            ON notifications(notification_id, box_id, status);
        CREATE INDEX idx_notifications_box_created
            ON notifications(box_id, created_at ASC);
        CREATE INDEX idx_notifications_created
            ON notifications(created_at);

        CREATE TABLE hub_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
    "#,
}];
