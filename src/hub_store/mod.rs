//! SQLite-backed storage for boxes, clients and notifications.
//!
//! One database file backs the whole hub. `SqliteHubStore` implements the
//! three store traits; everything else in the crate goes through those
//! traits and never touches the connection directly.

mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::boxes::{
    BoxCreator, BoxId, BoxStore, CreateBoxOutcome, NotificationBox, Subscriber,
    UpdateSubscriberOutcome,
};
use crate::clients::{Client, ClientId, ClientSecret, ClientStore};
use crate::encryption::{EncryptedMessage, MessageCipher};
use crate::notifications::{
    MessageContentType, Notification, NotificationId, NotificationStatus, NotificationStore,
};
use crate::sqlite_persistence::apply_schemas;
use schema::HUB_VERSIONED_SCHEMAS;

/// Everything the hub persists, behind one handle.
pub trait HubStore: BoxStore + ClientStore + NotificationStore {}

impl<T: BoxStore + ClientStore + NotificationStore> HubStore for T {}

const TTL_META_KEY: &str = "notification_ttl_seconds";

pub struct SqliteHubStore {
    conn: Arc<Mutex<Connection>>,
    cipher: MessageCipher,
}

impl SqliteHubStore {
    /// Open or create the hub database.
    ///
    /// `ttl_seconds` is the configured notification TTL; the applied value is
    /// recorded in `hub_meta` and a mismatch with a previous run is logged
    /// and replaced here, at startup.
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        cipher: MessageCipher,
        ttl_seconds: u64,
    ) -> Result<Self> {
        let path = db_path.as_ref();
        let existed = path.exists();
        let conn = Connection::open(path).context("Failed to open hub database")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        apply_schemas(&conn, HUB_VERSIONED_SCHEMAS, "hub")?;
        if !existed {
            info!("Created new hub database at {:?}", path);
        }

        Self::ensure_ttl_declaration(&conn, ttl_seconds)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher,
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory(cipher: MessageCipher) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        apply_schemas(&conn, HUB_VERSIONED_SCHEMAS, "hub")?;
        Self::ensure_ttl_declaration(&conn, 3600)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher,
        })
    }

    /// Record the applied TTL, replacing a stale declaration from a previous
    /// run with the configured one.
    fn ensure_ttl_declaration(conn: &Connection, ttl_seconds: u64) -> Result<()> {
        let declared: Option<String> = conn
            .query_row(
                "SELECT value FROM hub_meta WHERE key = ?1",
                [TTL_META_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let configured = ttl_seconds.to_string();
        match declared {
            Some(value) if value == configured => {}
            Some(value) => {
                info!(
                    "Notification TTL declaration changed from {}s to {}s, replacing",
                    value, configured
                );
                conn.execute(
                    "UPDATE hub_meta SET value = ?1, updated_at = ?2 WHERE key = ?3",
                    params![configured, Utc::now().to_rfc3339(), TTL_META_KEY],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO hub_meta (key, value, updated_at) VALUES (?1, ?2, ?3)",
                    params![TTL_META_KEY, configured, Utc::now().to_rfc3339()],
                )?;
            }
        }
        Ok(())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn parse_uuid(column: usize, s: String) -> rusqlite::Result<Uuid> {
        Uuid::parse_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
    }

    fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }

    fn row_to_box(row: &rusqlite::Row) -> rusqlite::Result<NotificationBox> {
        let box_id = Self::parse_uuid(0, row.get("box_id")?)?;
        let subscriber_type: Option<String> = row.get("subscriber_type")?;
        let callback_url: Option<String> = row.get("callback_url")?;
        let subscribed_at: Option<String> = row.get("subscribed_at")?;
        let subscribed_at = subscribed_at
            .map(|s| Self::parse_datetime(&s))
            .unwrap_or_else(Utc::now);

        let subscriber = match subscriber_type.as_deref() {
            Some("PUSH") => Some(Subscriber::Push {
                callback_url: callback_url.unwrap_or_default(),
                subscribed_at,
            }),
            Some("PULL") => Some(Subscriber::Pull { subscribed_at }),
            _ => None,
        };

        Ok(NotificationBox {
            box_id: BoxId(box_id),
            box_name: row.get("box_name")?,
            box_creator: BoxCreator {
                client_id: ClientId(row.get("client_id")?),
            },
            application_id: row.get("application_id")?,
            subscriber,
        })
    }

    /// Maps a row to a notification whose message is still encrypted.
    fn row_to_encrypted_notification(
        row: &rusqlite::Row,
    ) -> rusqlite::Result<(Notification, EncryptedMessage)> {
        let notification_id = Self::parse_uuid(0, row.get("notification_id")?)?;
        let box_id = Self::parse_uuid(1, row.get("box_id")?)?;
        let content_type: String = row.get("message_content_type")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let retry_after: Option<String> = row.get("retry_after")?;
        let read_at: Option<String> = row.get("read_at")?;
        let pushed_at: Option<String> = row.get("pushed_at")?;

        let encrypted = EncryptedMessage {
            nonce: row.get("message_nonce")?,
            ciphertext: row.get("message_ciphertext")?,
        };

        let notification = Notification {
            notification_id: NotificationId(notification_id),
            box_id: BoxId(box_id),
            message_content_type: MessageContentType::from_mime(&content_type)
                .unwrap_or(MessageContentType::Json),
            message: String::new(),
            status: NotificationStatus::from_db_str(&status)
                .unwrap_or(NotificationStatus::Pending),
            created_at: Self::parse_datetime(&created_at),
            retry_after: retry_after.map(|s| Self::parse_datetime(&s)),
            read_at: read_at.map(|s| Self::parse_datetime(&s)),
            pushed_at: pushed_at.map(|s| Self::parse_datetime(&s)),
            retry_count: row.get("retry_count")?,
        };

        Ok((notification, encrypted))
    }

    fn decrypt_notification(
        &self,
        (mut notification, encrypted): (Notification, EncryptedMessage),
    ) -> Result<Notification> {
        notification.message = self
            .cipher
            .decrypt(&encrypted)
            .with_context(|| format!("Failed to decrypt notification {}", notification.notification_id))?;
        Ok(notification)
    }

    fn query_box_by_name(
        conn: &Connection,
        box_name: &str,
        client_id: &ClientId,
    ) -> Result<Option<NotificationBox>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM boxes WHERE box_name = ?1 AND client_id = ?2",
        )?;
        let found = stmt
            .query_row(params![box_name, client_id.as_str()], Self::row_to_box)
            .optional()?;
        Ok(found)
    }

    fn query_box_by_id(conn: &Connection, box_id: &BoxId) -> Result<Option<NotificationBox>> {
        let mut stmt = conn.prepare("SELECT * FROM boxes WHERE box_id = ?1")?;
        let found = stmt
            .query_row([box_id.to_string()], Self::row_to_box)
            .optional()?;
        Ok(found)
    }

    fn query_notification(
        &self,
        conn: &Connection,
        notification_id: &NotificationId,
    ) -> Result<Option<Notification>> {
        let mut stmt = conn.prepare("SELECT * FROM notifications WHERE notification_id = ?1")?;
        let found = stmt
            .query_row(
                [notification_id.to_string()],
                Self::row_to_encrypted_notification,
            )
            .optional()?;
        found.map(|pair| self.decrypt_notification(pair)).transpose()
    }
}

impl BoxStore for SqliteHubStore {
    fn create_box(&self, client_id: &ClientId, box_name: &str) -> Result<CreateBoxOutcome> {
        let conn = self.conn.lock().unwrap();

        if let Some(existing) = Self::query_box_by_name(&conn, box_name, client_id)? {
            return Ok(CreateBoxOutcome::Retrieved(existing));
        }

        let new_box = NotificationBox {
            box_id: BoxId::random(),
            box_name: box_name.to_string(),
            box_creator: BoxCreator {
                client_id: client_id.clone(),
            },
            application_id: None,
            subscriber: None,
        };

        let inserted = conn.execute(
            r#"INSERT INTO boxes (box_id, box_name, client_id, application_id, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                new_box.box_id.to_string(),
                new_box.box_name,
                client_id.as_str(),
                new_box.application_id,
                Self::format_datetime(&Utc::now()),
            ],
        );

        match inserted {
            Ok(_) => Ok(CreateBoxOutcome::Created(new_box)),
            Err(e) if Self::is_unique_violation(&e) => {
                // Lost a race to a concurrent creator, hand back the winner
                let existing = Self::query_box_by_name(&conn, box_name, client_id)?
                    .context("Box disappeared after unique violation")?;
                Ok(CreateBoxOutcome::Retrieved(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_box(&self, box_id: &BoxId) -> Result<Option<NotificationBox>> {
        let conn = self.conn.lock().unwrap();
        Self::query_box_by_id(&conn, box_id)
    }

    fn get_box_by_name_and_client_id(
        &self,
        box_name: &str,
        client_id: &ClientId,
    ) -> Result<Option<NotificationBox>> {
        let conn = self.conn.lock().unwrap();
        Self::query_box_by_name(&conn, box_name, client_id)
    }

    fn update_subscriber(
        &self,
        box_id: &BoxId,
        subscriber: Option<Subscriber>,
    ) -> Result<UpdateSubscriberOutcome> {
        let conn = self.conn.lock().unwrap();

        let (subscriber_type, callback_url, subscribed_at) = match &subscriber {
            Some(Subscriber::Push {
                callback_url,
                subscribed_at,
            }) => (
                Some("PUSH"),
                Some(callback_url.clone()),
                Some(Self::format_datetime(subscribed_at)),
            ),
            Some(Subscriber::Pull { subscribed_at }) => {
                (Some("PULL"), None, Some(Self::format_datetime(subscribed_at)))
            }
            None => (None, None, None),
        };

        let modified = conn.execute(
            r#"UPDATE boxes
               SET subscriber_type = ?1, callback_url = ?2, subscribed_at = ?3
               WHERE box_id = ?4"#,
            params![subscriber_type, callback_url, subscribed_at, box_id.to_string()],
        )?;

        if modified == 0 {
            return Ok(UpdateSubscriberOutcome::BoxNotFound);
        }

        let updated = Self::query_box_by_id(&conn, box_id)?
            .context("Box disappeared during subscriber update")?;
        Ok(UpdateSubscriberOutcome::Updated(updated))
    }
}

impl ClientStore for SqliteHubStore {
    fn find_or_create_client(&self, client_id: &ClientId) -> Result<Client> {
        let conn = self.conn.lock().unwrap();

        let existing: Option<String> = conn
            .query_row(
                "SELECT secrets FROM clients WHERE client_id = ?1",
                [client_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(secrets_json) = existing {
            let secrets: Vec<ClientSecret> = serde_json::from_str(&secrets_json)
                .context("Failed to parse stored client secrets")?;
            return Ok(Client {
                client_id: client_id.clone(),
                secrets,
            });
        }

        let secrets = vec![ClientSecret::generate()];
        let secrets_json = serde_json::to_string(&secrets)?;

        let inserted = conn.execute(
            "INSERT INTO clients (client_id, secrets, created_at) VALUES (?1, ?2, ?3)",
            params![
                client_id.as_str(),
                secrets_json,
                Self::format_datetime(&Utc::now())
            ],
        );

        match inserted {
            Ok(_) => {
                info!("Created client {} on first reference", client_id);
                Ok(Client {
                    client_id: client_id.clone(),
                    secrets,
                })
            }
            Err(e) if Self::is_unique_violation(&e) => {
                // A concurrent caller created it first, use theirs
                let secrets_json: String = conn.query_row(
                    "SELECT secrets FROM clients WHERE client_id = ?1",
                    [client_id.as_str()],
                    |row| row.get(0),
                )?;
                let secrets: Vec<ClientSecret> = serde_json::from_str(&secrets_json)
                    .context("Failed to parse stored client secrets")?;
                Ok(Client {
                    client_id: client_id.clone(),
                    secrets,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_client_secrets(&self, client_id: &ClientId) -> Result<Option<Vec<ClientSecret>>> {
        let conn = self.conn.lock().unwrap();
        let secrets_json: Option<String> = conn
            .query_row(
                "SELECT secrets FROM clients WHERE client_id = ?1",
                [client_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        secrets_json
            .map(|json| serde_json::from_str(&json).context("Failed to parse stored client secrets"))
            .transpose()
    }
}

impl NotificationStore for SqliteHubStore {
    fn save(&self, notification: &Notification) -> Result<Option<NotificationId>> {
        let encrypted = self.cipher.encrypt(&notification.message)?;

        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            r#"INSERT INTO notifications (
                notification_id, box_id, message_content_type,
                message_nonce, message_ciphertext, status, created_at,
                retry_after, read_at, pushed_at, retry_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                notification.notification_id.to_string(),
                notification.box_id.to_string(),
                notification.message_content_type.as_mime(),
                encrypted.nonce,
                encrypted.ciphertext,
                notification.status.as_db_str(),
                Self::format_datetime(&notification.created_at),
                notification.retry_after.as_ref().map(Self::format_datetime),
                notification.read_at.as_ref().map(Self::format_datetime),
                notification.pushed_at.as_ref().map(Self::format_datetime),
                notification.retry_count,
            ],
        );

        match inserted {
            Ok(_) => Ok(Some(notification.notification_id)),
            Err(e) if Self::is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_by_box_id_and_filters(
        &self,
        box_id: &BoxId,
        status: Option<NotificationStatus>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from("SELECT * FROM notifications WHERE box_id = ?");
        let mut query_params: Vec<Box<dyn ToSql>> = vec![Box::new(box_id.to_string())];

        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            query_params.push(Box::new(status.as_db_str().to_string()));
        }
        if let Some(from) = from {
            sql.push_str(" AND created_at >= ?");
            query_params.push(Box::new(Self::format_datetime(&from)));
        }
        if let Some(to) = to {
            sql.push_str(" AND created_at <= ?");
            query_params.push(Box::new(Self::format_datetime(&to)));
        }
        sql.push_str(" ORDER BY created_at ASC LIMIT ?");
        query_params.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn ToSql> = query_params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(params_refs.as_slice(), Self::row_to_encrypted_notification)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|pair| self.decrypt_notification(pair))
            .collect()
    }

    fn acknowledge(&self, box_id: &BoxId, ids: &[NotificationId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            r#"UPDATE notifications
               SET status = 'ACKNOWLEDGED', read_at = ?
               WHERE box_id = ? AND status = 'PENDING' AND notification_id IN ({})"#,
            placeholders
        );

        let now = Self::format_datetime(&Utc::now());
        let mut query_params: Vec<Box<dyn ToSql>> =
            vec![Box::new(now), Box::new(box_id.to_string())];
        for id in ids {
            query_params.push(Box::new(id.to_string()));
        }

        let params_refs: Vec<&dyn ToSql> = query_params.iter().map(|p| p.as_ref()).collect();
        let modified = conn.execute(&sql, params_refs.as_slice())?;
        Ok(modified)
    }

    fn update_status(
        &self,
        notification_id: &NotificationId,
        status: NotificationStatus,
    ) -> Result<Notification> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        if status == NotificationStatus::Acknowledged {
            conn.execute(
                "UPDATE notifications SET status = ?1, pushed_at = ?2 WHERE notification_id = ?3",
                params![status.as_db_str(), now, notification_id.to_string()],
            )?;
        } else {
            conn.execute(
                "UPDATE notifications SET status = ?1 WHERE notification_id = ?2",
                params![status.as_db_str(), notification_id.to_string()],
            )?;
        }

        self.query_notification(&conn, notification_id)?
            .with_context(|| format!("Notification {} not found", notification_id))
    }

    fn update_retry_after(
        &self,
        notification_id: &NotificationId,
        when: DateTime<Utc>,
    ) -> Result<Notification> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"UPDATE notifications
               SET retry_after = ?1, retry_count = retry_count + 1
               WHERE notification_id = ?2"#,
            params![Self::format_datetime(&when), notification_id.to_string()],
        )?;

        self.query_notification(&conn, notification_id)?
            .with_context(|| format!("Notification {} not found", notification_id))
    }

    fn retry_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(Notification, NotificationBox)>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"SELECT
                   n.notification_id, n.box_id, n.message_content_type,
                   n.message_nonce, n.message_ciphertext, n.status,
                   n.created_at, n.retry_after, n.read_at, n.pushed_at,
                   n.retry_count,
                   b.box_name, b.client_id AS box_client_id,
                   b.application_id, b.subscriber_type, b.callback_url,
                   b.subscribed_at
               FROM notifications n
               JOIN boxes b ON b.box_id = n.box_id
               WHERE n.status = 'PENDING'
                 AND (n.retry_after IS NULL OR n.retry_after <= ?1)
                 AND b.subscriber_type = 'PUSH'
                 AND b.callback_url IS NOT NULL
                 AND b.callback_url != ''
               ORDER BY n.created_at ASC
               LIMIT ?2"#,
        )?;

        let rows = stmt
            .query_map(
                params![Self::format_datetime(&now), limit as i64],
                |row| {
                    let pair = Self::row_to_encrypted_notification(row)?;
                    let box_id = pair.0.box_id;
                    let subscribed_at: Option<String> = row.get("subscribed_at")?;
                    let notification_box = NotificationBox {
                        box_id,
                        box_name: row.get("box_name")?,
                        box_creator: BoxCreator {
                            client_id: ClientId(row.get("box_client_id")?),
                        },
                        application_id: row.get("application_id")?,
                        subscriber: Some(Subscriber::Push {
                            callback_url: row.get::<_, Option<String>>("callback_url")?.unwrap_or_default(),
                            subscribed_at: subscribed_at
                                .map(|s| Self::parse_datetime(&s))
                                .unwrap_or_else(Utc::now),
                        }),
                    };
                    Ok((pair, notification_box))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(pair, notification_box)| {
                Ok((self.decrypt_notification(pair)?, notification_box))
            })
            .collect()
    }

    fn purge_expired(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now() - ttl;
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM notifications WHERE created_at <= ?1",
            [Self::format_datetime(&cutoff)],
        )?;
        if deleted > 0 {
            info!("Purged {} expired notifications", deleted);
        }
        Ok(deleted)
    }
}
