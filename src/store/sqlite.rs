use super::{filter_needle, SignatureStore};
use crate::models::{Signature, SignatureMetadata};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Exponential backoff for commits that hit a busy or locked database.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            factor: 2,
        }
    }
}

fn is_transient(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

impl RetryPolicy {
    pub fn run<T, F>(&self, what: &str, mut op: F) -> rusqlite::Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if is_transient(&e) && attempt < self.attempts => {
                    log::warn!(
                        "[store:sqlite] {what} attempt {attempt}/{} failed ({e}), retrying in {delay:?}",
                        self.attempts
                    );
                    std::thread::sleep(delay);
                    delay *= self.factor;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Signatures in a single SQLite table, metadata kept as a JSON column.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    retry: RetryPolicy,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(&path).with_context(|| {
            format!("Failed to open signature index: {}", path.as_ref().display())
        })?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("Failed to open in-memory index")?)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS signatures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                source_msg_id TEXT NOT NULL,
                timestamp REAL,
                confidence REAL NOT NULL,
                metadata TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create signatures table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_signatures_confidence ON signatures (confidence)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            retry: RetryPolicy::default(),
        })
    }

    fn insert(conn: &Connection, signature: &Signature, metadata: &str) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO signatures (text, source_msg_id, timestamp, confidence, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                signature.text(),
                signature.source_msg_id,
                signature.timestamp,
                signature.confidence,
                metadata
            ],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("signature index connection lock poisoned"))
    }
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

impl SignatureStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn add(&self, signature: &Signature) -> Result<()> {
        self.add_batch(std::slice::from_ref(signature))
    }

    /// All rows go in one transaction; the whole transaction is retried on busy/locked.
    fn add_batch(&self, signatures: &[Signature]) -> Result<()> {
        if signatures.is_empty() {
            return Ok(());
        }
        let rows = signatures
            .iter()
            .map(|signature| {
                serde_json::to_string(&signature.metadata)
                    .map(|metadata| (signature, metadata))
                    .with_context(|| {
                        format!("Failed to serialize metadata for msg={}", signature.source_msg_id)
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.lock()?;
        self.retry
            .run("commit", || {
                let tx = conn.transaction()?;
                for (signature, metadata) in &rows {
                    Self::insert(&tx, signature, metadata)?;
                }
                tx.commit()
            })
            .with_context(|| format!("Failed to store batch of {} signatures", signatures.len()))
    }

    /// The filter matches the text or any metadata field value, never the JSON keys.
    fn query(&self, text_filter: Option<&str>, min_confidence: f64) -> Result<Vec<Signature>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT text, source_msg_id, timestamp, confidence, metadata
             FROM signatures
             WHERE confidence >= ?1
               AND (?2 IS NULL
                    OR text LIKE ?2 ESCAPE '\\'
                    OR EXISTS (
                        SELECT 1 FROM json_each(signatures.metadata) AS field
                        WHERE field.type = 'text' AND field.value LIKE ?2 ESCAPE '\\'
                    ))
             ORDER BY id",
        )?;

        let pattern = filter_needle(text_filter).map(escape_like);
        let rows = stmt
            .query_map(params![min_confidence, pattern], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(text, msg_id, timestamp, confidence, metadata)| {
                let metadata: SignatureMetadata = serde_json::from_str(&metadata)
                    .with_context(|| format!("Corrupt metadata for msg={msg_id}"))?;
                Ok(Signature::new(text, msg_id, timestamp)
                    .with_metadata(metadata)
                    .with_confidence(confidence))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;
    use std::cell::Cell;

    fn sig(text: &str, id: &str, confidence: f64) -> Signature {
        Signature::new(text, id, Some(1_700_000_000.0)).with_confidence(confidence)
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            let signature = sig("John Doe\njohn@acme.com", "m1", 0.95).with_metadata(
                SignatureMetadata {
                    name: Some("John Doe".to_string()),
                    email: Some("john@acme.com".to_string()),
                    ..Default::default()
                },
            );
            store.add_batch(&[signature, sig("Jane Smith\nExample LLC", "m2", 0.6)]).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let all = store.query(None, 0.0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].source_msg_id, "m1");
        assert_eq!(all[0].metadata.email.as_deref(), Some("john@acme.com"));
        assert_eq!(all[0].timestamp, Some(1_700_000_000.0));
        assert_eq!(all[1].metadata, SignatureMetadata::default());
    }

    #[test]
    fn test_query_filters() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add(&sig("John Doe\nACME Inc", "m1", 0.95)).unwrap();
        store.add(&sig("Jane Smith\nExample LLC", "m2", 0.6)).unwrap();
        store.add(&sig("Discount 100%_off", "m3", 0.5)).unwrap();

        assert_eq!(store.query(Some("*"), 0.0).unwrap().len(), 3);
        assert_eq!(store.query(Some(""), 0.7).unwrap().len(), 1);
        assert_eq!(store.query(Some("acme"), 0.0).unwrap()[0].source_msg_id, "m1");
        assert!(store.query(Some("example"), 0.9).unwrap().is_empty());
        // LIKE wildcards in the filter are literal
        assert_eq!(store.query(Some("0%_"), 0.0).unwrap().len(), 1);
        assert!(store.query(Some("1_0"), 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_query_ignores_metadata_keys() {
        let store = SqliteStore::open_in_memory().unwrap();
        let named = sig("John Doe\nAcme Inc", "m1", 0.8).with_metadata(SignatureMetadata {
            name: Some("John Doe".to_string()),
            ..Default::default()
        });
        let company = sig("Jane Smith\nSales", "m2", 0.8).with_metadata(SignatureMetadata {
            company: Some("Globex Corporation".to_string()),
            ..Default::default()
        });
        store.add_batch(&[named, company]).unwrap();

        assert!(store.query(Some("email"), 0.0).unwrap().is_empty());
        assert!(store.query(Some("null"), 0.0).unwrap().is_empty());
        assert!(store.query(Some("company"), 0.0).unwrap().is_empty());
        assert_eq!(store.query(Some("john"), 0.0).unwrap().len(), 1);
        // Found through the metadata value only
        let hits = store.query(Some("globex"), 0.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_msg_id, "m2");
    }

    #[test]
    fn test_retry_on_busy() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            factor: 2,
        };
        let calls = Cell::new(0);
        let result = policy.run("commit", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None))
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result.unwrap(), 3);

        calls.set(0);
        let result: rusqlite::Result<()> = policy.run("commit", || {
            calls.set(calls.get() + 1);
            Err(rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_LOCKED), None))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_non_transient_error_is_not_retried() {
        let calls = Cell::new(0);
        let result: rusqlite::Result<()> = RetryPolicy::default().run("commit", || {
            calls.set(calls.get() + 1);
            Err(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
