//! Record of completed uploads.
//!
//! A card asks about every photo before sending it. When the ledger holds a
//! record for the exact same card, name, size and signature the card is told
//! the upload is already complete.
use std::path::Path;

use log::debug;
use rusqlite::{
    params,
    Connection,
    OptionalExtension,
};

use crate::error::ServiceResult;

/// Natural key of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoKey {
    pub mac: String,
    pub filename: String,
    pub filesize: i64,
    pub filesignature: String,
}

/// A completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    pub key: PhotoKey,
    pub fileid: i64,
    pub encryption: String,
    pub flags: i64,
    /// Unix time the upload was placed.
    pub ctime: i64,
}

pub trait Ledger {
    /// File id of the completed upload matching `key`, if any.
    fn lookup(&self, key: &PhotoKey) -> ServiceResult<Option<i64>>;

    /// Add a completed upload.
    fn register(&self, record: &PhotoRecord) -> ServiceResult<()>;
}

/// Ledger used when no database is configured. Nothing is ever found, so
/// every upload is treated as new.
pub struct NoLedger;

impl Ledger for NoLedger {
    fn lookup(&self, _key: &PhotoKey) -> ServiceResult<Option<i64>> {
        Ok(None)
    }

    fn register(&self, _record: &PhotoRecord) -> ServiceResult<()> {
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS photo (
    ctime INTEGER NOT NULL,
    mac TEXT NOT NULL,
    fileid INTEGER NOT NULL,
    filename TEXT NOT NULL,
    filesize INTEGER NOT NULL,
    filesignature TEXT NOT NULL,
    encryption TEXT NOT NULL,
    flags INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS photo_upload ON photo (mac, filename, filesize, filesignature);
"#;

/// Ledger kept in an SQLite database.
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> ServiceResult<SqliteLedger> {
        debug!("opening ledger {:?}", path);
        SqliteLedger::with_connection(Connection::open(path)?)
    }

    pub fn with_connection(conn: Connection) -> ServiceResult<SqliteLedger> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteLedger{
            conn,
        })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Ledger for SqliteLedger {
    fn lookup(&self, key: &PhotoKey) -> ServiceResult<Option<i64>> {
        let r = self.conn.query_row(
            "SELECT fileid FROM photo
             WHERE mac = ?1 AND filename = ?2 AND filesize = ?3 AND filesignature = ?4",
            params![key.mac.to_lowercase(), key.filename, key.filesize, key.filesignature],
            |row| row.get(0),
        ).optional()?;
        Ok(r)
    }

    fn register(&self, record: &PhotoRecord) -> ServiceResult<()> {
        self.conn.execute(
            "INSERT INTO photo (ctime, mac, fileid, filename, filesize, filesignature, encryption, flags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.ctime,
                record.key.mac.to_lowercase(),
                record.fileid,
                record.key.filename,
                record.key.filesize,
                record.key.filesignature,
                record.encryption,
                record.flags,
            ],
        )?;
        Ok(())
    }
}
