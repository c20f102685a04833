mod versioned_schema;

pub use versioned_schema::{
    migrate_if_needed, Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
    BASE_DB_VERSION, DEFAULT_TIMESTAMP,
};

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// Opens (or creates) the database at `db_path` and brings it to the latest
/// version in `schemas`.
pub fn open_database<P: AsRef<Path>>(
    db_path: P,
    schemas: &[VersionedSchema],
    db_name: &str,
) -> Result<Connection> {
    let db_path = db_path.as_ref();
    let mut conn = Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            | rusqlite::OpenFlags::SQLITE_OPEN_URI
            | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Failed to open {} database at {:?}", db_name, db_path))?;
    migrate_if_needed(&mut conn, schemas, db_name)?;
    Ok(conn)
}

/// Same as [`open_database`] on a private in-memory database.
pub fn open_in_memory(schemas: &[VersionedSchema], db_name: &str) -> Result<Connection> {
    let mut conn = Connection::open_in_memory()?;
    migrate_if_needed(&mut conn, schemas, db_name)?;
    Ok(conn)
}
