use anyhow::{bail, Context, Result};
use rusqlite::{params, types::Type, Connection};
use tracing::info;

pub const DEFAULT_TIMESTAMP: &str = "(cast(strftime('%s','now') as int))";

pub const BASE_DB_VERSION: usize = 77700;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

impl SqlType {
    fn sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    Cascade,
    SetNull,
    Restrict,
}

impl ForeignKeyOnChange {
    fn sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::Cascade => "CASCADE",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::Restrict => "RESTRICT",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<S>,
    pub foreign_key: Option<&'a ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut column_defs = Vec::with_capacity(self.columns.len());
        for column in self.columns {
            let mut def = format!("{} {}", column.name, column.sql_type.sql());
            if column.is_primary_key {
                def.push_str(" PRIMARY KEY");
            }
            if column.non_null {
                def.push_str(" NOT NULL");
            }
            if let Some(default_value) = column.default_value {
                def.push_str(&format!(" DEFAULT {}", default_value));
            }
            if let Some(fk) = column.foreign_key {
                def.push_str(&format!(
                    " REFERENCES {}({}) ON DELETE {}",
                    fk.foreign_table,
                    fk.foreign_column,
                    fk.on_delete.sql()
                ));
            }
            column_defs.push(def);
        }
        for unique_constraint in self.unique_constraints {
            column_defs.push(format!("UNIQUE ({})", unique_constraint.join(", ")));
        }

        conn.execute(
            &format!("CREATE TABLE {} ({});", self.name, column_defs.join(", ")),
            params![],
        )
        .with_context(|| format!("Failed to create table {}", self.name))?;

        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, column_name
                ),
                params![],
            )?;
        }
        Ok(())
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual_columns = stmt
            .query_map(params![], |row| {
                let sql_type = match row.get::<_, String>(2)?.as_str() {
                    "TEXT" => &SqlType::Text,
                    "INTEGER" => &SqlType::Integer,
                    _ => {
                        return Err(rusqlite::Error::InvalidColumnType(
                            2,
                            "type".to_string(),
                            Type::Text,
                        ))
                    }
                };
                Ok(Column {
                    name: row.get::<_, String>(1)?,
                    sql_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get::<_, Option<String>>(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                    foreign_key: None,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Error reading columns of table {}", self.name))?;

        if actual_columns.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}",
                self.name,
                actual_columns.len(),
                self.columns.len()
            );
        }

        for (actual, expected) in actual_columns.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != expected.sql_type
                || actual.non_null != expected.non_null
                || actual.is_primary_key != expected.is_primary_key
            {
                bail!(
                    "Table {} column {} definition mismatch",
                    self.name,
                    expected.name
                );
            }
            // sqlite may report defaults wrapped in parentheses
            let strip = |s: &str| s.trim_start_matches('(').trim_end_matches(')').to_string();
            if actual.default_value.as_deref().map(strip) != expected.default_value.map(strip) {
                bail!(
                    "Table {} column {} default value mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.default_value,
                    actual.default_value
                );
            }
        }

        for (index_name, _) in self.indices {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(()),
                )
                .is_ok();
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }

        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.pragma_update(None, "user_version", (BASE_DB_VERSION + self.version) as i64)?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Brings `conn` to the latest schema in `schemas`, creating it from scratch
/// on an empty database and running the migrations in order otherwise.
pub fn migrate_if_needed(
    conn: &mut Connection,
    schemas: &[VersionedSchema],
    db_name: &str,
) -> Result<()> {
    let latest = schemas
        .last()
        .with_context(|| format!("No schema defined for {} db", db_name))?;

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?;
    if table_count == 0 {
        info!("Creating {} db schema at version {}", db_name, latest.version);
        return latest.create(conn);
    }

    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    let db_version = db_version as usize;
    if db_version < BASE_DB_VERSION {
        bail!(
            "{} db has unknown user_version {}, refusing to touch it",
            db_name,
            db_version
        );
    }
    let mut current_version = db_version - BASE_DB_VERSION;
    if current_version > latest.version {
        bail!(
            "{} db version {} is newer than supported version {}",
            db_name,
            current_version,
            latest.version
        );
    }

    if current_version < latest.version {
        let from_version = current_version;
        let tx = conn.transaction()?;
        for schema in schemas.iter().filter(|s| s.version > from_version) {
            if let Some(migration) = schema.migration {
                info!(
                    "Migrating {} db from version {} to {}",
                    db_name, current_version, schema.version
                );
                migration(&tx)?;
            }
            current_version = schema.version;
        }
        tx.pragma_update(
            None,
            "user_version",
            (BASE_DB_VERSION + current_version) as i64,
        )?;
        tx.commit()?;
    }

    conn.execute("PRAGMA foreign_keys = ON;", params![])?;
    latest.validate(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BINS_TABLE: Table = Table {
        name: "bins",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("label", &SqlType::Text, non_null = true),
        ],
        indices: &[("idx_bins_label", "label")],
        unique_constraints: &[&["label"]],
    };

    const BINS_TABLE_V1: Table = Table {
        name: "bins",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("label", &SqlType::Text, non_null = true),
            sqlite_column!("capacity", &SqlType::Integer, default_value = Some("10")),
        ],
        indices: &[("idx_bins_label", "label")],
        unique_constraints: &[&["label"]],
    };

    fn add_capacity_column(conn: &Connection) -> Result<()> {
        conn.execute("ALTER TABLE bins ADD COLUMN capacity INTEGER DEFAULT 10", [])?;
        Ok(())
    }

    const SCHEMAS: &[VersionedSchema] = &[
        VersionedSchema {
            version: 0,
            tables: &[BINS_TABLE],
            migration: None,
        },
        VersionedSchema {
            version: 1,
            tables: &[BINS_TABLE_V1],
            migration: Some(add_capacity_column),
        },
    ];

    const BINS_TABLE_V2: Table = Table {
        name: "bins",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("label", &SqlType::Text, non_null = true),
            sqlite_column!("capacity", &SqlType::Integer, default_value = Some("10")),
            sqlite_column!("shelf", &SqlType::Text),
        ],
        indices: &[("idx_bins_label", "label")],
        unique_constraints: &[&["label"]],
    };

    fn add_shelf_column(conn: &Connection) -> Result<()> {
        conn.execute("ALTER TABLE bins ADD COLUMN shelf TEXT", [])?;
        Ok(())
    }

    const SCHEMAS_V2: &[VersionedSchema] = &[
        VersionedSchema {
            version: 0,
            tables: &[BINS_TABLE],
            migration: None,
        },
        VersionedSchema {
            version: 1,
            tables: &[BINS_TABLE_V1],
            migration: Some(add_capacity_column),
        },
        VersionedSchema {
            version: 2,
            tables: &[BINS_TABLE_V2],
            migration: Some(add_shelf_column),
        },
    ];

    fn user_version(conn: &Connection) -> usize {
        conn.query_row("PRAGMA user_version", [], |r| r.get::<_, i64>(0))
            .unwrap() as usize
    }

    #[test]
    fn creates_latest_schema_on_empty_db() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_if_needed(&mut conn, SCHEMAS, "test").unwrap();

        assert_eq!(user_version(&conn), BASE_DB_VERSION + 1);
        BINS_TABLE_V1.validate(&conn).unwrap();
    }

    #[test]
    fn migrates_old_schema_forward() {
        let mut conn = Connection::open_in_memory().unwrap();
        SCHEMAS[0].create(&conn).unwrap();
        conn.execute("INSERT INTO bins (label) VALUES ('red bricks')", [])
            .unwrap();

        migrate_if_needed(&mut conn, SCHEMAS, "test").unwrap();

        assert_eq!(user_version(&conn), BASE_DB_VERSION + 1);
        let (label, capacity): (String, i64) = conn
            .query_row("SELECT label, capacity FROM bins", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(label, "red bricks");
        assert_eq!(capacity, 10);
    }

    #[test]
    fn migrates_across_several_versions() {
        let mut conn = Connection::open_in_memory().unwrap();
        SCHEMAS[0].create(&conn).unwrap();
        conn.execute("INSERT INTO bins (label) VALUES ('plates')", [])
            .unwrap();

        migrate_if_needed(&mut conn, SCHEMAS_V2, "test").unwrap();

        assert_eq!(user_version(&conn), BASE_DB_VERSION + 2);
        BINS_TABLE_V2.validate(&conn).unwrap();
        let (capacity, shelf): (i64, Option<String>) = conn
            .query_row("SELECT capacity, shelf FROM bins", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(capacity, 10);
        assert_eq!(shelf, None);

        // Reopening at the latest version runs nothing.
        migrate_if_needed(&mut conn, SCHEMAS_V2, "test").unwrap();
        assert_eq!(user_version(&conn), BASE_DB_VERSION + 2);
    }

    #[test]
    fn validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE bins (id INTEGER PRIMARY KEY, label TEXT NOT NULL, UNIQUE (label))",
            [],
        )
        .unwrap();

        let err = BINS_TABLE.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing index"));
        assert!(err.contains("idx_bins_label"));
    }

    #[test]
    fn validate_detects_column_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE bins (id INTEGER PRIMARY KEY, label TEXT)", [])
            .unwrap();
        conn.execute("CREATE INDEX idx_bins_label ON bins(label)", [])
            .unwrap();

        let err = BINS_TABLE.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("label"));
    }

    #[test]
    fn refuses_foreign_db() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE other (id INTEGER)", []).unwrap();

        assert!(migrate_if_needed(&mut conn, SCHEMAS, "test").is_err());
    }
}
