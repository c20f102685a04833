//! SQLite-backed catalog store.

use super::models::*;
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::CatalogStore;
use crate::search::SearchQuery;
use crate::sqlite_persistence;
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

const PART_VIEW_COLUMNS: &str = "p.id, sh.lego_id, sh.name, c.id, c.name, i.static_path";

const PART_VIEW_JOINS: &str = "FROM parts p \
     JOIN shapes sh ON sh.id = p.shape_id \
     LEFT JOIN colors c ON c.id = p.color_id \
     LEFT JOIN images i ON i.id = p.image_id";

const PART_VIEW_ORDER: &str = "sh.number IS NULL, sh.number, sh.lego_id, c.name";

#[derive(Clone)]
pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = sqlite_persistence::open_database(&db_path, CATALOG_VERSIONED_SCHEMAS, "catalog")?;
        info!("Catalog db ready at {:?}", db_path.as_ref());
        Ok(SqliteCatalogStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = sqlite_persistence::open_in_memory(CATALOG_VERSIONED_SCHEMAS, "catalog")?;
        Ok(SqliteCatalogStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Catalog db connection mutex poisoned"))
    }
}

fn shape_from_row(row: &Row) -> rusqlite::Result<Shape> {
    Ok(Shape {
        id: row.get(0)?,
        lego_id: row.get(1)?,
        name: row.get(2)?,
        number: row.get(3)?,
    })
}

fn image_from_row(row: &Row) -> rusqlite::Result<Image> {
    Ok(Image {
        id: row.get(0)?,
        static_path: row.get(1)?,
        origin_url: row.get(2)?,
    })
}

fn part_from_row(row: &Row) -> rusqlite::Result<Part> {
    Ok(Part {
        id: row.get(0)?,
        shape_id: row.get(1)?,
        color_id: row.get(2)?,
        image_id: row.get(3)?,
    })
}

fn set_from_row(row: &Row) -> rusqlite::Result<LegoSet> {
    Ok(LegoSet {
        id: row.get(0)?,
        lego_id: row.get(1)?,
        name: row.get(2)?,
        image_id: row.get(3)?,
    })
}

fn set_summary_from_row(row: &Row) -> rusqlite::Result<SetSummary> {
    Ok(SetSummary {
        lego_id: row.get(0)?,
        name: row.get(1)?,
        image: row.get(2)?,
    })
}

/// Maps the `PART_VIEW_COLUMNS` starting at column `offset`.
fn part_view_from_row(row: &Row, offset: usize) -> rusqlite::Result<PartView> {
    let color_id: Option<i64> = row.get(offset + 3)?;
    let color_name: Option<String> = row.get(offset + 4)?;
    let color = match (color_id, color_name) {
        (Some(id), Some(name)) => Some(Color { id, name }),
        _ => None,
    };
    Ok(PartView {
        id: row.get(offset)?,
        shape_lego_id: row.get(offset + 1)?,
        shape_name: row.get(offset + 2)?,
        color,
        image: row.get(offset + 5)?,
    })
}

/// Columns: owner id, label parts, image id, static path, origin url.
fn image_subject_sql(owner: ImageOwner) -> &'static str {
    match owner {
        ImageOwner::Part => {
            "SELECT p.id, sh.lego_id, sh.name, c.name, i.id, i.static_path, i.origin_url \
             FROM parts p \
             JOIN shapes sh ON sh.id = p.shape_id \
             LEFT JOIN colors c ON c.id = p.color_id \
             LEFT JOIN images i ON i.id = p.image_id"
        }
        ImageOwner::Set => {
            "SELECT s.id, s.lego_id, s.name, NULL, i.id, i.static_path, i.origin_url \
             FROM sets s \
             LEFT JOIN images i ON i.id = s.image_id"
        }
    }
}

fn image_subject_from_row(owner: ImageOwner, row: &Row) -> rusqlite::Result<ImageSubject> {
    let lego_id: String = row.get(1)?;
    let name: String = row.get(2)?;
    let color: Option<String> = row.get(3)?;
    let label = match color {
        Some(color) => format!("{} {}, {}", lego_id, name, color),
        None => format!("{} {}", lego_id, name),
    };
    let image = match row.get::<_, Option<i64>>(4)? {
        Some(id) => Some(Image {
            id,
            static_path: row.get(5)?,
            origin_url: row.get(6)?,
        }),
        None => None,
    };
    Ok(ImageSubject {
        owner,
        owner_id: row.get(0)?,
        label,
        image,
    })
}

/// Named parameters actually referenced by `sql`; sqlite rejects unused ones.
fn search_params<'a>(
    sql: &str,
    contains: &'a String,
    prefix: &'a String,
    limit: &'a i64,
    offset: &'a i64,
) -> Vec<(&'static str, &'a dyn ToSql)> {
    let mut params: Vec<(&'static str, &'a dyn ToSql)> = Vec::with_capacity(4);
    if sql.contains(":contains") {
        params.push((":contains", contains));
    }
    if sql.contains(":prefix") {
        params.push((":prefix", prefix));
    }
    params.push((":limit", limit));
    params.push((":offset", offset));
    params
}

impl CatalogStore for SqliteCatalogStore {
    fn get_shape_by_lego_id(&self, lego_id: &str) -> Result<Option<Shape>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, lego_id, name, number FROM shapes WHERE lego_id = ?1",
                params![lego_id],
                shape_from_row,
            )
            .optional()?)
    }

    fn create_shape(&self, lego_id: &str, name: &str) -> Result<Shape> {
        let conn = self.conn()?;
        let number = shape_number(lego_id);
        conn.execute(
            "INSERT INTO shapes (lego_id, name, number) VALUES (?1, ?2, ?3)",
            params![lego_id, name, number],
        )
        .with_context(|| format!("Failed to create shape {}", lego_id))?;
        Ok(Shape {
            id: conn.last_insert_rowid(),
            lego_id: lego_id.to_string(),
            name: name.to_string(),
            number,
        })
    }

    fn update_shape_name(&self, shape_id: i64, name: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE shapes SET name = ?1 WHERE id = ?2",
            params![name, shape_id],
        )?;
        if updated == 0 {
            bail!("Shape {} not found", shape_id);
        }
        Ok(())
    }

    fn get_color(&self, color_id: i64) -> Result<Option<Color>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, name FROM colors WHERE id = ?1",
                params![color_id],
                |r| {
                    Ok(Color {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    fn get_or_create_color(&self, name: &str) -> Result<(Color, bool)> {
        let conn = self.conn()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM colors WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        let (id, created) = match existing {
            Some(id) => (id, false),
            None => {
                conn.execute("INSERT INTO colors (name) VALUES (?1)", params![name])
                    .with_context(|| format!("Failed to create color {}", name))?;
                (conn.last_insert_rowid(), true)
            }
        };
        Ok((
            Color {
                id,
                name: name.to_string(),
            },
            created,
        ))
    }

    fn get_image(&self, image_id: i64) -> Result<Option<Image>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, static_path, origin_url FROM images WHERE id = ?1",
                params![image_id],
                image_from_row,
            )
            .optional()?)
    }

    fn get_or_create_image(&self, origin_url: &str) -> Result<(Image, bool)> {
        if origin_url.is_empty() {
            bail!("Refusing to create an image without origin URL");
        }
        let conn = self.conn()?;
        let existing = conn
            .query_row(
                "SELECT id, static_path, origin_url FROM images WHERE origin_url = ?1 ORDER BY id LIMIT 1",
                params![origin_url],
                image_from_row,
            )
            .optional()?;
        if let Some(image) = existing {
            return Ok((image, false));
        }
        conn.execute(
            "INSERT INTO images (origin_url) VALUES (?1)",
            params![origin_url],
        )?;
        Ok((
            Image {
                id: conn.last_insert_rowid(),
                static_path: None,
                origin_url: Some(origin_url.to_string()),
            },
            true,
        ))
    }

    fn set_image_static_path(&self, image_id: i64, static_path: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE images SET static_path = ?1 WHERE id = ?2",
            params![static_path, image_id],
        )?;
        if updated == 0 {
            bail!("Image {} not found", image_id);
        }
        Ok(())
    }

    fn discard_image(&self, image_id: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE parts SET image_id = NULL WHERE image_id = ?1",
            params![image_id],
        )?;
        tx.execute(
            "UPDATE sets SET image_id = NULL WHERE image_id = ?1",
            params![image_id],
        )?;
        tx.execute("DELETE FROM images WHERE id = ?1", params![image_id])?;
        tx.commit()?;
        Ok(())
    }

    fn get_image_subject(
        &self,
        owner: ImageOwner,
        owner_id: i64,
    ) -> Result<Option<ImageSubject>> {
        let conn = self.conn()?;
        let alias = match owner {
            ImageOwner::Part => "p",
            ImageOwner::Set => "s",
        };
        let sql = format!("{} WHERE {}.id = ?1", image_subject_sql(owner), alias);
        Ok(conn
            .query_row(&sql, params![owner_id], |r| image_subject_from_row(owner, r))
            .optional()?)
    }

    fn latest_missing_static_image(&self, owner: ImageOwner) -> Result<Option<ImageSubject>> {
        let conn = self.conn()?;
        let alias = match owner {
            ImageOwner::Part => "p",
            ImageOwner::Set => "s",
        };
        let sql = format!(
            "{} WHERE i.static_path IS NULL AND i.origin_url IS NOT NULL ORDER BY {}.id DESC LIMIT 1",
            image_subject_sql(owner),
            alias
        );
        Ok(conn
            .query_row(&sql, [], |r| image_subject_from_row(owner, r))
            .optional()?)
    }

    fn get_part(&self, part_id: i64) -> Result<Option<Part>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, shape_id, color_id, image_id FROM parts WHERE id = ?1",
                params![part_id],
                part_from_row,
            )
            .optional()?)
    }

    fn get_part_by_shape_and_color(
        &self,
        shape_id: i64,
        color_id: Option<i64>,
    ) -> Result<Option<Part>> {
        let conn = self.conn()?;
        // IS so that a missing color matches the colorless part
        Ok(conn
            .query_row(
                "SELECT id, shape_id, color_id, image_id FROM parts WHERE shape_id = ?1 AND color_id IS ?2",
                params![shape_id, color_id],
                part_from_row,
            )
            .optional()?)
    }

    fn create_part(
        &self,
        shape_id: i64,
        color_id: Option<i64>,
        image_id: Option<i64>,
    ) -> Result<Part> {
        let conn = self.conn()?;
        let duplicate: Option<i64> = conn
            .query_row(
                "SELECT id FROM parts WHERE shape_id = ?1 AND color_id IS ?2",
                params![shape_id, color_id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = duplicate {
            bail!(
                "Part {} already exists for shape {} and color {:?}",
                id,
                shape_id,
                color_id
            );
        }
        conn.execute(
            "INSERT INTO parts (shape_id, color_id, image_id) VALUES (?1, ?2, ?3)",
            params![shape_id, color_id, image_id],
        )?;
        Ok(Part {
            id: conn.last_insert_rowid(),
            shape_id,
            color_id,
            image_id,
        })
    }

    fn set_part_image(&self, part_id: i64, image_id: Option<i64>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE parts SET image_id = ?1 WHERE id = ?2",
            params![image_id, part_id],
        )?;
        if updated == 0 {
            bail!("Part {} not found", part_id);
        }
        Ok(())
    }

    fn get_set(&self, set_id: i64) -> Result<Option<LegoSet>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, lego_id, name, image_id FROM sets WHERE id = ?1",
                params![set_id],
                set_from_row,
            )
            .optional()?)
    }

    fn get_set_by_lego_id(&self, lego_id: &str) -> Result<Option<LegoSet>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, lego_id, name, image_id FROM sets WHERE lego_id = ?1",
                params![lego_id],
                set_from_row,
            )
            .optional()?)
    }

    fn create_set(&self, lego_id: &str, name: &str) -> Result<LegoSet> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sets (lego_id, name) VALUES (?1, ?2)",
            params![lego_id, name],
        )
        .with_context(|| format!("Failed to create set {}", lego_id))?;
        Ok(LegoSet {
            id: conn.last_insert_rowid(),
            lego_id: lego_id.to_string(),
            name: name.to_string(),
            image_id: None,
        })
    }

    fn update_set(&self, set_id: i64, name: &str, image_id: Option<i64>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sets SET name = ?1, image_id = ?2 WHERE id = ?3",
            params![name, image_id, set_id],
        )?;
        if updated == 0 {
            bail!("Set {} not found", set_id);
        }
        Ok(())
    }

    fn upsert_set_item(&self, set_id: i64, part_id: i64, quantity: u32) -> Result<SetItem> {
        if quantity == 0 {
            bail!(
                "Quantity of part {} in set {} must be at least 1",
                part_id,
                set_id
            );
        }
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO set_items (set_id, part_id, quantity) VALUES (?1, ?2, ?3) \
             ON CONFLICT (set_id, part_id) DO UPDATE SET quantity = excluded.quantity \
             RETURNING id",
            params![set_id, part_id, quantity],
            |r| r.get(0),
        )?;
        Ok(SetItem {
            id,
            set_id,
            part_id,
            quantity,
        })
    }

    fn get_set_items(&self, set_id: i64) -> Result<Vec<SetItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, set_id, part_id, quantity FROM set_items WHERE set_id = ?1 ORDER BY id",
        )?;
        let items = stmt
            .query_map(params![set_id], |r| {
                Ok(SetItem {
                    id: r.get(0)?,
                    set_id: r.get(1)?,
                    part_id: r.get(2)?,
                    quantity: r.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn list_sets(&self, page: Page) -> Result<Vec<SetSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.lego_id, s.name, i.static_path FROM sets s \
             LEFT JOIN images i ON i.id = s.image_id \
             ORDER BY s.lego_id LIMIT ?1 OFFSET ?2",
        )?;
        let sets = stmt
            .query_map(
                params![page.size as i64, page.offset() as i64],
                set_summary_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sets)
    }

    fn get_set_detail(&self, lego_id: &str) -> Result<Option<SetDetail>> {
        let conn = self.conn()?;
        let set = conn
            .query_row(
                "SELECT s.id, s.lego_id, s.name, i.static_path FROM sets s \
                 LEFT JOIN images i ON i.id = s.image_id WHERE s.lego_id = ?1",
                params![lego_id],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((set_id, lego_id, name, image)) = set else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT si.quantity, {} FROM set_items si \
             JOIN parts p ON p.id = si.part_id \
             JOIN shapes sh ON sh.id = p.shape_id \
             LEFT JOIN colors c ON c.id = p.color_id \
             LEFT JOIN images i ON i.id = p.image_id \
             WHERE si.set_id = ?1 ORDER BY {}",
            PART_VIEW_COLUMNS, PART_VIEW_ORDER
        ))?;
        let items = stmt
            .query_map(params![set_id], |r| {
                Ok(SetItemView {
                    quantity: r.get(0)?,
                    part: part_view_from_row(r, 1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(SetDetail {
            lego_id,
            name,
            image,
            items,
        }))
    }

    fn get_shape_detail(
        &self,
        lego_id: &str,
        color_id: Option<i64>,
    ) -> Result<Option<ShapeDetail>> {
        let conn = self.conn()?;
        let shape = conn
            .query_row(
                "SELECT id, lego_id, name, number FROM shapes WHERE lego_id = ?1",
                params![lego_id],
                shape_from_row,
            )
            .optional()?;
        let Some(shape) = shape else {
            return Ok(None);
        };

        let mut parts_stmt = conn.prepare(&format!(
            "SELECT {} {} WHERE p.shape_id = ?1 AND (?2 IS NULL OR p.color_id = ?2) ORDER BY {}",
            PART_VIEW_COLUMNS, PART_VIEW_JOINS, PART_VIEW_ORDER
        ))?;
        let parts = parts_stmt
            .query_map(params![shape.id, color_id], |r| part_view_from_row(r, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if color_id.is_some() && parts.is_empty() {
            return Ok(None);
        }

        let mut sets_stmt = conn.prepare(
            "SELECT s.lego_id, s.name, si.quantity FROM set_items si \
             JOIN sets s ON s.id = si.set_id \
             WHERE si.part_id = ?1 ORDER BY s.lego_id",
        )?;
        let mut usages = Vec::with_capacity(parts.len());
        for part in parts {
            let sets = sets_stmt
                .query_map(params![part.id], |r| {
                    Ok(SetMembership {
                        lego_id: r.get(0)?,
                        name: r.get(1)?,
                        quantity: r.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            usages.push(PartUsage { part, sets });
        }

        Ok(Some(ShapeDetail {
            lego_id: shape.lego_id,
            name: shape.name,
            number: shape.number,
            parts: usages,
        }))
    }

    fn search(&self, query: &SearchQuery, page: Page) -> Result<SearchResults> {
        let conn = self.conn()?;
        let contains = query.contains_pattern();
        let prefix = query.prefix_pattern();
        let limit = page.size as i64;
        let offset = page.offset() as i64;

        let sets = match query.mode().set_condition() {
            Some(condition) => {
                let sql = format!(
                    "SELECT s.lego_id, s.name, i.static_path FROM sets s \
                     LEFT JOIN images i ON i.id = s.image_id \
                     WHERE {} ORDER BY s.lego_id LIMIT :limit OFFSET :offset",
                    condition
                );
                let mut stmt = conn.prepare(&sql)?;
                let params = search_params(&sql, &contains, &prefix, &limit, &offset);
                let sets = stmt
                    .query_map(params.as_slice(), set_summary_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                sets
            }
            None => Vec::new(),
        };

        let sql = format!(
            "SELECT {} {} WHERE {} ORDER BY {} LIMIT :limit OFFSET :offset",
            PART_VIEW_COLUMNS,
            PART_VIEW_JOINS,
            query.mode().part_condition(),
            PART_VIEW_ORDER
        );
        let mut stmt = conn.prepare(&sql)?;
        let params = search_params(&sql, &contains, &prefix, &limit, &offset);
        let parts = stmt
            .query_map(params.as_slice(), |r| part_view_from_row(r, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(SearchResults { sets, parts })
    }

    fn counts(&self) -> Result<CatalogCounts> {
        let conn = self.conn()?;
        let counts = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM shapes), (SELECT COUNT(*) FROM colors), \
             (SELECT COUNT(*) FROM parts), (SELECT COUNT(*) FROM sets), \
             (SELECT COUNT(*) FROM images)",
            [],
            |r| {
                Ok(CatalogCounts {
                    shapes: r.get::<_, i64>(0)? as usize,
                    colors: r.get::<_, i64>(1)? as usize,
                    parts: r.get::<_, i64>(2)? as usize,
                    sets: r.get::<_, i64>(3)? as usize,
                    images: r.get::<_, i64>(4)? as usize,
                })
            },
        )?;
        Ok(counts)
    }
}
