use std::path::Path;

use anyhow::Context;
use duckdb::types::Value;
use duckdb::{Connection, OptionalExt, params, params_from_iter};

use super::{
    ArchiveGroup, ListOrder, ListQuery, NearbyQuery, PractitionerStore, SearchRow, StoreError,
    StoreResult, TextFilters,
};
use crate::common::source_expr;
use crate::record::{Coordinates, PractitionerRecord, Specialty, Status};

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS practitioners (
        id VARCHAR PRIMARY KEY,
        name VARCHAR NOT NULL,
        specialty VARCHAR,
        city VARCHAR,
        address_full VARCHAR,
        phone_norm VARCHAR,
        website VARCHAR,
        description VARCHAR,
        photo_url VARCHAR,
        has_diploma BOOLEAN NOT NULL DEFAULT FALSE,
        lat DOUBLE,
        lng DOUBLE,
        status VARCHAR NOT NULL DEFAULT 'active',
        is_verified BOOLEAN NOT NULL DEFAULT FALSE,
        is_claimed BOOLEAN NOT NULL DEFAULT FALSE,
        intervention_count BIGINT,
        region VARCHAR,
        duplicate_of VARCHAR,
        created_at TIMESTAMP DEFAULT current_timestamp,
        updated_at TIMESTAMP DEFAULT current_timestamp,
        CHECK ((lat IS NULL) = (lng IS NULL))
    );
"#;

const RECORD_COLUMNS: &str = r#"
    id, name, specialty, city, address_full, phone_norm, website, description,
    photo_url, has_diploma, lat, lng, status, is_verified, is_claimed,
    intervention_count, region, duplicate_of,
    CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)
"#;

const BACKLOG_PREDICATE: &str = "status = 'active' AND (lat IS NULL OR lng IS NULL)";

/// Columns accepted by `import`, with the expression used when the source
/// file lacks them.
const IMPORT_COLUMNS: &[(&str, &str, &str)] = &[
    ("id", "VARCHAR", "NULL"),
    ("name", "VARCHAR", "NULL"),
    ("specialty", "VARCHAR", "NULL"),
    ("city", "VARCHAR", "NULL"),
    ("address_full", "VARCHAR", "NULL"),
    ("phone_norm", "VARCHAR", "NULL"),
    ("website", "VARCHAR", "NULL"),
    ("description", "VARCHAR", "NULL"),
    ("photo_url", "VARCHAR", "NULL"),
    ("has_diploma", "BOOLEAN", "FALSE"),
    ("lat", "DOUBLE", "NULL"),
    ("lng", "DOUBLE", "NULL"),
    ("status", "VARCHAR", "'active'"),
    ("is_verified", "BOOLEAN", "FALSE"),
    ("is_claimed", "BOOLEAN", "FALSE"),
    ("intervention_count", "BIGINT", "NULL"),
    ("region", "VARCHAR", "NULL"),
];

pub struct DuckDbStore {
    conn: Connection,
}

/// Unvalidated projection of `RECORD_COLUMNS`.
struct RawRecord {
    id: String,
    name: String,
    specialty: Option<String>,
    city: Option<String>,
    address_full: Option<String>,
    phone_norm: Option<String>,
    website: Option<String>,
    description: Option<String>,
    photo_url: Option<String>,
    has_diploma: Option<bool>,
    lat: Option<f64>,
    lng: Option<f64>,
    status: String,
    is_verified: Option<bool>,
    is_claimed: Option<bool>,
    intervention_count: Option<i64>,
    region: Option<String>,
    duplicate_of: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl RawRecord {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            specialty: row.get(2)?,
            city: row.get(3)?,
            address_full: row.get(4)?,
            phone_norm: row.get(5)?,
            website: row.get(6)?,
            description: row.get(7)?,
            photo_url: row.get(8)?,
            has_diploma: row.get(9)?,
            lat: row.get(10)?,
            lng: row.get(11)?,
            status: row.get(12)?,
            is_verified: row.get(13)?,
            is_claimed: row.get(14)?,
            intervention_count: row.get(15)?,
            region: row.get(16)?,
            duplicate_of: row.get(17)?,
            created_at: row.get(18)?,
            updated_at: row.get(19)?,
        })
    }

    fn into_record(self) -> StoreResult<PractitionerRecord> {
        // Rows written before the pair check existed may hold one coordinate.
        let coordinates = match Coordinates::from_pair(self.lat, self.lng) {
            Ok(c) => c,
            Err((lat, lng)) => {
                tracing::warn!(
                    "practitioner {} has a half-set coordinate pair (lat={lat:?}, lng={lng:?}), \
                     reading it as missing",
                    self.id
                );
                None
            }
        };
        let status: Status = self.status.parse().map_err(|e: anyhow::Error| {
            StoreError::InvalidStatus {
                id: self.id.clone(),
                message: e.to_string(),
            }
        })?;
        Ok(PractitionerRecord {
            id: self.id,
            name: self.name,
            specialty: self.specialty,
            city: self.city,
            address_full: self.address_full,
            phone_norm: self.phone_norm,
            website: self.website,
            description: self.description,
            photo_url: self.photo_url,
            has_diploma: self.has_diploma.unwrap_or(false),
            coordinates,
            status,
            is_verified: self.is_verified.unwrap_or(false),
            is_claimed: self.is_claimed.unwrap_or(false),
            intervention_count: self.intervention_count,
            region: self.region,
            duplicate_of: self.duplicate_of,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn read_err(what: &'static str) -> impl Fn(duckdb::Error) -> StoreError {
    move |e| StoreError::Read(format!("{what}: {e}"))
}

fn write_err(what: &'static str) -> impl Fn(duckdb::Error) -> StoreError {
    move |e| StoreError::Write(format!("{what}: {e}"))
}

impl DuckDbStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open duckdb at {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory duckdb")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("create practitioners table")?;
        Ok(Self { conn })
    }

    /// Inserts one record verbatim. Used by tests and by callers seeding data.
    pub fn insert(&mut self, r: &PractitionerRecord) -> anyhow::Result<()> {
        let (lat, lng) = match r.coordinates {
            Some(c) => (Some(c.lat), Some(c.lng)),
            None => (None, None),
        };
        self.conn
            .execute(
                r#"
                INSERT INTO practitioners (
                    id, name, specialty, city, address_full, phone_norm, website,
                    description, photo_url, has_diploma, lat, lng, status,
                    is_verified, is_claimed, intervention_count, region, duplicate_of
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    r.id,
                    r.name,
                    r.specialty,
                    r.city,
                    r.address_full,
                    r.phone_norm,
                    r.website,
                    r.description,
                    r.photo_url,
                    r.has_diploma,
                    lat,
                    lng,
                    r.status.as_str(),
                    r.is_verified,
                    r.is_claimed,
                    r.intervention_count,
                    r.region,
                    r.duplicate_of,
                ],
            )
            .with_context(|| format!("insert practitioner {}", r.id))?;
        Ok(())
    }

    /// Loads rows from a `.csv` or `.parquet` file. Ids already present are left
    /// alone, so importing the same file twice is a no-op the second time.
    pub fn import_file(&mut self, input: &Path) -> anyhow::Result<usize> {
        let source = source_expr(input)?;
        let present = self.source_columns(&source)?;
        if !present.iter().any(|c| c == "id") || !present.iter().any(|c| c == "name") {
            anyhow::bail!(
                "{} must have at least `id` and `name` columns",
                input.display()
            );
        }

        let mut targets = Vec::new();
        let mut exprs = Vec::new();
        for (col, ty, fallback) in IMPORT_COLUMNS {
            targets.push(*col);
            let expr = if present.iter().any(|c| c == col) {
                format!("COALESCE(TRY_CAST(src.\"{col}\" AS {ty}), {fallback})")
            } else {
                fallback.to_string()
            };
            exprs.push(expr);
        }

        // Coordinates are both-or-neither; a half pair is imported as none.
        let lat_idx = targets.iter().position(|c| *c == "lat").unwrap_or_default();
        let lng_idx = targets.iter().position(|c| *c == "lng").unwrap_or_default();
        let (lat_expr, lng_expr) = (exprs[lat_idx].clone(), exprs[lng_idx].clone());
        let both = format!("({lat_expr}) IS NOT NULL AND ({lng_expr}) IS NOT NULL");
        exprs[lat_idx] = format!("CASE WHEN {both} THEN {lat_expr} END");
        exprs[lng_idx] = format!("CASE WHEN {both} THEN {lng_expr} END");

        let sql = format!(
            r#"
            INSERT INTO practitioners ({targets})
            SELECT {exprs}
            FROM {source} AS src
            WHERE src."id" IS NOT NULL
              AND src."name" IS NOT NULL
              AND NOT EXISTS (
                SELECT 1 FROM practitioners p WHERE p.id = CAST(src."id" AS VARCHAR)
              )
            "#,
            targets = targets.join(", "),
            exprs = exprs.join(",\n                   "),
        );
        let inserted = self
            .conn
            .execute(&sql, [])
            .with_context(|| format!("import {}", input.display()))?;
        Ok(inserted)
    }

    fn source_columns(&self, source: &str) -> anyhow::Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("DESCRIBE SELECT * FROM {source}"))
            .context("describe import source")?;
        let rows = stmt.query_map([], |row| row.get::<usize, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?.to_ascii_lowercase());
        }
        Ok(out)
    }

    fn query_records(&self, sql: &str, args: &[Value]) -> StoreResult<Vec<PractitionerRecord>> {
        let mut stmt = self.conn.prepare(sql).map_err(read_err("prepare"))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), RawRecord::from_row)
            .map_err(read_err("query"))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(read_err("read row"))?.into_record()?);
        }
        Ok(out)
    }

    fn query_search_rows(&self, sql: &str, args: &[Value]) -> StoreResult<Vec<SearchRow>> {
        let mut stmt = self.conn.prepare(sql).map_err(read_err("prepare search"))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let specialty: Option<String> = row.get(2)?;
                Ok(SearchRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    category: specialty
                        .as_deref()
                        .map(Specialty::classify)
                        .unwrap_or(Specialty::Other),
                    specialty,
                    city: row.get(3)?,
                    region: row.get(4)?,
                    lat: row.get(5)?,
                    lng: row.get(6)?,
                    intervention_count: row.get(7)?,
                    is_verified: row.get::<usize, Option<bool>>(8)?.unwrap_or(false),
                    is_claimed: row.get::<usize, Option<bool>>(9)?.unwrap_or(false),
                    distance_km: row.get(10)?,
                    total_count: row.get::<usize, i64>(11)?.max(0) as u64,
                })
            })
            .map_err(read_err("search"))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(read_err("read search row"))?);
        }
        Ok(out)
    }
}

fn filter_text(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Appends the text filters to `where_sql`, pushing their bound values.
fn push_text_filters(filters: &TextFilters, where_sql: &mut String, args: &mut Vec<Value>) {
    if let Some(specialty) = filter_text(&filters.specialty) {
        where_sql.push_str(" AND specialty = ?");
        args.push(Value::Text(specialty.to_string()));
    }
    if let Some(q) = filter_text(&filters.query) {
        where_sql.push_str(
            " AND (contains(lower(name), lower(?)) OR contains(lower(specialty), lower(?)))",
        );
        args.push(Value::Text(q.to_string()));
        args.push(Value::Text(q.to_string()));
    }
    if let Some(city) = filter_text(&filters.city) {
        where_sql.push_str(" AND contains(lower(city), lower(?))");
        args.push(Value::Text(city.to_string()));
    }
}

impl PractitionerStore for DuckDbStore {
    fn fetch_active(&mut self) -> StoreResult<Vec<PractitionerRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM practitioners WHERE status = 'active' \
             ORDER BY created_at ASC NULLS LAST, id ASC"
        );
        self.query_records(&sql, &[])
    }

    fn fetch_by_id(&mut self, id: &str) -> StoreResult<Option<PractitionerRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM practitioners WHERE id = ? LIMIT 1");
        let mut stmt = self.conn.prepare(&sql).map_err(read_err("prepare"))?;
        let raw = stmt
            .query_row([id], RawRecord::from_row)
            .optional()
            .map_err(read_err("fetch by id"))?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn mark_duplicates(&mut self, groups: &[ArchiveGroup]) -> StoreResult<usize> {
        let tx = self
            .conn
            .transaction()
            .map_err(write_err("begin transaction"))?;
        let mut changed = 0usize;
        for group in groups.iter().filter(|g| !g.ids.is_empty()) {
            let placeholders = vec!["?"; group.ids.len()].join(", ");
            let sql = format!(
                "UPDATE practitioners \
                 SET status = 'duplicate', duplicate_of = ?, updated_at = current_timestamp \
                 WHERE status = 'active' AND id IN ({placeholders})"
            );
            let args = std::iter::once(group.keeper_id.as_str())
                .chain(group.ids.iter().map(String::as_str));
            changed += tx
                .execute(&sql, params_from_iter(args))
                .map_err(write_err("mark duplicates"))?;
        }
        tx.commit().map_err(write_err("commit duplicates"))?;
        Ok(changed)
    }

    fn fetch_backlog(&mut self, limit: Option<usize>) -> StoreResult<Vec<PractitionerRecord>> {
        let mut sql = format!(
            "SELECT {RECORD_COLUMNS} FROM practitioners WHERE {BACKLOG_PREDICATE} \
             ORDER BY created_at ASC NULLS LAST, id ASC"
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        self.query_records(&sql, &[])
    }

    fn count_backlog(&mut self) -> StoreResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM practitioners WHERE {BACKLOG_PREDICATE}");
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(read_err("count backlog"))?;
        Ok(count.max(0) as u64)
    }

    fn set_coordinates(&mut self, id: &str, coords: Coordinates) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE practitioners SET lat = ?, lng = ?, updated_at = current_timestamp \
                 WHERE id = ?",
                params![coords.lat, coords.lng, id],
            )
            .map_err(write_err("set coordinates"))?;
        if changed == 0 {
            return Err(StoreError::Write(format!("set coordinates: no practitioner {id}")));
        }
        Ok(())
    }

    fn search_nearby(&mut self, q: &NearbyQuery) -> StoreResult<Vec<SearchRow>> {
        let mut args = vec![
            Value::Double(q.origin.lat),
            Value::Double(q.origin.lat),
            Value::Double(q.origin.lng),
        ];
        let mut where_sql =
            String::from("WHERE status = 'active' AND lat IS NOT NULL AND lng IS NOT NULL");
        push_text_filters(&q.filters, &mut where_sql, &mut args);
        args.push(Value::Double(q.radius_km));

        let sql = format!(
            r#"
            WITH located AS (
                SELECT
                  id, name, specialty, city, region, lat, lng, intervention_count,
                  is_verified, is_claimed,
                  2 * 6371.0 * asin(least(1.0, sqrt(
                      pow(sin(radians(lat - ?) / 2), 2)
                      + cos(radians(?)) * cos(radians(lat)) * pow(sin(radians(lng - ?) / 2), 2)
                  ))) AS distance_km
                FROM practitioners
                {where_sql}
            )
            SELECT
              id, name, specialty, city, region, lat, lng, intervention_count,
              is_verified, is_claimed, distance_km,
              COUNT(*) OVER () AS total_count
            FROM located
            WHERE distance_km <= ?
            ORDER BY distance_km ASC, intervention_count DESC NULLS LAST, name ASC, id ASC
            LIMIT {limit} OFFSET {offset}
            "#,
            limit = q.limit,
            offset = q.offset,
        );
        self.query_search_rows(&sql, &args)
    }

    fn list(&mut self, q: &ListQuery) -> StoreResult<(Vec<SearchRow>, u64)> {
        let mut args = Vec::new();
        let mut where_sql = String::from("WHERE status = 'active'");
        push_text_filters(&q.filters, &mut where_sql, &mut args);

        let order_sql = match q.order {
            ListOrder::Pertinence => "intervention_count DESC NULLS LAST, name ASC, id ASC",
            ListOrder::Alpha => "name ASC, id ASC",
        };

        let count_sql = format!("SELECT COUNT(*) FROM practitioners {where_sql}");
        let total: i64 = self
            .conn
            .query_row(&count_sql, params_from_iter(args.iter()), |row| row.get(0))
            .map_err(read_err("count listing"))?;

        let data_sql = format!(
            r#"
            SELECT
              id, name, specialty, city, region, lat, lng, intervention_count,
              is_verified, is_claimed, CAST(NULL AS DOUBLE) AS distance_km,
              COUNT(*) OVER () AS total_count
            FROM practitioners
            {where_sql}
            ORDER BY {order_sql}
            LIMIT {limit} OFFSET {offset}
            "#,
            limit = q.limit,
            offset = q.offset,
        );
        let rows = self.query_search_rows(&data_sql, &args)?;
        Ok((rows, total.max(0) as u64))
    }
}
