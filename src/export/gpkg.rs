//! GeoPackage 1.2 writer on top of SQLite.

use std::collections::HashSet;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use geo::{BoundingRect, Geometry};
use log::{debug, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection};

use super::wkb::write_geometry;
use super::{geometry_type_name, Result, EPSG_CODE};
use crate::convert::{FeatureCollection, GEOMETRY_COLUMN};
use crate::table::AttributeType;

/// `GPKG` as a big-endian integer.
const APPLICATION_ID: i32 = 0x4750_4B47;
const USER_VERSION: i32 = 10200;

/// Columns the feature table defines itself.
const RESERVED_COLUMNS: [&str; 2] = ["fid", GEOMETRY_COLUMN];

const CREATE_METADATA_TABLES: &[&str] = &[
    "CREATE TABLE gpkg_spatial_ref_sys (
        srs_name TEXT NOT NULL,
        srs_id INTEGER NOT NULL PRIMARY KEY,
        organization TEXT NOT NULL,
        organization_coordsys_id INTEGER NOT NULL,
        definition TEXT NOT NULL,
        description TEXT
    )",
    "CREATE TABLE gpkg_contents (
        table_name TEXT NOT NULL PRIMARY KEY,
        data_type TEXT NOT NULL,
        identifier TEXT UNIQUE,
        description TEXT DEFAULT '',
        last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
        min_x DOUBLE,
        min_y DOUBLE,
        max_x DOUBLE,
        max_y DOUBLE,
        srs_id INTEGER,
        CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
    )",
    "CREATE TABLE gpkg_geometry_columns (
        table_name TEXT NOT NULL,
        column_name TEXT NOT NULL,
        geometry_type_name TEXT NOT NULL,
        srs_id INTEGER NOT NULL,
        z TINYINT NOT NULL,
        m TINYINT NOT NULL,
        CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
        CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
        CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
    )",
    "INSERT INTO gpkg_spatial_ref_sys VALUES
        ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', 'undefined cartesian coordinate reference system'),
        ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', 'undefined geographic coordinate reference system')",
];

const WGS84_DEFINITION: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

/// Write the collection as a single feature table in a new GeoPackage.
///
/// An existing file at `path` is replaced.
pub fn write_gpkg(collection: &FeatureCollection, path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let table = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("features")
        .to_string();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(write_gpkg_async(collection, path, &table))
}

async fn write_gpkg_async(collection: &FeatureCollection, path: &Path, table: &str) -> Result<()> {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .connect()
        .await?;

    sqlx::query(&format!("PRAGMA application_id = {APPLICATION_ID}"))
        .execute(&mut conn)
        .await?;
    sqlx::query(&format!("PRAGMA user_version = {USER_VERSION}"))
        .execute(&mut conn)
        .await?;

    let mut tx = conn.begin().await?;

    for statement in CREATE_METADATA_TABLES {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    sqlx::query("INSERT INTO gpkg_spatial_ref_sys VALUES ('WGS 84 geodetic', ?, 'EPSG', ?, ?, 'longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid')")
        .bind(EPSG_CODE)
        .bind(EPSG_CODE)
        .bind(WGS84_DEFINITION)
        .execute(&mut *tx)
        .await?;

    let types = collection.attribute_types();
    let names = table_columns(&collection.columns);
    let columns: Vec<String> = names
        .iter()
        .zip(&types)
        .map(|(name, kind)| format!("{} {}", quote_identifier(name), sql_type(*kind)))
        .collect();
    let mut create = format!(
        "CREATE TABLE {} (fid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, {} GEOMETRY",
        quote_identifier(table),
        quote_identifier(GEOMETRY_COLUMN)
    );
    for column in &columns {
        create.push_str(", ");
        create.push_str(column);
    }
    create.push(')');
    debug!("{create}");
    sqlx::query(&create).execute(&mut *tx).await?;

    let bounds = collection.bounds();
    sqlx::query(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id)
         VALUES (?, 'features', ?, ?, ?, ?, ?, ?)",
    )
    .bind(table)
    .bind(table)
    .bind(bounds.map(|r| r.min().x))
    .bind(bounds.map(|r| r.min().y))
    .bind(bounds.map(|r| r.max().x))
    .bind(bounds.map(|r| r.max().y))
    .bind(EPSG_CODE)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO gpkg_geometry_columns VALUES (?, ?, ?, ?, 0, 0)")
        .bind(table)
        .bind(GEOMETRY_COLUMN)
        .bind(layer_geometry_type(collection))
        .bind(EPSG_CODE)
        .execute(&mut *tx)
        .await?;

    let placeholders = vec!["?"; names.len() + 1].join(", ");
    let mut quoted = vec![quote_identifier(GEOMETRY_COLUMN)];
    quoted.extend(names.iter().map(|c| quote_identifier(c)));
    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote_identifier(table),
        quoted.join(", ")
    );

    for feature in &collection.features {
        let mut query = sqlx::query(&insert).bind(geometry_blob(&feature.geometry)?);
        for (cell, kind) in feature.attributes.iter().zip(&types) {
            query = match kind {
                AttributeType::Integer => query.bind(cell.as_i64()),
                AttributeType::Float => query.bind(cell.as_f64()),
                AttributeType::Bool => query.bind(cell.as_bool()),
                AttributeType::Text => query.bind(cell.to_text()),
            };
        }
        query.execute(&mut *tx).await?;
    }

    tx.commit().await?;
    conn.close().await?;
    Ok(())
}

/// GeoPackage binary: `GP` header with SRS id and envelope, then WKB.
pub(crate) fn geometry_blob(geometry: &Geometry<f64>) -> Result<Vec<u8>> {
    let envelope = match geometry {
        Geometry::Point(_) => None,
        other => other.bounding_rect(),
    };
    // bit 0: little endian, bits 1-3: envelope type (1 = xy)
    let flags: u8 = if envelope.is_some() { 0b0000_0011 } else { 0b0000_0001 };

    let mut blob = Vec::new();
    blob.extend_from_slice(b"GP");
    blob.write_u8(0)?;
    blob.write_u8(flags)?;
    blob.write_i32::<LittleEndian>(EPSG_CODE)?;
    if let Some(rect) = envelope {
        blob.write_f64::<LittleEndian>(rect.min().x)?;
        blob.write_f64::<LittleEndian>(rect.max().x)?;
        blob.write_f64::<LittleEndian>(rect.min().y)?;
        blob.write_f64::<LittleEndian>(rect.max().y)?;
    }
    write_geometry(&mut blob, geometry)?;
    Ok(blob)
}

fn layer_geometry_type(collection: &FeatureCollection) -> &'static str {
    let mut names = collection
        .features
        .iter()
        .map(|f| geometry_type_name(&f.geometry));
    match names.next() {
        Some(first) if names.all(|n| n == first) => match first {
            "Point" => "POINT",
            "LineString" => "LINESTRING",
            "Polygon" => "POLYGON",
            _ => "GEOMETRY",
        },
        _ => "GEOMETRY",
    }
}

/// Attribute column names for the feature table.
///
/// SQLite compares column names case-insensitively, so a name matching a
/// reserved or earlier column in any case gets a numeric suffix.
fn table_columns(columns: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = RESERVED_COLUMNS.iter().map(|n| n.to_string()).collect();
    columns
        .iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 1;
            while !taken.insert(candidate.to_lowercase()) {
                candidate = format!("{name}_{n}");
                n += 1;
            }
            if candidate != *name {
                warn!("Column {name} stored as {candidate} in the GeoPackage");
            }
            candidate
        })
        .collect()
}

fn sql_type(kind: AttributeType) -> &'static str {
    match kind {
        AttributeType::Integer => "INTEGER",
        AttributeType::Float => "REAL",
        AttributeType::Bool => "BOOLEAN",
        AttributeType::Text => "TEXT",
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
