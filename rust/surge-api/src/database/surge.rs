//! Countries, molnix tags and surge alerts.
//!
//! The write helpers take a plain [`Connection`] so the reconciler can run
//! several of them inside one transaction. The read side is exposed as async
//! methods on [`Database`] for the HTTP handlers.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::Database;
use crate::error::StoreResult;

/// Alerts per page in [`Database::list_alerts`].
pub const ALERTS_PER_PAGE: u32 = 20;

/// Mutable country columns, keyed by `api_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryFields {
    pub api_id: i64,
    pub iso: Option<String>,
    pub iso3: Option<String>,
    pub record_type: Option<i64>,
    pub record_type_display: Option<String>,
    pub region: Option<i64>,
    pub independent: bool,
    pub is_deprecated: bool,
    pub fdrs: Option<String>,
    pub average_household_size: Option<f64>,
    pub society_name: Option<String>,
    pub name: String,
    pub translation_module_original_language: Option<String>,
}

/// Mutable alert columns. `last_updated` is stamped on write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFields {
    pub deployment_needed: bool,
    pub is_private: bool,
    pub event: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub atype: Option<i64>,
    pub atype_display: Option<String>,
    pub category: Option<i64>,
    pub category_display: Option<String>,
    pub molnix_id: Option<i64>,
    pub molnix_status: Option<i64>,
    pub molnix_status_display: Option<String>,
    pub opens: Option<DateTime<Utc>>,
    pub closes: Option<DateTime<Utc>>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub operation: Option<String>,
    pub translation_module_original_language: Option<String>,
}

/// Mutable tag columns, keyed by `api_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFields {
    pub api_id: i64,
    pub molnix_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub tag_type: Option<String>,
    pub groups: Vec<String>,
}

fn groups_json(groups: &[String]) -> rusqlite::Result<String> {
    serde_json::to_string(groups).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn local_id(conn: &Connection, table: &str, api_id: i64) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        &format!("SELECT id FROM {table} WHERE api_id = ?1"),
        params![api_id],
        |row| row.get(0),
    )
    .optional()
}

/// Insert or overwrite a country. Returns the row id and whether it was new.
pub fn upsert_country(conn: &Connection, country: &CountryFields) -> rusqlite::Result<(i64, bool)> {
    let values = params![
        country.api_id,
        country.iso,
        country.iso3,
        country.record_type,
        country.record_type_display,
        country.region,
        country.independent,
        country.is_deprecated,
        country.fdrs,
        country.average_household_size,
        country.society_name,
        country.name,
        country.translation_module_original_language,
    ];

    if let Some(id) = local_id(conn, "countries", country.api_id)? {
        conn.execute(
            "UPDATE countries SET
                iso = ?2, iso3 = ?3, record_type = ?4, record_type_display = ?5, region = ?6,
                independent = ?7, is_deprecated = ?8, fdrs = ?9, average_household_size = ?10,
                society_name = ?11, name = ?12, translation_module_original_language = ?13
             WHERE api_id = ?1",
            values,
        )?;
        return Ok((id, false));
    }

    conn.execute(
        "INSERT INTO countries (
            api_id, iso, iso3, record_type, record_type_display, region, independent,
            is_deprecated, fdrs, average_household_size, society_name, name,
            translation_module_original_language
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        values,
    )?;
    Ok((conn.last_insert_rowid(), true))
}

/// Insert or overwrite an alert by `api_id`. Returns the row id and whether
/// it was new.
pub fn upsert_alert(
    conn: &Connection,
    api_id: i64,
    country_id: Option<i64>,
    alert: &AlertFields,
) -> rusqlite::Result<(i64, bool)> {
    let now = Utc::now();
    let values = params![
        api_id,
        country_id,
        alert.deployment_needed,
        alert.is_private,
        alert.event,
        alert.created_at,
        alert.atype,
        alert.atype_display,
        alert.category,
        alert.category_display,
        alert.molnix_id,
        alert.molnix_status,
        alert.molnix_status_display,
        alert.opens,
        alert.closes,
        alert.start,
        alert.end,
        alert.message,
        alert.operation,
        alert.translation_module_original_language,
        now,
    ];

    if let Some(id) = local_id(conn, "surge_alerts", api_id)? {
        conn.execute(
            r#"UPDATE surge_alerts SET
                country_id = ?2, deployment_needed = ?3, is_private = ?4, event = ?5,
                created_at = ?6, atype = ?7, atype_display = ?8, category = ?9,
                category_display = ?10, molnix_id = ?11, molnix_status = ?12,
                molnix_status_display = ?13, opens = ?14, closes = ?15, "start" = ?16,
                "end" = ?17, message = ?18, operation = ?19,
                translation_module_original_language = ?20, last_updated = ?21
             WHERE api_id = ?1"#,
            values,
        )?;
        return Ok((id, false));
    }

    conn.execute(
        r#"INSERT INTO surge_alerts (
            api_id, country_id, deployment_needed, is_private, event, created_at, atype,
            atype_display, category, category_display, molnix_id, molnix_status,
            molnix_status_display, opens, closes, "start", "end", message, operation,
            translation_module_original_language, last_updated
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  ?17, ?18, ?19, ?20, ?21)"#,
        values,
    )?;
    Ok((conn.last_insert_rowid(), true))
}

/// Insert or overwrite a tag. Returns its row id.
pub fn upsert_tag(conn: &Connection, tag: &TagFields) -> rusqlite::Result<i64> {
    let groups = groups_json(&tag.groups)?;
    conn.query_row(
        "INSERT INTO molnix_tags (api_id, molnix_id, name, description, color, tag_type, groups)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(api_id) DO UPDATE SET
            molnix_id = excluded.molnix_id,
            name = excluded.name,
            description = excluded.description,
            color = excluded.color,
            tag_type = excluded.tag_type,
            groups = excluded.groups
         RETURNING id",
        params![
            tag.api_id,
            tag.molnix_id,
            tag.name,
            tag.description,
            tag.color,
            tag.tag_type,
            groups,
        ],
        |row| row.get(0),
    )
}

/// Drop every tag association of an alert.
pub fn clear_alert_tags(conn: &Connection, alert_id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM surge_alert_tags WHERE alert_id = ?1", params![alert_id])
}

/// Associate a tag with an alert. Linking twice is a no-op.
pub fn link_tag(conn: &Connection, alert_id: i64, tag_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO surge_alert_tags (alert_id, tag_id) VALUES (?1, ?2)",
        params![alert_id, tag_id],
    )?;
    Ok(())
}

/// A stored country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub id: i64,
    pub api_id: i64,
    pub iso: Option<String>,
    pub iso3: Option<String>,
    pub record_type: Option<i64>,
    pub record_type_display: Option<String>,
    pub region: Option<i64>,
    pub independent: bool,
    pub is_deprecated: bool,
    pub fdrs: Option<String>,
    pub average_household_size: Option<f64>,
    pub society_name: Option<String>,
    pub name: String,
    pub translation_module_original_language: Option<String>,
}

/// A stored molnix tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MolnixTag {
    pub id: i64,
    pub api_id: i64,
    pub molnix_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub tag_type: Option<String>,
    pub groups: Vec<String>,
}

/// A stored surge alert with its country and tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeAlert {
    pub id: i64,
    pub api_id: i64,
    pub country: Option<Country>,
    pub deployment_needed: bool,
    pub is_private: bool,
    pub event: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub atype: Option<i64>,
    pub atype_display: Option<String>,
    pub category: Option<i64>,
    pub category_display: Option<String>,
    pub molnix_id: Option<i64>,
    pub molnix_status: Option<i64>,
    pub molnix_status_display: Option<String>,
    pub opens: Option<DateTime<Utc>>,
    pub closes: Option<DateTime<Utc>>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub operation: Option<String>,
    pub translation_module_original_language: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub molnix_tags: Vec<MolnixTag>,
}

/// Filters for the alert listing. All filters are optional; blank values
/// count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AlertFilter {
    /// Country `api_id`.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub country: Option<i64>,
    /// Exact `molnix_status_display`.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub status: Option<String>,
    /// Tag `api_id`.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub tag: Option<i64>,
    /// One-based page number.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub page: Option<u32>,
}

/// Query-string value where an empty or whitespace-only string means `None`.
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

/// One page of alerts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPage {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub alerts: Vec<SurgeAlert>,
}

/// Values offered as alert filters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    pub countries: Vec<Country>,
    pub statuses: Vec<String>,
    pub tags: Vec<MolnixTag>,
}

const COUNTRY_COLUMNS: &str = "id, api_id, iso, iso3, record_type, record_type_display, region,
    independent, is_deprecated, fdrs, average_household_size, society_name, name,
    translation_module_original_language";

const TAG_COLUMNS: &str = "t.id, t.api_id, t.molnix_id, t.name, t.description, t.color, t.tag_type, t.groups";

const ALERT_COLUMNS: &str = r#"id, api_id, country_id, deployment_needed, is_private, event,
    created_at, atype, atype_display, category, category_display, molnix_id, molnix_status,
    molnix_status_display, opens, closes, "start", "end", message, operation,
    translation_module_original_language, last_updated"#;

const ALERT_FILTER: &str = "(?1 IS NULL OR a.country_id IN (SELECT id FROM countries WHERE api_id = ?1))
    AND (?2 IS NULL OR a.molnix_status_display = ?2)
    AND (?3 IS NULL OR EXISTS (
        SELECT 1 FROM surge_alert_tags st JOIN molnix_tags mt ON mt.id = st.tag_id
        WHERE st.alert_id = a.id AND mt.api_id = ?3))";

fn row_to_country(row: &Row<'_>) -> rusqlite::Result<Country> {
    Ok(Country {
        id: row.get(0)?,
        api_id: row.get(1)?,
        iso: row.get(2)?,
        iso3: row.get(3)?,
        record_type: row.get(4)?,
        record_type_display: row.get(5)?,
        region: row.get(6)?,
        independent: row.get(7)?,
        is_deprecated: row.get(8)?,
        fdrs: row.get(9)?,
        average_household_size: row.get(10)?,
        society_name: row.get(11)?,
        name: row.get(12)?,
        translation_module_original_language: row.get(13)?,
    })
}

fn row_to_tag(row: &Row<'_>) -> rusqlite::Result<MolnixTag> {
    let groups: String = row.get(7)?;
    let groups = serde_json::from_str(&groups)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(MolnixTag {
        id: row.get(0)?,
        api_id: row.get(1)?,
        molnix_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        color: row.get(5)?,
        tag_type: row.get(6)?,
        groups,
    })
}

/// Alert row plus the country id still to be resolved.
fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<(SurgeAlert, Option<i64>)> {
    let alert = SurgeAlert {
        id: row.get(0)?,
        api_id: row.get(1)?,
        country: None,
        deployment_needed: row.get(3)?,
        is_private: row.get(4)?,
        event: row.get(5)?,
        created_at: row.get(6)?,
        atype: row.get(7)?,
        atype_display: row.get(8)?,
        category: row.get(9)?,
        category_display: row.get(10)?,
        molnix_id: row.get(11)?,
        molnix_status: row.get(12)?,
        molnix_status_display: row.get(13)?,
        opens: row.get(14)?,
        closes: row.get(15)?,
        start: row.get(16)?,
        end: row.get(17)?,
        message: row.get(18)?,
        operation: row.get(19)?,
        translation_module_original_language: row.get(20)?,
        last_updated: row.get(21)?,
        molnix_tags: Vec::new(),
    };
    Ok((alert, row.get(2)?))
}

fn country_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<Country>> {
    conn.query_row(
        &format!("SELECT {COUNTRY_COLUMNS} FROM countries WHERE id = ?1"),
        params![id],
        row_to_country,
    )
    .optional()
}

fn tags_for_alert(conn: &Connection, alert_id: i64) -> rusqlite::Result<Vec<MolnixTag>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {TAG_COLUMNS} FROM molnix_tags t
         JOIN surge_alert_tags st ON st.tag_id = t.id
         WHERE st.alert_id = ?1 ORDER BY t.name"
    ))?;
    stmt.query_map(params![alert_id], row_to_tag)?.collect()
}

fn hydrate(
    conn: &Connection,
    (mut alert, country_id): (SurgeAlert, Option<i64>),
) -> rusqlite::Result<SurgeAlert> {
    if let Some(country_id) = country_id {
        alert.country = country_by_id(conn, country_id)?;
    }
    alert.molnix_tags = tags_for_alert(conn, alert.id)?;
    Ok(alert)
}

/// Tag `api_id`s linked to an alert, sorted.
pub fn alert_tag_api_ids(conn: &Connection, alert_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT t.api_id FROM molnix_tags t
         JOIN surge_alert_tags st ON st.tag_id = t.id
         WHERE st.alert_id = ?1 ORDER BY t.api_id",
    )?;
    stmt.query_map(params![alert_id], |row| row.get(0))?.collect()
}

impl Database {
    /// Newest alerts first, [`ALERTS_PER_PAGE`] per page.
    pub async fn list_alerts(&self, filter: AlertFilter) -> StoreResult<AlertPage> {
        self.call(move |conn| {
            let page = filter.page.unwrap_or(1).max(1);
            let offset = i64::from(page - 1) * i64::from(ALERTS_PER_PAGE);

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM surge_alerts a WHERE {ALERT_FILTER}"),
                params![filter.country, filter.status, filter.tag],
                |row| row.get(0),
            )?;

            let rows = {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ALERT_COLUMNS} FROM surge_alerts a WHERE {ALERT_FILTER}
                     ORDER BY a.created_at IS NULL, a.created_at DESC, a.id DESC
                     LIMIT ?4 OFFSET ?5"
                ))?;
                stmt.query_map(
                    params![filter.country, filter.status, filter.tag, ALERTS_PER_PAGE, offset],
                    row_to_alert,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?
            };

            let alerts = rows
                .into_iter()
                .map(|row| hydrate(conn, row))
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(AlertPage {
                page,
                per_page: ALERTS_PER_PAGE,
                total: u64::try_from(total).unwrap_or(0),
                alerts,
            })
        })
        .await
    }

    /// Look up one alert by its external id.
    pub async fn get_alert(&self, api_id: i64) -> StoreResult<Option<SurgeAlert>> {
        self.call(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {ALERT_COLUMNS} FROM surge_alerts WHERE api_id = ?1"),
                    params![api_id],
                    row_to_alert,
                )
                .optional()?;
            Ok(row.map(|row| hydrate(conn, row)).transpose()?)
        })
        .await
    }

    /// Countries and tags by name, plus every distinct alert status.
    pub async fn filter_options(&self) -> StoreResult<FilterOptions> {
        self.call(|conn| {
            let countries = conn
                .prepare(&format!("SELECT {COUNTRY_COLUMNS} FROM countries ORDER BY name"))?
                .query_map([], row_to_country)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let statuses = conn
                .prepare(
                    "SELECT DISTINCT molnix_status_display FROM surge_alerts
                     WHERE molnix_status_display IS NOT NULL ORDER BY molnix_status_display",
                )?
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            let tags = conn
                .prepare(&format!("SELECT {TAG_COLUMNS} FROM molnix_tags t ORDER BY t.name"))?
                .query_map([], row_to_tag)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(FilterOptions {
                countries,
                statuses,
                tags,
            })
        })
        .await
    }
}
