//! Wire format of the IFRC surge alert endpoint.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::database::surge::{AlertFields, CountryFields, TagFields};

const UNKNOWN_NAME: &str = "Unknown";

/// Upstream ids start at 1; a zero id is treated like a missing one.
fn present_id(id: Option<i64>) -> Option<i64> {
    id.filter(|id| *id != 0)
}

/// One page of the paginated list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub next: Option<String>,
}

impl Page {
    /// URL of the following page, if any.
    pub fn next_url(&self) -> Option<&str> {
        self.next.as_deref().filter(|next| !next.trim().is_empty())
    }
}

/// `event` is either a bare id or an embedded event object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EventRef {
    Id(i64),
    Embedded { id: Option<i64> },
}

impl EventRef {
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Embedded { id } => *id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountryRecord {
    pub id: Option<i64>,
    pub iso: Option<String>,
    pub iso3: Option<String>,
    pub record_type: Option<i64>,
    pub record_type_display: Option<String>,
    pub region: Option<i64>,
    pub independent: Option<bool>,
    pub is_deprecated: Option<bool>,
    pub fdrs: Option<String>,
    pub average_household_size: Option<f64>,
    pub society_name: Option<String>,
    pub name: Option<String>,
    pub translation_module_original_language: Option<String>,
}

impl CountryRecord {
    /// Column values, or `None` when the record carries no id.
    pub fn fields(&self) -> Option<CountryFields> {
        Some(CountryFields {
            api_id: present_id(self.id)?,
            iso: self.iso.clone(),
            iso3: self.iso3.clone(),
            record_type: self.record_type,
            record_type_display: self.record_type_display.clone(),
            region: self.region,
            independent: self.independent.unwrap_or(true),
            is_deprecated: self.is_deprecated.unwrap_or(false),
            fdrs: self.fdrs.clone(),
            average_household_size: self.average_household_size,
            society_name: self.society_name.clone(),
            name: self.name.clone().unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            translation_module_original_language: self.translation_module_original_language.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagRecord {
    pub id: Option<i64>,
    pub molnix_id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub tag_type: Option<String>,
    #[serde(default)]
    pub groups: Option<Vec<Value>>,
}

impl TagRecord {
    /// Column values, or `None` when the tag carries no id.
    pub fn fields(&self) -> Option<TagFields> {
        let groups = self
            .groups
            .iter()
            .flatten()
            .map(|group| match group {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        Some(TagFields {
            api_id: present_id(self.id)?,
            molnix_id: self.molnix_id,
            name: self.name.clone().unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            description: self.description.clone(),
            color: self.color.clone(),
            tag_type: self.tag_type.clone(),
            groups,
        })
    }
}

/// One element of `results`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertRecord {
    pub id: Option<i64>,
    pub country: Option<CountryRecord>,
    pub deployment_needed: Option<bool>,
    pub is_private: Option<bool>,
    pub event: Option<EventRef>,
    pub created_at: Option<Value>,
    pub atype: Option<i64>,
    pub atype_display: Option<String>,
    pub category: Option<i64>,
    pub category_display: Option<String>,
    pub molnix_id: Option<i64>,
    pub molnix_status: Option<i64>,
    pub molnix_status_display: Option<String>,
    pub opens: Option<Value>,
    pub closes: Option<Value>,
    pub start: Option<Value>,
    pub end: Option<Value>,
    pub message: Option<String>,
    pub operation: Option<String>,
    pub translation_module_original_language: Option<String>,
    /// `None` when the key is absent or null; tags without an object body
    /// are kept as `None` entries and skipped later.
    pub molnix_tags: Option<Vec<Option<TagRecord>>>,
}

impl AlertRecord {
    /// External id, or `None` when absent or zero.
    pub fn api_id(&self) -> Option<i64> {
        present_id(self.id)
    }

    /// Column values for the alert row itself.
    pub fn fields(&self) -> AlertFields {
        AlertFields {
            deployment_needed: self.deployment_needed.unwrap_or(false),
            is_private: self.is_private.unwrap_or(false),
            event: self.event.as_ref().and_then(EventRef::id),
            created_at: parse_timestamp(self.created_at.as_ref()),
            atype: self.atype,
            atype_display: self.atype_display.clone(),
            category: self.category,
            category_display: self.category_display.clone(),
            molnix_id: self.molnix_id,
            molnix_status: self.molnix_status,
            molnix_status_display: self.molnix_status_display.clone(),
            opens: parse_timestamp(self.opens.as_ref()),
            closes: parse_timestamp(self.closes.as_ref()),
            start: parse_timestamp(self.start.as_ref()),
            end: parse_timestamp(self.end.as_ref()),
            message: self.message.clone(),
            operation: self.operation.clone(),
            translation_module_original_language: self.translation_module_original_language.clone(),
        }
    }
}

/// Parse an ISO-8601 timestamp. A trailing `Z` means UTC; values without an
/// offset are taken as UTC. Empty values are `None`; anything unparseable is
/// `None` with a warning.
pub fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = match value? {
        Value::Null => return None,
        Value::String(s) if s.trim().is_empty() => return None,
        Value::String(s) => s.trim(),
        other => {
            tracing::warn!(value = %other, "Could not parse datetime");
            return None;
        }
    };

    let normalized = match raw.strip_suffix('Z') {
        Some(stripped) => format!("{stripped}+00:00"),
        None => raw.to_string(),
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(parsed) = DateTime::parse_from_str(&normalized, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(parsed.and_utc());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Some(midnight.and_utc());
    }

    tracing::warn!(value = %raw, "Could not parse datetime");
    None
}
