//! Writes one API record into the local tables.

use rusqlite::Transaction;
use serde_json::Value;

use super::payload::AlertRecord;
use crate::database::Database;
use crate::database::surge::{clear_alert_tags, link_tag, upsert_alert, upsert_country, upsert_tag};
use crate::error::StoreResult;

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Updated,
    /// No id, undecodable or failed to write.
    Skipped,
}

/// Outcome counts for one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTally {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl PageTally {
    fn add(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Upserts records one transaction at a time.
#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Database,
}

impl Reconciler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Reconcile every record of a page in order.
    pub async fn process_page(&self, results: Vec<Value>) -> PageTally {
        let mut tally = PageTally::default();
        for record in results {
            tally.add(self.process(record).await);
        }
        tally
    }

    /// Reconcile one record. Failures are logged and reported as
    /// [`RecordOutcome::Skipped`]; they never abort the caller.
    pub async fn process(&self, raw: Value) -> RecordOutcome {
        let hint = raw.get("id").cloned().unwrap_or(Value::Null);

        let record: AlertRecord = match serde_json::from_value(raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(id = %hint, error = %e, "Error processing item");
                return RecordOutcome::Skipped;
            }
        };

        match self.db.transaction(move |tx| write_record(tx, &record)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(id = %hint, error = %e, "Error processing item");
                RecordOutcome::Skipped
            }
        }
    }
}

fn write_record(tx: &Transaction<'_>, record: &AlertRecord) -> StoreResult<RecordOutcome> {
    let country_id = match record.country.as_ref().and_then(|country| country.fields()) {
        Some(country) => {
            let (id, created) = upsert_country(tx, &country)?;
            if created {
                tracing::info!(country = %country.name, "Created new country");
            }
            Some(id)
        }
        None => None,
    };

    let Some(api_id) = record.api_id() else {
        return Ok(RecordOutcome::Skipped);
    };

    let (alert_id, created) = upsert_alert(tx, api_id, country_id, &record.fields())?;

    // Absent, null and empty tag lists leave the associations alone
    if let Some(tags) = record.molnix_tags.as_ref().filter(|tags| !tags.is_empty()) {
        clear_alert_tags(tx, alert_id)?;
        for tag in tags.iter().flatten().filter_map(|tag| tag.fields()) {
            let tag_id = upsert_tag(tx, &tag)?;
            link_tag(tx, alert_id, tag_id)?;
        }
    }

    if created {
        tracing::info!(api_id, "Created new surge alert");
        Ok(RecordOutcome::Created)
    } else {
        tracing::info!(api_id, "Updated surge alert");
        Ok(RecordOutcome::Updated)
    }
}
