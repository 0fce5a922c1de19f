//! SQLite schema definitions.

/// Schema applied on every open. All statements are idempotent.
pub const SQLITE_SCHEMA: &str = r#"
-- Schedule definitions read by the database scheduler
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    task TEXT NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT 1,
    schedule_type TEXT NOT NULL DEFAULT 'interval', -- 'interval', 'crontab'
    interval_seconds INTEGER,
    interval_minutes INTEGER,
    interval_hours INTEGER,
    interval_days INTEGER,
    crontab_minute TEXT NOT NULL DEFAULT '*',
    crontab_hour TEXT NOT NULL DEFAULT '*',
    crontab_day_of_week TEXT NOT NULL DEFAULT '*',
    crontab_day_of_month TEXT NOT NULL DEFAULT '*',
    crontab_month_of_year TEXT NOT NULL DEFAULT '*',
    last_run_at TEXT,
    total_run_count INTEGER NOT NULL DEFAULT 0,
    date_created TEXT NOT NULL,
    date_changed TEXT NOT NULL
);

-- Countries referenced by surge alerts
CREATE TABLE IF NOT EXISTS countries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    api_id INTEGER NOT NULL UNIQUE,
    iso TEXT,
    iso3 TEXT,
    record_type INTEGER,
    record_type_display TEXT,
    region INTEGER,
    independent BOOLEAN NOT NULL DEFAULT 1,
    is_deprecated BOOLEAN NOT NULL DEFAULT 0,
    fdrs TEXT,
    average_household_size REAL,
    society_name TEXT,
    name TEXT NOT NULL,
    translation_module_original_language TEXT
);
CREATE INDEX IF NOT EXISTS idx_countries_name ON countries(name);

-- Molnix tags
CREATE TABLE IF NOT EXISTS molnix_tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    api_id INTEGER NOT NULL UNIQUE,
    molnix_id INTEGER,
    name TEXT NOT NULL,
    description TEXT,
    color TEXT,
    tag_type TEXT,
    groups TEXT NOT NULL DEFAULT '[]' -- JSON array of group labels
);
CREATE INDEX IF NOT EXISTS idx_molnix_tags_name ON molnix_tags(name);

-- Surge alerts
CREATE TABLE IF NOT EXISTS surge_alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    api_id INTEGER NOT NULL UNIQUE,
    country_id INTEGER REFERENCES countries(id) ON DELETE SET NULL,
    deployment_needed BOOLEAN NOT NULL DEFAULT 0,
    is_private BOOLEAN NOT NULL DEFAULT 0,
    event INTEGER,
    created_at TEXT,
    atype INTEGER,
    atype_display TEXT,
    category INTEGER,
    category_display TEXT,
    molnix_id INTEGER,
    molnix_status INTEGER,
    molnix_status_display TEXT,
    opens TEXT,
    closes TEXT,
    "start" TEXT,
    "end" TEXT,
    message TEXT,
    operation TEXT,
    translation_module_original_language TEXT,
    last_updated TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_surge_alerts_created ON surge_alerts(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_surge_alerts_country ON surge_alerts(country_id);
CREATE INDEX IF NOT EXISTS idx_surge_alerts_status ON surge_alerts(molnix_status_display);

-- Alert <-> tag association
CREATE TABLE IF NOT EXISTS surge_alert_tags (
    alert_id INTEGER NOT NULL REFERENCES surge_alerts(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES molnix_tags(id) ON DELETE CASCADE,
    PRIMARY KEY (alert_id, tag_id)
);
CREATE INDEX IF NOT EXISTS idx_surge_alert_tags_tag ON surge_alert_tags(tag_id);

-- Last completed run per sync job
CREATE TABLE IF NOT EXISTS api_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    last_run TEXT NOT NULL
);
"#;
