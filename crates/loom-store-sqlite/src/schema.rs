//! SQL schema for the Loom SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS object_types (
    type_id      TEXT PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    index_option TEXT NOT NULL DEFAULT 'daily'   -- 'daily' | 'time_global'
);

CREATE TABLE IF NOT EXISTS fact_types (
    type_id TEXT PRIMARY KEY,
    name    TEXT NOT NULL UNIQUE
);

-- Objects are created on first reference and never updated or deleted.
CREATE TABLE IF NOT EXISTS objects (
    object_id TEXT PRIMARY KEY,
    type_id   TEXT NOT NULL REFERENCES object_types(type_id),
    value     TEXT NOT NULL,
    UNIQUE (type_id, value)
);

-- Identity columns are never updated. Only last_seen_timestamp (refresh),
-- acl (grants) and flags (retracted hint) change after insertion.
CREATE TABLE IF NOT EXISTS facts (
    fact_id               TEXT PRIMARY KEY,
    type_id               TEXT NOT NULL REFERENCES fact_types(type_id),
    value                 TEXT,
    in_reference_to       TEXT REFERENCES facts(fact_id),
    organization_id       TEXT NOT NULL,
    origin_id             TEXT NOT NULL,
    trust                 REAL NOT NULL,
    confidence            REAL NOT NULL,
    access_mode           TEXT NOT NULL,   -- 'public' | 'role_based' | 'explicit'
    timestamp             TEXT NOT NULL,   -- RFC 3339 UTC; server-assigned
    last_seen_timestamp   TEXT NOT NULL,
    source_object_id      TEXT REFERENCES objects(object_id),
    destination_object_id TEXT REFERENCES objects(object_id),
    bidirectional         INTEGER NOT NULL DEFAULT 0,
    acl                   TEXT NOT NULL DEFAULT '[]',
    flags                 TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS facts_source_idx      ON facts(source_object_id);
CREATE INDEX IF NOT EXISTS facts_destination_idx ON facts(destination_object_id);
CREATE INDEX IF NOT EXISTS facts_reference_idx   ON facts(in_reference_to);
CREATE INDEX IF NOT EXISTS facts_type_idx        ON facts(type_id);

PRAGMA user_version = 1;
";
