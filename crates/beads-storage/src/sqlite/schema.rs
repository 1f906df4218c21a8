//! DDL statements and migrations for the SQLite schema.
//!
//! Timestamps are stored as TEXT in ISO 8601 format (SQLite has no native
//! datetime type). Booleans are stored as INTEGER (0/1). JSON blobs are TEXT.

/// Current schema version. Bumped whenever DDL or migrations change.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Core DDL statements executed during `init_schema`.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Instances -----------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS instances (
        id           TEXT PRIMARY KEY,
        template_id  TEXT NOT NULL,
        title        TEXT NOT NULL DEFAULT '',
        description  TEXT NOT NULL DEFAULT '',
        durability   TEXT NOT NULL DEFAULT 'durable',
        status       TEXT NOT NULL DEFAULT 'active',
        bindings     TEXT NOT NULL DEFAULT '{}',
        parent       TEXT,
        sealed       INTEGER NOT NULL DEFAULT 0,
        created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by   TEXT NOT NULL DEFAULT '',
        finalized_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_instances_parent ON instances(parent)",
    "CREATE INDEX IF NOT EXISTS idx_instances_template ON instances(template_id)",
    "CREATE INDEX IF NOT EXISTS idx_instances_status ON instances(status)",
    // -- Instance labels -----------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS instance_labels (
        instance_id TEXT NOT NULL,
        label       TEXT NOT NULL,
        PRIMARY KEY (instance_id, label),
        FOREIGN KEY (instance_id) REFERENCES instances(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_instance_labels_label ON instance_labels(label)",
    // -- Steps ---------------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS steps (
        id          TEXT PRIMARY KEY,
        instance_id TEXT NOT NULL,
        ordinal     INTEGER NOT NULL,
        title       TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status      TEXT NOT NULL DEFAULT 'blocked',
        waits_for   TEXT,
        sealed      INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (instance_id) REFERENCES instances(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_steps_instance ON steps(instance_id, ordinal)",
    "CREATE INDEX IF NOT EXISTS idx_steps_waits_for ON steps(waits_for)",
    // -- Step dependencies ---------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS step_dependencies (
        step_id       TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        instance_id   TEXT NOT NULL,
        created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        PRIMARY KEY (step_id, depends_on_id),
        FOREIGN KEY (step_id) REFERENCES steps(id) ON DELETE CASCADE,
        FOREIGN KEY (depends_on_id) REFERENCES steps(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_step_dependencies_instance ON step_dependencies(instance_id)",
    "CREATE INDEX IF NOT EXISTS idx_step_dependencies_depends_on ON step_dependencies(depends_on_id)",
    // -- Digests -------------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS digests (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        instance_id TEXT NOT NULL,
        template_id TEXT NOT NULL DEFAULT '',
        summary     TEXT NOT NULL,
        durability  TEXT NOT NULL,
        steps_total INTEGER NOT NULL DEFAULT 0,
        steps_done  INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by  TEXT NOT NULL DEFAULT ''
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_digests_instance ON digests(instance_id)",
    // -- Tombstones ----------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS tombstones (
        id         TEXT PRIMARY KEY,
        durability TEXT NOT NULL,
        burned_at  TEXT NOT NULL
    )
    "#,
    // -- Events table (audit trail) ------------------------------------------
    // No foreign key: the trail outlives burned instances.
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id   TEXT NOT NULL,
        event_type  TEXT NOT NULL,
        actor       TEXT NOT NULL,
        old_value   TEXT,
        new_value   TEXT,
        comment     TEXT,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_id)",
    // -- Config table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Metadata table ------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

/// Default configuration values inserted on first init.
pub const DEFAULT_CONFIG: &[(&str, &str)] = &[("engine", "molecule")];

/// Schema migrations applied after initial DDL.
///
/// Each migration is a `(name, sql)` pair. Migrations are tracked in the
/// `metadata` table under the key `migration:<name>` so they run at most once.
pub const MIGRATIONS: &[(&str, &str)] = &[(
    "002_digest_created_at_index",
    "CREATE INDEX IF NOT EXISTS idx_digests_created_at ON digests(instance_id, created_at)",
)];
