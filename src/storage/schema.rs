//! Database schema and migrations.

use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS measurements (
            id INTEGER PRIMARY KEY,
            probe_id TEXT NOT NULL,
            time TEXT NOT NULL,
            latency_avg REAL,
            jitter REAL,
            packet_loss REAL,
            dns_time REAL,
            bufferbloat REAL
        );
        CREATE INDEX IF NOT EXISTS idx_measurements_time ON measurements(time);
        CREATE INDEX IF NOT EXISTS idx_measurements_probe_time ON measurements(probe_id, time);

        CREATE TABLE IF NOT EXISTS measurements_5min (
            probe_id TEXT NOT NULL,
            bucket TEXT NOT NULL,
            latency_avg REAL,
            jitter_avg REAL,
            packet_loss_avg REAL,
            dns_time_avg REAL,
            bufferbloat_avg REAL,
            sample_count INTEGER NOT NULL,
            PRIMARY KEY (probe_id, bucket)
        );
        CREATE INDEX IF NOT EXISTS idx_measurements_5min_bucket ON measurements_5min(bucket);

        CREATE TABLE IF NOT EXISTS anomalies (
            id TEXT PRIMARY KEY,
            probe_id TEXT NOT NULL,
            metric TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            expected_value REAL NOT NULL,
            actual_value REAL NOT NULL,
            severity TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            hour_of_day INTEGER NOT NULL,
            description TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_anomalies_open ON anomalies(probe_id, metric) WHERE ended_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_anomalies_started ON anomalies(started_at);

        CREATE TABLE IF NOT EXISTS alert_configs (
            id TEXT PRIMARY KEY,
            probe_id TEXT,
            metric TEXT NOT NULL,
            threshold REAL NOT NULL,
            comparison TEXT NOT NULL,
            duration_min INTEGER NOT NULL,
            channel TEXT NOT NULL,
            channel_config TEXT NOT NULL DEFAULT '{}',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    conn.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in ["measurements", "measurements_5min", "anomalies", "alert_configs"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table} should start empty");
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }
}
