use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Result};
use std::path::Path;

pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).ok();
        let db_path = data_dir.join("chatr.db");
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        db.run_migrations()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS identity (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                participant_id TEXT NOT NULL,
                display_name TEXT NOT NULL DEFAULT 'Anonymous'
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        let version: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            conn.execute("INSERT OR REPLACE INTO schema_version (version) VALUES (1)", [])?;
        }

        Ok(())
    }

    // ============================================================
    // Identity
    // ============================================================

    pub fn load_participant_id(&self) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT participant_id FROM identity WHERE id = 1", [], |row| row.get(0))
            .optional()
    }

    pub fn save_participant_id(&self, participant_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO identity (id, participant_id, display_name)
             VALUES (1, ?1, COALESCE((SELECT display_name FROM identity WHERE id = 1), 'Anonymous'))",
            [participant_id],
        )?;
        Ok(())
    }

    pub fn get_display_name(&self) -> Result<String> {
        let conn = self.conn.lock();
        let name = conn
            .query_row("SELECT display_name FROM identity WHERE id = 1", [], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(name.unwrap_or_else(|| "Anonymous".to_string()))
    }

    pub fn set_display_name(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("UPDATE identity SET display_name = ?1 WHERE id = 1", [name])?;
        Ok(())
    }

    // ============================================================
    // Settings
    // ============================================================

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get::<_, String>(0))
            .optional()
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)", [key, value])?;
        Ok(())
    }

    pub fn get_all_settings(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_crud() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_setting("inputVolume").unwrap(), None);

        db.set_setting("inputVolume", "80").unwrap();
        db.set_setting("echoCancellation", "false").unwrap();
        db.set_setting("inputVolume", "90").unwrap();
        assert_eq!(db.get_setting("inputVolume").unwrap().as_deref(), Some("90"));

        let all = db.get_all_settings().unwrap();
        assert_eq!(
            all,
            vec![
                ("echoCancellation".to_string(), "false".to_string()),
                ("inputVolume".to_string(), "90".to_string()),
            ]
        );

        db.delete_setting("inputVolume").unwrap();
        assert_eq!(db.get_setting("inputVolume").unwrap(), None);
    }

    #[test]
    fn identity_keeps_display_name_across_id_saves() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.load_participant_id().unwrap(), None);
        assert_eq!(db.get_display_name().unwrap(), "Anonymous");

        db.save_participant_id("abc").unwrap();
        db.set_display_name("Alice").unwrap();
        db.save_participant_id("abc").unwrap();

        assert_eq!(db.load_participant_id().unwrap().as_deref(), Some("abc"));
        assert_eq!(db.get_display_name().unwrap(), "Alice");
    }

    #[test]
    fn reopening_on_disk_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("chatr-voice-db-{}", uuid::Uuid::new_v4()));
        {
            let db = Database::new(&dir).unwrap();
            db.set_setting("outputVolume", "40").unwrap();
        }
        let db = Database::new(&dir).unwrap();
        assert_eq!(db.get_setting("outputVolume").unwrap().as_deref(), Some("40"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
