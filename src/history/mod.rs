//! Durable transaction history.
//!
//! Every executed transaction is recorded in a small SQLite database
//! under the persist dir: one row per transaction, one row per added or
//! removed package, and the auto flag distinguishing dependency
//! installs from user requests. The store drives autoremove (via the
//! auto flags), `history list`, and the undo/redo/rollback planners.
//! Records begin in a pending state and only become visible on commit;
//! pending leftovers from a crashed process are discarded on the next
//! open.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::nevra::Nevra;

/// One replayable operation derived from history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistoryOp {
    /// Install this exact NEVRA.
    Install(String),
    /// Erase this exact NEVRA.
    Erase(String),
}

/// One committed history record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Monotonic transaction id.
    pub id: i64,
    /// The command line that caused the transaction.
    pub cmdline: String,
    /// Unix timestamp of the commit.
    pub stamp: i64,
    /// Added NEVRAs with their auto flag.
    pub added: Vec<(String, bool)>,
    /// Removed NEVRAs.
    pub removed: Vec<String>,
}

/// Handle over the history database.
pub struct HistoryStore {
    conn: Connection,
    pending: Option<i64>,
}

impl HistoryStore {
    /// What: Open (creating and migrating as needed) the history store.
    ///
    /// Inputs:
    /// - `path`: Database file under the persist dir.
    ///
    /// Output:
    /// - A ready store; pending rows from crashed runs are discarded.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS trans (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 cmdline TEXT NOT NULL,
                 stamp INTEGER NOT NULL,
                 state TEXT NOT NULL DEFAULT 'pending'
             );
             CREATE TABLE IF NOT EXISTS trans_item (
                 trans_id INTEGER NOT NULL,
                 nevra TEXT NOT NULL,
                 action TEXT NOT NULL,
                 auto INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS mark (
                 name TEXT PRIMARY KEY,
                 auto INTEGER NOT NULL
             );",
        )?;
        // Partial writes from a crashed process never become visible.
        conn.execute_batch(
            "DELETE FROM trans_item WHERE trans_id IN (SELECT id FROM trans WHERE state = 'pending');
             DELETE FROM trans WHERE state = 'pending';",
        )?;
        Ok(Self {
            conn,
            pending: None,
        })
    }

    /// What: Open a pending record for the running transaction.
    ///
    /// Inputs:
    /// - `cmdline`: The user's command line, for listings.
    ///
    /// Output:
    /// - The new record id; only one record may be pending at a time.
    pub fn begin(&mut self, cmdline: &str) -> Result<i64> {
        if self.pending.is_some() {
            return Err(Error::User(
                "a history record is already pending".to_string(),
            ));
        }
        let stamp = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO trans (cmdline, stamp, state) VALUES (?1, ?2, 'pending')",
            params![cmdline, stamp],
        )?;
        let id = self.conn.last_insert_rowid();
        self.pending = Some(id);
        debug!(id, "history record opened");
        Ok(id)
    }

    /// What: Record a package addition in the pending record.
    pub fn record_add(&self, nevra: &str, auto: bool) -> Result<()> {
        let id = self.require_pending()?;
        self.conn.execute(
            "INSERT INTO trans_item (trans_id, nevra, action, auto) VALUES (?1, ?2, 'add', ?3)",
            params![id, nevra, i64::from(auto)],
        )?;
        Ok(())
    }

    /// What: Record a package removal in the pending record.
    pub fn record_remove(&self, nevra: &str) -> Result<()> {
        let id = self.require_pending()?;
        self.conn.execute(
            "INSERT INTO trans_item (trans_id, nevra, action, auto) VALUES (?1, ?2, 'remove', 0)",
            params![id, nevra],
        )?;
        Ok(())
    }

    /// What: Make the pending record durable.
    pub fn commit(&mut self) -> Result<i64> {
        let id = self.require_pending()?;
        self.conn.execute(
            "UPDATE trans SET state = 'done' WHERE id = ?1",
            params![id],
        )?;
        self.pending = None;
        info!(id, "history record committed");
        Ok(id)
    }

    /// What: Discard the pending record.
    pub fn abort(&mut self) -> Result<()> {
        if let Some(id) = self.pending.take() {
            self.conn
                .execute("DELETE FROM trans_item WHERE trans_id = ?1", params![id])?;
            self.conn
                .execute("DELETE FROM trans WHERE id = ?1", params![id])?;
            debug!(id, "history record aborted");
        }
        Ok(())
    }

    fn require_pending(&self) -> Result<i64> {
        self.pending
            .ok_or_else(|| Error::User("no pending history record".to_string()))
    }

    /// What: List committed records.
    ///
    /// Inputs:
    /// - `from`/`to`: Optional inclusive id range.
    /// - `reverse`: Newest first when set.
    ///
    /// Output:
    /// - Full records including their package lists.
    pub fn list(
        &self,
        from: Option<i64>,
        to: Option<i64>,
        reverse: bool,
    ) -> Result<Vec<HistoryRecord>> {
        let mut records = Vec::new();
        let mut stmt = self.conn.prepare(
            "SELECT id, cmdline, stamp FROM trans
             WHERE state = 'done' AND id >= ?1 AND id <= ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(
            params![from.unwrap_or(0), to.unwrap_or(i64::MAX)],
            |row| {
                Ok(HistoryRecord {
                    id: row.get(0)?,
                    cmdline: row.get(1)?,
                    stamp: row.get(2)?,
                    added: Vec::new(),
                    removed: Vec::new(),
                })
            },
        )?;
        for row in rows {
            records.push(row?);
        }
        for record in &mut records {
            self.fill_items(record)?;
        }
        if reverse {
            records.reverse();
        }
        Ok(records)
    }

    /// What: Fetch one committed record by id.
    pub fn get(&self, id: i64) -> Result<HistoryRecord> {
        let mut records = self.list(Some(id), Some(id), false)?;
        records
            .pop()
            .ok_or(Error::HistoryIdNotFound { id })
    }

    fn fill_items(&self, record: &mut HistoryRecord) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT nevra, action, auto FROM trans_item WHERE trans_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![record.id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        for row in rows {
            let (nevra, action, auto) = row?;
            if action == "add" {
                record.added.push((nevra, auto != 0));
            } else {
                record.removed.push(nevra);
            }
        }
        Ok(())
    }

    /// What: The effective auto flag of every known package name.
    ///
    /// Output:
    /// - Name to auto flag; the most recent add wins, explicit marks
    ///   override everything.
    pub fn auto_flags(&self) -> Result<HashMap<String, bool>> {
        let mut flags: HashMap<String, bool> = HashMap::new();
        let mut stmt = self.conn.prepare(
            "SELECT ti.nevra, ti.auto FROM trans_item ti
             JOIN trans t ON t.id = ti.trans_id
             WHERE ti.action = 'add' AND t.state = 'done'
             ORDER BY ti.trans_id ASC, ti.rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (nevra, auto) = row?;
            let name = Nevra::parse(&nevra)
                .map(|n| n.name)
                .unwrap_or(nevra);
            flags.insert(name, auto != 0);
        }

        let mut stmt = self.conn.prepare("SELECT name, auto FROM mark")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (name, auto) = row?;
            flags.insert(name, auto != 0);
        }
        Ok(flags)
    }

    /// What: The effective auto flag of one name.
    ///
    /// Output:
    /// - `None` when the name never appears in history or marks.
    pub fn get_auto_flag(&self, name: &str) -> Result<Option<bool>> {
        Ok(self.auto_flags()?.get(name).copied())
    }

    /// What: Explicitly mark a name user-installed or auto-installed.
    pub fn mark(&self, name: &str, auto: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO mark (name, auto) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET auto = excluded.auto",
            params![name, i64::from(auto)],
        )?;
        info!(name, auto, "package marked");
        Ok(())
    }

    /// What: Plan the inverse of one record.
    ///
    /// Output:
    /// - Erase every added NEVRA, install every removed one.
    pub fn plan_undo(&self, id: i64) -> Result<Vec<HistoryOp>> {
        let record = self.get(id)?;
        let mut ops = Vec::new();
        for (nevra, _auto) in &record.added {
            ops.push(HistoryOp::Erase(nevra.clone()));
        }
        for nevra in &record.removed {
            ops.push(HistoryOp::Install(nevra.clone()));
        }
        Ok(ops)
    }

    /// What: Plan re-applying one record as recorded.
    pub fn plan_redo(&self, id: i64) -> Result<Vec<HistoryOp>> {
        let record = self.get(id)?;
        let mut ops = Vec::new();
        for nevra in &record.removed {
            ops.push(HistoryOp::Erase(nevra.clone()));
        }
        for (nevra, _auto) in &record.added {
            ops.push(HistoryOp::Install(nevra.clone()));
        }
        Ok(ops)
    }

    /// What: Plan the inverse of every record newer than `id`.
    ///
    /// Output:
    /// - The net operations restoring the installed set as of record
    ///   `id`: packages added since then are erased, packages removed
    ///   since then are reinstalled. A package both added and removed
    ///   since the anchor cancels out.
    pub fn plan_rollback(&self, id: i64) -> Result<Vec<HistoryOp>> {
        // The anchor record must exist (id 0 means "before the first").
        if id != 0 {
            self.get(id)?;
        }
        let newer = self.list(Some(id + 1), None, false)?;

        let mut delta: HashMap<String, i64> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for record in &newer {
            for (nevra, _auto) in &record.added {
                if !delta.contains_key(nevra) {
                    order.push(nevra.clone());
                }
                *delta.entry(nevra.clone()).or_insert(0) += 1;
            }
            for nevra in &record.removed {
                if !delta.contains_key(nevra) {
                    order.push(nevra.clone());
                }
                *delta.entry(nevra.clone()).or_insert(0) -= 1;
            }
        }

        let mut ops = Vec::new();
        for nevra in order {
            match delta.get(&nevra).copied().unwrap_or(0) {
                d if d > 0 => ops.push(HistoryOp::Erase(nevra)),
                d if d < 0 => ops.push(HistoryOp::Install(nevra)),
                _ => {}
            }
        }
        Ok(ops)
    }

    /// What: Auto-installed packages with no user-installed requirer.
    ///
    /// Inputs:
    /// - `pool`: The current package universe.
    ///
    /// Output:
    /// - Names that an autoremove sweep would erase right now.
    pub fn orphans(&self, pool: &crate::pool::Pool) -> Result<Vec<String>> {
        let flags = self.auto_flags()?;
        let orphan_ids = crate::plan::orphaned_after(
            pool,
            &flags,
            &std::collections::HashSet::new(),
            &[],
        );
        Ok(orphan_ids
            .into_iter()
            .map(|id| pool.package(id).nevra.name.clone())
            .collect())
    }

    /// Highest committed record id, `0` when the history is empty.
    pub fn last_id(&self) -> Result<i64> {
        let id: Option<i64> = self.conn.query_row(
            "SELECT MAX(id) FROM trans WHERE state = 'done'",
            [],
            |row| row.get(0),
        )?;
        Ok(id.unwrap_or(0))
    }
}
