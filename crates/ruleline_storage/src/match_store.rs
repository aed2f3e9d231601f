//! Persistent match state.
//!
//! Two tables hold everything the engine knows about matches:
//!
//! - the match table, one row per `(rule_id, fingerprint)` with the
//!   announced (`live_arguments`) and desired (`next_arguments`) arguments
//!   and the queued/running/failed timestamps;
//! - the ancillary id table, one row per `(fingerprint key, record id)` of
//!   each match, which lets activation find the matches a changed record
//!   used to contribute to.
//!
//! The uniqueness constraint on `(rule_id, ids)` is the source of truth for
//! match identity. Concurrent activations that race to insert the same
//! fingerprint see [`ErrorKind::ConcurrencyConflict`] and recover by
//! updating the existing row. When their arguments differ, the row is
//! flagged so its next dispatch retracts and re-announces the match.
//!
//! [`ErrorKind::ConcurrencyConflict`]: ruleline_foundation::ErrorKind::ConcurrencyConflict

use ruleline_foundation::{Error, RecordId, Result, Value};

use crate::database::{Database, Row};
use crate::dialect::Dialect;
use crate::fingerprint::{Arguments, Fingerprint};

const COLUMNS: &str = "\"id\", \"rule_id\", \"ids\", \"live_arguments\", \"next_arguments\", \
     \"queued_since\", \"running_since\", \"failed_since\", \
     \"has_id_rows\", \"rematch\"";

/// One row of the match table.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchRow {
    /// Match id.
    pub id: i64,
    /// Owning rule.
    pub rule_id: i64,
    /// Match identity.
    pub ids: Fingerprint,
    /// Arguments of the last successful announcement.
    pub live_arguments: Option<Arguments>,
    /// Arguments the match should have; nil once it stopped matching.
    pub next_arguments: Option<Arguments>,
    /// Set while the match awaits dispatch.
    pub queued_since: Option<String>,
    /// Set while a worker holds the match.
    pub running_since: Option<String>,
    /// Set when the last dispatch failed.
    pub failed_since: Option<String>,
    /// Whether the ancillary id rows have been written.
    pub has_id_rows: bool,
    /// Set when a concurrent writer's arguments were overwritten. The next
    /// dispatch announces unmatch then match instead of an update.
    pub rematch: bool,
}

impl MatchRow {
    fn from_row(row: &Row) -> Result<Self> {
        let id = row
            .value("id")
            .as_int()
            .ok_or_else(|| Error::internal("match row without id"))?;
        Ok(Self {
            id,
            rule_id: row.value("rule_id").as_int().unwrap_or_default(),
            ids: Fingerprint::from_value(&row.value("ids"))?,
            live_arguments: Arguments::from_value(&row.value("live_arguments"))?,
            next_arguments: Arguments::from_value(&row.value("next_arguments"))?,
            queued_since: timestamp(&row.value("queued_since")),
            running_since: timestamp(&row.value("running_since")),
            failed_since: timestamp(&row.value("failed_since")),
            has_id_rows: flag(&row.value("has_id_rows")),
            rematch: flag(&row.value("rematch")),
        })
    }

    /// Returns true if the match awaits dispatch.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.queued_since.is_some()
    }

    /// Returns true if a worker holds the match.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Returns true if the last dispatch failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed_since.is_some()
    }

    /// Returns true if the match was ever announced successfully.
    #[must_use]
    pub fn is_announced(&self) -> bool {
        self.live_arguments.is_some()
    }
}

fn flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        _ => false,
    }
}

fn timestamp(value: &Value) -> Option<String> {
    match value {
        Value::Nil => None,
        Value::Text(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// What [`MatchStore::upsert`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    /// A new match row was inserted.
    Inserted(i64),
    /// An existing row's arguments changed and it was queued.
    Updated(i64),
    /// An existing row already had these arguments.
    Unchanged(i64),
}

impl Upsert {
    /// The affected match id.
    #[must_use]
    pub const fn id(self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Updated(id) | Self::Unchanged(id) => id,
        }
    }

    /// Returns true if the row's state changed.
    #[must_use]
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }
}

/// SQL access to the match and ancillary id tables.
#[derive(Clone, Debug)]
pub struct MatchStore {
    dialect: Dialect,
    table: String,
    ids_table: String,
}

impl MatchStore {
    /// Creates a store over the named tables.
    #[must_use]
    pub fn new(dialect: Dialect, table: impl Into<String>, ids_table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            ids_table: ids_table.into(),
        }
    }

    /// The dialect statements are generated for.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The match table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The ancillary id table name.
    #[must_use]
    pub fn ids_table(&self) -> &str {
        &self.ids_table
    }

    fn t(&self) -> String {
        self.dialect.quote_ident(&self.table)
    }

    fn it(&self) -> String {
        self.dialect.quote_ident(&self.ids_table)
    }

    fn json(&self, args: &Arguments) -> String {
        self.dialect.json_literal(&args.to_json())
    }

    /// Creates both tables and their indexes if they do not exist.
    ///
    /// # Errors
    /// Returns an error if a statement fails.
    pub fn install(&self, db: &mut dyn Database) -> Result<()> {
        let d = self.dialect;
        let json = d.json_type();
        let ts = d.timestamp_type();
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {t} (\
                 \"id\" {pk}, \
                 \"rule_id\" BIGINT NOT NULL, \
                 \"ids\" TEXT NOT NULL, \
                 \"live_arguments\" {json}, \
                 \"next_arguments\" {json}, \
                 \"queued_since\" {ts}, \
                 \"running_since\" {ts}, \
                 \"failed_since\" {ts}, \
                 \"has_id_rows\" BOOLEAN NOT NULL DEFAULT FALSE, \
                 \"rematch\" BOOLEAN NOT NULL DEFAULT FALSE, \
                 UNIQUE (\"rule_id\", \"ids\"))",
                t = self.t(),
                pk = d.serial_primary_key(),
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {it} (\
                 \"rule_id\" BIGINT NOT NULL, \
                 \"match_id\" BIGINT NOT NULL, \
                 \"field_name\" TEXT NOT NULL, \
                 \"record_id\" BIGINT NOT NULL, \
                 UNIQUE (\"rule_id\", \"field_name\", \"record_id\", \"match_id\"))",
                it = self.it(),
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (\"match_id\")",
                d.quote_ident(&format!("{}_match_id", self.ids_table)),
                self.it(),
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (\"rule_id\", \"running_since\")",
                d.quote_ident(&format!("{}_claimable", self.table)),
                self.t(),
            ),
        ];
        for sql in &statements {
            db.execute(sql)?;
        }
        Ok(())
    }

    fn select(&self, db: &mut dyn Database, filter: &str) -> Result<Vec<MatchRow>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE {filter} ORDER BY \"id\"",
            self.t()
        );
        db.query(&sql)?.iter().map(MatchRow::from_row).collect()
    }

    /// Reads one match by id.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn get(&self, db: &mut dyn Database, id: i64) -> Result<Option<MatchRow>> {
        let filter = format!("\"id\" = {id}");
        Ok(self.select(db, &filter)?.into_iter().next())
    }

    /// Reads the match with the given identity.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn find(
        &self,
        db: &mut dyn Database,
        rule_id: i64,
        ids: &Fingerprint,
    ) -> Result<Option<MatchRow>> {
        let filter = format!(
            "\"rule_id\" = {rule_id} AND \"ids\" = {}",
            self.dialect.quote_str(&ids.to_json())
        );
        Ok(self.select(db, &filter)?.into_iter().next())
    }

    /// Reads every match of a rule.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn matches(&self, db: &mut dyn Database, rule_id: i64) -> Result<Vec<MatchRow>> {
        self.select(db, &format!("\"rule_id\" = {rule_id}"))
    }

    /// Inserts a new queued match.
    ///
    /// # Errors
    /// Returns `ConcurrencyConflict` if the identity already exists.
    pub fn insert(
        &self,
        db: &mut dyn Database,
        rule_id: i64,
        ids: &Fingerprint,
        args: &Arguments,
    ) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} (\"rule_id\", \"ids\", \"next_arguments\", \"queued_since\") \
             VALUES ({rule_id}, {}, {}, {}) RETURNING \"id\"",
            self.t(),
            self.dialect.quote_str(&ids.to_json()),
            self.json(args),
            self.dialect.now(),
        );
        let rows = db.query(&sql)?;
        rows.first()
            .and_then(|row| row.value("id").as_int())
            .ok_or_else(|| Error::internal("insert returned no match id"))
    }

    /// Inserts a match, or updates the row a concurrent writer inserted first.
    ///
    /// If the existing row holds other arguments it is flagged for
    /// [`MatchRow::rematch`].
    ///
    /// # Errors
    /// Returns an error if the store fails for any reason other than the
    /// uniqueness conflict this recovers from.
    pub fn insert_or_recover(
        &self,
        db: &mut dyn Database,
        rule_id: i64,
        ids: &Fingerprint,
        args: &Arguments,
    ) -> Result<Upsert> {
        match self.insert(db, rule_id, ids, args) {
            Ok(id) => Ok(Upsert::Inserted(id)),
            Err(err) if err.is_concurrency_conflict() => {
                let vanished = || Error::internal(format!("conflicting match {ids} vanished"));
                let row = self.find(db, rule_id, ids)?.ok_or_else(vanished)?;
                self.requeue(db, &row, args, true)
            }
            Err(err) => Err(err),
        }
    }

    /// Makes `args` the desired arguments of the match with identity `ids`.
    ///
    /// A row is only queued when its desired arguments actually change, so
    /// repeating an activation leaves the store untouched.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn upsert(
        &self,
        db: &mut dyn Database,
        rule_id: i64,
        ids: &Fingerprint,
        args: &Arguments,
    ) -> Result<Upsert> {
        match self.find(db, rule_id, ids)? {
            Some(row) => self.requeue(db, &row, args, false),
            None => self.insert_or_recover(db, rule_id, ids, args),
        }
    }

    fn requeue(
        &self,
        db: &mut dyn Database,
        row: &MatchRow,
        args: &Arguments,
        conflicted: bool,
    ) -> Result<Upsert> {
        if row.next_arguments.as_ref() == Some(args) {
            return Ok(Upsert::Unchanged(row.id));
        }
        let rematch = if conflicted {
            ", \"rematch\" = TRUE"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE {} SET \"next_arguments\" = {}, \
             \"queued_since\" = COALESCE(\"queued_since\", {}){rematch} WHERE \"id\" = {}",
            self.t(),
            self.json(args),
            self.dialect.now(),
            row.id,
        );
        db.execute(&sql)?;
        Ok(Upsert::Updated(row.id))
    }

    /// Writes the ancillary id rows of every match of a rule that lacks them.
    ///
    /// Returns the number of matches backfilled.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn backfill_id_rows(&self, db: &mut dyn Database, rule_id: i64) -> Result<usize> {
        let pending = self.select(
            db,
            &format!("\"rule_id\" = {rule_id} AND \"has_id_rows\" = FALSE"),
        )?;
        for row in &pending {
            for (field, record) in row.ids.iter() {
                let values = format!(
                    "VALUES ({rule_id}, {}, {}, {record})",
                    row.id,
                    self.dialect.quote_str(field)
                );
                let sql = self.dialect.insert_ignore(
                    &self.ids_table,
                    &["rule_id", "match_id", "field_name", "record_id"],
                    &values,
                );
                db.execute(&sql)?;
            }
            db.execute(&format!(
                "UPDATE {} SET \"has_id_rows\" = TRUE WHERE \"id\" = {}",
                self.t(),
                row.id
            ))?;
        }
        Ok(pending.len())
    }

    /// Reads the matches an activation is responsible for.
    ///
    /// With `sinks` of `None`, every match still wanted. Otherwise only
    /// matches whose fingerprint binds key `k` to a record id produced by
    /// `sql`, for some `(k, sql)` in `sinks`.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn covered_matches(
        &self,
        db: &mut dyn Database,
        rule_id: i64,
        sinks: Option<&[(String, String)]>,
    ) -> Result<Vec<MatchRow>> {
        let mut filter = format!("\"rule_id\" = {rule_id} AND \"next_arguments\" IS NOT NULL");
        if let Some(sinks) = sinks {
            if sinks.is_empty() {
                return Ok(Vec::new());
            }
            let by_sink = sinks
                .iter()
                .map(|(key, sql)| {
                    format!(
                        "(\"field_name\" = {} AND \"record_id\" IN ({sql}))",
                        self.dialect.quote_str(key)
                    )
                })
                .collect::<Vec<_>>()
                .join(" OR ");
            filter.push_str(&format!(
                " AND \"id\" IN (SELECT \"match_id\" FROM {} \
                 WHERE \"rule_id\" = {rule_id} AND ({by_sink}))",
                self.it()
            ));
        }
        self.select(db, &filter)
    }

    /// Marks a match as no longer matching and queues it.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn mark_unmatched(&self, db: &mut dyn Database, id: i64) -> Result<()> {
        db.execute(&format!(
            "UPDATE {} SET \"next_arguments\" = NULL, \
             \"queued_since\" = COALESCE(\"queued_since\", {}) WHERE \"id\" = {id}",
            self.t(),
            self.dialect.now(),
        ))?;
        Ok(())
    }

    /// Deletes a match and its ancillary id rows.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn delete(&self, db: &mut dyn Database, id: i64) -> Result<()> {
        db.execute(&format!("DELETE FROM {} WHERE \"match_id\" = {id}", self.it()))?;
        db.execute(&format!("DELETE FROM {} WHERE \"id\" = {id}", self.t()))?;
        Ok(())
    }

    /// Atomically claims a queued or failed, unclaimed match.
    ///
    /// Returns false if another worker got there first or there was nothing
    /// to do.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn claim(&self, db: &mut dyn Database, id: i64) -> Result<bool> {
        let affected = db.execute(&format!(
            "UPDATE {} SET \"running_since\" = {} WHERE \"id\" = {id} \
             AND \"running_since\" IS NULL \
             AND (\"queued_since\" IS NOT NULL OR \"failed_since\" IS NOT NULL)",
            self.t(),
            self.dialect.now(),
        ))?;
        Ok(affected == 1)
    }

    /// Records a successful dispatch that announced `used`.
    ///
    /// The match stays queued if its desired arguments moved on while the
    /// callback ran.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn complete(&self, db: &mut dyn Database, id: i64, used: &Arguments) -> Result<()> {
        let used = self.json(used);
        let settled = self.dialect.is_not_distinct("\"next_arguments\"", &used);
        db.execute(&format!(
            "UPDATE {} SET \"live_arguments\" = {used}, \"running_since\" = NULL, \
             \"failed_since\" = NULL, \"rematch\" = FALSE, \
             \"queued_since\" = CASE WHEN {settled} THEN NULL ELSE \"queued_since\" END \
             WHERE \"id\" = {id}",
            self.t(),
        ))?;
        Ok(())
    }

    /// Records a successful retraction.
    ///
    /// The row is deleted unless the match came back while the callback ran,
    /// in which case it stays queued with no announced arguments. Returns
    /// true if the row was deleted.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn complete_unmatch(&self, db: &mut dyn Database, id: i64) -> Result<bool> {
        let deleted = db.execute(&format!(
            "DELETE FROM {} WHERE \"id\" = {id} AND \"next_arguments\" IS NULL",
            self.t()
        ))?;
        if deleted == 1 {
            db.execute(&format!("DELETE FROM {} WHERE \"match_id\" = {id}", self.it()))?;
            return Ok(true);
        }
        db.execute(&format!(
            "UPDATE {} SET \"live_arguments\" = NULL, \"running_since\" = NULL, \
             \"failed_since\" = NULL, \"rematch\" = FALSE WHERE \"id\" = {id}",
            self.t()
        ))?;
        Ok(false)
    }

    /// Records a failed dispatch. The match keeps its queued state and
    /// becomes claimable again.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn fail(&self, db: &mut dyn Database, id: i64) -> Result<()> {
        db.execute(&format!(
            "UPDATE {} SET \"running_since\" = NULL, \"failed_since\" = {} WHERE \"id\" = {id}",
            self.t(),
            self.dialect.now(),
        ))?;
        Ok(())
    }

    /// Ids of queued or failed, unclaimed matches of a rule, oldest first.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn claimable(&self, db: &mut dyn Database, rule_id: i64, limit: usize) -> Result<Vec<i64>> {
        let rows = db.query(&format!(
            "SELECT \"id\" FROM {} WHERE \"rule_id\" = {rule_id} \
             AND \"running_since\" IS NULL \
             AND (\"queued_since\" IS NOT NULL OR \"failed_since\" IS NOT NULL) \
             ORDER BY \"id\" LIMIT {limit}",
            self.t(),
        ))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.value("id").as_int())
            .collect())
    }

    /// Returns every running match of a rule to the claimable state.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn reset_stuck(&self, db: &mut dyn Database, rule_id: i64) -> Result<u64> {
        db.execute(&format!(
            "UPDATE {} SET \"running_since\" = NULL WHERE \"rule_id\" = {rule_id} \
             AND \"running_since\" IS NOT NULL",
            self.t(),
        ))
    }

    /// Match ids listed in the ancillary table for `(field_name, record_id)`.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn matches_for_record(
        &self,
        db: &mut dyn Database,
        rule_id: i64,
        field_name: &str,
        record_id: RecordId,
    ) -> Result<Vec<i64>> {
        let rows = db.query(&format!(
            "SELECT \"match_id\" FROM {} WHERE \"rule_id\" = {rule_id} \
             AND \"field_name\" = {} AND \"record_id\" = {record_id} ORDER BY \"match_id\"",
            self.it(),
            self.dialect.quote_str(field_name),
        ))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.value("match_id").as_int())
            .collect())
    }
}
