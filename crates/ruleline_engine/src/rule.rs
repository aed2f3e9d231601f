//! Rules and the match lifecycle.
//!
//! A [`Rule`] is a compiled pattern plus up to three host callbacks. It
//! drives every match of the pattern through its states:
//!
//! ```text
//!   candidate ──► queued ──► running ──► done
//!                   ▲           │
//!                   └── failed ◄┘
//! ```
//!
//! [`Rule::activate`] recomputes matches and records what each should look
//! like (`next_arguments`). [`Rule::dispatch`] claims one queued match,
//! compares what was last announced (`live_arguments`) with what is
//! wanted, and runs exactly the callbacks that bridge the two.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ruleline_foundation::{Error, ErrorContext, Result, Value};
use ruleline_language::{RuleDefinition, parse_rule};
use ruleline_storage::{
    Arguments, Database, Fingerprint, MatchRow, MatchStore, SchemaRegistry, Upsert,
};
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::definer::{ARGUMENTS_COLUMN, IDS_COLUMN};
use crate::impact::{Change, Impact};
use crate::pattern::ConstraintSet;

// =============================================================================
// Rule identity
// =============================================================================

/// Stable rule identifier: the CRC-32 of the rule name.
///
/// Derived rather than allocated, so match rows stay attached to their rule
/// across restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(pub u32);

impl RuleId {
    /// Derives the id of a rule name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(crc32fast::hash(name.as_bytes()))
    }

    /// The id as stored in the match table.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        i64::from(self.0)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// =============================================================================
// Callbacks
// =============================================================================

/// Error type host callbacks return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// A host callback.
pub type Callback =
    Arc<dyn Fn(&CallbackContext<'_>) -> std::result::Result<(), CallbackError> + Send + Sync>;

/// Which lifecycle transition a callback announces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// The match started matching.
    Match,
    /// The match's arguments changed.
    Update,
    /// The match stopped matching.
    Unmatch,
}

impl Event {
    /// Returns the section name used in rule files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Match => "on match",
            Self::Update => "on update",
            Self::Unmatch => "on unmatch",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a callback sees.
#[derive(Clone, Copy, Debug)]
pub struct CallbackContext<'a> {
    /// Name of the rule.
    pub rule: &'a str,
    /// Match id.
    pub match_id: i64,
    /// Match identity.
    pub ids: &'a Fingerprint,
    /// Arguments being announced. For an unmatch, the last announced ones.
    pub arguments: &'a Arguments,
    /// Previously announced arguments, for an update.
    pub previous: Option<&'a Arguments>,
    /// The transition.
    pub event: Event,
}

impl CallbackContext<'_> {
    /// Returns the value of a pattern variable.
    #[must_use]
    pub fn value(&self, name: &str) -> Value {
        self.arguments.value(name)
    }

    /// Returns the record id bound to an id variable.
    #[must_use]
    pub fn id(&self, name: &str) -> Option<i64> {
        self.ids.get(name)
    }
}

/// The callbacks of one rule. Missing callbacks are no-ops.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_match: Option<Callback>,
    on_update: Option<Callback>,
    on_unmatch: Option<Callback>,
}

impl Callbacks {
    /// Creates an empty callback set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the callback run when a match appears.
    #[must_use]
    pub fn on_match<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallbackContext<'_>) -> std::result::Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.on_match = Some(Arc::new(f));
        self
    }

    /// Sets the callback run when a match's arguments change.
    #[must_use]
    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallbackContext<'_>) -> std::result::Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.on_update = Some(Arc::new(f));
        self
    }

    /// Sets the callback run when a match disappears.
    #[must_use]
    pub fn on_unmatch<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallbackContext<'_>) -> std::result::Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.on_unmatch = Some(Arc::new(f));
        self
    }

    /// Returns the callback for an event.
    #[must_use]
    pub fn get(&self, event: Event) -> Option<&Callback> {
        match event {
            Event::Match => self.on_match.as_ref(),
            Event::Update => self.on_update.as_ref(),
            Event::Unmatch => self.on_unmatch.as_ref(),
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_match", &self.on_match.is_some())
            .field("on_update", &self.on_update.is_some())
            .field("on_unmatch", &self.on_unmatch.is_some())
            .finish()
    }
}

// =============================================================================
// Dispatch planning
// =============================================================================

/// What a dispatch must announce to bring `live_arguments` up to date.
#[derive(Clone, Debug, PartialEq)]
enum Plan {
    /// Never announced and no longer wanted.
    Discard,
    /// Already announced as wanted.
    Settle(Arguments),
    Match(Arguments),
    Unmatch(Arguments),
    Update {
        previous: Arguments,
        next: Arguments,
    },
    /// Changed arguments with no update callback, or arguments a
    /// concurrent writer's announcement was overwritten with.
    Rematch {
        previous: Arguments,
        next: Arguments,
    },
}

impl Plan {
    fn for_row(row: &MatchRow, has_update: bool) -> Self {
        match (row.live_arguments.clone(), row.next_arguments.clone()) {
            (None, None) => Self::Discard,
            (None, Some(next)) => Self::Match(next),
            (Some(live), None) => Self::Unmatch(live),
            (Some(live), Some(next)) if live == next => Self::Settle(next),
            (Some(previous), Some(next)) if has_update && !row.rematch => {
                Self::Update { previous, next }
            }
            (Some(previous), Some(next)) => Self::Rematch { previous, next },
        }
    }

    fn steps(&self) -> Vec<(Event, &Arguments, Option<&Arguments>)> {
        match self {
            Self::Discard | Self::Settle(_) => Vec::new(),
            Self::Match(next) => vec![(Event::Match, next, None)],
            Self::Unmatch(live) => vec![(Event::Unmatch, live, None)],
            Self::Update { previous, next } => vec![(Event::Update, next, Some(previous))],
            Self::Rematch { previous, next } => {
                vec![(Event::Unmatch, previous, None), (Event::Match, next, None)]
            }
        }
    }

    /// Arguments the match announces once the plan ran, or `None` if it
    /// retracts.
    fn outcome(&self) -> Option<&Arguments> {
        match self {
            Self::Discard | Self::Unmatch(_) => None,
            Self::Settle(next)
            | Self::Match(next)
            | Self::Update { next, .. }
            | Self::Rematch { next, .. } => Some(next),
        }
    }
}

/// Result of dispatching one match.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The match was not claimable, usually because another worker holds it.
    Skipped,
    /// The callbacks for these events ran and succeeded.
    Fired(Vec<Event>),
    /// A callback failed; the match is marked failed and stays claimable.
    Failed(Error),
}

/// Aggregate result of a dispatch pass.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Matches attempted.
    pub total: usize,
    /// Matches dispatched successfully.
    pub succeeded: usize,
    /// Matches whose callback failed.
    pub failed: usize,
    /// Matches another worker claimed first.
    pub skipped: usize,
    /// The failures, by match id.
    pub failures: Vec<(i64, Error)>,
}

impl DispatchReport {
    /// Folds another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.total += other.total;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
    }

    /// Returns true if no callback failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

// =============================================================================
// Rule
// =============================================================================

/// A registered rule.
#[derive(Clone, Debug)]
pub struct Rule {
    id: RuleId,
    definition: RuleDefinition,
    constraints: ConstraintSet,
    callbacks: Callbacks,
    store: MatchStore,
}

impl Rule {
    /// Compiles a parsed rule.
    ///
    /// # Errors
    /// Returns a compile error, tagged with the rule name, if the pattern
    /// cannot be compiled.
    pub fn new(
        definition: RuleDefinition,
        schema: Arc<SchemaRegistry>,
        config: &EngineConfig,
        callbacks: Callbacks,
    ) -> Result<Self> {
        let constraints = ConstraintSet::new(definition.pattern.clone(), schema, config.dialect)
            .map_err(|err| in_rule(err, &definition.name))?;
        Ok(Self {
            id: RuleId::from_name(&definition.name),
            definition,
            constraints,
            callbacks,
            store: config.match_store(),
        })
    }

    /// Parses and compiles a single rule.
    ///
    /// # Errors
    /// Returns a parse or compile error.
    pub fn compile(
        source: &str,
        schema: Arc<SchemaRegistry>,
        config: &EngineConfig,
        callbacks: Callbacks,
    ) -> Result<Self> {
        Self::new(parse_rule(source)?, schema, config, callbacks)
    }

    /// The rule id.
    #[must_use]
    pub const fn id(&self) -> RuleId {
        self.id
    }

    /// The rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The parsed definition, including callback sources.
    #[must_use]
    pub fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    /// The compiled pattern.
    #[must_use]
    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// The callbacks.
    #[must_use]
    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Replaces the callbacks.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// The match store.
    #[must_use]
    pub fn store(&self) -> &MatchStore {
        &self.store
    }

    /// The matches `change` may have affected.
    #[must_use]
    pub fn impact(&self, change: &Change) -> Impact {
        self.constraints.impact(change)
    }

    /// Analyzes `change` and activates whatever it may have affected.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn process_change(&self, db: &mut dyn Database, change: &Change) -> Result<Vec<i64>> {
        let impact = self.impact(change);
        if impact.is_none() {
            trace!(
                rule = %self.name(),
                record_type = %change.record_type,
                "rule.change.irrelevant"
            );
            return Ok(Vec::new());
        }
        self.activate(db, &impact)
    }

    /// Recomputes matches within `impact` and reconciles the match store.
    ///
    /// Every tuple produced is upserted by fingerprint; a match inside the
    /// recomputed space that was not produced is retracted. Returns the ids
    /// of matches that now owe a dispatch.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn activate(&self, db: &mut dyn Database, impact: &Impact) -> Result<Vec<i64>> {
        let (sql, coverage) = match impact {
            Impact::None => return Ok(Vec::new()),
            Impact::All => (self.constraints.sql().to_string(), None),
            Impact::Restricted(pending) => {
                if pending.is_empty() {
                    return Ok(Vec::new());
                }
                let coverage: Vec<(String, String)> = pending
                    .iter()
                    .filter_map(|p| {
                        self.constraints
                            .sink_key(&p.sink)
                            .map(|key| (key.to_string(), p.sql.clone()))
                    })
                    .collect();
                (self.constraints.restricted_sql(pending), Some(coverage))
            }
        };

        let rows = db.query(&sql)?;
        let mut produced: BTreeMap<Fingerprint, Arguments> = BTreeMap::new();
        for row in &rows {
            let ids = Fingerprint::from_value(&row.value(IDS_COLUMN))?;
            let arguments = Arguments::from_value(&row.value(ARGUMENTS_COLUMN))?
                .unwrap_or_default();
            produced.insert(ids, arguments);
        }

        let rule_id = self.id.as_i64();
        let mut affected = BTreeSet::new();
        let (mut inserted, mut updated, mut retracted) = (0usize, 0usize, 0usize);
        for (ids, arguments) in &produced {
            match self.store.upsert(db, rule_id, ids, arguments)? {
                Upsert::Inserted(id) => {
                    inserted += 1;
                    affected.insert(id);
                }
                Upsert::Updated(id) => {
                    updated += 1;
                    affected.insert(id);
                }
                Upsert::Unchanged(_) => {}
            }
        }
        self.store.backfill_id_rows(db, rule_id)?;

        for row in self.store.covered_matches(db, rule_id, coverage.as_deref())? {
            if produced.contains_key(&row.ids) {
                continue;
            }
            retracted += 1;
            if row.is_announced() || row.is_running() {
                self.store.mark_unmatched(db, row.id)?;
                affected.insert(row.id);
            } else {
                self.store.delete(db, row.id)?;
                affected.remove(&row.id);
            }
        }

        debug!(
            rule = %self.name(),
            full = coverage.is_none(),
            rows = rows.len(),
            inserted,
            updated,
            retracted,
            "rule.activate"
        );
        Ok(affected.into_iter().collect())
    }

    /// Claims one match and runs the callbacks it owes.
    ///
    /// A callback error or panic is caught: the match is marked failed and
    /// stays claimable, and the error is returned in the outcome.
    ///
    /// # Errors
    /// Returns an error only if the store fails.
    pub fn dispatch(&self, db: &mut dyn Database, match_id: i64) -> Result<DispatchOutcome> {
        if !self.store.claim(db, match_id)? {
            trace!(rule = %self.name(), match_id, "match.claim_lost");
            return Ok(DispatchOutcome::Skipped);
        }
        let Some(row) = self.store.get(db, match_id)? else {
            return Ok(DispatchOutcome::Skipped);
        };
        debug!(rule = %self.name(), match_id, "match.claimed");

        let plan = Plan::for_row(&row, self.callbacks.on_update.is_some());
        match self.run(&row, &plan) {
            Ok(fired) => {
                match plan.outcome() {
                    Some(arguments) => self.store.complete(db, match_id, arguments)?,
                    None => {
                        self.store.complete_unmatch(db, match_id)?;
                    }
                }
                debug!(rule = %self.name(), match_id, events = ?fired, "match.dispatched");
                Ok(DispatchOutcome::Fired(fired))
            }
            Err(err) => {
                self.store.fail(db, match_id)?;
                warn!(rule = %self.name(), match_id, error = %err, "match.failed");
                Ok(DispatchOutcome::Failed(err))
            }
        }
    }

    fn run(&self, row: &MatchRow, plan: &Plan) -> Result<Vec<Event>> {
        let steps = plan.steps();
        let mut fired = Vec::with_capacity(steps.len());
        for (event, arguments, previous) in &steps {
            let context = CallbackContext {
                rule: self.name(),
                match_id: row.id,
                ids: &row.ids,
                arguments,
                previous: *previous,
                event: *event,
            };
            // An event without a callback is announced by doing nothing.
            if let Some(callback) = self.callbacks.get(*event) {
                self.invoke(callback, &context)?;
                fired.push(*event);
            }
        }
        Ok(fired)
    }

    fn invoke(&self, callback: &Callback, context: &CallbackContext<'_>) -> Result<()> {
        match panic::catch_unwind(AssertUnwindSafe(|| callback(context))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                let message = format!("{}: {err}", context.event);
                Err(Error::execution(self.name(), message))
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "callback panicked".to_string());
                let message = format!("{} panicked: {message}", context.event);
                Err(Error::execution(self.name(), message))
            }
        }
    }

    /// Dispatches up to `limit` claimable matches.
    ///
    /// # Errors
    /// Returns an error only if the store fails.
    pub fn dispatch_all(&self, db: &mut dyn Database, limit: usize) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        for match_id in self.pending(db, limit)? {
            report.total += 1;
            match self.dispatch(db, match_id)? {
                DispatchOutcome::Skipped => report.skipped += 1,
                DispatchOutcome::Fired(_) => report.succeeded += 1,
                DispatchOutcome::Failed(err) => {
                    report.failed += 1;
                    report.failures.push((match_id, err));
                }
            }
        }
        if report.total > 0 {
            debug!(
                rule = %self.name(),
                total = report.total,
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                "rule.dispatch"
            );
        }
        Ok(report)
    }

    /// Ids of queued or failed matches nobody holds.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn pending(&self, db: &mut dyn Database, limit: usize) -> Result<Vec<i64>> {
        self.store.claimable(db, self.id.as_i64(), limit)
    }

    /// All match rows of this rule.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn matches(&self, db: &mut dyn Database) -> Result<Vec<MatchRow>> {
        self.store.matches(db, self.id.as_i64())
    }

    /// Releases every running match of this rule so it can be claimed again.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn reset_stuck(&self, db: &mut dyn Database) -> Result<u64> {
        let reset = self.store.reset_stuck(db, self.id.as_i64())?;
        if reset > 0 {
            warn!(rule = %self.name(), reset, "rule.reset_stuck");
        }
        Ok(reset)
    }
}

fn in_rule(err: Error, name: &str) -> Error {
    if err.context.is_some() {
        return err;
    }
    err.with_context(ErrorContext::new().with_rule(name))
}
