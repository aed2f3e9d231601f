//! The rule registry.
//!
//! Owns every compiled rule of an embedding. Rules are held in a persistent
//! map, so [`RuleRegistry::snapshot`] is O(1) and a snapshot handed to a
//! worker is unaffected by later registrations.

use std::collections::BTreeMap;
use std::sync::Arc;

use im::OrdMap;
use ruleline_foundation::{Error, ErrorKind, Result};
use ruleline_language::{RuleDefinition, parse_rule, parse_rules};
use ruleline_storage::{Database, SchemaRegistry};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::impact::Change;
use crate::rule::{Callbacks, DispatchReport, Rule, RuleId};

/// An immutable set of rules.
pub type RuleSet = OrdMap<RuleId, Arc<Rule>>;

/// Result of loading a rule file.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Rules registered, in file order.
    pub loaded: Vec<RuleId>,
    /// Rules rejected, with the rule name when it could be read.
    pub failures: Vec<(Option<String>, Error)>,
}

impl LoadReport {
    /// Returns true if every rule loaded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Registered rules and the configuration they share.
#[derive(Clone, Debug)]
pub struct RuleRegistry {
    config: EngineConfig,
    schema: Arc<SchemaRegistry>,
    rules: RuleSet,
    names: OrdMap<String, RuleId>,
}

impl RuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: EngineConfig, schema: SchemaRegistry) -> Self {
        Self {
            config,
            schema: Arc::new(schema),
            rules: OrdMap::new(),
            names: OrdMap::new(),
        }
    }

    /// The shared configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The record schemas patterns compile against.
    #[must_use]
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Creates the match tables.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn install(&self, db: &mut dyn Database) -> Result<()> {
        self.config.match_store().install(db)
    }

    /// Compiles and registers a parsed rule.
    ///
    /// # Errors
    /// Returns `DuplicateRule` if the name is taken, or a compile error.
    pub fn register(&mut self, definition: RuleDefinition, callbacks: Callbacks) -> Result<RuleId> {
        if self.names.contains_key(&definition.name) {
            return Err(Error::new(ErrorKind::DuplicateRule(definition.name)));
        }
        let rule = Rule::new(
            definition,
            Arc::clone(&self.schema),
            &self.config,
            callbacks,
        )?;
        let id = rule.id();
        if let Some(existing) = self.rules.get(&id) {
            return Err(Error::internal(format!(
                "rule id {id} of {} collides with {}",
                rule.name(),
                existing.name()
            )));
        }
        debug!(rule = %rule.name(), id = %id, "registry.register");
        self.names.insert(rule.name().to_string(), id);
        self.rules.insert(id, Arc::new(rule));
        Ok(id)
    }

    /// Parses, compiles, and registers one rule.
    ///
    /// # Errors
    /// Returns a parse, compile, or duplicate-name error.
    pub fn register_source(&mut self, source: &str, callbacks: Callbacks) -> Result<RuleId> {
        self.register(parse_rule(source)?, callbacks)
    }

    /// Registers every rule of a rule file.
    ///
    /// Each rule stands alone: a rule that fails to parse or compile is
    /// reported and skipped, and the rest still load. Callbacks are looked
    /// up by rule name; rules without an entry get none.
    pub fn load(&mut self, source: &str, callbacks: &BTreeMap<String, Callbacks>) -> LoadReport {
        let mut report = LoadReport::default();
        for parsed in parse_rules(source) {
            let definition = match parsed {
                Ok(definition) => definition,
                Err(err) => {
                    let name = err.context.as_ref().and_then(|c| c.rule.clone());
                    warn!(rule = ?name, error = %err, "registry.load.rejected");
                    report.failures.push((name, err));
                    continue;
                }
            };
            let name = definition.name.clone();
            let callbacks = callbacks.get(&name).cloned().unwrap_or_default();
            match self.register(definition, callbacks) {
                Ok(id) => report.loaded.push(id),
                Err(err) => {
                    warn!(rule = %name, error = %err, "registry.load.rejected");
                    report.failures.push((Some(name), err));
                }
            }
        }
        info!(
            loaded = report.loaded.len(),
            rejected = report.failures.len(),
            "registry.load"
        );
        report
    }

    /// Removes a rule. Its match rows are left in place.
    pub fn deregister(&mut self, id: RuleId) -> Option<Arc<Rule>> {
        let rule = self.rules.remove(&id)?;
        self.names.remove(rule.name());
        debug!(rule = %rule.name(), id = %id, "registry.deregister");
        Some(rule)
    }

    /// Looks up a rule by id.
    #[must_use]
    pub fn get(&self, id: RuleId) -> Option<&Arc<Rule>> {
        self.rules.get(&id)
    }

    /// Looks up a rule by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Arc<Rule>> {
        self.names.get(name).and_then(|id| self.rules.get(id))
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rule is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterates over rules in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.values()
    }

    /// A cheap snapshot of the registered rules.
    #[must_use]
    pub fn snapshot(&self) -> RuleSet {
        self.rules.clone()
    }

    /// Activates every rule `change` may affect.
    ///
    /// Returns the matches owing a dispatch, per rule; rules with none are
    /// omitted.
    ///
    /// # Errors
    /// Returns the first store error.
    pub fn process_change(
        &self,
        db: &mut dyn Database,
        change: &Change,
    ) -> Result<BTreeMap<RuleId, Vec<i64>>> {
        let mut affected = BTreeMap::new();
        for (id, rule) in &self.rules {
            let ids = rule.process_change(db, change)?;
            if !ids.is_empty() {
                affected.insert(*id, ids);
            }
        }
        Ok(affected)
    }

    /// Dispatches one batch of claimable matches for every rule.
    ///
    /// Failed matches stay claimable, so a later pass retries them.
    ///
    /// # Errors
    /// Returns the first store error.
    pub fn dispatch_pending(&self, db: &mut dyn Database) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        for rule in self.rules.values() {
            report.merge(rule.dispatch_all(db, self.config.dispatch_batch_size)?);
        }
        if report.failed > 0 {
            warn!(
                failed = report.failed,
                total = report.total,
                "registry.dispatch.failures"
            );
        }
        Ok(report)
    }
}
