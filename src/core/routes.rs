use crate::core::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// A route target: one (provider, model) pair attempted in failover order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTarget {
    pub provider_id: String,
    pub model_id: String,
}

/// A route rule: maps an alias to an ordered, non-empty target list.
/// List order is the failover priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub alias: String,
    pub targets: Vec<RouteTarget>,
}

#[derive(Debug, Default)]
struct RouteState {
    aliases: Vec<String>,
    rules: HashMap<String, RouteRule>,
}

/// Alias list and route rules.
///
/// Exclusively owns route rules; provider/model ids inside targets are copied
/// by value, never back-referenced into the registry. A provider deleted from
/// the registry leaves its targets dangling on purpose.
#[derive(Debug, Default)]
pub struct RouteTable {
    state: RwLock<RouteState>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the alias list wholesale.
    ///
    /// Any alias removed from the list has its route rule deleted as a side
    /// effect; this cascade is mandatory, not garbage collection.
    pub fn set_alias_list(&self, aliases: Vec<String>) {
        let mut state = self.state.write().expect("route table lock poisoned");

        let dropped: Vec<String> = state
            .rules
            .keys()
            .filter(|alias| !aliases.contains(alias))
            .cloned()
            .collect();
        for alias in &dropped {
            state.rules.remove(alias);
            tracing::info!("Route rule dropped with alias '{}'", alias);
        }

        state.aliases = aliases;
    }

    pub fn get_alias_list(&self) -> Vec<String> {
        let state = self.state.read().expect("route table lock poisoned");
        state.aliases.clone()
    }

    /// Set the route rule for one alias.
    ///
    /// Rejects aliases that are not currently listed and empty target lists.
    pub fn set_route_rules(&self, alias: &str, targets: Vec<RouteTarget>) -> Result<()> {
        if targets.is_empty() {
            return Err(GatewayError::Validation(format!(
                "route rule for alias '{}' requires at least one target",
                alias
            )));
        }

        let mut state = self.state.write().expect("route table lock poisoned");
        if !state.aliases.iter().any(|a| a == alias) {
            return Err(GatewayError::Validation(format!(
                "alias '{}' is not in the alias list",
                alias
            )));
        }

        tracing::info!("Route rule set: alias='{}', {} target(s)", alias, targets.len());
        state.rules.insert(
            alias.to_string(),
            RouteRule {
                alias: alias.to_string(),
                targets,
            },
        );
        Ok(())
    }

    /// Get the route rule for one alias.
    ///
    /// An unlisted alias and a listed alias without a rule are both not-found,
    /// with distinguishable messages.
    pub fn get_route_rules(&self, alias: &str) -> Result<RouteRule> {
        let state = self.state.read().expect("route table lock poisoned");
        if !state.aliases.iter().any(|a| a == alias) {
            return Err(GatewayError::NotFound(format!(
                "alias '{}' is not in the alias list",
                alias
            )));
        }
        state
            .rules
            .get(alias)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("no route rule for alias '{}'", alias)))
    }

    /// Resolve an alias to its ordered failover targets.
    ///
    /// Resolution only looks up the rule; it never calls any provider.
    pub fn resolve(&self, alias: &str) -> Result<Vec<RouteTarget>> {
        let state = self.state.read().expect("route table lock poisoned");
        match state.rules.get(alias) {
            Some(rule) if !rule.targets.is_empty() => Ok(rule.targets.clone()),
            _ => Err(GatewayError::Unresolved(alias.to_string())),
        }
    }
}
