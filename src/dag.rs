//! The registry of deferred resolution actions and their dependencies.
//!
//! While the parser walks a module it cannot yet know whether the entities a
//! reference points at exist, so the linker registers a [`Resolver`] per
//! symbolic identity instead: the action runs during
//! [`Linker::try_link`](crate::Linker::try_link), after a topological sort
//! has ordered it behind everything it depends on.

use crate::error::{LinkError, LinkResult};
use crate::symbol::Sym;
use indexmap::IndexMap;
use std::collections::HashMap;

/// The effect run when a symbol is resolved. May fail, which aborts the
/// whole link.
pub type ResolveAction = Box<dyn FnMut() -> LinkResult<()> + Send>;

/// A deferred resolution: a symbol, the symbols whose actions must run
/// first, and the action itself.
pub struct Resolver {
    sym: Sym,
    dependencies: Vec<Sym>,
    action: ResolveAction,
}

impl Resolver {
    /// The symbol this resolver resolves.
    pub fn sym(&self) -> &Sym {
        &self.sym
    }

    /// The symbols whose actions must run before this resolver's action.
    pub fn dependencies(&self) -> &[Sym] {
        &self.dependencies
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Resolver({})", self.sym)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    // On the current DFS stack.
    Temporary,
    // Already emitted.
    Permanent,
}

/// The dependency graph of deferred resolutions, keyed by symbol.
///
/// Registration order is preserved: it drives which root the topological
/// sort visits first, and with it the order of independent resolutions and
/// the rendering of cycle diagnostics.
#[derive(Debug, Default)]
pub struct ResolutionDag {
    resolutions: IndexMap<Sym, Resolver>,
}

impl ResolutionDag {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` to resolve `sym` after `dependencies`. At most one
    /// resolver exists per symbol; re-registration overwrites.
    pub fn resolve_later(&mut self, sym: Sym, dependencies: Vec<Sym>, action: ResolveAction) {
        self.resolutions.insert(
            sym.clone(),
            Resolver {
                sym,
                dependencies,
                action,
            },
        );
    }

    /// Drop all registered resolvers.
    pub fn clear(&mut self) {
        self.resolutions.clear();
    }

    /// The number of registered resolvers.
    pub fn len(&self) -> usize {
        self.resolutions.len()
    }

    /// Returns true when no resolver is registered.
    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty()
    }

    /// Run the action registered for `sym`.
    pub fn run_action(&mut self, sym: &Sym) -> LinkResult<()> {
        match self.resolutions.get_mut(sym) {
            Some(resolver) => (resolver.action)(),
            None => Ok(()),
        }
    }

    /// Produce an order of the registered symbols in which every registered
    /// dependency appears before its dependents.
    ///
    /// Dependencies without a resolver are ignored: the graph models
    /// intra-link-round ordering only, and eagerly-resolved or externally
    /// provided entities appear as dangling dependency targets. A cycle
    /// among registered symbols fails with a rendering of the offending
    /// chain.
    pub fn toposort(&self) -> LinkResult<Vec<Sym>> {
        let mut marks: HashMap<Sym, Mark> = HashMap::new();
        let mut sorted = Vec::with_capacity(self.resolutions.len());
        let roots: Vec<Sym> = self.resolutions.keys().cloned().collect();
        for root in &roots {
            let mut stack = Vec::new();
            self.visit(root, &mut marks, &mut sorted, &mut stack)?;
        }
        Ok(sorted)
    }

    fn visit(
        &self,
        sym: &Sym,
        marks: &mut HashMap<Sym, Mark>,
        sorted: &mut Vec<Sym>,
        stack: &mut Vec<Sym>,
    ) -> LinkResult<()> {
        let Some(resolver) = self.resolutions.get(sym) else {
            // Dangling dependency.
            return Ok(());
        };
        match marks.get(sym) {
            Some(Mark::Permanent) => return Ok(()),
            Some(Mark::Temporary) => {
                return Err(LinkError::DependencyCycle {
                    cycle: render_cycle(stack, sym),
                });
            }
            None => {}
        }
        marks.insert(sym.clone(), Mark::Temporary);
        stack.push(sym.clone());
        for dependency in &resolver.dependencies {
            self.visit(dependency, marks, sorted, stack)?;
        }
        stack.pop();
        marks.insert(sym.clone(), Mark::Permanent);
        sorted.push(sym.clone());
        Ok(())
    }
}

// Renders the chain from the first occurrence of `sym` on the stack back to
// `sym`, so the diagnostic starts and ends at the same symbol.
fn render_cycle(stack: &[Sym], sym: &Sym) -> String {
    let start = stack.iter().position(|s| s == sym).unwrap_or(0);
    let mut result = String::new();
    for s in &stack[start..] {
        result.push_str(&s.to_string());
        result.push_str(" -> ");
    }
    result.push_str(&sym.to_string());
    result
}
