//! Bytecode version upgraders
//!
//! When the meaning of an operator changes, the old meaning is kept as a
//! separate versioned operator (`_div_0_3`, `_round_0_4`) and code written
//! for an older bytecode version is rewritten to call it. The registry is
//! process-wide, built on first use, and immutable afterwards.

use kiln_bytecode::{Function, BYTECODE_VERSION, MIN_BYTECODE_VERSION};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Rewrite rule for one operator over a range of versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upgrader {
    /// Operator name as written in old code
    pub operator: &'static str,
    /// First bytecode version the rule applies to
    pub min_version: u32,
    /// Last bytecode version the rule applies to
    pub max_version: u32,
    /// Operator implementing the old semantics
    pub replacement: &'static str,
}

/// Set of upgrade rules
#[derive(Debug)]
pub struct UpgraderRegistry {
    upgraders: Vec<Upgrader>,
}

static REGISTRY: OnceLock<UpgraderRegistry> = OnceLock::new();
static REGISTRATIONS: AtomicUsize = AtomicUsize::new(0);

/// Build the registry if needed and return it
///
/// Safe to call from any thread; the rules are registered exactly once.
pub fn ensure_registered() -> &'static UpgraderRegistry {
    REGISTRY.get_or_init(|| {
        REGISTRATIONS.fetch_add(1, Ordering::SeqCst);
        let registry = UpgraderRegistry::builtin();
        tracing::debug!(
            target: "kiln::upgrader",
            rules = registry.upgraders.len(),
            "Registered bytecode upgraders"
        );
        registry
    })
}

/// Number of times the registry has been built (at most one)
pub fn registration_count() -> usize {
    REGISTRATIONS.load(Ordering::SeqCst)
}

impl UpgraderRegistry {
    fn builtin() -> Self {
        Self {
            upgraders: vec![
                // Integer division truncated until version 4 made it true division
                Upgrader {
                    operator: "div",
                    min_version: MIN_BYTECODE_VERSION,
                    max_version: 3,
                    replacement: "_div_0_3",
                },
                // Rounding was half-away-from-zero until version 5
                Upgrader {
                    operator: "round",
                    min_version: MIN_BYTECODE_VERSION,
                    max_version: 4,
                    replacement: "_round_0_4",
                },
            ],
        }
    }

    /// All rules
    pub fn upgraders(&self) -> &[Upgrader] {
        &self.upgraders
    }

    /// Oldest bytecode version the rules cover
    pub fn min_version(&self) -> u32 {
        MIN_BYTECODE_VERSION
    }

    /// Newest bytecode version the rules cover
    pub fn max_version(&self) -> u32 {
        BYTECODE_VERSION
    }

    /// Whether code written for `version` can be interpreted
    pub fn supports(&self, version: u32) -> bool {
        (self.min_version()..=self.max_version()).contains(&version)
    }

    /// Operator that implements `operator` as it behaved in `version`
    pub fn resolve<'a>(&self, operator: &'a str, version: u32) -> &'a str {
        self.upgraders
            .iter()
            .find(|u| {
                u.operator == operator && (u.min_version..=u.max_version).contains(&version)
            })
            .map_or(operator, |u| u.replacement)
    }

    /// Rewrite a function's operator table for `version`; returns rewrites made
    pub fn upgrade_function(&self, function: &mut Function, version: u32) -> usize {
        let mut rewritten = 0;
        for op in &mut function.operators {
            let resolved = self.resolve(&op.name, version);
            if resolved != op.name {
                op.name = resolved.to_string();
                rewritten += 1;
            }
        }
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bytecode::OperatorRef;

    #[test]
    fn test_resolve_by_version() {
        let registry = ensure_registered();
        assert_eq!(registry.resolve("div", 1), "_div_0_3");
        assert_eq!(registry.resolve("div", 3), "_div_0_3");
        assert_eq!(registry.resolve("div", 4), "div");
        assert_eq!(registry.resolve("round", 4), "_round_0_4");
        assert_eq!(registry.resolve("round", 5), "round");
        assert_eq!(registry.resolve("relu", 1), "relu");
    }

    #[test]
    fn test_supported_range() {
        let registry = ensure_registered();
        assert!(!registry.supports(0));
        assert!(registry.supports(1));
        assert!(registry.supports(BYTECODE_VERSION));
        assert!(!registry.supports(BYTECODE_VERSION + 1));
    }

    #[test]
    fn test_upgrade_function_table() {
        let mut function = Function {
            name: "forward".to_string(),
            param_count: 2,
            local_count: 2,
            code: Vec::new(),
            operators: vec![
                OperatorRef {
                    name: "div".to_string(),
                    num_args: 2,
                },
                OperatorRef {
                    name: "relu".to_string(),
                    num_args: 1,
                },
            ],
        };
        let registry = ensure_registered();
        assert_eq!(registry.upgrade_function(&mut function, 2), 1);
        assert_eq!(function.operators[0].name, "_div_0_3");
        // Already upgraded tables are left alone
        assert_eq!(registry.upgrade_function(&mut function, 2), 0);
    }

    #[test]
    fn test_registered_once() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| ensure_registered() as *const _ as usize))
            .collect();
        let addresses: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registration_count(), 1);
    }
}
