pub mod reset;
pub mod rules;

pub use reset::{Classification, DeletionPlan, DeletionReport, ResetEngine, TreeEntry};
pub use rules::{RuleKind, RuleSet, WhitelistRule, DEFAULT_RULES};
