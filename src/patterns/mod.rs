//! Rule-based detection.
//!
//! This module provides the rule library collaborator and the line-oriented
//! matcher that turns rules into findings.

pub mod library;
pub mod matcher;

pub use library::{default_rules, BuiltinRuleLibrary, RuleLibrary};
pub use matcher::{PatternMatcher, RuleMatcher, DEFAULT_CONTEXT_LINES};
