//! Pre-dispatch validation.
//!
//! A [`Policy`] says which validators run, in what order and under which
//! enforcement mode; the [`ValidationEngine`] runs them over a [`Context`]
//! and folds their [`Decision`]s into a [`ValidationOutcome`].

pub mod builtin;
pub mod context;
pub mod decision;
pub mod engine;
pub mod policy;
pub mod validator;

pub use builtin::{
    DlpValidator, DriftValidator, EffectsValidator, PathTraversalValidator, SemanticValidator,
    SsrfValidator, TaintValidator,
};
pub use context::Context;
pub use decision::{Decision, Outcome, RiskLevel};
pub use engine::{ValidationEngine, ValidationOutcome, ValidatorFailure};
pub use policy::{EnforcementMode, GlobalOverride, Policy, PolicyError, ValidatorConfig};
pub use validator::{Validator, ValidatorError, ValidatorRegistry};
