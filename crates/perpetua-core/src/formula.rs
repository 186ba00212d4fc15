//! Numeric formula variants and their evaluator.
//!
//! Content packs express every tunable number (rates, cost curves, targets,
//! rewards) as a [`NumericFormula`]. Formulas are evaluated against a
//! [`FormulaContext`] carrying the standard variables (`level`, `time`,
//! `deltaTime`) and an [`EntityLookup`] capability for `expression` trees
//! that reference live entity state.
//!
//! Every evaluation must produce a finite number; NaN and infinities are
//! reported as [`FormulaError::NonFinite`] rather than propagated into the
//! resource columns.

use serde::{Deserialize, Serialize};

/// Maximum polynomial degree accepted by the evaluator.
pub const MAX_POLYNOMIAL_DEGREE: usize = 3;

/// Default bound on expression tree depth.
pub const DEFAULT_MAX_EXPRESSION_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by formula evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormulaError {
    /// The formula produced NaN or an infinity.
    #[error("formula produced a non-finite value in {context}")]
    NonFinite { context: String },

    /// An expression referenced an entity the context cannot resolve.
    #[error("unknown {kind:?} reference '{id}' in expression")]
    UnknownRef { kind: EntityKind, id: String },

    /// Polynomial degree above [`MAX_POLYNOMIAL_DEGREE`].
    #[error("polynomial degree {degree} exceeds the maximum of {max}")]
    DegreeExceeded { degree: usize, max: usize },

    /// Expression tree deeper than the configured bound.
    #[error("expression tree exceeds the maximum depth of {max}")]
    DepthExceeded { max: usize },
}

// ---------------------------------------------------------------------------
// NumericFormula
// ---------------------------------------------------------------------------

/// A declarative numeric formula.
///
/// All variants are evaluated with the context's `level` variable as the
/// principal input; `expression` trees may additionally read `time`,
/// `deltaTime`, and entity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", deny_unknown_fields)]
pub enum NumericFormula {
    /// A fixed value, independent of level.
    Constant { value: f64 },
    /// `base + slope * level`.
    Linear { base: f64, slope: f64 },
    /// `Σ coefficients[i] * level^i`, degree at most 3.
    Polynomial { coefficients: Vec<f64> },
    /// `base * growth^level + offset`.
    #[serde(rename_all = "camelCase")]
    Exponential {
        base: f64,
        growth: f64,
        #[serde(default)]
        offset: f64,
    },
    /// An expression tree over variables and entity lookups.
    Expression { tree: ExpressionNode },
}

impl NumericFormula {
    /// Shorthand for a constant formula.
    pub fn constant(value: f64) -> Self {
        Self::Constant { value }
    }

    /// Evaluate the formula against the given context.
    ///
    /// # Errors
    ///
    /// - [`FormulaError::NonFinite`] when the result (or any expression
    ///   intermediate) is NaN or infinite.
    /// - [`FormulaError::DegreeExceeded`] for polynomials above degree 3.
    /// - [`FormulaError::UnknownRef`] when an expression lookup misses.
    /// - [`FormulaError::DepthExceeded`] when an expression tree is deeper
    ///   than `ctx.max_depth`.
    pub fn evaluate(&self, ctx: &FormulaContext<'_>) -> Result<f64, FormulaError> {
        let level = ctx.variables.level;
        let value = match self {
            Self::Constant { value } => *value,
            Self::Linear { base, slope } => base + slope * level,
            Self::Polynomial { coefficients } => {
                if coefficients.len() > MAX_POLYNOMIAL_DEGREE + 1 {
                    return Err(FormulaError::DegreeExceeded {
                        degree: coefficients.len().saturating_sub(1),
                        max: MAX_POLYNOMIAL_DEGREE,
                    });
                }
                // Horner evaluation, highest coefficient first.
                coefficients
                    .iter()
                    .rev()
                    .fold(0.0, |acc, c| acc * level + c)
            }
            Self::Exponential {
                base,
                growth,
                offset,
            } => base * growth.powf(level) + offset,
            Self::Expression { tree } => tree.evaluate(ctx, 0)?,
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(FormulaError::NonFinite {
                context: self.kind_name().to_owned(),
            })
        }
    }

    /// The `kind` tag of this variant, as it appears on the wire.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Constant { .. } => "constant",
            Self::Linear { .. } => "linear",
            Self::Polynomial { .. } => "polynomial",
            Self::Exponential { .. } => "exponential",
            Self::Expression { .. } => "expression",
        }
    }

    /// Whether the formula is a plain constant (used by the transform cycle
    /// profitability analysis, which only evaluates "simple" conversions).
    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Self::Constant { value } => Some(*value),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ExpressionNode
// ---------------------------------------------------------------------------

/// Entity collections an expression may read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Resource,
    Generator,
    Upgrade,
    Automation,
    PrestigeLayer,
}

/// Variables available to expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariableName {
    Level,
    Time,
    DeltaTime,
}

/// A node of an expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", deny_unknown_fields)]
pub enum ExpressionNode {
    /// A literal value.
    Value { value: f64 },
    /// One of the context variables.
    Variable { name: VariableName },
    /// A live entity lookup (resource amount, generator level, ...).
    Entity { kind: EntityKind, id: String },
    /// Sum of all arguments.
    Add { args: Vec<ExpressionNode> },
    /// Product of all arguments.
    Mul { args: Vec<ExpressionNode> },
    /// `left - right`.
    Sub {
        left: Box<ExpressionNode>,
        right: Box<ExpressionNode>,
    },
    /// `left / right`.
    Div {
        left: Box<ExpressionNode>,
        right: Box<ExpressionNode>,
    },
    /// `base ^ exponent`.
    Pow {
        base: Box<ExpressionNode>,
        exponent: Box<ExpressionNode>,
    },
    /// Minimum of all arguments.
    Min { args: Vec<ExpressionNode> },
    /// Maximum of all arguments.
    Max { args: Vec<ExpressionNode> },
    /// Arithmetic negation.
    Neg { arg: Box<ExpressionNode> },
}

impl ExpressionNode {
    fn evaluate(&self, ctx: &FormulaContext<'_>, depth: usize) -> Result<f64, FormulaError> {
        if depth >= ctx.max_depth {
            return Err(FormulaError::DepthExceeded { max: ctx.max_depth });
        }
        let next = depth + 1;

        let value = match self {
            Self::Value { value } => *value,
            Self::Variable { name } => match name {
                VariableName::Level => ctx.variables.level,
                VariableName::Time => ctx.variables.time,
                VariableName::DeltaTime => ctx.variables.delta_time,
            },
            Self::Entity { kind, id } => {
                let looked_up = match kind {
                    EntityKind::Resource => ctx.entities.resource(id),
                    EntityKind::Generator => ctx.entities.generator(id),
                    EntityKind::Upgrade => ctx.entities.upgrade(id),
                    EntityKind::Automation => ctx.entities.automation(id),
                    EntityKind::PrestigeLayer => ctx.entities.prestige_layer(id),
                };
                looked_up.ok_or_else(|| FormulaError::UnknownRef {
                    kind: *kind,
                    id: id.clone(),
                })?
            }
            Self::Add { args } => {
                let mut acc = 0.0;
                for arg in args {
                    acc += arg.evaluate(ctx, next)?;
                }
                acc
            }
            Self::Mul { args } => {
                let mut acc = 1.0;
                for arg in args {
                    acc *= arg.evaluate(ctx, next)?;
                }
                acc
            }
            Self::Sub { left, right } => left.evaluate(ctx, next)? - right.evaluate(ctx, next)?,
            Self::Div { left, right } => left.evaluate(ctx, next)? / right.evaluate(ctx, next)?,
            Self::Pow { base, exponent } => {
                base.evaluate(ctx, next)?.powf(exponent.evaluate(ctx, next)?)
            }
            Self::Min { args } => {
                let mut acc = f64::INFINITY;
                for arg in args {
                    acc = acc.min(arg.evaluate(ctx, next)?);
                }
                acc
            }
            Self::Max { args } => {
                let mut acc = f64::NEG_INFINITY;
                for arg in args {
                    acc = acc.max(arg.evaluate(ctx, next)?);
                }
                acc
            }
            Self::Neg { arg } => -arg.evaluate(ctx, next)?,
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(FormulaError::NonFinite {
                context: "expression".to_owned(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Standard formula variables.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FormulaVariables {
    /// The purchase index, generator level, or completion count, depending on
    /// what is being evaluated.
    pub level: f64,
    /// Simulation time in seconds.
    pub time: f64,
    /// The current tick's delta in seconds.
    pub delta_time: f64,
}

impl FormulaVariables {
    /// Variables with only `level` set.
    pub fn at_level(level: f64) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }
}

/// Capability for resolving entity references inside expressions.
///
/// Returning `None` means the id is unknown and evaluation fails with
/// [`FormulaError::UnknownRef`]. The value semantics per kind are: resource
/// amount, generator level, upgrade purchase count, automation count, and
/// prestige completion count.
pub trait EntityLookup {
    fn resource(&self, id: &str) -> Option<f64>;
    fn generator(&self, id: &str) -> Option<f64>;
    fn upgrade(&self, id: &str) -> Option<f64>;
    fn automation(&self, id: &str) -> Option<f64>;
    fn prestige_layer(&self, id: &str) -> Option<f64>;
}

/// An [`EntityLookup`] that resolves nothing. For formulas known to be free
/// of entity references (cost curves, targets sampled by the validator).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEntities;

impl EntityLookup for NoEntities {
    fn resource(&self, _id: &str) -> Option<f64> {
        None
    }
    fn generator(&self, _id: &str) -> Option<f64> {
        None
    }
    fn upgrade(&self, _id: &str) -> Option<f64> {
        None
    }
    fn automation(&self, _id: &str) -> Option<f64> {
        None
    }
    fn prestige_layer(&self, _id: &str) -> Option<f64> {
        None
    }
}

static NO_ENTITIES: NoEntities = NoEntities;

/// Everything a formula evaluation can read.
pub struct FormulaContext<'a> {
    pub variables: FormulaVariables,
    pub entities: &'a dyn EntityLookup,
    pub max_depth: usize,
}

impl<'a> FormulaContext<'a> {
    /// Context over the given variables and entity lookup.
    pub fn new(variables: FormulaVariables, entities: &'a dyn EntityLookup) -> Self {
        Self {
            variables,
            entities,
            max_depth: DEFAULT_MAX_EXPRESSION_DEPTH,
        }
    }

    /// Context with only `level` set and no entity lookups.
    pub fn at_level(level: f64) -> FormulaContext<'static> {
        FormulaContext {
            variables: FormulaVariables::at_level(level),
            entities: &NO_ENTITIES,
            max_depth: DEFAULT_MAX_EXPRESSION_DEPTH,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
