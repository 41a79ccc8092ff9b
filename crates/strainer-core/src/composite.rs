//! Composite filters: sequencers and multiplexers.

use crate::context::ExecutionContext;
use crate::environment::UnsupportedRuntimeEnvironment;
use crate::filter::Filter;
use crate::process::FilterDecl;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Class key of the sequencer.
pub const SEQUENCE_CLASS: &str = "sequence";

/// Class key of the multiplexer.
pub const MULTIPLEX_CLASS: &str = "multiplex";

/// How a composite combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeMode {
    /// Feed each child's output into the next child.
    Sequence,
    /// Give every child the same input and collect all outputs.
    Multiplex,
}

impl CompositeMode {
    pub fn class(&self) -> &'static str {
        match self {
            CompositeMode::Sequence => SEQUENCE_CLASS,
            CompositeMode::Multiplex => MULTIPLEX_CLASS,
        }
    }

    /// The registry declaration of this composite class.
    pub fn decl(&self) -> FilterDecl {
        let (name, description) = match self {
            CompositeMode::Sequence => ("Sequence", "Chain child filters in sequence order"),
            CompositeMode::Multiplex => (
                "Multiplex",
                "Run every child filter on the same input and collect the outputs",
            ),
        };
        let mut decl = FilterDecl::new(self.class())
            .display_name(name)
            .description(description);
        decl.composite = Some(*self);
        decl
    }
}

pub(crate) fn run<M: Send>(
    mode: CompositeMode,
    children: &mut [Filter<M>],
    input: Value,
    ctx: &ExecutionContext,
    errors: &mut Vec<String>,
) -> Result<Option<Value>, UnsupportedRuntimeEnvironment> {
    match mode {
        CompositeMode::Sequence => sequence(children, input, ctx, errors),
        CompositeMode::Multiplex => multiplex(children, input, ctx, errors),
    }
}

/// Run one child and take the errors it recorded during this run.
fn run_child<M: Send>(
    child: &mut Filter<M>,
    input: Value,
    ctx: &ExecutionContext,
) -> (Result<Option<Value>, UnsupportedRuntimeEnvironment>, Vec<String>) {
    let before = child.errors.len();
    let result = child.execute(ctx, input);
    let new_errors = child.errors.get(before..).unwrap_or_default().to_vec();
    (result, new_errors)
}

fn sequence<M: Send>(
    children: &mut [Filter<M>],
    input: Value,
    ctx: &ExecutionContext,
    errors: &mut Vec<String>,
) -> Result<Option<Value>, UnsupportedRuntimeEnvironment> {
    let mut current = input;

    for child in children.iter_mut() {
        let (result, new_errors) = run_child(child, current, ctx);
        errors.extend(new_errors);

        match result? {
            Some(output) => current = output,
            None => {
                tracing::debug!(child = %child.display_name, seq = child.sequence, "sequence aborted");
                return Ok(None);
            }
        }
    }

    Ok(Some(current))
}

fn multiplex<M: Send>(
    children: &mut [Filter<M>],
    input: Value,
    ctx: &ExecutionContext,
    errors: &mut Vec<String>,
) -> Result<Option<Value>, UnsupportedRuntimeEnvironment> {
    #[cfg(feature = "parallel")]
    let results: Vec<_> = {
        use rayon::prelude::*;
        children
            .par_iter_mut()
            .map(|child| run_child(child, input.clone(), ctx))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let results: Vec<_> = children
        .iter_mut()
        .map(|child| run_child(child, input.clone(), ctx))
        .collect();

    let mut outputs = Vec::with_capacity(results.len());
    for (result, new_errors) in results {
        errors.extend(new_errors);
        if let Some(output) = result? {
            outputs.push(output);
        }
    }

    Ok(Some(Value::Array(outputs)))
}
