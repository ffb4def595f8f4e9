// Matrix Strategy Expansion
// Expands matrix axes into ordered concrete bindings, applying exclusions

use crate::expression::Value;
use crate::workflow::definition::{JobSpec, MatrixStrategy, MatrixValue};

use indexmap::IndexMap;
use std::fmt;

/// One combination of matrix values, in axis declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixBinding {
    values: Vec<(String, MatrixValue)>,
}

impl MatrixBinding {
    pub fn new(values: Vec<(String, MatrixValue)>) -> Self {
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, axis: &str) -> Option<&MatrixValue> {
        self.values
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value)
    }

    pub fn values(&self) -> &[(String, MatrixValue)] {
        &self.values
    }

    /// Comma separated values, e.g. `ubuntu, 17`. Empty for unparameterized jobs.
    pub fn label(&self) -> String {
        self.values
            .iter()
            .map(|(_, value)| value.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The binding as the `matrix` expression context.
    pub fn to_context(&self) -> IndexMap<String, Value> {
        self.values
            .iter()
            .map(|(axis, value)| (axis.clone(), value.to_value()))
            .collect()
    }

    /// True when every key of `partial` is bound to an equal value.
    fn matches(&self, partial: &IndexMap<String, MatrixValue>) -> bool {
        partial.iter().all(|(axis, expected)| {
            self.get(axis)
                .is_some_and(|actual| actual.to_string() == expected.to_string())
        })
    }
}

impl fmt::Display for MatrixBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.label())
    }
}

/// Matrix expander for job strategies
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a job into its bindings. A job without a matrix yields exactly
    /// one empty binding.
    pub fn expand(job: &JobSpec) -> Vec<MatrixBinding> {
        match &job.matrix {
            Some(matrix) => Self::expand_matrix(matrix),
            None => vec![MatrixBinding::default()],
        }
    }

    /// Cross product with the first axis varying slowest, minus exclusions.
    pub fn expand_matrix(matrix: &MatrixStrategy) -> Vec<MatrixBinding> {
        let mut combinations: Vec<Vec<(String, MatrixValue)>> = vec![Vec::new()];

        for (axis, values) in &matrix.axes {
            combinations = combinations
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |value| {
                        let mut combination = prefix.clone();
                        combination.push((axis.clone(), value.clone()));
                        combination
                    })
                })
                .collect();
        }

        combinations
            .into_iter()
            .map(MatrixBinding::new)
            .filter(|binding| !matrix.exclude.iter().any(|entry| binding.matches(entry)))
            .collect()
    }

    /// Number of bindings before exclusions.
    pub fn total_combinations(matrix: &MatrixStrategy) -> usize {
        matrix.axes.values().map(Vec::len).product()
    }
}
