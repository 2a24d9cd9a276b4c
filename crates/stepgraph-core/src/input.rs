//! Step inputs and their resolution from upstream outputs.

use crate::step::StepName;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// Outputs published so far in a run, keyed by step name.
pub type Outputs = IndexMap<StepName, Value>;

/// The argument a step's task receives.
///
/// The shape depends on how many dependencies the step declares:
///
/// - none: the run's initial input as [`StepInput::Single`], or
///   [`StepInput::None`] when there is no initial input
/// - one: that dependency's output as [`StepInput::Single`]
/// - two or more: [`StepInput::Keyed`], mapping each dependency to its output
///
/// A dependency that was skipped contributes [`Value::Null`].
///
/// # Examples
///
/// ```
/// use stepgraph_core::{Outputs, StepInput, StepName};
/// use serde_json::json;
///
/// let mut outputs = Outputs::new();
/// outputs.insert("users".into(), json!(["ann"]));
/// outputs.insert("orders".into(), json!([42]));
///
/// let deps = [StepName::new("users"), StepName::new("orders")];
/// let input = StepInput::resolve(&deps, &outputs, None);
/// assert_eq!(input.get("orders"), Some(&json!([42])));
///
/// let input = StepInput::resolve(&deps[..1], &outputs, None);
/// assert_eq!(input.value(), Some(&json!(["ann"])));
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum StepInput {
    /// No argument.
    #[default]
    None,
    /// A single positional value.
    Single(Value),
    /// Outputs of several dependencies, in declaration order.
    Keyed(IndexMap<StepName, Value>),
}

impl StepInput {
    /// Builds the input for a step with the given dependencies.
    ///
    /// `initial` is used only by steps without dependencies; `None` or a
    /// `null` initial value produces [`StepInput::None`].
    pub fn resolve(dependencies: &[StepName], outputs: &Outputs, initial: Option<&Value>) -> Self {
        let output_of = |name: &StepName| outputs.get(name).cloned().unwrap_or(Value::Null);
        match dependencies {
            [] => match initial {
                None | Some(Value::Null) => StepInput::None,
                Some(value) => StepInput::Single(value.clone()),
            },
            [only] => StepInput::Single(output_of(only)),
            many => StepInput::Keyed(
                many.iter()
                    .map(|name| (name.clone(), output_of(name)))
                    .collect(),
            ),
        }
    }

    /// Returns the positional value, if this is [`StepInput::Single`].
    pub fn value(&self) -> Option<&Value> {
        match self {
            StepInput::Single(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the output of dependency `name`, if this is [`StepInput::Keyed`].
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            StepInput::Keyed(values) => values.get(name),
            _ => None,
        }
    }

    /// Returns the keyed outputs, if this is [`StepInput::Keyed`].
    pub fn keyed(&self) -> Option<&IndexMap<StepName, Value>> {
        match self {
            StepInput::Keyed(values) => Some(values),
            _ => None,
        }
    }

    /// Returns `true` if there is no argument or the single value is `null`.
    ///
    /// Conditions built on this let a step skip itself when its upstream
    /// was skipped.
    pub fn is_nil(&self) -> bool {
        matches!(self, StepInput::None | StepInput::Single(Value::Null))
    }

    /// Converts the input into a single JSON value.
    ///
    /// [`StepInput::None`] becomes `null` and [`StepInput::Keyed`] becomes an
    /// object.
    pub fn into_value(self) -> Value {
        match self {
            StepInput::None => Value::Null,
            StepInput::Single(value) => value,
            StepInput::Keyed(values) => Value::Object(
                values
                    .into_iter()
                    .map(|(name, value)| (name.as_str().to_string(), value))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}
