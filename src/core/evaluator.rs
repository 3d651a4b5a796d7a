//! Placeholder evaluation and built-in functions

use crate::core::context::EvaluationContext;
use crate::core::error::ExpressionError;
use crate::core::expression::{contains_placeholder, Expr, Interpolation, Segment};
use crate::core::object::{FieldValue, PipelineObject};
use crate::core::parameter::ParameterValue;
use crate::core::period::{format_datetime, parse_datetime, Period};
use crate::core::timefmt;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Result of evaluating an expression node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Instant(DateTime<Utc>),
    Duration(Period),
    List(Vec<String>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Instant(instant) => f.write_str(&format_datetime(*instant)),
            Value::Duration(period) => write!(f, "{}", period),
            Value::List(items) => f.write_str(&items.join(",")),
        }
    }
}

/// A field that failed to evaluate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub error: ExpressionError,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field '{}': {}", self.field, self.error)
    }
}

/// Sign and step of the duration-shifting built-ins
fn shift_function(name: &str) -> Option<(i64, Duration)> {
    let (sign, unit) = if let Some(unit) = name.strip_prefix("minus") {
        (-1, unit)
    } else if let Some(unit) = name.strip_prefix("plus") {
        (1, unit)
    } else {
        return None;
    };
    let step = match unit {
        "Minutes" => Duration::minutes(1),
        "Hours" => Duration::hours(1),
        "Days" => Duration::days(1),
        "Weeks" => Duration::weeks(1),
        _ => return None,
    };
    Some((sign, step))
}

fn is_known_function(name: &str) -> bool {
    name == "format" || shift_function(name).is_some()
}

/// Evaluates placeholders against an explicit context
pub struct Evaluator<'a> {
    context: &'a EvaluationContext,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a EvaluationContext) -> Self {
        Self { context }
    }

    /// Substitute every placeholder in `input`
    pub fn evaluate_str(&self, input: &str) -> Result<String, ExpressionError> {
        self.render(input, &mut Vec::new())
    }

    /// Fully resolve a parameter, following defaults that embed other parameters
    pub fn evaluate_parameter(&self, id: &str) -> Result<Value, ExpressionError> {
        self.parameter(id, &mut Vec::new())
    }

    /// Evaluate every text field of an object; references are kept as-is
    pub fn evaluate_object(&self, object: &PipelineObject) -> Result<PipelineObject, FieldError> {
        let mut evaluated = object.clone();
        for (key, value) in evaluated.fields.iter_mut() {
            *value = self.evaluate_field(value).map_err(|error| FieldError {
                field: key.clone(),
                error,
            })?;
        }
        Ok(evaluated)
    }

    fn evaluate_field(&self, value: &FieldValue) -> Result<FieldValue, ExpressionError> {
        match value {
            FieldValue::Text(text) => Ok(FieldValue::Text(self.evaluate_str(text)?)),
            FieldValue::Reference(_) => Ok(value.clone()),
            FieldValue::List(items) => items
                .iter()
                .map(|item| self.evaluate_field(item))
                .collect::<Result<Vec<_>, _>>()
                .map(FieldValue::List),
        }
    }

    fn render(&self, input: &str, stack: &mut Vec<String>) -> Result<String, ExpressionError> {
        if !contains_placeholder(input) {
            return Ok(input.to_string());
        }

        let parsed = Interpolation::parse(input)?;
        let mut out = String::new();
        for segment in &parsed.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(expr) => out.push_str(&self.eval(expr, stack)?.to_string()),
            }
        }
        Ok(out)
    }

    fn eval(&self, expr: &Expr, stack: &mut Vec<String>) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Text(text) => Ok(Value::Text(text.clone())),
            Expr::Integer(i) => Ok(Value::Integer(*i)),
            Expr::Parameter(id) => self.parameter(id, stack),
            Expr::Runtime(name) => self
                .context
                .runtime(name)
                .cloned()
                .ok_or_else(|| ExpressionError::UnresolvedParameter(format!("@{}", name))),
            Expr::Call { name, args } => {
                if !is_known_function(name) {
                    return Err(ExpressionError::UnknownFunction(name.clone()));
                }
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg, stack))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, values)
            }
        }
    }

    fn parameter(&self, id: &str, stack: &mut Vec<String>) -> Result<Value, ExpressionError> {
        if stack.iter().any(|seen| seen == id) || stack.len() >= self.context.max_passes() {
            return Err(ExpressionError::Cyclic {
                parameter: id.to_string(),
                passes: stack.len(),
            });
        }

        let raw = self
            .context
            .parameters()
            .raw_value(id)
            .ok_or_else(|| ExpressionError::UnresolvedParameter(id.to_string()))?
            .clone();

        stack.push(id.to_string());
        let resolved = match &raw {
            ParameterValue::Single(text) => self.render(text, stack).map(Value::Text),
            ParameterValue::List(items) => items
                .iter()
                .map(|item| self.render(item, stack))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
        };
        stack.pop();
        resolved
    }
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, ExpressionError> {
    if name == "format" {
        let [instant, pattern] = take_args::<2>(name, args)?;
        let instant = as_instant(name, &instant)?;
        let pattern = pattern.to_string();
        return timefmt::format_instant(instant, &pattern)
            .map(Value::Text)
            .map_err(|reason| ExpressionError::invalid_argument(name, reason));
    }

    let (sign, step) =
        shift_function(name).ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()))?;
    let [target, amount] = take_args::<2>(name, args)?;
    let amount = as_integer(name, &amount)?;
    let shift = step
        .checked_mul(
            i32::try_from(sign * amount)
                .map_err(|_| ExpressionError::invalid_argument(name, "amount out of range"))?,
        )
        .ok_or_else(|| ExpressionError::invalid_argument(name, "amount out of range"))?;

    let out_of_range = || ExpressionError::invalid_argument(name, "result out of range");
    match as_temporal(name, &target)? {
        Temporal::Duration(period) => period
            .to_duration()
            .checked_add(&shift)
            .map(|d| Value::Duration(Period::from_duration(d)))
            .ok_or_else(out_of_range),
        Temporal::Instant(instant) => instant
            .checked_add_signed(shift)
            .map(Value::Instant)
            .ok_or_else(out_of_range),
    }
}

fn take_args<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], ExpressionError> {
    let count = args.len();
    args.try_into().map_err(|_| {
        ExpressionError::invalid_argument(name, format!("expected {} arguments, got {}", N, count))
    })
}

enum Temporal {
    Duration(Period),
    Instant(DateTime<Utc>),
}

fn as_temporal(name: &str, value: &Value) -> Result<Temporal, ExpressionError> {
    match value {
        Value::Duration(period) => Ok(Temporal::Duration(*period)),
        Value::Instant(instant) => Ok(Temporal::Instant(*instant)),
        Value::Text(text) => Period::parse(text)
            .map(Temporal::Duration)
            .or_else(|_| parse_datetime(text).map(Temporal::Instant))
            .map_err(|_| {
                ExpressionError::invalid_argument(
                    name,
                    format!("'{}' is neither a duration nor a date-time", text),
                )
            }),
        other => Err(ExpressionError::invalid_argument(
            name,
            format!("'{}' is neither a duration nor a date-time", other),
        )),
    }
}

fn as_instant(name: &str, value: &Value) -> Result<DateTime<Utc>, ExpressionError> {
    match value {
        Value::Instant(instant) => Ok(*instant),
        Value::Text(text) => parse_datetime(text)
            .map_err(|e| ExpressionError::invalid_argument(name, e.to_string())),
        other => Err(ExpressionError::invalid_argument(
            name,
            format!("'{}' is not a date-time", other),
        )),
    }
}

fn as_integer(name: &str, value: &Value) -> Result<i64, ExpressionError> {
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Text(text) => text.trim().parse().map_err(|_| {
            ExpressionError::invalid_argument(name, format!("'{}' is not an integer", text))
        }),
        other => Err(ExpressionError::invalid_argument(
            name,
            format!("'{}' is not an integer", other),
        )),
    }
}
