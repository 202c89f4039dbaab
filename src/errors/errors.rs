use std::fmt::Display;

use thiserror::Error;

use crate::Position;

/// A compilation error: what went wrong and where.
///
/// The first error raised aborts the whole compilation. There is no
/// recovery mode and no partial output; callers either get a complete
/// module or exactly one of these.
#[derive(Debug, Clone)]
pub struct Error {
    internal_error: ErrorImpl,
    position: Position,
}

impl Error {
    pub fn new(error_impl: ErrorImpl, position: Position) -> Self {
        Error {
            internal_error: error_impl,
            position,
        }
    }

    pub fn get_position(&self) -> &Position {
        &self.position
    }

    pub fn get_error_name(&self) -> &str {
        match &self.internal_error {
            ErrorImpl::UndeclaredVariable { .. } => "UndeclaredVariable",
            ErrorImpl::IncompatibleTypes { .. } => "IncompatibleTypes",
            ErrorImpl::ArgumentCountMismatch { .. } => "ArgumentCountMismatch",
            ErrorImpl::MissingArgument { .. } => "MissingArgument",
            ErrorImpl::UnknownNamedParameter { .. } => "UnknownNamedParameter",
            ErrorImpl::InvalidConditionType { .. } => "InvalidConditionType",
            ErrorImpl::UnsupportedOperator { .. } => "UnsupportedOperator",
            ErrorImpl::FunctionAlreadyDeclared { .. } => "FunctionAlreadyDeclared",
            ErrorImpl::NotConstant { .. } => "NotConstant",
        }
    }

    pub fn get_tip(&self) -> ErrorTip {
        match &self.internal_error {
            ErrorImpl::UndeclaredVariable { variable } => ErrorTip::Suggestion(format!(
                "Variable `{}` is not declared or not yet assigned",
                variable
            )),
            ErrorImpl::IncompatibleTypes { expected, received } => ErrorTip::Suggestion(format!(
                "Expected type `{}`, received `{}`",
                expected, received
            )),
            ErrorImpl::ArgumentCountMismatch { expected, received } => ErrorTip::Suggestion(
                format!("Expected {} arguments, received {}", expected, received),
            ),
            ErrorImpl::MissingArgument {
                function,
                parameter,
            } => ErrorTip::Suggestion(format!(
                "Call to `{}` is missing a value for parameter `{}`",
                function, parameter
            )),
            ErrorImpl::UnknownNamedParameter {
                function,
                parameter,
            } => ErrorTip::Suggestion(format!(
                "Function `{}` has no parameter named `{}`",
                function, parameter
            )),
            ErrorImpl::InvalidConditionType { received } => ErrorTip::Suggestion(format!(
                "Conditions must be integer-valued, received `{}`",
                received
            )),
            ErrorImpl::UnsupportedOperator { operator, type_ } => ErrorTip::Suggestion(format!(
                "Operator `{}` is not defined for type `{}`",
                operator, type_
            )),
            ErrorImpl::FunctionAlreadyDeclared { function } => {
                ErrorTip::Suggestion(format!("Function `{}` already declared", function))
            }
            ErrorImpl::NotConstant { context } => ErrorTip::Suggestion(format!(
                "Values inside {} must be literals so they can be laid out in memory",
                context
            )),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.internal_error)
    }
}

impl std::error::Error for Error {}

pub enum ErrorTip {
    None,
    Suggestion(String),
}

impl Display for ErrorTip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorTip::None => write!(f, ""),
            ErrorTip::Suggestion(suggestion) => write!(f, "{}", suggestion),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ErrorImpl {
    #[error("variable {variable:?} not declared")]
    UndeclaredVariable { variable: String },
    #[error("types do not match: expected {expected:?}, received {received:?}")]
    IncompatibleTypes { expected: String, received: String },
    #[error("unexpected arguments: expected {expected:?}, received {received:?}")]
    ArgumentCountMismatch { expected: usize, received: usize },
    #[error("call to {function:?} is missing parameter {parameter:?}")]
    MissingArgument { function: String, parameter: String },
    #[error("function {function:?} has no parameter {parameter:?}")]
    UnknownNamedParameter { function: String, parameter: String },
    #[error("condition is not integer-valued: {received:?}")]
    InvalidConditionType { received: String },
    #[error("operator {operator:?} has no instruction for type {type_:?}")]
    UnsupportedOperator { operator: String, type_: String },
    #[error("function {function:?} already declared")]
    FunctionAlreadyDeclared { function: String },
    #[error("non-constant value in {context}")]
    NotConstant { context: String },
}
