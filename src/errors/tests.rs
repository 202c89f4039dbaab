//! Unit tests for error handling.
//!
//! This module contains tests for error types and error reporting.

use crate::errors::errors::{Error, ErrorImpl, ErrorTip};
use crate::Position;
use std::rc::Rc;

#[test]
fn test_error_creation() {
    let error = Error::new(
        ErrorImpl::UndeclaredVariable {
            variable: "foo".to_string(),
        },
        Position(10, Rc::new("test.lmn".to_string())),
    );

    assert_eq!(error.get_error_name(), "UndeclaredVariable");
}

#[test]
fn test_error_position() {
    let pos = Position(42, Rc::new("test.lmn".to_string()));
    let error = Error::new(
        ErrorImpl::IncompatibleTypes {
            expected: "int".to_string(),
            received: "string".to_string(),
        },
        pos.clone(),
    );

    assert_eq!(error.get_position().0, 42);
}

#[test]
fn test_incompatible_types_error() {
    let error = Error::new(
        ErrorImpl::IncompatibleTypes {
            expected: "double".to_string(),
            received: "string".to_string(),
        },
        Position(0, Rc::new("test.lmn".to_string())),
    );

    assert_eq!(error.get_error_name(), "IncompatibleTypes");
}

#[test]
fn test_argument_count_mismatch_error() {
    let error = Error::new(
        ErrorImpl::ArgumentCountMismatch {
            expected: 2,
            received: 3,
        },
        Position(0, Rc::new("test.lmn".to_string())),
    );

    assert_eq!(error.get_error_name(), "ArgumentCountMismatch");
}

#[test]
fn test_missing_argument_error() {
    let error = Error::new(
        ErrorImpl::MissingArgument {
            function: "add".to_string(),
            parameter: "b".to_string(),
        },
        Position(0, Rc::new("test.lmn".to_string())),
    );

    assert_eq!(error.get_error_name(), "MissingArgument");
}

#[test]
fn test_unknown_named_parameter_error() {
    let error = Error::new(
        ErrorImpl::UnknownNamedParameter {
            function: "add".to_string(),
            parameter: "c".to_string(),
        },
        Position(0, Rc::new("test.lmn".to_string())),
    );

    assert_eq!(error.get_error_name(), "UnknownNamedParameter");
}

#[test]
fn test_invalid_condition_type_error() {
    let error = Error::new(
        ErrorImpl::InvalidConditionType {
            received: "string".to_string(),
        },
        Position(0, Rc::new("test.lmn".to_string())),
    );

    assert_eq!(error.get_error_name(), "InvalidConditionType");
}

#[test]
fn test_unsupported_operator_error() {
    let error = Error::new(
        ErrorImpl::UnsupportedOperator {
            operator: "%".to_string(),
            type_: "f64".to_string(),
        },
        Position(0, Rc::new("test.lmn".to_string())),
    );

    assert_eq!(error.get_error_name(), "UnsupportedOperator");
}

#[test]
fn test_function_already_declared_error() {
    let error = Error::new(
        ErrorImpl::FunctionAlreadyDeclared {
            function: "main".to_string(),
        },
        Position(0, Rc::new("test.lmn".to_string())),
    );

    assert_eq!(error.get_error_name(), "FunctionAlreadyDeclared");
}

#[test]
fn test_not_constant_error() {
    let error = Error::new(
        ErrorImpl::NotConstant {
            context: "array literals".to_string(),
        },
        Position(0, Rc::new("test.lmn".to_string())),
    );

    assert_eq!(error.get_error_name(), "NotConstant");
}

#[test]
fn test_error_tip_suggestion() {
    let error = Error::new(
        ErrorImpl::UndeclaredVariable {
            variable: "x".to_string(),
        },
        Position(0, Rc::new("test.lmn".to_string())),
    );

    match error.get_tip() {
        ErrorTip::Suggestion(_) => (),
        _ => panic!("Expected suggestion tip"),
    }
}

#[test]
fn test_error_tip_display() {
    let tip = ErrorTip::Suggestion("Try this instead".to_string());
    assert_eq!(tip.to_string(), "Try this instead");

    let tip = ErrorTip::None;
    assert_eq!(tip.to_string(), "");
}

#[test]
fn test_error_display_uses_internal_message() {
    let error = Error::new(
        ErrorImpl::ArgumentCountMismatch {
            expected: 1,
            received: 2,
        },
        Position(0, Rc::new("test.lmn".to_string())),
    );

    assert!(error.to_string().contains("expected 1"));
}
