//! Compile-time error type. A policy that fails to parse or elaborate never
//! aborts the PDP: it carries its errors forward and the policy compiler
//! lifts it into `StaticVote(INDETERMINATE)` (see `warden_eval::compiler::policy`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::source::SourceLocation;

/// A parse or elaboration error, bound to a source location where one is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElabError {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub construct_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    pub message: String,
}

/// Which compilation stage raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lex,
    Parse,
    Elaborate,
}

impl ElabError {
    pub fn new(
        stage: Stage,
        construct_id: Option<&str>,
        location: Option<SourceLocation>,
        message: impl Into<String>,
    ) -> Self {
        ElabError {
            stage,
            construct_id: construct_id.map(str::to_owned),
            location,
            message: message.into(),
        }
    }

    pub fn lex(document_name: &str, line: u32, message: impl Into<String>) -> Self {
        ElabError::new(
            Stage::Lex,
            None,
            Some(SourceLocation::new(document_name, line, 0, 0)),
            message,
        )
    }

    pub fn parse(document_name: &str, line: u32, message: impl Into<String>) -> Self {
        ElabError::new(
            Stage::Parse,
            None,
            Some(SourceLocation::new(document_name, line, 0, 0)),
            message,
        )
    }

    pub fn elaborate(
        construct_id: &str,
        location: Option<SourceLocation>,
        message: impl Into<String>,
    ) -> Self {
        ElabError::new(Stage::Elaborate, Some(construct_id), location, message)
    }
}

impl fmt::Display for ElabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.location {
            write!(
                f,
                "{}:{}: {:?}: {}",
                loc.document_name, loc.line, self.stage, self.message
            )
        } else {
            write!(f, "{:?}: {}", self.stage, self.message)
        }
    }
}

impl std::error::Error for ElabError {}
