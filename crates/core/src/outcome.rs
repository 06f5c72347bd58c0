use std::fmt;

/// Prefix the form and the CLI use to tell a warning apart from a poem.
pub const WARNING_MARKER: &str = "@#$%^&*()";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WarningKind {
    TextTooLong,
    TextTooShort,
    MissingCredential,
    ServiceFailure,
    TimedOut,
    Crashed,
    EmptyResult,
}

impl WarningKind {
    /// User-facing text, without the marker.
    pub fn message(&self) -> &'static str {
        match self {
            Self::TextTooLong => "Warning: The text is too long.",
            Self::TextTooShort => "Warning: The text is too short.",
            Self::MissingCredential => "Warning: Please enter your OpenAI API Key.",
            Self::ServiceFailure | Self::TimedOut | Self::Crashed | Self::EmptyResult => {
                "Error: Failed to get response from OpenAI."
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ServiceFailure | Self::TimedOut | Self::Crashed | Self::EmptyResult
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Warning {
    pub kind: WarningKind,
    /// Cause for logs; never shown to the user.
    pub detail: Option<String>,
}

impl Warning {
    pub fn new(kind: WarningKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: WarningKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn display_text(&self) -> String {
        format!("{WARNING_MARKER}{}", self.kind.message())
    }
}

impl From<WarningKind> for Warning {
    fn from(kind: WarningKind) -> Self {
        Self::new(kind)
    }
}

/// What a submission produces.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Poem(String),
    Warning(Warning),
}

impl Outcome {
    pub fn warning(kind: WarningKind) -> Self {
        Self::Warning(Warning::new(kind))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }

    pub fn poem(&self) -> Option<&str> {
        match self {
            Self::Poem(text) => Some(text),
            Self::Warning(_) => None,
        }
    }

    pub fn warning_kind(&self) -> Option<WarningKind> {
        match self {
            Self::Poem(_) => None,
            Self::Warning(warning) => Some(warning.kind),
        }
    }

    pub fn display_text(&self) -> String {
        match self {
            Self::Poem(text) => text.clone(),
            Self::Warning(warning) => warning.display_text(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poem(text) => f.write_str(text),
            Self::Warning(warning) => {
                write!(f, "{WARNING_MARKER}{}", warning.kind.message())
            }
        }
    }
}

pub fn is_warning_text(text: &str) -> bool {
    text.starts_with(WARNING_MARKER)
}
