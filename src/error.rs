use std::fmt;

/// Errors that abort a run. Malformed payload entries (bad ranges, null map
/// slots, ops without usable spans) are not errors; they are skipped or
/// counted in the run summary instead.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    Pdf(lopdf::Error),
    Markup(roxmltree::Error),
    Font(String),
    Invalid(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "i/o error: {e}"),
            Error::Json(e) => write!(f, "json error: {e}"),
            Error::Pdf(e) => write!(f, "pdf error: {e}"),
            Error::Markup(e) => write!(f, "markup parse error: {e}"),
            Error::Font(msg) => write!(f, "font error: {msg}"),
            Error::Invalid(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Pdf(e) => Some(e),
            Error::Markup(e) => Some(e),
            Error::Font(_) | Error::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<lopdf::Error> for Error {
    fn from(e: lopdf::Error) -> Self {
        Error::Pdf(e)
    }
}

impl From<roxmltree::Error> for Error {
    fn from(e: roxmltree::Error) -> Self {
        Error::Markup(e)
    }
}
