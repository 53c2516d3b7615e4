/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Free-form key/value pairs attached to log lines for diagnostics.
pub type DiagnosticContext = std::collections::BTreeMap<String, String>;
