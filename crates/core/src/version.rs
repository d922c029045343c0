//! Build identification used in PREMIS agent records.

/// Crate version as recorded by Cargo.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Identifier recorded as the software agent in PREMIS output, e.g.
/// `Curate Preservation System version=0.4.1`.
pub fn identifier() -> String {
    format!("Curate Preservation System version={}", version())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_carries_version() {
        assert!(identifier().starts_with("Curate Preservation System version="));
        assert!(identifier().ends_with(version()));
    }
}
