//! Normalizer - expands multi-verb descriptors into single-verb ones.
//!
//! Pure: no I/O, no shared state. Every descriptor that comes out carries
//! exactly one uppercase verb in `method`.

use once_cell::sync::Lazy;
use regex::Regex;

use super::descriptor::CapabilityDescriptor;
use super::error::ValidationError;

/// Verbs a descriptor may declare.
pub const KNOWN_VERBS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Verb used when a descriptor leaves `method` empty.
pub const DEFAULT_VERB: &str = "GET";

static VERB_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s,|/;]+").expect("verb separator pattern is valid"));

/// Output of [`normalize`].
#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub descriptors: Vec<CapabilityDescriptor>,
    /// Descriptors dropped for missing fields or unusable verbs.
    pub skipped: Vec<ValidationError>,
}

/// Split a raw method field into uppercase verbs, first occurrence kept.
pub fn split_methods(raw: &str) -> Vec<String> {
    let mut verbs: Vec<String> = Vec::new();
    for part in VERB_SEPARATORS.split(raw.trim()) {
        if part.is_empty() {
            continue;
        }
        let verb = part.to_ascii_uppercase();
        if !verbs.contains(&verb) {
            verbs.push(verb);
        }
    }
    verbs
}

/// Whether a stored method field holds more than one verb.
pub fn is_multi_verb(method: &str) -> bool {
    split_methods(method).len() > 1
}

/// Expand and validate a batch of descriptors.
pub fn normalize(descriptors: Vec<CapabilityDescriptor>) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();

    for descriptor in descriptors {
        match expand(descriptor) {
            Ok(expanded) => outcome.descriptors.extend(expanded),
            Err(e) => {
                log::debug!("Dropping descriptor: {}", e);
                outcome.skipped.push(e);
            }
        }
    }

    outcome
}

fn expand(mut descriptor: CapabilityDescriptor) -> Result<Vec<CapabilityDescriptor>, ValidationError> {
    let module = descriptor.source_module_id.clone();
    descriptor.path = descriptor.path.trim().to_string();
    descriptor.name = descriptor.name.trim().to_string();

    if descriptor.path.is_empty() {
        return Err(ValidationError::MissingPath { module });
    }
    if descriptor.name.is_empty() {
        return Err(ValidationError::MissingName {
            module,
            path: descriptor.path,
        });
    }

    let mut verbs = split_methods(&descriptor.method);
    if verbs.is_empty() {
        verbs.push(DEFAULT_VERB.to_string());
    }
    if let Some(bad) = verbs.iter().find(|v| !KNOWN_VERBS.contains(&v.as_str())) {
        return Err(ValidationError::UnknownVerb {
            module,
            path: descriptor.path,
            verb: bad.clone(),
        });
    }

    Ok(verbs
        .into_iter()
        .map(|verb| CapabilityDescriptor {
            method: verb,
            ..descriptor.clone()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::descriptor::ParameterSpec;

    #[test]
    fn test_comma_separated_verbs_split_into_two() {
        let desc = CapabilityDescriptor::new("/x", "GET,POST", "X")
            .with_category("tools")
            .with_parameter(ParameterSpec::required("url"));

        let outcome = normalize(vec![desc.clone()]);

        assert_eq!(outcome.descriptors.len(), 2);
        assert_eq!(outcome.descriptors[0].method, "GET");
        assert_eq!(outcome.descriptors[1].method, "POST");
        for out in &outcome.descriptors {
            assert_eq!(
                CapabilityDescriptor {
                    method: desc.method.clone(),
                    ..out.clone()
                },
                desc
            );
        }
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_separators_case_and_duplicates() {
        assert_eq!(split_methods(" get, Post | put/delete ;patch"), vec![
            "GET", "POST", "PUT", "DELETE", "PATCH"
        ]);
        assert_eq!(split_methods("GET, get"), vec!["GET"]);
        assert!(split_methods("  ").is_empty());
        assert!(is_multi_verb("GET,POST"));
        assert!(!is_multi_verb("GET"));
    }

    #[test]
    fn test_empty_method_defaults_to_get() {
        let outcome = normalize(vec![CapabilityDescriptor::new("/x", "", "X")]);
        assert_eq!(outcome.descriptors[0].method, "GET");
    }

    #[test]
    fn test_missing_fields_and_unknown_verbs_are_skipped() {
        let outcome = normalize(vec![
            CapabilityDescriptor::new("", "GET", "No path"),
            CapabilityDescriptor::new("/no-name", "GET", "  "),
            CapabilityDescriptor::new("/weird", "GET, FETCH", "Weird"),
            CapabilityDescriptor::new("  /ok  ", "post", "Ok"),
        ]);

        assert_eq!(outcome.descriptors.len(), 1);
        assert_eq!(outcome.descriptors[0].key(), ("/ok", "POST"));
        assert_eq!(outcome.skipped.len(), 3);
        assert!(matches!(outcome.skipped[0], ValidationError::MissingPath { .. }));
        assert!(matches!(outcome.skipped[1], ValidationError::MissingName { .. }));
        assert!(matches!(
            &outcome.skipped[2],
            ValidationError::UnknownVerb { verb, .. } if verb == "FETCH"
        ));
    }
}
