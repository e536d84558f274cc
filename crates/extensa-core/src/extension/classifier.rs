//! Type classification.
//!
//! Each [`TypeTag`] maps to one pure rule deciding the execution class.
//! Adding a type means adding one arm to [`rule_for`].

use super::types::{ExecutionClass, ExtensionDescriptor, TypeTag};
use crate::error::Result;

/// Classification rule for one tag.
pub type ClassRule = fn(&ExtensionDescriptor) -> ExecutionClass;

fn app_only(_: &ExtensionDescriptor) -> ExecutionClass {
    ExecutionClass::App
}

fn api_only(_: &ExtensionDescriptor) -> ExecutionClass {
    ExecutionClass::Api
}

/// Union of the children's classes. An empty bundle is hybrid.
fn from_children(descriptor: &ExtensionDescriptor) -> ExecutionClass {
    descriptor
        .children
        .iter()
        .map(|c| class_of_tag(c.type_tag))
        .reduce(ExecutionClass::union)
        .unwrap_or(ExecutionClass::Hybrid)
}

/// Rule table keyed by tag.
pub fn rule_for(tag: TypeTag) -> ClassRule {
    match tag {
        TypeTag::Interface
        | TypeTag::Display
        | TypeTag::Layout
        | TypeTag::Module
        | TypeTag::Panel
        | TypeTag::Theme => app_only,
        TypeTag::Hook | TypeTag::Endpoint | TypeTag::Operation => api_only,
        TypeTag::Bundle => from_children,
    }
}

/// Classify a descriptor.
pub fn classify(descriptor: &ExtensionDescriptor) -> ExecutionClass {
    rule_for(descriptor.type_tag)(descriptor)
}

/// Class of a bare tag, before children are known.
pub fn class_of_tag(tag: TypeTag) -> ExecutionClass {
    match tag {
        TypeTag::Bundle => ExecutionClass::Hybrid,
        _ if TypeTag::APP.contains(&tag) => ExecutionClass::App,
        _ => ExecutionClass::Api,
    }
}

/// Parse a declared type string and classify it.
pub fn classify_declared(declared: &str) -> Result<(TypeTag, ExecutionClass)> {
    let tag: TypeTag = declared.parse()?;
    Ok((tag, class_of_tag(tag)))
}

pub fn is_app_type(tag: TypeTag) -> bool {
    TypeTag::APP.contains(&tag)
}

pub fn is_api_type(tag: TypeTag) -> bool {
    TypeTag::API.contains(&tag)
}

/// Resolve a URL plural to an app type. `None` for unknown or server types.
pub fn depluralize_app(plural: &str) -> Option<TypeTag> {
    TypeTag::from_plural(plural).filter(|t| is_app_type(*t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtensionError;

    #[test]
    fn test_classify_is_total_and_deterministic() {
        for tag in TypeTag::ALL {
            let descriptor = ExtensionDescriptor::new("x", tag, "/ext/x");
            let first = classify(&descriptor);
            let second = classify(&descriptor);
            assert_eq!(first, second, "classification of {} changed", tag);
        }
    }

    #[test]
    fn test_app_and_api_types() {
        for tag in TypeTag::APP {
            assert_eq!(class_of_tag(tag), ExecutionClass::App);
            assert!(is_app_type(tag));
        }
        for tag in TypeTag::API {
            assert_eq!(class_of_tag(tag), ExecutionClass::Api);
            assert!(is_api_type(tag));
        }
        assert!(!is_app_type(TypeTag::Bundle));
        assert!(!is_api_type(TypeTag::Bundle));
    }

    #[test]
    fn test_bundle_class_from_children() {
        let app_only = ExtensionDescriptor::new("b", TypeTag::Bundle, "/ext/b").with_children(vec![
            ExtensionDescriptor::new("b-i", TypeTag::Interface, "/ext/b"),
            ExtensionDescriptor::new("b-d", TypeTag::Display, "/ext/b"),
        ]);
        assert_eq!(classify(&app_only), ExecutionClass::App);

        let api_only = ExtensionDescriptor::new("b", TypeTag::Bundle, "/ext/b").with_children(vec![
            ExtensionDescriptor::new("b-h", TypeTag::Hook, "/ext/b"),
        ]);
        assert_eq!(classify(&api_only), ExecutionClass::Api);

        let mixed = ExtensionDescriptor::new("b", TypeTag::Bundle, "/ext/b").with_children(vec![
            ExtensionDescriptor::new("b-p", TypeTag::Panel, "/ext/b"),
            ExtensionDescriptor::new("b-e", TypeTag::Endpoint, "/ext/b"),
        ]);
        assert_eq!(classify(&mixed), ExecutionClass::Hybrid);

        let empty = ExtensionDescriptor::new("b", TypeTag::Bundle, "/ext/b");
        assert_eq!(classify(&empty), ExecutionClass::Hybrid);
    }

    #[test]
    fn test_classify_declared_rejects_unknown() {
        assert_eq!(
            classify_declared("operation").unwrap(),
            (TypeTag::Operation, ExecutionClass::Api)
        );
        assert!(matches!(
            classify_declared("migration"),
            Err(ExtensionError::UnknownType(_))
        ));
    }

    #[test]
    fn test_depluralize_app() {
        assert_eq!(depluralize_app("interfaces"), Some(TypeTag::Interface));
        assert_eq!(depluralize_app("hooks"), None);
        assert_eq!(depluralize_app("bundles"), None);
        assert_eq!(depluralize_app("nope"), None);
    }
}
