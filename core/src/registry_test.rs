use super::*;
use crate::provider::{AudioFormat, ProviderKind};
use crate::test_support::{ScriptedProvider, Step};

fn provider(name: &str) -> Arc<dyn Provider> {
    ScriptedProvider::new(name, Step::Succeed("ok")).arc()
}

#[test]
fn test_get_returns_same_instance() {
    let registry = Registry::new();
    let p = provider("a");
    registry.register("a", Arc::clone(&p)).unwrap();

    let first = registry.get("a").unwrap();
    let second = registry.get("a").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &p));
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let registry = Registry::new();
    registry.register("a", provider("a")).unwrap();

    let err = registry.register("a", provider("a")).unwrap_err();

    assert_eq!(err, RegistryError::DuplicateName("a".to_string()));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_get_unknown_is_not_found() {
    let registry = Registry::new();
    assert_eq!(
        registry.get("missing").err(),
        Some(RegistryError::NotFound("missing".to_string()))
    );
}

#[test]
fn test_invalid_descriptor_is_rejected() {
    let registry = Registry::new();
    let no_formats = ScriptedProvider::new("a", Step::Fatal)
        .with_capabilities(|c| c.formats.clear())
        .arc();

    let err = registry.register("a", no_formats).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidProvider { .. }));

    let err = registry.register("b", provider("a")).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidProvider { .. }));
    assert!(registry.is_empty());
}

#[test]
fn test_first_enabled_registration_becomes_default() {
    let registry = Registry::new();
    assert_eq!(registry.default_provider(), None);

    registry
        .register_with("off", provider("off"), false, 0)
        .unwrap();
    assert_eq!(registry.default_provider(), None);

    registry.register("a", provider("a")).unwrap();
    registry.register("b", provider("b")).unwrap();
    assert_eq!(registry.default_provider().as_deref(), Some("a"));
}

#[test]
fn test_set_default_is_idempotent() {
    let registry = Registry::new();
    registry.register("a", provider("a")).unwrap();
    registry.register("b", provider("b")).unwrap();

    registry.set_default("b").unwrap();
    registry.set_default("b").unwrap();

    assert_eq!(registry.default_provider().as_deref(), Some("b"));
    let defaults = registry
        .descriptors()
        .into_iter()
        .filter(|l| l.is_default)
        .count();
    assert_eq!(defaults, 1);
}

#[test]
fn test_set_default_errors() {
    let registry = Registry::new();
    registry.register("a", provider("a")).unwrap();
    registry
        .register_with("off", provider("off"), false, 5)
        .unwrap();

    assert_eq!(
        registry.set_default("nope").unwrap_err(),
        RegistryError::NotFound("nope".to_string())
    );
    assert_eq!(
        registry.set_default("off").unwrap_err(),
        RegistryError::DisabledProvider("off".to_string())
    );
    assert_eq!(registry.default_provider().as_deref(), Some("a"));
}

#[test]
fn test_list_follows_priority_then_registration_order() {
    let registry = Registry::new();
    registry.register_with("c", provider("c"), true, 1).unwrap();
    registry.register_with("a", provider("a"), true, 2).unwrap();
    registry.register_with("b", provider("b"), true, 1).unwrap();

    assert_eq!(registry.list(), vec!["c", "b", "a"]);

    registry.set_priority("a", 0).unwrap();
    assert_eq!(registry.list(), vec!["a", "c", "b"]);
}

#[test]
fn test_plain_register_appends_after_existing() {
    let registry = Registry::new();
    registry.register_with("x", provider("x"), true, 10).unwrap();
    registry.register("y", provider("y")).unwrap();

    assert_eq!(registry.list(), vec!["x", "y"]);
}

#[test]
fn test_disabling_default_clears_marker() {
    let registry = Registry::new();
    registry.register("a", provider("a")).unwrap();
    registry.register("b", provider("b")).unwrap();

    registry.set_enabled("a", false).unwrap();

    assert_eq!(registry.default_provider(), None);
    assert!(!registry.is_enabled("a"));
    assert_eq!(registry.enabled_in_priority_order(), vec!["b"]);
    assert_eq!(registry.list(), vec!["a", "b"]);
}

#[test]
fn test_descriptors_snapshot() {
    let registry = Registry::new();
    let remote = ScriptedProvider::new("remote", Step::Fatal)
        .with_capabilities(|c| {
            c.kind = ProviderKind::Remote;
            c.formats = [AudioFormat::Mp3].into();
        })
        .arc();
    registry.register("remote", remote).unwrap();

    let listing = registry.descriptors();

    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].descriptor.kind, ProviderKind::Remote);
    assert!(listing[0].enabled);
    assert!(listing[0].is_default);
}
