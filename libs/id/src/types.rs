//! Typed names for harness resources.

use crate::define_name;

// =============================================================================
// Cluster topology
// =============================================================================

define_name!(NodeRole, "node role");

// =============================================================================
// Managed deployable units
// =============================================================================

// Assigned by the management controller, so only loosely validated.
define_name!(TemplateId, "server template", validate_remote_id);
define_name!(ContainerId, "container", validate_remote_id);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NameError, MAX_NAME_LEN, MAX_REMOTE_ID_LEN};
    use proptest::prelude::*;

    #[test]
    fn test_role_roundtrip() {
        let role: NodeRole = "secondary".parse().unwrap();
        assert_eq!(role.as_str(), "secondary");
        assert_eq!(role.to_string(), "secondary");
    }

    #[test]
    fn test_role_empty() {
        let err = NodeRole::parse("").unwrap_err();
        assert!(err.is_empty());
    }

    #[test]
    fn test_role_uppercase_rejected() {
        let err = NodeRole::parse("Primary").unwrap_err();
        assert!(matches!(err, NameError::InvalidStart { .. }));
    }

    #[test]
    fn test_container_invalid_char() {
        let err = ContainerId::parse("kie concurrent").unwrap_err();
        assert_eq!(
            err,
            NameError::InvalidChar {
                kind: "container",
                name: "kie concurrent".to_string(),
                ch: ' ',
            }
        );
    }

    #[test]
    fn test_name_too_long() {
        let long = "a".repeat(MAX_NAME_LEN + 1);
        let err = NodeRole::parse(&long).unwrap_err();
        assert!(matches!(err, NameError::TooLong { max: MAX_NAME_LEN, .. }));

        let long = "a".repeat(MAX_REMOTE_ID_LEN + 1);
        let err = TemplateId::parse(&long).unwrap_err();
        assert!(matches!(err, NameError::TooLong { max: MAX_REMOTE_ID_LEN, .. }));
    }

    #[test]
    fn test_template_id_accepts_controller_assigned_form() {
        let id = TemplateId::parse("KieServerBaseIntegrationTest@2016-01-01").unwrap();
        assert_eq!(id.as_str(), "KieServerBaseIntegrationTest@2016-01-01");

        let parsed: TemplateId =
            serde_json::from_str("\"KieServerBaseIntegrationTest@2016-01-01\"").unwrap();
        assert_eq!(parsed, id);

        let container = ContainerId::parse("Container_1.0.Final").unwrap();
        assert_eq!(container.to_string(), "Container_1.0.Final");
    }

    #[test]
    fn test_remote_id_rejects_path_separator() {
        let err = TemplateId::parse("template/one").unwrap_err();
        assert!(matches!(err, NameError::InvalidChar { ch: '/', .. }));
        assert!(TemplateId::parse("").unwrap_err().is_empty());
    }

    #[test]
    fn test_name_json_validates() {
        let ok: ContainerId = serde_json::from_str("\"kie-concurrent\"").unwrap();
        assert_eq!(ok.as_str(), "kie-concurrent");

        let bad: Result<NodeRole, _> = serde_json::from_str("\"-leading-dash\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_names_sort_lexically() {
        let mut roles = vec![
            NodeRole::parse("charlie").unwrap(),
            NodeRole::parse("alpha").unwrap(),
            NodeRole::parse("bravo").unwrap(),
        ];
        roles.sort();
        let names: Vec<_> = roles.iter().map(NodeRole::as_str).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
    }

    proptest! {
        #[test]
        fn valid_names_roundtrip(name in "[a-z0-9][a-z0-9._-]{0,62}") {
            let role = NodeRole::parse(&name).unwrap();
            prop_assert_eq!(role.as_str(), name.as_str());
            let reparsed: NodeRole = role.to_string().parse().unwrap();
            prop_assert_eq!(reparsed, role);
        }

        #[test]
        fn names_with_uppercase_rejected(prefix in "[a-z]{0,8}", upper in "[A-Z]", suffix in "[a-z]{0,8}") {
            let name = format!("{prefix}{upper}{suffix}");
            prop_assert!(NodeRole::parse(&name).is_err());
        }
    }
}
