//! Splitting `<target>:<rest>` identifiers.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TARGET_ID: Regex =
        Regex::new(r"^([A-Za-z0-9_]+):(.+)$").expect("target id pattern is valid");
    static ref TARGET_NAME: Regex =
        Regex::new(r"^[A-Za-z0-9_]+$").expect("target name pattern is valid");
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetId<'a> {
    /// Prefix before the first colon, when the id is routable at all.
    pub target: Option<&'a str>,
    /// Everything after the first colon, or the whole id when there is none.
    pub node_id: &'a str,
}

impl<'a> TargetId<'a> {
    pub fn parse(id: &'a str) -> Self {
        let target = TARGET_ID
            .captures(id)
            .and_then(|captures| captures.get(1))
            .map(|prefix| prefix.as_str());
        let node_id = id.split_once(':').map_or(id, |(_, rest)| rest);

        Self { target, node_id }
    }
}

pub(crate) fn is_valid_target_name(target: &str) -> bool {
    TARGET_NAME.is_match(target)
}

#[cfg(test)]
mod tests {
    use super::{is_valid_target_name, TargetId};

    #[test]
    fn prefix_and_node_id_are_split_at_first_colon() {
        let parsed = TargetId::parse("plc1:TANK.LEVEL");
        assert_eq!(parsed.target, Some("plc1"));
        assert_eq!(parsed.node_id, "TANK.LEVEL");

        let nested = TargetId::parse("opc:ns=2;s=Line:Speed");
        assert_eq!(nested.target, Some("opc"));
        assert_eq!(nested.node_id, "ns=2;s=Line:Speed");
    }

    #[test]
    fn id_without_colon_has_no_target() {
        let parsed = TargetId::parse("TANK.LEVEL");

        assert_eq!(parsed.target, None);
        assert_eq!(parsed.node_id, "TANK.LEVEL");
    }

    #[test]
    fn malformed_prefixes_have_no_target() {
        assert_eq!(TargetId::parse("plc-1:X").target, None);
        assert_eq!(TargetId::parse("plc1:").target, None);
        assert_eq!(TargetId::parse(":X").target, None);
        assert_eq!(TargetId::parse("plc-1:X").node_id, "X");
    }

    #[test]
    fn target_names_follow_prefix_alphabet() {
        assert!(is_valid_target_name("opc_2"));
        assert!(!is_valid_target_name(""));
        assert!(!is_valid_target_name("opc:2"));
        assert!(!is_valid_target_name("opc 2"));
    }
}
