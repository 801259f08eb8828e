//! Change predicates for node and pod updates
//!
//! Both predicates are total: resolution failures degrade to "absent" and an
//! absent identity never equals a present one.

use crate::identity::{resolve_node_identity, resolve_pod_identity, NodeNetworkIdentity};
use crate::object::annotations;
use ipnetwork::IpNetwork;
use k8s_openapi::api::core::v1::{Node, Pod};
use overlay_api::annotations::{HYBRID_OVERLAY_DR_IP, NO_HOST_SUBNET_LABEL};
use overlay_api::MacAddress;

/// Whether the node is excluded from primary SDN host subnet allocation.
pub fn no_host_subnet(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.contains_key(NO_HOST_SUBNET_LABEL))
}

fn identities_differ(old: Option<NodeNetworkIdentity>, new: Option<NodeNetworkIdentity>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => {
            old.subnet != new.subnet
                || old.internal_ip != new.internal_ip
                || old.dr_mac != new.dr_mac
        }
        (None, None) => false,
        _ => true,
    }
}

/// True when the update touches anything the node's overlay participation
/// depends on. Heartbeats, label churn and condition updates compare false.
pub fn node_changed(old: &Node, new: &Node) -> bool {
    let old_identity = resolve_node_identity(old).ok();
    let new_identity = resolve_node_identity(new).ok();

    // The DR IP is compared as written, not as a parsed address.
    let old_dr_ip = annotations(&old.metadata).get(HYBRID_OVERLAY_DR_IP);
    let new_dr_ip = annotations(&new.metadata).get(HYBRID_OVERLAY_DR_IP);

    identities_differ(old_identity, new_identity)
        || old_dr_ip != new_dr_ip
        || no_host_subnet(old) != no_host_subnet(new)
}

fn pod_details(pod: &Pod) -> (Vec<IpNetwork>, Option<MacAddress>) {
    match resolve_pod_identity(pod) {
        Ok(identity) => (identity.ips, Some(identity.mac)),
        Err(_) => (Vec::new(), None),
    }
}

/// True when the pod's address list (count, order or values) or MAC changed.
pub fn pod_changed(old: &Pod, new: &Pod) -> bool {
    let (old_ips, old_mac) = pod_details(old);
    let (new_ips, new_mac) = pod_details(new);

    if old_ips.len() != new_ips.len() || old_mac != new_mac {
        return true;
    }
    old_ips
        .iter()
        .zip(new_ips.iter())
        .any(|(old_ip, new_ip)| old_ip.ip() != new_ip.ip() || old_ip.prefix() != new_ip.prefix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::testing::{node, pod};
    use overlay_api::annotations::{HYBRID_OVERLAY_DR_MAC, HYBRID_OVERLAY_NODE_SUBNET, NODE_HOST_SUBNETS};
    use std::collections::BTreeMap;

    const DR_MAC: &str = "0a:58:0a:01:02:01";

    fn base_node() -> Node {
        node(
            "worker-1",
            &[(HYBRID_OVERLAY_NODE_SUBNET, "10.1.2.0/24"), (HYBRID_OVERLAY_DR_MAC, DR_MAC)],
            Some("10.0.0.5"),
        )
    }

    fn set_annotation(node: &mut Node, key: &str, value: &str) {
        node.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
    }

    #[test]
    fn test_unrelated_changes_are_ignored() {
        let old = base_node();
        let mut new = old.clone();
        new.metadata.labels = Some(BTreeMap::from([("topology.kubernetes.io/zone".to_string(), "b".to_string())]));
        new.metadata.resource_version = Some("42".to_string());
        set_annotation(&mut new, "node.alpha.kubernetes.io/ttl", "0");
        assert!(!node_changed(&old, &new));
        assert!(!node_changed(&old, &old.clone()));
    }

    #[test]
    fn test_subnet_change() {
        let old = base_node();
        let mut new = old.clone();
        set_annotation(&mut new, HYBRID_OVERLAY_NODE_SUBNET, "10.1.3.0/24");
        assert!(node_changed(&old, &new));

        // Same network address, different prefix length.
        let mut new = old.clone();
        set_annotation(&mut new, HYBRID_OVERLAY_NODE_SUBNET, "10.1.2.0/23");
        assert!(node_changed(&old, &new));
    }

    #[test]
    fn test_primary_subnet_appearing_is_a_change() {
        let old = base_node();
        let mut new = old.clone();
        set_annotation(&mut new, NODE_HOST_SUBNETS, r#"{"default":"10.244.7.0/24"}"#);
        assert!(node_changed(&old, &new));
    }

    #[test]
    fn test_ip_change() {
        let old = base_node();
        let new = node(
            "worker-1",
            &[(HYBRID_OVERLAY_NODE_SUBNET, "10.1.2.0/24"), (HYBRID_OVERLAY_DR_MAC, DR_MAC)],
            Some("10.0.0.6"),
        );
        assert!(node_changed(&old, &new));
    }

    #[test]
    fn test_mac_change_and_removal() {
        let old = base_node();
        let mut new = old.clone();
        set_annotation(&mut new, HYBRID_OVERLAY_DR_MAC, "0a:58:0a:01:02:02");
        assert!(node_changed(&old, &new));

        let mut removed = old.clone();
        removed
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .remove(HYBRID_OVERLAY_DR_MAC);
        assert!(node_changed(&old, &removed));
        assert!(node_changed(&removed, &old));
    }

    #[test]
    fn test_dr_ip_compared_verbatim() {
        let mut old = base_node();
        set_annotation(&mut old, HYBRID_OVERLAY_DR_IP, "10.1.2.3");
        let mut new = old.clone();
        set_annotation(&mut new, HYBRID_OVERLAY_DR_IP, " 10.1.2.3");
        assert!(node_changed(&old, &new));
    }

    #[test]
    fn test_no_host_subnet_flip() {
        let old = base_node();
        let mut new = old.clone();
        new.metadata.labels = Some(BTreeMap::from([(NO_HOST_SUBNET_LABEL.to_string(), String::new())]));
        assert!(no_host_subnet(&new));
        assert!(node_changed(&old, &new));
    }

    #[test]
    fn test_both_unresolvable_is_unchanged() {
        let old = node("worker-1", &[], None);
        let mut new = old.clone();
        new.metadata.resource_version = Some("7".to_string());
        assert!(!node_changed(&old, &new));
    }

    #[test]
    fn test_pod_same_addresses() {
        let old = pod("api-0", "worker-1", &["10.1.2.5/24", "fd01::5/64"], "0a:58:0a:01:02:05");
        let mut new = old.clone();
        new.metadata.labels = Some(BTreeMap::from([("app".to_string(), "api".to_string())]));
        assert!(!pod_changed(&old, &new));
    }

    #[test]
    fn test_pod_ip_added() {
        let old = pod("api-0", "worker-1", &["10.1.2.5/24"], "0a:58:0a:01:02:05");
        let new = pod("api-0", "worker-1", &["10.1.2.5/24", "fd01::5/64"], "0a:58:0a:01:02:05");
        assert!(pod_changed(&old, &new));
    }

    #[test]
    fn test_pod_ip_order_matters() {
        let old = pod("api-0", "worker-1", &["10.1.2.5/24", "fd01::5/64"], "0a:58:0a:01:02:05");
        let new = pod("api-0", "worker-1", &["fd01::5/64", "10.1.2.5/24"], "0a:58:0a:01:02:05");
        assert!(pod_changed(&old, &new));
    }

    #[test]
    fn test_pod_ip_value_and_mac() {
        let old = pod("api-0", "worker-1", &["10.1.2.5/24"], "0a:58:0a:01:02:05");
        let moved = pod("api-0", "worker-1", &["10.1.2.6/24"], "0a:58:0a:01:02:05");
        assert!(pod_changed(&old, &moved));
        let remac = pod("api-0", "worker-1", &["10.1.2.5/24"], "0a:58:0a:01:02:06");
        assert!(pod_changed(&old, &remac));
    }

    #[test]
    fn test_pod_annotation_appearing_is_a_change() {
        let mut old = pod("api-0", "worker-1", &["10.1.2.5/24"], "0a:58:0a:01:02:05");
        old.metadata.annotations = None;
        let new = pod("api-0", "worker-1", &["10.1.2.5/24"], "0a:58:0a:01:02:05");
        assert!(pod_changed(&old, &new));
        assert!(pod_changed(&new, &old));
        assert!(!pod_changed(&old, &old.clone()));
    }
}
