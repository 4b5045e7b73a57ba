// src/core/cluster/ha.rs

//! HA Partner Resolver (§4.9), grounded on `hmha.c`'s
//! `hm_ha_resolve_active_backup()`: scan the group for a candidate partner,
//! resolve a concrete `current_role` for both sides, and link them.

use crate::core::errors::{HmError, HmResult};
use crate::core::registry::{Notification, Registry, Role};
use tracing::{info, warn};

/// Outcome of a resolution pass, used by the caller to decide whether a
/// HA_UPDATE gossip message and a local HA_NOTIFY must be emitted.
pub struct ResolveOutcome {
    pub notifications: Vec<Notification>,
    pub role_changed: bool,
}

/// Run the resolver for `node_index`, per the four cases in the design:
/// no match, remote-with-conflicting-desired-roles, same-location, and
/// remote-with-distinct-desired-roles.
pub fn resolve(registry: &Registry, node_index: u32) -> HmResult<ResolveOutcome> {
    let (group, location_index, desired_role) = {
        let node = registry
            .nodes
            .get(&node_index)
            .ok_or(HmError::NodeNotFound(node_index))?;
        (node.group, node.location_index, node.role)
    };

    let candidate = registry
        .nodes
        .iter()
        .filter(|n| n.index != node_index && n.group == group)
        .map(|n| n.index)
        .min(); // lower index stands in for "the earlier node" (see DESIGN.md)

    let Some(partner_index) = candidate else {
        // Case 1: no match — solo node, no partner.
        let changed = registry.nodes.get(&node_index).unwrap().current_role != Role::Active;
        let notifications = registry.update_node_role(node_index, Role::Active)?;
        registry.nodes.get_mut(&node_index).unwrap().partner = None;
        return Ok(ResolveOutcome {
            notifications,
            role_changed: changed,
        });
    };

    let (partner_location, partner_role, partner_current) = {
        let partner = registry.nodes.get(&partner_index).unwrap();
        (partner.location_index, partner.role, partner.current_role)
    };

    let same_location = partner_location == location_index;

    let (n_current, p_current) = if !same_location {
        if partner_role == desired_role {
            // Case 2: remote conflict — the peer's role is authoritative,
            // N takes the opposite.
            (opposite(partner_role), partner_current)
        } else {
            // Case 4: remote, distinct desired roles — grant each its own.
            (desired_role, partner_role)
        }
    } else if desired_role == partner_role {
        // Case 3: co-located, same desired role.
        if partner_current != Role::None {
            (opposite(partner_current), partner_current)
        } else {
            return Err(HmError::Config(format!(
                "nodes {node_index} and {partner_index} are co-located, both group {group}, \
                 both desire role {desired_role:?}, and neither has a resolved role — refusing to start"
            )));
        }
    } else {
        (desired_role, partner_role)
    };

    let role_changed = registry.nodes.get(&node_index).unwrap().current_role != n_current;
    let mut notifications = registry.update_node_role(node_index, n_current)?;
    registry.nodes.get_mut(&node_index).unwrap().partner = Some(partner_index);

    notifications.extend(registry.update_node_role(partner_index, p_current)?);
    registry.nodes.get_mut(&partner_index).unwrap().partner = Some(node_index);

    info!(
        node = node_index,
        partner = partner_index,
        ?n_current,
        "HA partner resolved"
    );

    Ok(ResolveOutcome {
        notifications,
        role_changed,
    })
}

fn opposite(role: Role) -> Role {
    match role {
        Role::Active => Role::Passive,
        Role::Passive => Role::Active,
        Role::None => {
            warn!("opposite() called on Role::None, defaulting to Passive");
            Role::Passive
        }
    }
}

/// Handles an explicit client HA_STATUS_UPDATE (§4.9): when the client
/// supplies a partner id it must match the resolved partner; otherwise the
/// call is rejected rather than silently accepted.
pub fn apply_client_update(
    registry: &Registry,
    node_index: u32,
    claimed_partner: Option<u32>,
    new_role: Role,
) -> HmResult<Vec<Notification>> {
    {
        let node = registry
            .nodes
            .get(&node_index)
            .ok_or(HmError::NodeNotFound(node_index))?;
        if let Some(claimed) = claimed_partner {
            if node.partner != Some(claimed) {
                return Err(HmError::Protocol(format!(
                    "client-claimed partner {claimed} does not match resolved partner {:?}",
                    node.partner
                )));
            }
        }
    }
    registry.update_node_role(node_index, new_role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{Location, Node};

    fn node(index: u32, group: u32, location: u32, role: Role, local: bool) -> Node {
        Node::new(index, group, role, location, local)
    }

    #[test]
    fn solo_node_has_no_partner() {
        let reg = Registry::new();
        reg.add_location(Location::new(1, 1000));
        reg.add_node(node(1, 1, 1, Role::Active, true)).unwrap();
        let outcome = resolve(&reg, 1).unwrap();
        assert_eq!(reg.nodes.get(&1).unwrap().partner, None);
        assert_eq!(reg.nodes.get(&1).unwrap().current_role, Role::Active);
        assert!(outcome.role_changed);
        assert_eq!(outcome.notifications.len(), 1);
    }

    #[test]
    fn client_update_rejects_mismatched_partner_and_notifies_on_success() {
        let reg = Registry::new();
        reg.add_location(Location::new(1, 1000));
        reg.add_location(Location::new(2, 1000));
        reg.add_node(node(10, 1, 1, Role::Active, true)).unwrap();
        reg.add_node(node(20, 1, 2, Role::Active, false)).unwrap();
        resolve(&reg, 20).unwrap();
        resolve(&reg, 10).unwrap();

        let wrong_partner = apply_client_update(&reg, 10, Some(999), Role::Passive);
        assert!(matches!(wrong_partner, Err(HmError::Protocol(_))));

        let notes = apply_client_update(&reg, 10, Some(20), Role::Passive).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(reg.nodes.get(&10).unwrap().current_role, Role::Passive);
    }

    #[test]
    fn remote_conflict_grants_opposite_role() {
        let reg = Registry::new();
        reg.add_location(Location::new(1, 1000));
        reg.add_location(Location::new(2, 1000));
        reg.add_node(node(10, 1, 1, Role::Active, true)).unwrap();
        reg.add_node(node(20, 1, 2, Role::Active, false)).unwrap();

        resolve(&reg, 20).unwrap();
        resolve(&reg, 10).unwrap();

        let a = reg.nodes.get(&10).unwrap();
        let b = reg.nodes.get(&20).unwrap();
        assert_eq!(a.partner, Some(20));
        assert_eq!(b.partner, Some(10));
        assert_ne!(a.current_role, b.current_role);
    }

    #[test]
    fn same_location_both_none_is_config_error() {
        let reg = Registry::new();
        reg.add_location(Location::new(1, 1000));
        reg.add_node(node(1, 1, 1, Role::Active, true)).unwrap();
        reg.add_node(node(2, 1, 1, Role::Active, true)).unwrap();
        let err = resolve(&reg, 2);
        assert!(matches!(err, Err(HmError::Config(_))));
    }
}
