//! Transients Module
//!
//! Transient-for chains and window-group transience.

use std::collections::HashSet;

use crate::wm::client::{Client, WindowArena, WindowId};

/// Window is a dialog/utility-like type
pub fn has_transient_type(client: &Client) -> bool {
    client.window_type.is_transient_type()
}

/// Transient-type window that names no parent applies to its whole group
pub fn is_transient_for_whole_group(client: &Client) -> bool {
    has_transient_type(client) && client.transient_for.is_none() && client.group.is_some()
}

/// Walk the `transient_for` chain starting at the parent of `id`.
///
/// Stops on a repeated window so a cyclic chain terminates.
pub fn ancestors(arena: &WindowArena, id: WindowId) -> Vec<WindowId> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([id]);
    let mut current = arena.get(id).and_then(|c| c.transient_for);

    while let Some(parent) = current {
        if !seen.insert(parent) {
            break;
        }
        chain.push(parent);
        current = arena.get(parent).and_then(|c| c.transient_for);
    }

    chain
}

/// Making `id` transient for `parent` would close a cycle
pub fn would_create_loop(arena: &WindowArena, id: WindowId, parent: WindowId) -> bool {
    parent == id || ancestors(arena, parent).contains(&id)
}

/// First window walking up from `id` that is not an attached dialog.
///
/// Moving an attached dialog moves its parent instead.
pub fn first_non_attached_ancestor(arena: &WindowArena, id: WindowId) -> WindowId {
    let mut target = id;
    let mut seen = HashSet::from([id]);

    while let Some(client) = arena.get(target) {
        if !client.is_attached_dialog() {
            break;
        }
        match client.transient_for {
            Some(parent) if seen.insert(parent) => target = parent,
            _ => break,
        }
    }

    target
}
