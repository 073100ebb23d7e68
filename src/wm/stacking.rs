//! Stacking Module
//!
//! Manages window z-order: layers, dense stack positions and transiency
//! constraints.
//!
//! Every stacked window has a unique `stack_position` in `0..n_positions`.
//! The canonical order sorts by layer first and position second. Mutations
//! only set dirty flags; `ensure_sorted` recomputes layers, reapplies the
//! constraint graph and re-sorts, in that order, each pass gated by its flag.

use std::cmp::Ordering;

use tracing::{debug, trace};

use crate::wm::client::{WindowArena, WindowId};
use crate::wm::client_flags::{ClientFlags, WindowLayer, WindowType};
use crate::wm::constraints::ConstraintGraph;
use crate::wm::signals::Signal;
use crate::wm::transients;

/// Window stack
pub struct Stack {
    /// Canonical order, bottom to top, once sorted
    sorted: Vec<WindowId>,

    /// Number of positions handed out; equals the number of stacked windows
    n_positions: usize,

    /// Nested freeze count; `changed` is not emitted while non-zero
    freeze_count: u32,

    need_resort: bool,
    need_relayer: bool,
    need_constrain: bool,

    /// A resort reordered windows; fullscreen occlusion must be rechecked
    fullscreen_check_pending: bool,

    /// Bumped every time `changed` is emitted
    generation: u64,

    /// Emitted after the stack settled into a new canonical order
    pub changed: Signal<()>,
    pub window_added: Signal<WindowId>,
    pub window_removed: Signal<WindowId>,
}

impl Stack {
    /// Create a new, empty stack
    pub fn new() -> Self {
        Self {
            sorted: Vec::new(),
            n_positions: 0,
            freeze_count: 0,
            need_resort: false,
            need_relayer: false,
            need_constrain: false,
            fullscreen_check_pending: false,
            generation: 0,
            changed: Signal::new(),
            window_added: Signal::new(),
            window_removed: Signal::new(),
        }
    }

    fn position_of(arena: &WindowArena, window: WindowId) -> usize {
        match arena.get(window).and_then(|c| c.stack_position) {
            Some(position) => position,
            None => panic!("window {} is not in the stack", window),
        }
    }

    /// Add a window on top of every position
    pub fn add(&mut self, arena: &mut WindowArena, window: WindowId) {
        debug!("Adding window {} to the stack", window);

        let Some(client) = arena.get_mut(window) else {
            panic!("window {} is not managed", window);
        };
        assert!(
            client.stack_position.is_none(),
            "window {} had stack position already",
            window
        );

        client.stack_position = Some(self.n_positions);
        self.n_positions += 1;
        self.sorted.push(window);

        self.need_resort = true;
        self.need_constrain = true;
        self.need_relayer = true;

        trace!("Window {} has stack_position initialized to {}", window, self.n_positions - 1);
        self.window_added.emit(&window);
        self.changed(arena);
    }

    /// Remove a window, keeping the remaining positions dense
    pub fn remove(&mut self, arena: &mut WindowArena, window: WindowId) {
        debug!("Removing window {} from the stack", window);
        assert!(
            arena.get(window).is_some_and(|c| c.stack_position.is_some()),
            "window {} is not in the stack",
            window
        );

        // Move to the top position first so removing it leaves no gap
        self.set_stack_position_no_sync(arena, window, self.n_positions - 1);
        if let Some(client) = arena.get_mut(window) {
            client.stack_position = None;
        }
        self.n_positions -= 1;
        self.sorted.retain(|&w| w != window);

        self.window_removed.emit(&window);
        self.changed(arena);
    }

    /// Layer-affecting state of `window` changed
    pub fn update_layer(&mut self, arena: &mut WindowArena, window: WindowId) {
        trace!("Layer update requested by {}", window);
        self.need_relayer = true;
        self.changed(arena);
    }

    /// Transiency of `window` changed
    pub fn update_transient(&mut self, arena: &mut WindowArena, window: WindowId) {
        trace!("Transient update requested by {}", window);
        self.need_constrain = true;
        self.changed(arena);
    }

    fn workspace_of(arena: &WindowArena, window: WindowId) -> u32 {
        arena
            .get(window)
            .and_then(|c| c.workspace)
            .unwrap_or(arena.active_workspace)
    }

    /// Raise a window to the highest position used on its workspace
    pub fn raise(&mut self, arena: &mut WindowArena, window: WindowId) {
        self.ensure_sorted(arena);

        let current = Self::position_of(arena, window);
        let workspace = Self::workspace_of(arena, window);
        let max_position = self
            .sorted
            .iter()
            .filter_map(|&w| arena.get(w))
            .filter(|c| c.located_on_workspace(workspace))
            .filter_map(|c| c.stack_position)
            .fold(current, usize::max);

        if max_position == current {
            return;
        }

        debug!("Raising window {} from position {} to {}", window, current, max_position);
        self.set_stack_position_no_sync(arena, window, max_position);
        self.changed(arena);
    }

    /// Lower a window to the lowest position used on its workspace
    pub fn lower(&mut self, arena: &mut WindowArena, window: WindowId) {
        self.ensure_sorted(arena);

        let current = Self::position_of(arena, window);
        let workspace = Self::workspace_of(arena, window);
        let min_position = self
            .sorted
            .iter()
            .filter_map(|&w| arena.get(w))
            .filter(|c| c.located_on_workspace(workspace))
            .filter_map(|c| c.stack_position)
            .fold(current, usize::min);

        if min_position == current {
            return;
        }

        debug!("Lowering window {} from position {} to {}", window, current, min_position);
        self.set_stack_position_no_sync(arena, window, min_position);
        self.changed(arena);
    }

    pub fn freeze(&mut self) {
        self.freeze_count += 1;
    }

    pub fn thaw(&mut self, arena: &mut WindowArena) {
        assert!(self.freeze_count > 0, "stack thawed more often than frozen");
        self.freeze_count -= 1;
        self.changed(arena);
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze_count > 0
    }

    /// Move `window` to `position` and settle the stack
    pub fn set_stack_position(&mut self, arena: &mut WindowArena, window: WindowId, position: usize) {
        self.set_stack_position_no_sync(arena, window, position);
        self.changed(arena);
    }

    /// Core renumbering primitive.
    ///
    /// Windows between the old and the new position shift by one towards
    /// the old position, freeing the destination slot.
    pub(crate) fn set_stack_position_no_sync(
        &mut self,
        arena: &mut WindowArena,
        window: WindowId,
        position: usize,
    ) {
        let current = Self::position_of(arena, window);
        assert!(
            position < self.n_positions,
            "stack position {} out of range (n_positions {})",
            position,
            self.n_positions
        );

        if position == current {
            trace!("Window {} already has position {}", window, position);
            return;
        }

        self.need_resort = true;
        self.need_constrain = true;

        let (low, high, moving_down) = if position < current {
            (position, current - 1, false)
        } else {
            (current + 1, position, true)
        };

        for &w in &self.sorted {
            if let Some(client) = arena.get_mut(w) {
                if let Some(p) = client.stack_position {
                    if p >= low && p <= high {
                        client.stack_position = Some(if moving_down { p - 1 } else { p + 1 });
                    }
                }
            }
        }

        if let Some(client) = arena.get_mut(window) {
            client.stack_position = Some(position);
        }

        trace!("Window {} had stack_position set to {}", window, position);
    }

    fn changed(&mut self, arena: &mut WindowArena) {
        if self.freeze_count > 0 {
            return;
        }

        self.ensure_sorted(arena);
        self.generation += 1;
        self.changed.emit(&());
    }

    /// Put the stack into canonical form
    pub fn ensure_sorted(&mut self, arena: &mut WindowArena) {
        self.do_relayer(arena);
        self.do_constrain(arena);
        self.do_resort(arena);
    }

    fn do_relayer(&mut self, arena: &mut WindowArena) {
        if !self.need_relayer {
            return;
        }

        debug!("Recomputing layers");
        for &w in &self.sorted {
            let layer = arena.calculate_layer(w);
            if let Some(client) = arena.get_mut(w) {
                if client.layer != layer {
                    trace!("Window {} moved from layer {:?} to {:?}", w, client.layer, layer);
                    client.layer = layer;
                    self.need_resort = true;
                    // Layer changes may invalidate the constraint pass, never the reverse
                    self.need_constrain = true;
                }
            }
        }

        self.need_relayer = false;
    }

    fn do_constrain(&mut self, arena: &mut WindowArena) {
        if !self.need_constrain {
            return;
        }

        debug!("Reapplying constraints");
        let mut graph = ConstraintGraph::build(arena, &self.sorted);
        graph.apply(|above, below| self.ensure_above(arena, above, below));

        self.need_constrain = false;
    }

    fn ensure_above(&mut self, arena: &mut WindowArena, above: WindowId, below: WindowId) {
        let (Some(above_client), Some(below_client)) = (arena.get(above), arena.get(below)) else {
            return;
        };

        let is_transient = transients::has_transient_type(above_client)
            || above_client.transient_for == Some(below);
        let below_layer = below_client.layer;

        if is_transient && above_client.layer < below_layer {
            debug!(
                "Promoting window {} from layer {:?} to {:?} due to constraint",
                above, above_client.layer, below_layer
            );
            if let Some(client) = arena.get_mut(above) {
                client.layer = below_layer;
            }
            self.need_resort = true;
        }

        let above_position = Self::position_of(arena, above);
        let below_position = Self::position_of(arena, below);
        if above_position < below_position {
            // Bumps `below` one step down
            self.set_stack_position_no_sync(arena, above, below_position);
        }
    }

    fn do_resort(&mut self, arena: &mut WindowArena) {
        if !self.need_resort {
            return;
        }

        debug!("Sorting stack list");
        let before = self.sorted.clone();
        self.sorted.sort_by(|&a, &b| Self::compare(arena, a, b));
        if self.sorted != before {
            self.fullscreen_check_pending = true;
        }

        self.need_resort = false;
    }

    /// Layer first, then stack position; `Less` means `a` is below `b`
    fn compare(arena: &WindowArena, a: WindowId, b: WindowId) -> Ordering {
        let key = |w: WindowId| arena.get(w).map(|c| (c.layer, c.stack_position));
        key(a).cmp(&key(b))
    }

    /// Topmost window
    pub fn top(&mut self, arena: &mut WindowArena) -> Option<WindowId> {
        self.ensure_sorted(arena);
        self.sorted.last().copied()
    }

    /// Bottommost window
    pub fn bottom(&mut self, arena: &mut WindowArena) -> Option<WindowId> {
        self.ensure_sorted(arena);
        self.sorted.first().copied()
    }

    /// Window directly above `window`
    pub fn above(
        &mut self,
        arena: &mut WindowArena,
        window: WindowId,
        only_within_layer: bool,
    ) -> Option<WindowId> {
        self.ensure_sorted(arena);
        let index = self.sorted.iter().position(|&w| w == window)?;
        let above = *self.sorted.get(index + 1)?;
        Self::neighbour_in_layer(arena, window, above, only_within_layer)
    }

    /// Window directly below `window`
    pub fn below(
        &mut self,
        arena: &mut WindowArena,
        window: WindowId,
        only_within_layer: bool,
    ) -> Option<WindowId> {
        self.ensure_sorted(arena);
        let index = self.sorted.iter().position(|&w| w == window)?;
        let below = *self.sorted.get(index.checked_sub(1)?)?;
        Self::neighbour_in_layer(arena, window, below, only_within_layer)
    }

    fn neighbour_in_layer(
        arena: &WindowArena,
        window: WindowId,
        neighbour: WindowId,
        only_within_layer: bool,
    ) -> Option<WindowId> {
        if only_within_layer {
            let layer = arena.get(window)?.layer;
            if arena.get(neighbour)?.layer != layer {
                return None;
            }
        }
        Some(neighbour)
    }

    /// Windows bottom to top, optionally only those on `workspace`
    pub fn list_windows(&mut self, arena: &mut WindowArena, workspace: Option<u32>) -> Vec<WindowId> {
        self.ensure_sorted(arena);
        self.sorted
            .iter()
            .copied()
            .filter(|&w| {
                workspace.is_none_or(|ws| arena.get(w).is_some_and(|c| c.located_on_workspace(ws)))
            })
            .collect()
    }

    /// `Less` when `a` is below `b`
    pub fn windows_cmp(&mut self, arena: &mut WindowArena, a: WindowId, b: WindowId) -> Ordering {
        self.ensure_sorted(arena);
        Self::compare(arena, a, b)
    }

    /// Topmost window on `workspace` that can take focus by default
    pub fn get_default_focus_window(
        &mut self,
        arena: &mut WindowArena,
        workspace: u32,
        not_this_one: Option<WindowId>,
    ) -> Option<WindowId> {
        self.ensure_sorted(arena);
        self.sorted.iter().rev().copied().find(|&w| {
            if Some(w) == not_this_one {
                return false;
            }
            arena.get(w).is_some_and(|c| {
                c.located_on_workspace(workspace)
                    && c.flags.contains(ClientFlags::MAPPED)
                    && !c.is_override_redirect()
                    && !matches!(c.window_type, WindowType::Dock | WindowType::Desktop)
                    && c.layer != WindowLayer::OverrideRedirect
            })
        })
    }

    pub fn contains(&self, window: WindowId) -> bool {
        self.sorted.contains(&window)
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn n_positions(&self) -> usize {
        self.n_positions
    }

    /// Counter bumped on every settled change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Consume the pending fullscreen recheck request
    pub fn take_fullscreen_check(&mut self) -> bool {
        std::mem::take(&mut self.fullscreen_check_pending)
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}
