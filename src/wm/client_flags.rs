//! Client Flags
//!
//! Bitfield flags for client state, window types and stacking layers.

use bitflags::bitflags;

bitflags! {
    /// CLIENT flags - Window state flags that feed the layer policy and routing
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClientFlags: u32 {
        const ABOVE                = 1 << 0;
        const BELOW                = 1 << 1;
        const FULLSCREEN           = 1 << 2;
        const MAXIMIZED_VERT       = 1 << 3;
        const MAXIMIZED_HORIZ      = 1 << 4;
        const OVERRIDE_REDIRECT    = 1 << 5;
        /// Dialog attached to its parent (moves with it)
        const ATTACHED             = 1 << 6;
        const MAPPED               = 1 << 7;
        const UNMANAGING           = 1 << 8;
        const MOVING_RESIZING      = 1 << 9;
        /// Client can be driven by the X11 passive-grab machinery
        const X11_CLIENT           = 1 << 10;
    }
}

impl ClientFlags {
    pub fn maximized() -> Self {
        Self::MAXIMIZED_VERT | Self::MAXIMIZED_HORIZ
    }

    pub fn is_maximized(&self) -> bool {
        self.contains(Self::MAXIMIZED_VERT) && self.contains(Self::MAXIMIZED_HORIZ)
    }
}

/// Window type (EWMH _NET_WM_WINDOW_TYPE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WindowType {
    #[default]
    Normal,
    Desktop,
    Dock,
    Dialog,
    ModalDialog,
    Toolbar,
    Menu,
    Utility,
    Splashscreen,
    Notification,
    DropdownMenu,
    PopupMenu,
    Tooltip,
    Combo,
    Dnd,
    /// Override-redirect window of no more specific type
    OverrideOther,
}

impl WindowType {
    /// Types that behave like transients even without `WM_TRANSIENT_FOR`
    pub fn is_transient_type(&self) -> bool {
        matches!(
            self,
            Self::Dialog | Self::ModalDialog | Self::Toolbar | Self::Menu | Self::Utility
        )
    }

    /// Types that always live in the override-redirect layer
    pub fn is_override_layer_type(&self) -> bool {
        matches!(
            self,
            Self::DropdownMenu
                | Self::PopupMenu
                | Self::Tooltip
                | Self::Notification
                | Self::Combo
                | Self::OverrideOther
        )
    }
}

/// Window layer (for stacking)
///
/// Higher layers always stack above lower ones regardless of stack position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum WindowLayer {
    Desktop = 0,
    Bottom = 1,
    #[default]
    Normal = 2,
    /// Shared by always-on-top windows and docks
    Top = 4,
    OverrideRedirect = 7,
}

impl WindowLayer {
    /// Docks share the top layer
    pub const DOCK: WindowLayer = WindowLayer::Top;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_ordering() {
        assert!(WindowLayer::OverrideRedirect > WindowLayer::DOCK);
        assert!(WindowLayer::DOCK > WindowLayer::Normal);
        assert!(WindowLayer::Normal > WindowLayer::Bottom);
        assert!(WindowLayer::Bottom > WindowLayer::Desktop);
        assert_eq!(WindowLayer::Top as u8, 4);
    }

    #[test]
    fn test_transient_types() {
        assert!(WindowType::Dialog.is_transient_type());
        assert!(WindowType::Utility.is_transient_type());
        assert!(!WindowType::Normal.is_transient_type());
        assert!(!WindowType::Tooltip.is_transient_type());
        assert!(WindowType::Tooltip.is_override_layer_type());
    }
}
