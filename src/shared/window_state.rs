//! Shared window state
//!
//! Plain geometry types used by the stack, the grab engine and the backends.

/// Window geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Right edge (exclusive)
    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    /// Bottom edge (exclusive)
    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    /// Centre point, rounded towards the origin
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width as i32 / 2, self.y + self.height as i32 / 2)
    }

    /// Clamp a point into this rectangle
    pub fn clamp_point(&self, x: i32, y: i32) -> (i32, i32) {
        let max_x = (self.right() - 1).max(self.x);
        let max_y = (self.bottom() - 1).max(self.y);
        (x.clamp(self.x, max_x), y.clamp(self.y, max_y))
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Whether the two rectangles share any area
    pub fn intersects(&self, other: &Geometry) -> bool {
        self.x < other.right() && other.x < self.right() && self.y < other.bottom() && other.y < self.bottom()
    }
}
