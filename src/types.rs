use crate::constants::{TILE_HEIGHT, TILE_WIDTH};

/// Signed pixel rectangle. Width and height are extents, so the
/// right/bottom edges are at `x + w - 1` / `y + h - 1` inclusive.
/// Negative origins are legal; the canvas grows in any direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Rect { x, y, w, h }
    }

    /// Rectangle containing nothing. Used as the extent of an empty device.
    pub const fn empty() -> Self {
        Rect { x: 0, y: 0, w: 0, h: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn left(&self) -> i32 {
        self.x
    }

    pub fn top(&self) -> i32 {
        self.y
    }

    /// Inclusive right edge
    pub fn right(&self) -> i32 {
        self.x + self.w - 1
    }

    /// Inclusive bottom edge
    pub fn bottom(&self) -> i32 {
        self.y + self.h - 1
    }

    /// Flip negative extents so that w and h come out non-negative
    pub fn normalized(&self) -> Rect {
        let mut r = *self;
        if r.w < 0 {
            r.x += r.w;
            r.w = -r.w;
        }
        if r.h < 0 {
            r.y += r.h;
            r.h = -r.h;
        }
        r
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        !self.is_empty()
            && x >= self.x
            && x <= self.right()
            && y >= self.y
            && y <= self.bottom()
    }

    pub fn contains(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && other.x >= self.x
            && other.right() <= self.right()
            && other.y >= self.y
            && other.bottom() <= self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Intersection of two rectangles; empty if they do not overlap
    pub fn intersect(&self, other: &Rect) -> Rect {
        if self.is_empty() || other.is_empty() {
            return Rect::empty();
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right < x || bottom < y {
            Rect::empty()
        } else {
            Rect::new(x, y, right - x + 1, bottom - y + 1)
        }
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.w, self.h)
    }
}

/// Column of the tile covering pixel column x. Floor division, so
/// negative coordinates map to negative tile columns.
#[inline]
pub fn x_to_col(x: i32) -> i32 {
    x.div_euclid(TILE_WIDTH)
}

/// Row of the tile covering pixel row y
#[inline]
pub fn y_to_row(y: i32) -> i32 {
    y.div_euclid(TILE_HEIGHT)
}

/// Pixel rectangle covered by the tile at (col, row)
#[inline]
pub fn tile_rect(col: i32, row: i32) -> Rect {
    Rect::new(col * TILE_WIDTH, row * TILE_HEIGHT, TILE_WIDTH, TILE_HEIGHT)
}
