/// Represents the extent of a bounding volume along one of the X, Y, and Z axes.
/// The concrete ranges delegate logic to the macro generated structure

use serde::{Serialize, Deserialize};

macro_rules! create_range {
    ($x: ident) =>
    {
        /// Represents a closed interval along one axis
        #[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
        pub struct $x
        {
            pub min: f32,
            pub max: f32
        }

        impl $x
        {
            /// Creates a new range that represents the given interval
            ///
            /// `min` - the starting point of the range
            /// `max` - the end point of the range. Should not be smaller than min
            pub fn new(min: f32, max: f32) -> $x { $x{ min, max } }

            /// Creates a range that contains nothing. Including any point into it yields a range
            /// around only that point
            pub fn empty() -> $x { $x{ min: f32::MAX, max: f32::MIN } }

            /// Checks if the range holds at least one point
            pub fn is_valid(&self) -> bool { self.min <= self.max }

            /// Get the centre of the range
            pub fn centre(&self) -> f32
            {
                (self.min + self.max) / 2.0
            }

            /// Combine two ranges such that the resulting range can hold both ranges
            ///
            /// `other_range` - the other range to combine with this range
            pub fn combine(&self, other_range: &$x) -> $x
            {
                $x{ min: self.min.min(other_range.min), max: self.max.max(other_range.max) }
            }

            /// Grow the range so that it holds the given point
            ///
            /// `point` - the value the range must contain afterwards
            pub fn include(&mut self, point: f32)
            {
                self.min = self.min.min(point);
                self.max = self.max.max(point);
            }

            /// Get the length of the range
            pub fn length(&self) -> f32 { self.max - self.min }

            /// Check if the other range overlaps with this one
            ///
            /// `range` - the other range to check for an overlap
            pub fn overlap_range(&self, range: &$x) -> bool { self.min <= range.max && self.max >= range.min }

            /// Check if the other range lies entirely within this one
            ///
            /// `range` - the range that may be enclosed by this range
            pub fn contains_range(&self, range: &$x) -> bool { self.min <= range.min && range.max <= self.max }

            /// Checks if a point is within the range
            ///
            /// `point` - point to check if it is within this range
            pub fn point_within(&self, point: f32) -> bool { self.min <= point && point <= self.max }
        }
    };
}

create_range!(XRange);
create_range!(YRange);
create_range!(ZRange);
