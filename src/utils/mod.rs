mod ranges;

pub use self::ranges::ranges_tile;
