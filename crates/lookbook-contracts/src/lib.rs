pub mod assets;
pub mod error;
pub mod events;
pub mod records;

/// Number of generation calls issued per target garment.
pub const SHOTS_PER_TARGET: u32 = 4;
