/// Event type under which every database event is published on the bus.
pub const IDXD_EVENT: &str = "idxd_event";

/// First value produced by a store's key generator.
pub const INITIAL_GENERATED_KEY: u64 = 1;

/// Largest value a key generator may produce before reporting exhaustion.
pub const MAX_GENERATED_KEY: u64 = 9_007_199_254_740_992;

/// Version a database reports before its first successful upgrade.
pub const INITIAL_DATABASE_VERSION: u32 = 0;
