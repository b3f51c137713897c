pub mod deny_list;
pub mod events;
pub mod gates;
pub mod housekeeping;
pub mod levels;
pub mod permissions;
pub mod raid_guard;
pub mod rate_limiter;
pub mod registry;
pub mod relay;
pub mod relay_engine;
pub mod reports;
pub mod sanitizer;
pub mod validation;
