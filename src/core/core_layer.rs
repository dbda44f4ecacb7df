// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "market/mod.rs"]
pub mod market;
