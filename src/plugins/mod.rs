//! Policy subsystems layered on the runtime store.

pub mod capture;
pub mod gate;
pub mod oracle;
pub mod registry;
pub mod throttle;
