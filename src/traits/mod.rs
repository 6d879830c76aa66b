//! Traits implemented by service authors.

mod factory;
mod injectable;

pub use factory::Factory;
pub use injectable::Injectable;
