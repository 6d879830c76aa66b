//! Internal implementation details.

pub(crate) mod destroy_bag;
pub(crate) mod resolution;

pub(crate) use destroy_bag::DestroyBag;
pub(crate) use resolution::{Frame, WaitGraph};
