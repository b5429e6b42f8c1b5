//! Encodes the declared register map of a device. This information is consumed by the layout engine
//! and the bitfield builder.

mod device;
mod register;

// Anything that's part of the public API of the submodules is also part of the public API of model
pub use device::*;
pub use register::*;

/// Value paired with the issues that were skipped while producing it
///
/// Used where a failure is attributed to a smaller scope than the value itself, e.g., a device that
/// lost some of its peripherals.
#[derive(Debug)]
pub struct Partial<T, E> {
    pub value: T,
    pub skipped: Vec<E>,
}

impl<T, E> Partial<T, E> {
    pub fn new(value: T, skipped: Vec<E>) -> Self {
        Self { value, skipped }
    }

    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}
