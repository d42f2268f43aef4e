//! Error kinds shared by every component in this crate.
//!
//! Each kind is a unit struct implementing [`error_stack::Context`], the same
//! shape the store module uses for its own errors: a marker type, a short
//! `Display` sentence, and no payload of its own. Callers attach the
//! offending id, slot, or pattern fragment with `.attach_printable(...)` at
//! the point the error is raised.

use std::fmt;

use error_stack::Context;

/// A triple slot referenced an abstraction that does not belong to this
/// store, or was neither `SELF` nor a handle.
#[derive(Debug)]
#[must_use]
pub struct InvalidSlot;

impl fmt::Display for InvalidSlot {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("a triple slot did not contain a valid abstraction")
    }
}

impl Context for InvalidSlot {}

/// A triple did not have exactly three slots.
#[derive(Debug)]
#[must_use]
pub struct ShapeError;

impl fmt::Display for ShapeError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("a triple did not have exactly three slots")
    }
}

impl Context for ShapeError {}

/// A handle was accessed after its target was force-deleted.
#[derive(Debug)]
#[must_use]
pub struct UseAfterDelete;

impl fmt::Display for UseAfterDelete {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("the abstraction behind this handle has been deleted")
    }
}

impl Context for UseAfterDelete {}

/// Either way a network transformation can fail.
#[derive(Debug)]
#[must_use]
pub enum TransformError {
    /// A template slot was neither `SELF`, a source-store handle, nor a
    /// handle already marked as belonging to the target store.
    InvalidSlot,
    /// A seed handle did not belong to the claimed source store.
    WrongStore,
}

impl fmt::Display for TransformError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSlot => fmt.write_str("a transformation template slot did not contain a valid abstraction"),
            Self::WrongStore => fmt.write_str("a transformation seed did not belong to the source store"),
        }
    }
}

impl Context for TransformError {}

/// The durable backend failed to complete an operation.
#[derive(Debug)]
#[must_use]
pub struct BackendIo;

impl fmt::Display for BackendIo {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("the durable backend encountered an I/O error")
    }
}

impl Context for BackendIo {}

/// A RALJ document could not be decoded.
#[derive(Debug)]
#[must_use]
pub struct MalformedInput;

impl fmt::Display for MalformedInput {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("the RALJ document is malformed")
    }
}

impl Context for MalformedInput {}

/// A search pattern could not be compiled.
#[derive(Debug)]
#[must_use]
pub struct PatternError;

impl fmt::Display for PatternError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("the search pattern could not be compiled")
    }
}

impl Context for PatternError {}

/// The store encountered an error not covered by a more specific kind.
#[derive(Debug)]
#[must_use]
pub struct StoreError;

impl fmt::Display for StoreError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("the store encountered an error")
    }
}

impl Context for StoreError {}

/// A migration failed to apply to the durable backend.
#[derive(Debug)]
#[must_use]
pub struct MigrationError;

impl fmt::Display for MigrationError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str("the store encountered a migration error")
    }
}

impl Context for MigrationError {}
