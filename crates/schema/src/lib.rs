#![warn(missing_docs)]

//! Declarative value schemas and the validation facade.
//!
//! Every typed surface in covenant (procedure inputs and outputs, channel
//! params, connection requests and contexts, channel messages) is described
//! by a [`Schema`] and checked through one interface:
//! [`Schema::validate`], which returns either nothing or a non-empty list
//! of [`Issues`] with paths into the offending value.
//!
//! Schemas are plain data built with the associated constructors, so a
//! covenant declaration reads as a literal description of its wire shapes.

mod issues;
mod schema;

pub use issues::{Issue, Issues, PathSeg};
pub use schema::Schema;
