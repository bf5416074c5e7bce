//! Message dispatch for the broker.
//!
//! The reactor decodes one frame per readiness event and hands the result to
//! the [`DispatchTable`]. The table checks the command against its route,
//! enforces arity and attachment rules, and runs the handler with access to
//! the client registry and the descriptor pool.
//!
//! ## Routes
//!
//! | Message                    | Attachment | Effect                              |
//! |----------------------------|------------|-------------------------------------|
//! | `fd:load:<name>`           | required   | pool under (sender, name)           |
//! | `fd:pass:<name>[:<peer>]`  | none       | deliver as `fd:recv:<name>:<from>`  |
//! | `fd:release:<name>`        | none       | close the pooled descriptor         |
//! | `peer:list`                | none       | reply `peer:list:<id>*`             |
//!
//! Failures never propagate past the reactor's per-event boundary. Each
//! [`DispatchError`] carries a [`Disposition`] telling the reactor whether to
//! drop the message or a connection.

mod errors;
mod handlers;
mod table;
#[cfg(test)]
mod tests;

pub use self::errors::{DispatchError, Disposition};
pub use self::table::{Arity, DispatchTable, Handler, Request, Route, Session};
