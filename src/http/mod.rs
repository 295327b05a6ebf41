//! actix-web surface over [CategoryService](crate::service::CategoryService).
//!
//! Handlers are generic over the store so the server binary can pick a backend at startup.
//! Errors are returned as JSON `{kind, message, id?, field?}` with 400 for validation failures,
//! 404 for unknown ids, 409 for policy conflicts and 500 otherwise.
pub mod category;
