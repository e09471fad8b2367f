//! Domain models shared by the stores, the session manager and the API layer.

pub mod auth;
