//! HTTP API: bearer-token identity, stock and movement routes, catalog admin.

pub mod app;
pub mod middleware;
