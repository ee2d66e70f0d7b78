//! Source & run repository backed by SQLite.

pub mod db;
pub mod models;

pub use db::{DbHandle, DraftDb};
