//! HTTP request handlers.

pub mod assets;
pub mod common;
pub mod health;
pub mod reconcile;
pub mod records;

pub use assets::*;
pub use common::*;
pub use health::*;
pub use reconcile::*;
pub use records::*;
