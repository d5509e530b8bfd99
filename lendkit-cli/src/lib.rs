//! The `lendkit` developer CLI and its HTTP front.
//!
//! Both surfaces are thin: [`actions`] turns each request into a call on
//! `lendkit-core` and a structured [`Outcome`](lendkit_core::Outcome), and
//! [`server`] / the binary only decide how that outcome is delivered.
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod actions;
pub mod server;

mod services;
pub use services::Services;
