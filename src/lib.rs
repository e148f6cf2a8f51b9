//! mdtools: markdown preview pipeline, render scheduling, diagram activation,
//! document binding and export.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
