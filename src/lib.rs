//! view_config: multi-tenant view configuration service.
//!
//! Environments own views composed from shared menu/submenu catalogs. Stored
//! views are expanded into self-contained trees on read, and a per-environment
//! secret gates the public read path.
//!
//! Everything persists in Sled; the REST layer (Axum) is a thin shell over the
//! engine modules below.

pub mod auth;
pub mod catalog;
pub mod config;
pub mod environments;
pub mod error;
pub mod expand;
pub mod gateway;
pub mod importer;
pub mod models;
// REST API: Axum handlers, OpenAPI docs and Swagger UI
pub mod rest;
pub mod storage;
pub mod telemetry;
pub mod views;
