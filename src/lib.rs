//! HTTP service that turns a recipe page URL into a structured recipe by
//! fetching the page and asking a language model for schema-shaped JSON.

pub mod config;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod providers;
pub mod server;

pub use extract::{ExtractionError, ExtractorOptions, RecipeExtractor};
pub use models::{ExtractRequest, ExtractResponse, Ingredient, Recipe, Step};
pub use server::{router, AppState};
