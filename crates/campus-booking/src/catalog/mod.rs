//! Products published by organizational units.

pub mod product;

pub use product::{Product, ProductDraft, ProductKind, ProductState, TimeMode};
