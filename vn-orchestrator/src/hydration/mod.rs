//! Multi-pass XML expansion: href merging, custom function expansion,
//! attribute placeholders, and select-by-reference cloning.

mod attribute_select;
mod engine;
pub mod fetchers;
mod href;
mod select;
mod use_function;

pub use self::attribute_select::AttributeSelectHydrationStrategy;
pub use self::engine::HydrationEngine;
pub use self::engine::HydrationItem;
pub use self::engine::HydrationStrategy;
pub use self::href::HrefHydrationStrategy;
pub use self::select::SelectHydrationStrategy;
pub use self::use_function::UseFunctionHydrationStrategy;
