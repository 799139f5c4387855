//! Content schema metadata

pub mod models;
pub mod parse;

pub use models::{
    Attribute, ComponentSchema, ContentTypeSchema, SEO_MEDIA_FIELDS, SchemaRegistry,
    effective_attribute,
};
pub use parse::parse_schema;
