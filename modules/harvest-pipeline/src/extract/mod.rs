mod links;
mod structured;
mod xpath;

pub use links::{extract_links, LinkExtractRequest};
pub use structured::{boilerplate_ratio, html_to_structured, StructuredDoc};
pub use xpath::xpath_to_css;
