mod layout;
mod writers;

pub use layout::{safe_name, Layout};
pub use writers::{
    append_jsonl, fetch_to_raw_record, write_items, write_json, write_links, write_raw_pages,
    WriterOptions,
};
