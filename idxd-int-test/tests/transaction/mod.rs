mod find_pipeline_test;
mod session_test;

use idxd::common::Record;
use serde_json::json;

pub fn book(title: &str, author: &str, pages: u32) -> Record {
    json!({"title": title, "author": author, "pages": pages})
}

pub fn shelf() -> Vec<Record> {
    vec![
        book("A Wizard of Earthsea", "Le Guin", 10),
        book("The Left Hand of Darkness", "Le Guin", 20),
        book("Dune", "Herbert", 30),
    ]
}
