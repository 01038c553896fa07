mod browser;
mod site;

pub use browser::{rendered_input, FormSession};
pub use site::{
    init_tracing, text_long, TestSite, FIELD_MEDIA, FIELD_MULTI, FIELD_SINGLE, HOST_TYPE,
    TARGET_TYPE,
};
