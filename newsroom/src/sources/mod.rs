pub mod google_links;
pub mod google_news;

pub use google_news::GoogleNewsSource;
