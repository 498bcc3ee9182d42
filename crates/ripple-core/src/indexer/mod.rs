pub mod dependencies;
pub mod extractors;
pub mod filesystem;
pub mod imports;
pub mod parser;
pub mod pipeline;
