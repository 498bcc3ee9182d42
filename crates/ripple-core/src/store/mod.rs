pub mod database;
pub mod events;
pub mod objects;
pub mod schema;
