pub mod config;
pub mod github;
pub mod markup;
pub mod provenance;
pub mod revisions;
pub mod runtime;
pub mod ticket_markup;
pub mod tickets;
pub mod trac;
pub mod wiki_export;
pub mod wiki_markup;
