pub mod config;
pub mod db;
pub mod leads;
pub mod mailer;
pub mod model;
pub mod notify;
pub mod states;
