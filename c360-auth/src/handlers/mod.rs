pub mod auth;
pub mod companies;
pub mod metrics;
pub mod users;
pub mod well_known;
